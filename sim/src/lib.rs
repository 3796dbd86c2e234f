//! `sim` — Deterministic fingerprint-survey simulation.
//!
//! Generates located-fingerprint databases and query fingerprints from
//! ground-truth transmitters, with Gaussian RSSI noise, miss detection,
//! detection thresholds, and injectable per-device bias.

pub mod scenarios;
pub mod survey;

pub use scenarios::{Scenario, ScenarioKind};
pub use survey::{FingerprintSurvey, InjectedBias, SurveyParams};
