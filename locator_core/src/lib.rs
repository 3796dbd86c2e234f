//! `locator_core` — Joint RSSI-fingerprint position and radio-source estimation.
//!
//! # Module layout
//! - [`types`]      — Fundamental types (source keys, fingerprints, results)
//! - [`finder`]     — Nearest-fingerprint ranking (plain and no-mean)
//! - [`partition`]  — Per-source grouping and unknown-vector layout
//! - [`solver`]     — Joint weighted Levenberg-Marquardt refinement
//! - [`covariance`] — Residual weighting and covariance propagation
//! - [`estimator`]  — Configuration, Idle/Running lock, listener, pipeline
//! - [`metrics`]    — Trial RMSE / success-rate accumulation
//! - [`error`]      — Typed error surface

pub mod covariance;
pub mod error;
pub mod estimator;
pub mod finder;
pub mod metrics;
pub mod partition;
pub mod solver;
pub mod types;

pub use error::{EstimationError, EstimatorError};
pub use estimator::{EstimatorListener, EstimatorState, FingerprintPositionEstimator};
pub use types::{
    EstimationResult, Fingerprint, LocatedFingerprint, LocatedSourceEstimate, Position,
    PositionCov, RadioSource, Reading, SourceKey,
};
