//! `radio_models` — Radio propagation physics and transmitter descriptions.
//!
//! # Module layout
//! - [`path_loss`]   — log-distance path-loss law in the dB domain
//! - [`transmitter`] — physical transmitter parameters (for simulation)

pub mod path_loss;
pub mod transmitter;

pub use path_loss::{PathLossModel, SPEED_OF_LIGHT};
pub use transmitter::Transmitter;
