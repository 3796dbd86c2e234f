//! Error types for the estimator surface.
//!
//! Two layers: [`EstimatorError`] covers the configuration/state-machine
//! surface (reported synchronously by the offending call), while
//! [`EstimationError`] covers terminal failures of a running solve. A source
//! with too few usable tuples is never an error — it is silently excluded —
//! and a failed covariance derivation only makes that covariance absent.

use crate::types::SourceKey;
use thiserror::Error;

/// A fingerprint was given two readings for the same radio source.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("fingerprint already contains a reading for source {0}")]
pub struct DuplicateSourceError(pub SourceKey);

/// Errors raised by the estimator's configuration and state machine.
#[derive(Debug, Error)]
pub enum EstimatorError {
    /// A mutator or `estimate()` was invoked while an estimation is running.
    #[error("estimator is locked while an estimation is running")]
    Locked,

    /// `estimate()` was invoked before all required fields were set.
    #[error("estimator is not ready: {0}")]
    NotReady(&'static str),

    /// A mutator was given an invalid value; prior state is unchanged.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The solve itself failed; prior results are unchanged.
    #[error(transparent)]
    Estimation(#[from] EstimationError),
}

/// Terminal failures of the joint non-linear solve.
#[derive(Debug, Error, PartialEq)]
pub enum EstimationError {
    /// Fewer usable residual rows than unknown coordinates.
    #[error("insufficient data: {residuals} residuals for {unknowns} unknowns")]
    InsufficientData { residuals: usize, unknowns: usize },

    /// The iteration cap was reached before any convergence criterion.
    #[error("no convergence after {iterations} iterations")]
    NonConvergence { iterations: usize },

    /// The damped normal equations could not be solved.
    #[error("normal equations are singular")]
    SingularNormalEquations,
}
