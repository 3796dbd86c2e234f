//! Estimator state machine: configuration, readiness, the Idle/Running lock,
//! listener notifications, and the full estimation pipeline.
//!
//! # Pipeline per `estimate()` call
//! 1. Rank the located-fingerprint database against the query (finder)
//! 2. Partition the nearest fingerprints per radio source and lay out the
//!    unknown vector (partitioner)
//! 3. Run the joint weighted Levenberg-Marquardt solve (solver)
//! 4. Invert the information matrix and slice per-entity covariance blocks
//! 5. Publish the result; previous results survive any failure untouched
//!
//! Every mutator checks the lock first and validates synchronously; an
//! invalid value never alters prior configuration.

use crate::covariance::{extract_block, WeightingConfig};
use crate::error::EstimatorError;
use crate::finder::NearestFingerprintFinder;
use crate::partition::{partition_sources, SourceRole};
use crate::solver::{solve_joint, SolverSettings};
use crate::types::{
    EstimationResult, Fingerprint, LocatedFingerprint, LocatedSourceEstimate, Position,
    PositionCov, RadioSource, SourceKey,
};
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Synchronous estimation lifecycle notifications.
///
/// Callbacks run on the calling thread while the estimator is locked; they
/// receive no estimator handle, so configuration cannot be mutated from
/// inside a callback.
pub trait EstimatorListener<const D: usize> {
    fn estimation_started(&mut self) {}
    fn estimation_ended(&mut self, _success: bool) {}
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lock flag consulted by every mutator and by `estimate()` itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EstimatorState {
    Idle,
    Running,
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

/// Joint fingerprint position and radio-source estimator, generic over the
/// spatial dimensionality `D` (2 or 3).
pub struct FingerprintPositionEstimator<const D: usize> {
    located_fingerprints: Vec<LocatedFingerprint<D>>,
    fingerprint: Option<Fingerprint<D>>,
    min_nearest: Option<usize>,
    max_nearest: Option<usize>,
    path_loss_exponent: f64,
    use_source_path_loss_exponent: bool,
    use_no_mean_finder: bool,
    weighting: WeightingConfig,
    solver_settings: SolverSettings,
    initial_position: Option<Position<D>>,
    initial_located_sources: Vec<Arc<RadioSource<D>>>,
    listener: Option<Box<dyn EstimatorListener<D>>>,
    state: EstimatorState,
    result: Option<EstimationResult<D>>,
    /// (position, distance) of the last call's ranked candidates.
    last_nearest: Option<Vec<(Position<D>, f64)>>,
}

impl<const D: usize> Default for FingerprintPositionEstimator<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> FingerprintPositionEstimator<D> {
    pub fn new() -> Self {
        Self {
            located_fingerprints: Vec::new(),
            fingerprint: None,
            min_nearest: None,
            max_nearest: None,
            path_loss_exponent: 2.0,
            use_source_path_loss_exponent: true,
            use_no_mean_finder: true,
            weighting: WeightingConfig::default(),
            solver_settings: SolverSettings::default(),
            initial_position: None,
            initial_located_sources: Vec::new(),
            listener: None,
            state: EstimatorState::Idle,
            result: None,
            last_nearest: None,
        }
    }

    // -- mutators ----------------------------------------------------------

    /// Set the located-fingerprint database. Must be non-empty.
    pub fn set_located_fingerprints(
        &mut self,
        fingerprints: Vec<LocatedFingerprint<D>>,
    ) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        if fingerprints.is_empty() {
            return Err(EstimatorError::InvalidConfig(
                "located-fingerprint database must not be empty".into(),
            ));
        }
        self.located_fingerprints = fingerprints;
        Ok(())
    }

    /// Set the query fingerprint. Must contain at least one reading.
    pub fn set_fingerprint(&mut self, fingerprint: Fingerprint<D>) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        if fingerprint.is_empty() {
            return Err(EstimatorError::InvalidConfig(
                "query fingerprint must contain at least one reading".into(),
            ));
        }
        self.fingerprint = Some(fingerprint);
        Ok(())
    }

    /// Bound the nearest-fingerprint selection: both unset (unbounded) or
    /// both set with 1 ≤ min ≤ max.
    pub fn set_nearest_bounds(
        &mut self,
        min: Option<usize>,
        max: Option<usize>,
    ) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        match (min, max) {
            (None, None) => {}
            (Some(mn), Some(mx)) if mn >= 1 && mn <= mx => {}
            _ => {
                return Err(EstimatorError::InvalidConfig(format!(
                    "nearest bounds must be both unset or 1 <= min <= max, got {min:?}/{max:?}"
                )))
            }
        }
        self.min_nearest = min;
        self.max_nearest = max;
        Ok(())
    }

    /// Default path-loss exponent used for sources without a known one.
    pub fn set_path_loss_exponent(&mut self, exponent: f64) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        if !exponent.is_finite() || exponent <= 0.0 {
            return Err(EstimatorError::InvalidConfig(format!(
                "path-loss exponent must be finite and positive, got {exponent}"
            )));
        }
        self.path_loss_exponent = exponent;
        Ok(())
    }

    /// Prefer a source's own known exponent over the configured default.
    pub fn set_use_source_path_loss_exponent(&mut self, value: bool) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        self.use_source_path_loss_exponent = value;
        Ok(())
    }

    /// Toggle the mean-removed nearest-fingerprint distance.
    pub fn set_use_no_mean_finder(&mut self, value: bool) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        self.use_no_mean_finder = value;
        Ok(())
    }

    /// Standard deviation assumed for readings that carry none (dBm).
    pub fn set_fallback_rssi_std(&mut self, std_dbm: f64) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        if !std_dbm.is_finite() || std_dbm <= 0.0 {
            return Err(EstimatorError::InvalidConfig(format!(
                "fallback RSSI standard deviation must be finite and positive, got {std_dbm}"
            )));
        }
        self.weighting.fallback_rssi_std_dbm = std_dbm;
        Ok(())
    }

    pub fn set_fingerprint_rssi_std_propagated(&mut self, value: bool) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        self.weighting.fingerprint_rssi_std_propagated = value;
        Ok(())
    }

    pub fn set_path_loss_exponent_std_propagated(
        &mut self,
        value: bool,
    ) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        self.weighting.path_loss_exponent_std_propagated = value;
        Ok(())
    }

    pub fn set_fingerprint_position_covariance_propagated(
        &mut self,
        value: bool,
    ) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        self.weighting.fingerprint_position_covariance_propagated = value;
        Ok(())
    }

    pub fn set_source_position_covariance_propagated(
        &mut self,
        value: bool,
    ) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        self.weighting.source_position_covariance_propagated = value;
        Ok(())
    }

    /// Override the solver's tolerances and damping schedule.
    pub fn set_solver_settings(&mut self, settings: SolverSettings) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        if settings.max_iterations == 0 {
            return Err(EstimatorError::InvalidConfig(
                "solver must be allowed at least one iteration".into(),
            ));
        }
        self.solver_settings = settings;
        Ok(())
    }

    /// Seed for the receiver position; `None` restores the internal seed.
    pub fn set_initial_position(
        &mut self,
        position: Option<Position<D>>,
    ) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        self.initial_position = position;
        Ok(())
    }

    /// Located seeds for unknown sources. Every entry must carry a position.
    pub fn set_initial_located_sources(
        &mut self,
        sources: Vec<Arc<RadioSource<D>>>,
    ) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        if let Some(unlocated) = sources.iter().find(|s| !s.is_located()) {
            return Err(EstimatorError::InvalidConfig(format!(
                "initial source {} carries no position",
                unlocated.key
            )));
        }
        self.initial_located_sources = sources;
        Ok(())
    }

    pub fn set_listener(
        &mut self,
        listener: Option<Box<dyn EstimatorListener<D>>>,
    ) -> Result<(), EstimatorError> {
        self.ensure_unlocked()?;
        self.listener = listener;
        Ok(())
    }

    // -- accessors ---------------------------------------------------------

    pub fn state(&self) -> EstimatorState {
        self.state
    }

    /// True once both the database and the query fingerprint are set.
    pub fn is_ready(&self) -> bool {
        !self.located_fingerprints.is_empty() && self.fingerprint.is_some()
    }

    /// Result of the last successful `estimate()`, if any.
    pub fn result(&self) -> Option<&EstimationResult<D>> {
        self.result.as_ref()
    }

    pub fn estimated_position(&self) -> Option<&Position<D>> {
        self.result.as_ref().map(|r| &r.position)
    }

    pub fn estimated_position_covariance(&self) -> Option<&PositionCov<D>> {
        self.result.as_ref()?.position_covariance.as_ref()
    }

    pub fn located_sources(&self) -> Option<&[LocatedSourceEstimate<D>]> {
        self.result.as_ref().map(|r| r.located_sources.as_slice())
    }

    pub fn chi_square(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.chi_square)
    }

    /// Ranked (position, distance) candidates retained from the last call,
    /// for introspection.
    pub fn last_nearest(&self) -> Option<&[(Position<D>, f64)]> {
        self.last_nearest.as_deref()
    }

    // -- estimation --------------------------------------------------------

    /// Run the full pipeline. On failure, the previous result is untouched.
    pub fn estimate(&mut self) -> Result<&EstimationResult<D>, EstimatorError> {
        self.ensure_unlocked()?;
        if self.located_fingerprints.is_empty() {
            return Err(EstimatorError::NotReady("located fingerprints not set"));
        }
        if self.fingerprint.is_none() {
            return Err(EstimatorError::NotReady("query fingerprint not set"));
        }

        self.state = EstimatorState::Running;
        if let Some(listener) = self.listener.as_mut() {
            listener.estimation_started();
        }

        let outcome = self.run_pipeline();

        self.state = EstimatorState::Idle;
        if let Some(listener) = self.listener.as_mut() {
            listener.estimation_ended(outcome.is_ok());
        }

        match outcome {
            Ok((result, nearest)) => {
                self.result = Some(result);
                self.last_nearest = Some(nearest);
                Ok(self.result.as_ref().expect("just stored"))
            }
            Err(err) => Err(err),
        }
    }

    #[allow(clippy::type_complexity)]
    fn run_pipeline(
        &self,
    ) -> Result<(EstimationResult<D>, Vec<(Position<D>, f64)>), EstimatorError> {
        let query = self.fingerprint.as_ref().expect("checked by estimate()");
        let finder = NearestFingerprintFinder::new(
            self.min_nearest,
            self.max_nearest,
            self.use_no_mean_finder,
        );
        let ranked = finder.find(query, &self.located_fingerprints);
        let partition = partition_sources(query, &ranked, &self.initial_located_sources);
        tracing::debug!(
            candidates = ranked.len(),
            sources = partition.partitions.len(),
            dropped = partition.dropped.len(),
            unknowns = partition.unknown_len,
            "partitioned nearest fingerprints"
        );

        let seed_positions: HashMap<SourceKey, Position<D>> = self
            .initial_located_sources
            .iter()
            .filter_map(|s| s.position.map(|p| (s.key.clone(), p)))
            .collect();

        let outcome = solve_joint(
            &partition,
            self.initial_position.as_ref(),
            &seed_positions,
            &self.solver_settings,
            &self.weighting,
            self.path_loss_exponent,
            self.use_source_path_loss_exponent,
        )?;

        let position = Position::<D>::from_fn(|i, _| outcome.unknowns[i]);
        let position_covariance = outcome
            .covariance
            .as_ref()
            .and_then(|cov| extract_block::<D>(cov, 0));

        let located_sources = partition
            .partitions
            .iter()
            .filter_map(|part| {
                let SourceRole::Unknown { offset } = part.role else {
                    return None;
                };
                Some(LocatedSourceEstimate {
                    source: part.source.clone(),
                    position: Position::<D>::from_fn(|i, _| outcome.unknowns[offset + i]),
                    covariance: outcome
                        .covariance
                        .as_ref()
                        .and_then(|cov| extract_block::<D>(cov, offset)),
                })
            })
            .collect();

        let nearest = ranked
            .iter()
            .map(|r| (r.fingerprint.position, r.distance))
            .collect();

        tracing::debug!(
            chi_square = outcome.chi_square,
            iterations = outcome.iterations,
            "estimation converged"
        );
        Ok((
            EstimationResult {
                position,
                position_covariance,
                located_sources,
                chi_square: outcome.chi_square,
                iterations: outcome.iterations,
            },
            nearest,
        ))
    }

    fn ensure_unlocked(&self) -> Result<(), EstimatorError> {
        match self.state {
            EstimatorState::Idle => Ok(()),
            EstimatorState::Running => Err(EstimatorError::Locked),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
