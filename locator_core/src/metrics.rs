//! Evaluation metrics: position RMSE, source RMSE, trial success rate.

use crate::types::{EstimationResult, Position};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Accumulated statistics over repeated estimation trials.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Trials attempted.
    pub n_trials: u64,
    /// Trials where `estimate()` returned a result.
    pub n_converged: u64,
    /// Sum of squared receiver position errors (converged trials).
    pub sum_sq_position_err: f64,
    /// Sum of squared source position errors over all matched sources.
    pub sum_sq_source_err: f64,
    /// Matched (estimated source, true source) pairs.
    pub n_sources_matched: u64,
    /// Sum of chi-square values (converged trials).
    pub sum_chi_square: f64,
}

impl EvaluationMetrics {
    /// Record a failed trial.
    pub fn record_failure(&mut self) {
        self.n_trials += 1;
    }

    /// Record a converged trial against ground truth. `true_sources` maps a
    /// source identifier to its true position.
    pub fn record_success<const D: usize>(
        &mut self,
        result: &EstimationResult<D>,
        true_position: &Position<D>,
        true_sources: &HashMap<String, Position<D>>,
    ) {
        self.n_trials += 1;
        self.n_converged += 1;
        self.sum_sq_position_err += (result.position - true_position).norm_squared();
        self.sum_chi_square += result.chi_square;

        for estimate in &result.located_sources {
            if let Some(truth) = true_sources.get(&estimate.source.key.identifier) {
                self.sum_sq_source_err += (estimate.position - truth).norm_squared();
                self.n_sources_matched += 1;
            }
        }
    }

    /// Root-mean-square receiver position error (meters).
    pub fn rmse_position(&self) -> f64 {
        if self.n_converged == 0 {
            return 0.0;
        }
        (self.sum_sq_position_err / self.n_converged as f64).sqrt()
    }

    /// Root-mean-square source position error (meters).
    pub fn rmse_sources(&self) -> f64 {
        if self.n_sources_matched == 0 {
            return 0.0;
        }
        (self.sum_sq_source_err / self.n_sources_matched as f64).sqrt()
    }

    /// Fraction of trials that converged.
    pub fn success_rate(&self) -> f64 {
        if self.n_trials == 0 {
            return 1.0;
        }
        self.n_converged as f64 / self.n_trials as f64
    }

    /// Mean chi-square over converged trials.
    pub fn mean_chi_square(&self) -> f64 {
        if self.n_converged == 0 {
            return 0.0;
        }
        self.sum_chi_square / self.n_converged as f64
    }
}
