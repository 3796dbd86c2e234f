//! Residual weighting and output-covariance derivation.
//!
//! # Weighting
//! Each residual's weight is the inverse of its total variance. The variance
//! is the **sum** of every enabled contribution (sum first, invert once):
//! 1. query-reading RSSI variance — explicit std or the fallback default;
//! 2. fingerprint-reading RSSI variance (toggle);
//! 3. path-loss-exponent variance projected through ∂ρ/∂n (toggle, only when
//!    a source's own exponent and its std are in use);
//! 4. fingerprint position covariance projected through ∂ρ/∂x_f (toggle);
//! 5. anchored-source position covariance projected through ∂ρ/∂s (toggle).
//! Contributions 3–5 are first-order delta-method projections evaluated at
//! the current linearization point.
//!
//! # Output covariance
//! At convergence, JᵀWJ approximates the Fisher information of the unknown
//! vector; its Cholesky inverse is the covariance, partitioned back into D×D
//! blocks per entity. A failed inversion or a non-PD block makes that output
//! absent — never silently wrong.

use crate::types::{DMat, Position, PositionCov};

/// Toggles and defaults for residual weighting.
#[derive(Clone, Copy, Debug)]
pub struct WeightingConfig {
    /// Used whenever a reading carries no explicit standard deviation (dBm).
    pub fallback_rssi_std_dbm: f64,
    /// Propagate the fingerprint reading's own RSSI variance.
    pub fingerprint_rssi_std_propagated: bool,
    /// Propagate the path-loss exponent's standard deviation.
    pub path_loss_exponent_std_propagated: bool,
    /// Propagate the fingerprint's position covariance.
    pub fingerprint_position_covariance_propagated: bool,
    /// Propagate an anchored source's position covariance.
    pub source_position_covariance_propagated: bool,
}

impl Default for WeightingConfig {
    fn default() -> Self {
        Self {
            fallback_rssi_std_dbm: 1.0,
            fingerprint_rssi_std_propagated: true,
            path_loss_exponent_std_propagated: true,
            fingerprint_position_covariance_propagated: true,
            source_position_covariance_propagated: true,
        }
    }
}

/// Gradients of one residual with respect to the propagated quantities.
#[derive(Clone, Copy, Debug)]
pub struct ResidualGradients<const D: usize> {
    /// ∂ρ/∂x_f — w.r.t. the fingerprint's capture position.
    pub wrt_fingerprint: Position<D>,
    /// ∂ρ/∂s — w.r.t. the source position.
    pub wrt_source: Position<D>,
    /// ∂ρ/∂n — w.r.t. the path-loss exponent.
    pub wrt_exponent: f64,
}

impl WeightingConfig {
    /// Total variance of one residual; strictly positive as long as the
    /// fallback standard deviation is (validated at configuration time).
    #[allow(clippy::too_many_arguments)]
    pub fn residual_variance<const D: usize>(
        &self,
        query_rssi_std: Option<f64>,
        fingerprint_rssi_std: Option<f64>,
        gradients: &ResidualGradients<D>,
        fingerprint_position_cov: Option<&PositionCov<D>>,
        source_position_cov: Option<&PositionCov<D>>,
        exponent_std: Option<f64>,
    ) -> f64 {
        let fallback = self.fallback_rssi_std_dbm;
        let mut variance = query_rssi_std.unwrap_or(fallback).powi(2);

        if self.fingerprint_rssi_std_propagated {
            variance += fingerprint_rssi_std.unwrap_or(fallback).powi(2);
        }
        if self.path_loss_exponent_std_propagated {
            if let Some(std) = exponent_std {
                variance += (gradients.wrt_exponent * std).powi(2);
            }
        }
        if self.fingerprint_position_covariance_propagated {
            if let Some(cov) = fingerprint_position_cov {
                variance += quadratic_form(&gradients.wrt_fingerprint, cov);
            }
        }
        if self.source_position_covariance_propagated {
            if let Some(cov) = source_position_cov {
                variance += quadratic_form(&gradients.wrt_source, cov);
            }
        }
        variance
    }
}

/// gᵀ·Σ·g, clamped at zero against round-off on indefinite inputs.
fn quadratic_form<const D: usize>(g: &Position<D>, cov: &PositionCov<D>) -> f64 {
    (g.transpose() * cov * g)[(0, 0)].max(0.0)
}

/// Invert the Fisher information JᵀWJ into a covariance matrix.
///
/// Cholesky only: the information matrix of a well-posed solve is symmetric
/// positive definite, and anything Cholesky rejects is reported as absent
/// rather than inverted into garbage. The result is re-symmetrized against
/// round-off.
pub fn information_to_covariance(information: &DMat) -> Option<DMat> {
    let cov = information.clone().cholesky()?.inverse();
    Some(symmetrized(&cov))
}

/// Extract the D×D covariance block at `offset` along the diagonal,
/// verifying it is positive definite.
pub fn extract_block<const D: usize>(covariance: &DMat, offset: usize) -> Option<PositionCov<D>> {
    let block = PositionCov::<D>::from_fn(|r, c| {
        0.5 * (covariance[(offset + r, offset + c)] + covariance[(offset + c, offset + r)])
    });
    let dyn_block = DMat::from_fn(D, D, |r, c| block[(r, c)]);
    dyn_block.cholesky().map(|_| block)
}

fn symmetrized(m: &DMat) -> DMat {
    0.5 * (m + m.transpose())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix2, Vector2};

    fn gradients() -> ResidualGradients<2> {
        ResidualGradients {
            wrt_fingerprint: Vector2::new(0.5, -0.5),
            wrt_source: Vector2::new(1.0, 0.0),
            wrt_exponent: 3.0,
        }
    }

    #[test]
    fn all_toggles_off_uses_fallback_only() {
        let cfg = WeightingConfig {
            fallback_rssi_std_dbm: 2.0,
            fingerprint_rssi_std_propagated: false,
            path_loss_exponent_std_propagated: false,
            fingerprint_position_covariance_propagated: false,
            source_position_covariance_propagated: false,
        };
        let var = cfg.residual_variance(
            None,
            Some(5.0),
            &gradients(),
            Some(&Matrix2::identity()),
            Some(&Matrix2::identity()),
            Some(0.4),
        );
        assert_abs_diff_eq!(var, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn enabled_contributions_sum_before_inversion() {
        let cfg = WeightingConfig {
            fallback_rssi_std_dbm: 1.0,
            ..Default::default()
        };
        let fp_cov = Matrix2::identity() * 4.0;
        let var = cfg.residual_variance(
            Some(2.0),     // 4.0
            Some(3.0),     // 9.0
            &gradients(),  // exponent: (3·0.4)² = 1.44; fp pos: 0.5·4 = 2.0; src: 1·1
            Some(&fp_cov),
            Some(&Matrix2::identity()),
            Some(0.4),
        );
        assert_abs_diff_eq!(var, 4.0 + 9.0 + 1.44 + 2.0 + 1.0, epsilon = 1e-12);
    }

    #[test]
    fn explicit_stds_override_fallback() {
        let cfg = WeightingConfig {
            fallback_rssi_std_dbm: 10.0,
            fingerprint_rssi_std_propagated: true,
            path_loss_exponent_std_propagated: false,
            fingerprint_position_covariance_propagated: false,
            source_position_covariance_propagated: false,
        };
        let var = cfg.residual_variance(Some(1.0), Some(2.0), &gradients(), None, None, None);
        assert_abs_diff_eq!(var, 1.0 + 4.0, epsilon = 1e-12);
    }

    #[test]
    fn spd_information_inverts_to_symmetric_covariance() {
        let info = DMat::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let cov = information_to_covariance(&info).expect("SPD must invert");
        // Inverse of [[4,1],[1,3]] is 1/11 · [[3,-1],[-1,4]]
        assert_abs_diff_eq!(cov[(0, 0)], 3.0 / 11.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[(0, 1)], cov[(1, 0)], epsilon = 1e-15);
        assert!(cov.clone().cholesky().is_some(), "covariance must stay PD");
    }

    #[test]
    fn singular_information_yields_no_covariance() {
        let info = DMat::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(information_to_covariance(&info).is_none());
    }

    #[test]
    fn block_extraction_symmetrizes() {
        let cov = DMat::from_row_slice(
            4,
            4,
            &[
                2.0, 0.1, 0.0, 0.0, //
                0.1, 2.0, 0.0, 0.0, //
                0.0, 0.0, 5.0, 1.0, //
                0.0, 0.0, 1.0, 5.0,
            ],
        );
        let b0: PositionCov<2> = extract_block(&cov, 0).unwrap();
        let b1: PositionCov<2> = extract_block(&cov, 2).unwrap();
        assert_abs_diff_eq!(b0[(0, 1)], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(b1[(0, 0)], 5.0, epsilon = 1e-12);
        assert_eq!(b1, b1.transpose());
    }
}
