//! Joint non-linear estimator: weighted Levenberg-Marquardt refinement of
//! the receiver position and every unknown source position.
//!
//! # Residual model
//! The log-distance law `rssi(d) = P_tx + C(f, n) − 10·n·log10(d)` predicts
//! both the query reading (at distance `d_q` from receiver to source) and a
//! fingerprint reading (at distance `d_f` from the fingerprint to the same
//! source). Their difference cancels the transmitted-power and frequency
//! terms, leaving one residual per (fingerprint, source) tuple:
//!
//! ρ = (rssi_query − rssi_fingerprint) − 10·n·log10(d_f / d_q)
//!
//! with analytic gradients w.r.t. the receiver position, the source
//! position, the fingerprint position, and the exponent (the latter two feed
//! the delta-method weighting only).
//!
//! # Iteration
//! Damped weighted normal equations `(JᵀWJ + μI)δ = −JᵀWρ`, Cholesky solve
//! with LU fallback, trust-region gain ratio driving μ, convergence on
//! gradient norm, relative step size, or relative cost change. Row
//! evaluation is parallel; accumulation into the normal equations is
//! sequential and therefore deterministic.

use crate::covariance::{information_to_covariance, ResidualGradients, WeightingConfig};
use crate::error::EstimationError;
use crate::partition::{PartitionResult, SourceRole};
use crate::types::{DMat, DVec, Position, SourceKey};
use radio_models::path_loss::MIN_DISTANCE;
use rayon::prelude::*;
use std::collections::HashMap;

/// 10 / ln(10): converts a natural-log distance derivative into dB.
const DB_PER_NEPER: f64 = 10.0 / std::f64::consts::LN_10;

/// Convergence tolerances and damping schedule for the solver.
#[derive(Clone, Copy, Debug)]
pub struct SolverSettings {
    /// Converged when ‖JᵀWρ‖ falls below this.
    pub gradient_tolerance: f64,
    /// Converged when the relative step size falls below this.
    pub step_tolerance: f64,
    /// Converged when the relative cost change falls below this.
    pub cost_tolerance: f64,
    /// Iteration cap; reaching it without converging is an error.
    pub max_iterations: usize,
    /// Initial damping parameter μ.
    pub damping_init: f64,
    /// Factor applied to μ on a rejected step.
    pub damping_increase: f64,
    /// Factor applied to μ on an accepted step.
    pub damping_decrease: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            gradient_tolerance: 1e-8,
            step_tolerance: 1e-12,
            cost_tolerance: 1e-12,
            max_iterations: 100,
            damping_init: 1e-3,
            damping_increase: 10.0,
            damping_decrease: 0.1,
        }
    }
}

/// Converged solver state, before partitioning back into per-entity results.
#[derive(Clone, Debug)]
pub struct SolverOutcome {
    /// Converged unknown vector (receiver block first).
    pub unknowns: DVec,
    /// Full (JᵀWJ)⁻¹ at the solution; absent when not positive definite.
    pub covariance: Option<DMat>,
    /// Total weighted residual sum of squares at the solution.
    pub chi_square: f64,
    /// Iterations spent.
    pub iterations: usize,
}

/// Solve the joint problem defined by a partitioning.
///
/// `initial_position` and `initial_source_positions` seed the unknowns when
/// given; any unseeded unknown falls back to an internally derived seed, so
/// callers are never required to supply initial values.
pub fn solve_joint<const D: usize>(
    partition: &PartitionResult<D>,
    initial_position: Option<&Position<D>>,
    initial_source_positions: &HashMap<SourceKey, Position<D>>,
    settings: &SolverSettings,
    weighting: &WeightingConfig,
    default_exponent: f64,
    use_source_exponent: bool,
) -> Result<SolverOutcome, EstimationError> {
    let workspace = Workspace {
        partition,
        weighting,
        default_exponent,
        use_source_exponent,
        rows: flatten_rows(partition),
    };

    let n = partition.unknown_len;
    if workspace.rows.len() < n {
        return Err(EstimationError::InsufficientData {
            residuals: workspace.rows.len(),
            unknowns: n,
        });
    }

    let mut x = seed_unknowns(partition, initial_position, initial_source_positions);
    let mut evals = workspace.evaluate(&x);
    let mut cost = 0.5 * chi_square(&evals);
    let mut mu = settings.damping_init;

    for iter in 0..settings.max_iterations {
        let (a, g) = normal_equations::<D>(&evals, n);

        if g.norm() < settings.gradient_tolerance {
            return Ok(finish(x, &a, cost, iter));
        }

        let delta =
            solve_damped(&a, mu, &-g.clone()).ok_or(EstimationError::SingularNormalEquations)?;

        let x_new = &x + &delta;
        let evals_new = workspace.evaluate(&x_new);
        let cost_new = 0.5 * chi_square(&evals_new);

        // Trust-region gain ratio: predicted reduction of the damped model.
        let predicted = delta.dot(&(&delta * mu - &g));
        let actual = cost - cost_new;

        if predicted > 0.0 && actual > 0.0 {
            x = x_new;
            evals = evals_new;
            mu *= settings.damping_decrease;

            let step_converged = delta.norm() < settings.step_tolerance * (1.0 + x.norm());
            let cost_converged = actual < settings.cost_tolerance * (1.0 + cost_new);
            cost = cost_new;
            if step_converged || cost_converged {
                let (a, _) = normal_equations::<D>(&evals, n);
                return Ok(finish(x, &a, cost, iter + 1));
            }
        } else {
            mu *= settings.damping_increase;
        }
    }

    Err(EstimationError::NonConvergence {
        iterations: settings.max_iterations,
    })
}

fn finish(x: DVec, information: &DMat, cost: f64, iterations: usize) -> SolverOutcome {
    SolverOutcome {
        unknowns: x,
        covariance: information_to_covariance(information),
        chi_square: 2.0 * cost,
        iterations,
    }
}

// ---------------------------------------------------------------------------
// Row evaluation
// ---------------------------------------------------------------------------

/// One evaluated residual row: value, weight, and its sparse Jacobian
/// entries (receiver block always, source block when the source is unknown).
struct RowEval<const D: usize> {
    residual: f64,
    weight: f64,
    receiver_grad: Position<D>,
    source_entry: Option<(usize, Position<D>)>,
}

/// Borrowed problem context shared by all row evaluations.
struct Workspace<'a, const D: usize> {
    partition: &'a PartitionResult<D>,
    weighting: &'a WeightingConfig,
    default_exponent: f64,
    use_source_exponent: bool,
    /// Flattened (partition index, observation index) tuple list.
    rows: Vec<(usize, usize)>,
}

fn flatten_rows<const D: usize>(partition: &PartitionResult<D>) -> Vec<(usize, usize)> {
    partition
        .partitions
        .iter()
        .enumerate()
        .flat_map(|(pi, p)| (0..p.observations.len()).map(move |oi| (pi, oi)))
        .collect()
}

impl<const D: usize> Workspace<'_, D> {
    fn evaluate(&self, x: &DVec) -> Vec<RowEval<D>> {
        self.rows
            .par_iter()
            .map(|&(pi, oi)| self.evaluate_row(pi, oi, x))
            .collect()
    }

    fn evaluate_row(&self, pi: usize, oi: usize, x: &DVec) -> RowEval<D> {
        let part = &self.partition.partitions[pi];
        let obs = &part.observations[oi];
        let receiver = Position::<D>::from_fn(|i, _| x[i]);

        let (source_pos, source_offset, anchored_cov) = match part.role {
            SourceRole::Anchored {
                position,
                covariance,
            } => (position, None, covariance),
            SourceRole::Unknown { offset } => (
                Position::<D>::from_fn(|i, _| x[offset + i]),
                Some(offset),
                None,
            ),
        };

        let (exponent, exponent_std) = if self.use_source_exponent {
            match part.source.path_loss_exponent {
                Some(n) => (n, part.source.path_loss_exponent_std),
                None => (self.default_exponent, None),
            }
        } else {
            (self.default_exponent, None)
        };

        let to_source = receiver - source_pos;
        let d_q = to_source.norm().max(MIN_DISTANCE);
        let fp_to_source = obs.fingerprint_position - source_pos;
        let d_f = fp_to_source.norm().max(MIN_DISTANCE);

        let measured = part.query_rssi_dbm - obs.rssi_dbm;
        let predicted = 10.0 * exponent * (d_f / d_q).log10();
        let residual = measured - predicted;

        // k = 10·n / ln(10)
        let k = exponent * DB_PER_NEPER;
        let receiver_grad = to_source * (k / (d_q * d_q));
        let fingerprint_grad = fp_to_source * (-k / (d_f * d_f));
        // ∂ρ/∂s: moving the source affects both distances.
        let source_grad = -receiver_grad - fingerprint_grad;
        let gradients = ResidualGradients {
            wrt_fingerprint: fingerprint_grad,
            wrt_source: source_grad,
            wrt_exponent: -10.0 * (d_f / d_q).log10(),
        };

        let variance = self.weighting.residual_variance(
            part.query_rssi_std_dbm,
            obs.rssi_std_dbm,
            &gradients,
            obs.fingerprint_position_covariance.as_ref(),
            anchored_cov.as_ref(),
            exponent_std,
        );

        RowEval {
            residual,
            weight: 1.0 / variance,
            receiver_grad,
            source_entry: source_offset.map(|off| (off, source_grad)),
        }
    }
}

fn chi_square<const D: usize>(evals: &[RowEval<D>]) -> f64 {
    evals
        .iter()
        .map(|e| e.weight * e.residual * e.residual)
        .sum()
}

/// Accumulate A = JᵀWJ and g = JᵀWρ from the sparse row entries.
fn normal_equations<const D: usize>(evals: &[RowEval<D>], n: usize) -> (DMat, DVec) {
    let mut a = DMat::zeros(n, n);
    let mut g = DVec::zeros(n);
    let mut cols: Vec<(usize, f64)> = Vec::with_capacity(2 * D);

    for e in evals {
        cols.clear();
        for i in 0..D {
            cols.push((i, e.receiver_grad[i]));
        }
        if let Some((offset, grad)) = &e.source_entry {
            for i in 0..D {
                cols.push((offset + i, grad[i]));
            }
        }
        for &(ci, vi) in &cols {
            g[ci] += e.weight * vi * e.residual;
            for &(cj, vj) in &cols {
                a[(ci, cj)] += e.weight * vi * vj;
            }
        }
    }
    (a, g)
}

/// Solve (A + μI)·δ = rhs, Cholesky first, LU fallback.
fn solve_damped(a: &DMat, mu: f64, rhs: &DVec) -> Option<DVec> {
    let mut damped = a.clone();
    for i in 0..damped.nrows() {
        damped[(i, i)] += mu;
    }
    if let Some(chol) = damped.clone().cholesky() {
        return Some(chol.solve(rhs));
    }
    damped.lu().solve(rhs)
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

/// Build the initial unknown vector. Caller seeds win; the receiver falls
/// back to the centroid of the observed fingerprint positions, an unknown
/// source to the position of the fingerprint that heard it loudest.
fn seed_unknowns<const D: usize>(
    partition: &PartitionResult<D>,
    initial_position: Option<&Position<D>>,
    initial_source_positions: &HashMap<SourceKey, Position<D>>,
) -> DVec {
    let mut x = DVec::zeros(partition.unknown_len);

    let receiver = match initial_position {
        Some(p) => *p,
        None => fingerprint_centroid(partition),
    };
    for i in 0..D {
        x[i] = receiver[i];
    }

    for part in &partition.partitions {
        let SourceRole::Unknown { offset } = part.role else {
            continue;
        };
        let seed = initial_source_positions
            .get(&part.source.key)
            .copied()
            .unwrap_or_else(|| {
                let loudest = part
                    .observations
                    .iter()
                    .max_by(|a, b| a.rssi_dbm.total_cmp(&b.rssi_dbm))
                    .expect("unknown sources have at least D+1 observations");
                separate_from(loudest.fingerprint_position, &receiver, part)
            });
        for i in 0..D {
            x[offset + i] = seed[i];
        }
    }
    x
}

fn fingerprint_centroid<const D: usize>(partition: &PartitionResult<D>) -> Position<D> {
    let mut sum = Position::<D>::zeros();
    let mut count = 0usize;
    for part in &partition.partitions {
        for obs in &part.observations {
            sum += obs.fingerprint_position;
            count += 1;
        }
    }
    if count == 0 {
        sum
    } else {
        sum / count as f64
    }
}

/// A source seed coincident with the receiver seed makes the initial
/// linearization degenerate; push it halfway toward the farthest observing
/// fingerprint instead.
fn separate_from<const D: usize>(
    seed: Position<D>,
    receiver: &Position<D>,
    part: &crate::partition::SourcePartition<D>,
) -> Position<D> {
    if (seed - receiver).norm() > 1e-3 {
        return seed;
    }
    let farthest = part
        .observations
        .iter()
        .max_by(|a, b| {
            (a.fingerprint_position - seed)
                .norm()
                .total_cmp(&(b.fingerprint_position - seed).norm())
        })
        .expect("unknown sources have at least D+1 observations");
    0.5 * (seed + farthest.fingerprint_position)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
