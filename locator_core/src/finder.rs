//! Nearest-fingerprint finder: ranks located fingerprints by similarity of
//! their reading vectors to a query fingerprint.
//!
//! # Distance
//! Euclidean distance over the RSSI values of the radio sources present in
//! **both** fingerprints. A candidate sharing zero sources carries no
//! information and is ranked last (infinite distance).
//!
//! # No-mean variant
//! Before computing the distance, subtract from each fingerprint its own
//! mean RSSI across the shared readings. A constant per-location offset
//! (receiver hardware gain, antenna bias) then cancels exactly, leaving the
//! ranking unchanged under a uniform dB shift.

use crate::types::{Fingerprint, LocatedFingerprint};

/// Configuration and entry point for nearest-fingerprint selection.
///
/// `min_nearest`/`max_nearest` bound the number of returned fingerprints;
/// both `None` means the whole database participates. The estimator
/// validates that either both are set (with 1 ≤ min ≤ max) or neither is.
#[derive(Clone, Copy, Debug)]
pub struct NearestFingerprintFinder {
    /// Lower bound on returned fingerprints (met when the database allows).
    pub min_nearest: Option<usize>,
    /// Upper bound on returned fingerprints.
    pub max_nearest: Option<usize>,
    /// Enable the mean-removed distance.
    pub remove_mean: bool,
}

/// One ranked candidate: a borrowed located fingerprint and its distance to
/// the query. Ephemeral, owned by a single `estimate()` call.
#[derive(Clone, Copy, Debug)]
pub struct RankedFingerprint<'a, const D: usize> {
    pub fingerprint: &'a LocatedFingerprint<D>,
    pub distance: f64,
}

impl NearestFingerprintFinder {
    pub fn new(min_nearest: Option<usize>, max_nearest: Option<usize>, remove_mean: bool) -> Self {
        Self {
            min_nearest,
            max_nearest,
            remove_mean,
        }
    }

    /// Rank `database` against `query`, closest first, truncated to the
    /// configured bound. Pure function of its inputs; an empty database
    /// yields an empty result.
    pub fn find<'a, const D: usize>(
        &self,
        query: &Fingerprint<D>,
        database: &'a [LocatedFingerprint<D>],
    ) -> Vec<RankedFingerprint<'a, D>> {
        let mut ranked: Vec<RankedFingerprint<'a, D>> = database
            .iter()
            .map(|lf| RankedFingerprint {
                fingerprint: lf,
                distance: reading_distance(query, &lf.fingerprint, self.remove_mean),
            })
            .collect();

        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let keep = ranked.len().min(self.max_nearest.unwrap_or(usize::MAX));
        ranked.truncate(keep);
        ranked
    }
}

/// Euclidean RSSI distance over the sources shared by both fingerprints.
fn reading_distance<const D: usize>(
    query: &Fingerprint<D>,
    candidate: &Fingerprint<D>,
    remove_mean: bool,
) -> f64 {
    let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(query.len().min(candidate.len()));
    for reading in query.readings() {
        if let Some(other) = candidate.reading(&reading.source.key) {
            pairs.push((reading.rssi_dbm, other.rssi_dbm));
        }
    }

    if pairs.is_empty() {
        return f64::INFINITY;
    }

    let (mean_q, mean_c) = if remove_mean {
        let n = pairs.len() as f64;
        let sum_q: f64 = pairs.iter().map(|(q, _)| q).sum();
        let sum_c: f64 = pairs.iter().map(|(_, c)| c).sum();
        (sum_q / n, sum_c / n)
    } else {
        (0.0, 0.0)
    };

    pairs
        .iter()
        .map(|(q, c)| {
            let diff = (q - mean_q) - (c - mean_c);
            diff * diff
        })
        .sum::<f64>()
        .sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
