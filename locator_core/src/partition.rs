//! Per-source partitioner: groups the selected nearest fingerprints by radio
//! source and lays out the unknown vector for the joint solver.
//!
//! # Roles
//! - **Anchored** — the source carries a known position (or the caller
//!   supplied one for a source that would otherwise be unobservable). Its
//!   tuples constrain the receiver position only.
//! - **Unknown** — no known position and at least D+1 usable tuples; D
//!   coordinates are appended to the unknown vector.
//! - **Dropped** — too few tuples to observe the position; the source is
//!   silently excluded from this estimate.
//!
//! The unknown-vector layout is an explicit index map built fresh per call:
//! receiver coordinates occupy `0..D`, each unknown source the next D slots
//! in deterministic (key-sorted) order.

use crate::finder::RankedFingerprint;
use crate::types::{Fingerprint, Position, PositionCov, RadioSource, SourceKey};
use std::collections::HashMap;
use std::sync::Arc;

/// One (fingerprint, reading) tuple referencing a single radio source.
#[derive(Clone, Debug)]
pub struct SourceObservation<const D: usize> {
    pub fingerprint_position: Position<D>,
    pub fingerprint_position_covariance: Option<PositionCov<D>>,
    pub rssi_dbm: f64,
    pub rssi_std_dbm: Option<f64>,
}

/// Where a source's position comes from during the solve.
#[derive(Clone, Copy, Debug)]
pub enum SourceRole<const D: usize> {
    /// Known position; used as a constraint, never estimated.
    Anchored {
        position: Position<D>,
        covariance: Option<PositionCov<D>>,
    },
    /// Estimated; its D coordinates live at `offset..offset + D` in the
    /// unknown vector.
    Unknown { offset: usize },
}

/// All data the solver needs for one radio source.
#[derive(Clone, Debug)]
pub struct SourcePartition<const D: usize> {
    pub source: Arc<RadioSource<D>>,
    /// The query fingerprint's reading of this source.
    pub query_rssi_dbm: f64,
    pub query_rssi_std_dbm: Option<f64>,
    pub observations: Vec<SourceObservation<D>>,
    pub role: SourceRole<D>,
}

impl<const D: usize> SourcePartition<D> {
    pub fn is_unknown(&self) -> bool {
        matches!(self.role, SourceRole::Unknown { .. })
    }
}

/// Output of the partitioning stage.
#[derive(Clone, Debug)]
pub struct PartitionResult<const D: usize> {
    /// Per-source data, key-sorted.
    pub partitions: Vec<SourcePartition<D>>,
    /// Total unknown-vector length: D·(1 + number of unknown sources).
    pub unknown_len: usize,
    /// Sources excluded from this estimate for lack of observations.
    pub dropped: Vec<Arc<RadioSource<D>>>,
}

/// Partition the selected nearest fingerprints by radio source.
///
/// Only sources present in the query fingerprint participate: the receiver
/// did not hear the others, so they say nothing about its position.
/// `initial_sources` are the caller-supplied located seeds; a seed position
/// rescues an otherwise under-observed source by anchoring it there.
pub fn partition_sources<const D: usize>(
    query: &Fingerprint<D>,
    ranked: &[RankedFingerprint<'_, D>],
    initial_sources: &[Arc<RadioSource<D>>],
) -> PartitionResult<D> {
    let seeds: HashMap<&SourceKey, &Arc<RadioSource<D>>> = initial_sources
        .iter()
        .filter(|s| s.is_located())
        .map(|s| (&s.key, s))
        .collect();

    // Deterministic layout: iterate query sources in key order.
    let mut keys: Vec<&SourceKey> = query.source_keys().collect();
    keys.sort();

    let mut partitions = Vec::new();
    let mut dropped = Vec::new();
    let mut next_offset = D; // receiver occupies 0..D

    for key in keys {
        let reading = query
            .reading(key)
            .expect("key iterated from this fingerprint");
        let source = reading.source.clone();

        let observations: Vec<SourceObservation<D>> = ranked
            .iter()
            .filter_map(|r| {
                r.fingerprint.fingerprint.reading(key).map(|obs| SourceObservation {
                    fingerprint_position: r.fingerprint.position,
                    fingerprint_position_covariance: r.fingerprint.position_covariance,
                    rssi_dbm: obs.rssi_dbm,
                    rssi_std_dbm: obs.rssi_std_dbm,
                })
            })
            .collect();

        let role = if let Some(position) = source.position {
            Some(SourceRole::Anchored {
                position,
                covariance: source.position_covariance,
            })
        } else if observations.len() >= D + 1 {
            let offset = next_offset;
            next_offset += D;
            Some(SourceRole::Unknown { offset })
        } else if let Some(seed) = seeds.get(key) {
            // Under-observed but caller-located: anchor instead of dropping.
            Some(SourceRole::Anchored {
                position: seed.position.expect("seed filtered on is_located"),
                covariance: seed.position_covariance,
            })
        } else {
            dropped.push(source.clone());
            None
        };

        if let Some(role) = role {
            if observations.is_empty() {
                // Anchored but never observed by the nearest fingerprints:
                // contributes no residual, skip silently.
                continue;
            }
            partitions.push(SourcePartition {
                source,
                query_rssi_dbm: reading.rssi_dbm,
                query_rssi_std_dbm: reading.rssi_std_dbm,
                observations,
                role,
            });
        }
    }

    PartitionResult {
        partitions,
        unknown_len: next_offset,
        dropped,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finder::NearestFingerprintFinder;
    use crate::types::{LocatedFingerprint, Reading};
    use nalgebra::Vector2;

    fn db_with_sources(
        sources: &[Arc<RadioSource<2>>],
        positions: &[(f64, f64)],
    ) -> Vec<LocatedFingerprint<2>> {
        positions
            .iter()
            .map(|&(x, y)| {
                let fp = Fingerprint::from_readings(
                    sources
                        .iter()
                        .map(|s| Reading::new(s.clone(), -50.0 - x - y)),
                )
                .unwrap();
                LocatedFingerprint::new(fp, Vector2::new(x, y))
            })
            .collect()
    }

    fn query_of(sources: &[Arc<RadioSource<2>>]) -> Fingerprint<2> {
        Fingerprint::from_readings(sources.iter().map(|s| Reading::new(s.clone(), -55.0))).unwrap()
    }

    fn rank<'a>(
        query: &Fingerprint<2>,
        db: &'a [LocatedFingerprint<2>],
    ) -> Vec<RankedFingerprint<'a, 2>> {
        NearestFingerprintFinder::new(None, None, true).find(query, db)
    }

    #[test]
    fn unknown_sources_get_sequential_offsets_after_receiver() {
        let a = RadioSource::new("ap-a", 2_400_000_000).into_shared();
        let b = RadioSource::new("ap-b", 2_400_000_000).into_shared();
        let sources = vec![a, b];
        let db = db_with_sources(&sources, &[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]);
        let query = query_of(&sources);
        let ranked = rank(&query, &db);

        let result = partition_sources(&query, &ranked, &[]);
        assert_eq!(result.partitions.len(), 2);
        assert_eq!(result.unknown_len, 2 * (1 + 2));
        assert!(result.dropped.is_empty());

        // Key-sorted: ap-a before ap-b.
        match (&result.partitions[0].role, &result.partitions[1].role) {
            (SourceRole::Unknown { offset: o1 }, SourceRole::Unknown { offset: o2 }) => {
                assert_eq!(*o1, 2);
                assert_eq!(*o2, 4);
            }
            other => panic!("expected two unknown sources, got {other:?}"),
        }
    }

    #[test]
    fn located_source_is_anchored_and_not_in_unknown_vector() {
        let anchored = RadioSource::new("ap-a", 2_400_000_000)
            .with_position(Vector2::new(5.0, 5.0))
            .into_shared();
        let sources = vec![anchored];
        let db = db_with_sources(&sources, &[(0.0, 0.0), (1.0, 0.0)]);
        let query = query_of(&sources);
        let ranked = rank(&query, &db);

        let result = partition_sources(&query, &ranked, &[]);
        assert_eq!(result.partitions.len(), 1);
        assert_eq!(result.unknown_len, 2, "receiver only");
        assert!(matches!(
            result.partitions[0].role,
            SourceRole::Anchored { .. }
        ));
    }

    #[test]
    fn under_observed_source_is_dropped() {
        // D = 2 needs 3 tuples; give this source only 2.
        let a = RadioSource::new("ap-a", 2_400_000_000).into_shared();
        let sources = vec![a.clone()];
        let db = db_with_sources(&sources, &[(0.0, 0.0), (1.0, 0.0)]);
        let query = query_of(&sources);
        let ranked = rank(&query, &db);

        let result = partition_sources(&query, &ranked, &[]);
        assert!(result.partitions.is_empty());
        assert_eq!(result.dropped.len(), 1);
        assert_eq!(result.dropped[0].key, a.key);
    }

    #[test]
    fn caller_seed_rescues_under_observed_source() {
        let a = RadioSource::new("ap-a", 2_400_000_000).into_shared();
        let sources = vec![a];
        let db = db_with_sources(&sources, &[(0.0, 0.0), (1.0, 0.0)]);
        let query = query_of(&sources);
        let ranked = rank(&query, &db);

        let seed = RadioSource::new("ap-a", 2_400_000_000)
            .with_position(Vector2::new(3.0, 3.0))
            .into_shared();
        let result = partition_sources(&query, &ranked, &[seed]);
        assert!(result.dropped.is_empty());
        assert_eq!(result.partitions.len(), 1);
        match &result.partitions[0].role {
            SourceRole::Anchored { position, .. } => {
                assert_eq!(*position, Vector2::new(3.0, 3.0));
            }
            other => panic!("expected anchored, got {other:?}"),
        }
        assert_eq!(result.unknown_len, 2);
    }

    #[test]
    fn source_absent_from_nearest_fingerprints_is_dropped() {
        let a = RadioSource::new("ap-a", 2_400_000_000).into_shared();
        let b = RadioSource::new("ap-b", 2_400_000_000).into_shared();
        let db = db_with_sources(
            &[a.clone()],
            &[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)],
        );
        // Query hears both, but the database never saw ap-b.
        let query = query_of(&[a, b.clone()]);
        let ranked = rank(&query, &db);

        let result = partition_sources(&query, &ranked, &[]);
        assert_eq!(result.partitions.len(), 1);
        assert_eq!(result.dropped.len(), 1);
        assert_eq!(result.dropped[0].key, b.key);
    }
}
