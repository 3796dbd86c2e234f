//! Fundamental types used across the entire workspace.

use nalgebra::{DMatrix, DVector, SMatrix, SVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::DuplicateSourceError;

// ---------------------------------------------------------------------------
// Scalar type: use f64 throughout for numerical precision in the solver.
// ---------------------------------------------------------------------------

/// Position in D-dimensional world coordinates (meters). D = 2 or 3.
pub type Position<const D: usize> = SVector<f64, D>;

/// D×D position covariance matrix.
pub type PositionCov<const D: usize> = SMatrix<f64, D, D>;

/// Generic dynamic-size vector (used for the unknown vector and residuals)
pub type DVec = DVector<f64>;

/// Generic dynamic-size matrix (used for J, W, JᵀWJ)
pub type DMat = DMatrix<f64>;

// ---------------------------------------------------------------------------
// Source key — identity of one physical transmitter
// ---------------------------------------------------------------------------

/// Identity of a radio source: two readings with equal keys refer to the
/// same physical transmitter. Pure value comparison, no behavior.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    /// Stable identifier (e.g. BSSID, beacon UUID).
    pub identifier: String,
    /// Carrier frequency in Hz (integer so the key stays `Eq`/`Hash`).
    pub frequency_hz: u64,
}

impl SourceKey {
    pub fn new(identifier: impl Into<String>, frequency_hz: u64) -> Self {
        Self {
            identifier: identifier.into(),
            frequency_hz,
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}Hz", self.identifier, self.frequency_hz)
    }
}

// ---------------------------------------------------------------------------
// Radio source
// ---------------------------------------------------------------------------

/// One radio transmitter as known to the estimator.
///
/// A source may optionally be **located** (known position, optionally with a
/// covariance) and may carry known transmitted power and a known path-loss
/// exponent with its standard deviation. Immutable once constructed; shared
/// between readings and estimator output via [`Arc`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RadioSource<const D: usize> {
    pub key: SourceKey,
    /// Transmitted power (dBm), when known.
    pub transmitted_power_dbm: Option<f64>,
    /// Known path-loss exponent of this source's environment, when measured.
    pub path_loss_exponent: Option<f64>,
    /// Standard deviation of the known path-loss exponent.
    pub path_loss_exponent_std: Option<f64>,
    /// Known position, when the source has already been located.
    pub position: Option<Position<D>>,
    /// Covariance of the known position.
    pub position_covariance: Option<PositionCov<D>>,
}

impl<const D: usize> RadioSource<D> {
    pub fn new(identifier: impl Into<String>, frequency_hz: u64) -> Self {
        Self {
            key: SourceKey::new(identifier, frequency_hz),
            transmitted_power_dbm: None,
            path_loss_exponent: None,
            path_loss_exponent_std: None,
            position: None,
            position_covariance: None,
        }
    }

    pub fn with_position(mut self, position: Position<D>) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_position_covariance(mut self, covariance: PositionCov<D>) -> Self {
        self.position_covariance = Some(covariance);
        self
    }

    pub fn with_transmitted_power(mut self, dbm: f64) -> Self {
        self.transmitted_power_dbm = Some(dbm);
        self
    }

    pub fn with_path_loss_exponent(mut self, exponent: f64, std: Option<f64>) -> Self {
        self.path_loss_exponent = Some(exponent);
        self.path_loss_exponent_std = std;
        self
    }

    /// Carrier frequency as f64 Hz (for propagation math).
    pub fn frequency_hz(&self) -> f64 {
        self.key.frequency_hz as f64
    }

    /// True if the source carries a known position.
    pub fn is_located(&self) -> bool {
        self.position.is_some()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// A single RSSI reading from one radio source, belonging to one fingerprint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reading<const D: usize> {
    /// The transmitter this reading was received from.
    pub source: Arc<RadioSource<D>>,
    /// Measured received power (dBm).
    pub rssi_dbm: f64,
    /// Standard deviation of the measurement, when characterized.
    pub rssi_std_dbm: Option<f64>,
}

impl<const D: usize> Reading<D> {
    pub fn new(source: Arc<RadioSource<D>>, rssi_dbm: f64) -> Self {
        Self {
            source,
            rssi_dbm,
            rssi_std_dbm: None,
        }
    }

    pub fn with_std(mut self, std_dbm: f64) -> Self {
        self.rssi_std_dbm = Some(std_dbm);
        self
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// An unordered set of readings captured at one location, at most one
/// reading per radio source.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Fingerprint<const D: usize> {
    readings: HashMap<SourceKey, Reading<D>>,
}

impl<const D: usize> Fingerprint<D> {
    pub fn new() -> Self {
        Self {
            readings: HashMap::new(),
        }
    }

    /// Build from a list of readings. Two readings for the same source are
    /// rejected rather than silently merged.
    pub fn from_readings(
        readings: impl IntoIterator<Item = Reading<D>>,
    ) -> Result<Self, DuplicateSourceError> {
        let mut fp = Self::new();
        for reading in readings {
            let key = reading.source.key.clone();
            if fp.readings.insert(key.clone(), reading).is_some() {
                return Err(DuplicateSourceError(key));
            }
        }
        Ok(fp)
    }

    /// Insert a reading, replacing any previous reading for the same source.
    pub fn insert_reading(&mut self, reading: Reading<D>) -> Option<Reading<D>> {
        self.readings.insert(reading.source.key.clone(), reading)
    }

    pub fn reading(&self, key: &SourceKey) -> Option<&Reading<D>> {
        self.readings.get(key)
    }

    pub fn readings(&self) -> impl Iterator<Item = &Reading<D>> {
        self.readings.values()
    }

    pub fn source_keys(&self) -> impl Iterator<Item = &SourceKey> {
        self.readings.keys()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// A fingerprint whose capture position is known. Read-only input supplied
/// by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocatedFingerprint<const D: usize> {
    pub fingerprint: Fingerprint<D>,
    /// Position where the fingerprint was captured.
    pub position: Position<D>,
    /// Covariance of the capture position, when surveyed with uncertainty.
    pub position_covariance: Option<PositionCov<D>>,
}

impl<const D: usize> LocatedFingerprint<D> {
    pub fn new(fingerprint: Fingerprint<D>, position: Position<D>) -> Self {
        Self {
            fingerprint,
            position,
            position_covariance: None,
        }
    }

    pub fn with_position_covariance(mut self, covariance: PositionCov<D>) -> Self {
        self.position_covariance = Some(covariance);
        self
    }
}

// ---------------------------------------------------------------------------
// Estimation result
// ---------------------------------------------------------------------------

/// A radio source located by the estimator, with its covariance sub-block
/// when derivable.
#[derive(Clone, Debug)]
pub struct LocatedSourceEstimate<const D: usize> {
    pub source: Arc<RadioSource<D>>,
    pub position: Position<D>,
    /// Absent when the covariance conversion failed for this block.
    pub covariance: Option<PositionCov<D>>,
}

/// Output of one successful `estimate()` call.
#[derive(Clone, Debug)]
pub struct EstimationResult<const D: usize> {
    /// Estimated receiver position.
    pub position: Position<D>,
    /// Receiver position covariance; absent when not derivable.
    pub position_covariance: Option<PositionCov<D>>,
    /// Sources located by this estimate (previously unlocated ones only).
    pub located_sources: Vec<LocatedSourceEstimate<D>>,
    /// Total weighted residual sum of squares at the solution.
    pub chi_square: f64,
    /// Solver iterations spent.
    pub iterations: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    fn source(id: &str) -> Arc<RadioSource<2>> {
        RadioSource::new(id, 2_400_000_000).into_shared()
    }

    #[test]
    fn from_readings_rejects_duplicate_source() {
        let ap = source("ap-0");
        let result = Fingerprint::from_readings(vec![
            Reading::new(ap.clone(), -50.0),
            Reading::new(ap, -52.0),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn insert_reading_replaces_previous() {
        let ap = source("ap-0");
        let mut fp = Fingerprint::new();
        assert!(fp.insert_reading(Reading::new(ap.clone(), -50.0)).is_none());
        let old = fp.insert_reading(Reading::new(ap.clone(), -55.0));
        assert_eq!(old.unwrap().rssi_dbm, -50.0);
        assert_eq!(fp.len(), 1);
        assert_eq!(fp.reading(&ap.key).unwrap().rssi_dbm, -55.0);
    }

    #[test]
    fn source_key_identity() {
        let a = SourceKey::new("ap-0", 2_400_000_000);
        let b = SourceKey::new("ap-0", 2_400_000_000);
        let c = SourceKey::new("ap-0", 5_000_000_000);
        assert_eq!(a, b);
        assert_ne!(a, c, "same identifier on another band is another source");
    }

    #[test]
    fn located_source_accessors() {
        let src: RadioSource<2> = RadioSource::new("ap-1", 2_400_000_000)
            .with_position(Vector2::new(3.0, 4.0))
            .with_path_loss_exponent(2.3, Some(0.1));
        assert!(src.is_located());
        assert_eq!(src.path_loss_exponent, Some(2.3));
        assert_eq!(src.frequency_hz(), 2.4e9);
    }
}
