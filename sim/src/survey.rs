//! Fingerprint-survey simulator.
//!
//! Generates located fingerprints from a set of ground-truth transmitters:
//! - Gaussian RSSI noise per reading
//! - Miss probability (1 − P_D) per (position, transmitter) pair
//! - Detection threshold (weak readings never make it into a fingerprint)
//! - Configurable constant RSSI offset on the query device (for no-mean
//!   finder scenarios)

use locator_core::types::{Fingerprint, LocatedFingerprint, Position, RadioSource, Reading};
use nalgebra::SVector;
use radio_models::Transmitter;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Measurement-quality knobs of the simulated survey device.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SurveyParams {
    /// Gaussian RSSI noise standard deviation (dB). 0 = exact readings.
    pub rssi_noise_std_dbm: f64,
    /// Probability that a transmitter in range is detected at all.
    pub p_detection: f64,
    /// Readings below this power are discarded (receiver sensitivity).
    pub detection_threshold_dbm: Option<f64>,
    /// Attach the noise std to each generated reading.
    pub report_reading_std: bool,
}

impl Default for SurveyParams {
    fn default() -> Self {
        Self {
            rssi_noise_std_dbm: 1.0,
            p_detection: 1.0,
            detection_threshold_dbm: Some(-100.0),
            report_reading_std: true,
        }
    }
}

/// Known bias injected into the query device (unknown to the estimator).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct InjectedBias {
    /// Constant offset added to every query reading (dB) — models a
    /// different receiver gain than the survey device.
    pub rssi_offset_dbm: f64,
}

/// Generates fingerprints from ground-truth transmitters.
pub struct FingerprintSurvey<const D: usize> {
    transmitters: Vec<Transmitter<D>>,
    sources: Vec<Arc<RadioSource<D>>>,
    params: SurveyParams,
    bias: InjectedBias,
    rng: ChaCha8Rng,
}

impl<const D: usize> FingerprintSurvey<D> {
    /// `locate_sources` anchors every generated [`RadioSource`] at its true
    /// position (receiver-only estimation scenarios).
    pub fn new(
        transmitters: Vec<Transmitter<D>>,
        params: SurveyParams,
        bias: InjectedBias,
        locate_sources: bool,
        seed: u64,
    ) -> Self {
        let sources = transmitters
            .iter()
            .map(|tx| {
                let mut source =
                    RadioSource::new(tx.identifier.clone(), tx.model.frequency_hz as u64)
                        .with_path_loss_exponent(tx.model.exponent, None);
                if locate_sources {
                    source = source.with_position(tx.position);
                }
                source.into_shared()
            })
            .collect();
        Self {
            transmitters,
            sources,
            params,
            bias,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// The radio sources the estimator will see (located when anchored).
    pub fn sources(&self) -> &[Arc<RadioSource<D>>] {
        &self.sources
    }

    pub fn transmitters(&self) -> &[Transmitter<D>] {
        &self.transmitters
    }

    /// Capture one fingerprint at `position` with the survey device.
    pub fn capture_at(&mut self, position: &Position<D>) -> Fingerprint<D> {
        self.capture(position, 0.0)
    }

    /// Capture one fingerprint at `position` with the query device (bias
    /// applied).
    pub fn query_at(&mut self, position: &Position<D>) -> Fingerprint<D> {
        self.capture(position, self.bias.rssi_offset_dbm)
    }

    fn capture(&mut self, position: &Position<D>, offset_dbm: f64) -> Fingerprint<D> {
        let noise = Normal::new(0.0, self.params.rssi_noise_std_dbm.max(f64::MIN_POSITIVE))
            .expect("std is positive");
        let mut fingerprint = Fingerprint::new();
        for (tx, source) in self.transmitters.iter().zip(&self.sources) {
            if self.rng.gen::<f64>() > self.params.p_detection {
                continue;
            }
            let mut rssi = tx.rssi_at_position(position) + offset_dbm;
            if self.params.rssi_noise_std_dbm > 0.0 {
                rssi += noise.sample(&mut self.rng);
            }
            if let Some(threshold) = self.params.detection_threshold_dbm {
                if rssi < threshold {
                    continue;
                }
            }
            let mut reading = Reading::new(source.clone(), rssi);
            if self.params.report_reading_std && self.params.rssi_noise_std_dbm > 0.0 {
                reading = reading.with_std(self.params.rssi_noise_std_dbm);
            }
            fingerprint.insert_reading(reading);
        }
        fingerprint
    }

    /// Survey fingerprints at explicit positions; positions where nothing
    /// was detected are skipped.
    pub fn survey_at(&mut self, positions: &[Position<D>]) -> Vec<LocatedFingerprint<D>> {
        positions
            .iter()
            .filter_map(|pos| {
                let fingerprint = self.capture_at(pos);
                if fingerprint.is_empty() {
                    None
                } else {
                    Some(LocatedFingerprint::new(fingerprint, *pos))
                }
            })
            .collect()
    }

    /// Survey `count` fingerprints at uniform random positions inside the
    /// `[0, extent]^D` box.
    pub fn survey_random(&mut self, count: usize, extent: f64) -> Vec<LocatedFingerprint<D>> {
        let positions: Vec<Position<D>> = (0..count)
            .map(|_| SVector::from_fn(|_, _| self.rng.gen::<f64>() * extent))
            .collect();
        self.survey_at(&positions)
    }

    /// A uniform random position inside the survey box (for trial truths).
    pub fn random_position(&mut self, extent: f64) -> Position<D> {
        SVector::from_fn(|_, _| self.rng.gen::<f64>() * extent)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector2;
    use radio_models::PathLossModel;

    fn transmitters() -> Vec<Transmitter<2>> {
        let model = PathLossModel::new(2.0, 2.4e9);
        vec![
            Transmitter::new("ap-0", Vector2::new(2.0, 2.0), -5.0, model),
            Transmitter::new("ap-1", Vector2::new(8.0, 8.0), -5.0, model),
        ]
    }

    #[test]
    fn same_seed_reproduces_the_survey() {
        let params = SurveyParams::default();
        let mut a = FingerprintSurvey::new(transmitters(), params, InjectedBias::default(), false, 9);
        let mut b = FingerprintSurvey::new(transmitters(), params, InjectedBias::default(), false, 9);
        let db_a = a.survey_random(20, 10.0);
        let db_b = b.survey_random(20, 10.0);
        assert_eq!(db_a.len(), db_b.len());
        for (fa, fb) in db_a.iter().zip(&db_b) {
            assert_eq!(fa.position, fb.position);
            for reading in fa.fingerprint.readings() {
                let other = fb.fingerprint.reading(&reading.source.key).unwrap();
                assert_abs_diff_eq!(reading.rssi_dbm, other.rssi_dbm, epsilon = 0.0);
            }
        }
    }

    #[test]
    fn detection_threshold_drops_weak_readings() {
        let params = SurveyParams {
            rssi_noise_std_dbm: 0.0,
            p_detection: 1.0,
            detection_threshold_dbm: Some(-60.0),
            report_reading_std: false,
        };
        let mut survey =
            FingerprintSurvey::new(transmitters(), params, InjectedBias::default(), false, 1);
        // Right next to ap-0, far from ap-1.
        let fp = survey.capture_at(&Vector2::new(2.0, 2.5));
        assert!(fp.reading(&survey.sources()[0].key).is_some());
        assert!(fp.reading(&survey.sources()[1].key).is_none());
    }

    #[test]
    fn query_device_bias_is_a_constant_offset() {
        let params = SurveyParams {
            rssi_noise_std_dbm: 0.0,
            p_detection: 1.0,
            detection_threshold_dbm: None,
            report_reading_std: false,
        };
        let bias = InjectedBias {
            rssi_offset_dbm: 7.5,
        };
        let mut survey = FingerprintSurvey::new(transmitters(), params, bias, false, 3);
        let at = Vector2::new(5.0, 5.0);
        let clean = survey.capture_at(&at);
        let biased = survey.query_at(&at);
        for reading in clean.readings() {
            let shifted = biased.reading(&reading.source.key).unwrap();
            assert_abs_diff_eq!(shifted.rssi_dbm - reading.rssi_dbm, 7.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn anchored_mode_locates_every_source() {
        let mut survey = FingerprintSurvey::new(
            transmitters(),
            SurveyParams::default(),
            InjectedBias::default(),
            true,
            5,
        );
        assert!(survey.sources().iter().all(|s| s.is_located()));
        let db = survey.survey_random(10, 10.0);
        assert!(!db.is_empty());
    }
}
