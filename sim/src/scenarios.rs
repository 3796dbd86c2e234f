//! Scenario definitions.
//!
//! Each scenario is a named configuration of transmitters, survey area, and
//! measurement quality. All scenarios are deterministic given the same seed.

use crate::survey::{FingerprintSurvey, InjectedBias, SurveyParams};
use nalgebra::Vector2;
use radio_models::{PathLossModel, Transmitter};
use serde::{Deserialize, Serialize};

/// Which pre-defined scenario to load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// 1 transmitter, dense survey, mild noise
    SingleSource,
    /// 12 unlocated transmitters — joint receiver + source estimation
    MultiSource,
    /// 5 anchored transmitters — receiver-only estimation
    AnchoredSources,
    /// Query device with a +8 dB gain offset (no-mean finder stress)
    BiasedDevice,
    /// 40 fingerprints over a wide area — sources get dropped
    SparseCoverage,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    /// Survey box edge length (meters); fingerprints and trial positions
    /// are drawn inside `[0, extent]²`.
    pub extent: f64,
    pub n_fingerprints: usize,
    pub transmitters: Vec<Transmitter<2>>,
    pub params: SurveyParams,
    pub bias: InjectedBias,
    /// Anchor every source at its true position (receiver-only mode).
    pub anchor_sources: bool,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::SingleSource => Self::single_source(seed),
            ScenarioKind::MultiSource => Self::multi_source(seed),
            ScenarioKind::AnchoredSources => Self::anchored_sources(seed),
            ScenarioKind::BiasedDevice => Self::biased_device(seed),
            ScenarioKind::SparseCoverage => Self::sparse_coverage(seed),
        }
    }

    /// Instantiate the survey generator for this scenario.
    pub fn survey(&self) -> FingerprintSurvey<2> {
        FingerprintSurvey::new(
            self.transmitters.clone(),
            self.params,
            self.bias,
            self.anchor_sources,
            self.seed,
        )
    }

    // -----------------------------------------------------------------------
    // Scenario 1: SingleSource
    // -----------------------------------------------------------------------
    fn single_source(seed: u64) -> Self {
        Scenario {
            name: "single_source".into(),
            seed,
            extent: 20.0,
            n_fingerprints: 300,
            transmitters: vec![transmitter("ap-0", 8.0, 12.0, 2.0)],
            params: SurveyParams {
                rssi_noise_std_dbm: 0.5,
                ..Default::default()
            },
            bias: InjectedBias::default(),
            anchor_sources: false,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 2: MultiSource
    // -----------------------------------------------------------------------
    fn multi_source(seed: u64) -> Self {
        let transmitters = (0..12)
            .map(|i| {
                let col = (i % 4) as f64;
                let row = (i / 4) as f64;
                transmitter(
                    &format!("ap-{i:02}"),
                    8.0 + col * 12.0,
                    10.0 + row * 15.0,
                    2.0,
                )
            })
            .collect();
        Scenario {
            name: "multi_source".into(),
            seed,
            extent: 50.0,
            n_fingerprints: 400,
            transmitters,
            params: SurveyParams::default(),
            bias: InjectedBias::default(),
            anchor_sources: false,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 3: AnchoredSources
    // -----------------------------------------------------------------------
    fn anchored_sources(seed: u64) -> Self {
        let transmitters = vec![
            transmitter("ap-0", 2.0, 2.0, 2.2),
            transmitter("ap-1", 28.0, 3.0, 2.2),
            transmitter("ap-2", 15.0, 27.0, 2.4),
            transmitter("ap-3", 3.0, 25.0, 2.0),
            transmitter("ap-4", 27.0, 26.0, 2.0),
        ];
        Scenario {
            name: "anchored_sources".into(),
            seed,
            extent: 30.0,
            n_fingerprints: 250,
            transmitters,
            params: SurveyParams::default(),
            bias: InjectedBias::default(),
            anchor_sources: true,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 4: BiasedDevice
    // -----------------------------------------------------------------------
    fn biased_device(seed: u64) -> Self {
        Scenario {
            bias: InjectedBias {
                rssi_offset_dbm: 8.0,
            },
            name: "biased_device".into(),
            ..Self::anchored_sources(seed)
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 5: SparseCoverage
    // -----------------------------------------------------------------------
    fn sparse_coverage(seed: u64) -> Self {
        let transmitters = (0..5)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::TAU / 5.0;
                transmitter(
                    &format!("ap-{i}"),
                    30.0 + 22.0 * angle.cos(),
                    30.0 + 22.0 * angle.sin(),
                    2.3,
                )
            })
            .collect();
        Scenario {
            name: "sparse_coverage".into(),
            seed,
            extent: 60.0,
            n_fingerprints: 40,
            transmitters,
            params: SurveyParams {
                rssi_noise_std_dbm: 0.5,
                detection_threshold_dbm: Some(-95.0),
                ..Default::default()
            },
            bias: InjectedBias::default(),
            anchor_sources: false,
        }
    }
}

fn transmitter(id: &str, x: f64, y: f64, exponent: f64) -> Transmitter<2> {
    Transmitter::new(
        id,
        Vector2::new(x, y),
        -5.0,
        PathLossModel::new(exponent, 2.4e9),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenarios_build_with_expected_shapes() {
        let single = Scenario::build(ScenarioKind::SingleSource, 42);
        assert_eq!(single.transmitters.len(), 1);
        assert!(!single.anchor_sources);

        let anchored = Scenario::build(ScenarioKind::AnchoredSources, 42);
        assert!(anchored.anchor_sources);
        let survey = anchored.survey();
        assert!(survey.sources().iter().all(|s| s.is_located()));
    }

    #[test]
    fn biased_device_shares_anchored_geometry() {
        let anchored = Scenario::build(ScenarioKind::AnchoredSources, 7);
        let biased = Scenario::build(ScenarioKind::BiasedDevice, 7);
        assert_eq!(anchored.transmitters.len(), biased.transmitters.len());
        assert_eq!(biased.bias.rssi_offset_dbm, 8.0);
    }
}
