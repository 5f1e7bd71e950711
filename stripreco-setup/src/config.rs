//! JSON description of the detector and the reconstruction parameters.
//!
//! Every field except the module list has a default, so a minimal file only
//! names the modules:
//!
//! ```json
//! {
//!   "detector": {
//!     "modules": [
//!       { "position": { "unit": 0, "ladder": 1, "half_ladder": 0, "module": 2 },
//!         "sensor": { "type": "stereo", "n_strips": 1024, "pitch": 0.0058,
//!                     "stereo_front": 0.0, "stereo_back": 7.5, "active_height": 6.0 } }
//!     ]
//!   },
//!   "reconstruction": { "time_cut_clusters_sig": 4.0, "connect_edge_back": true }
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use stripreco_core::address;
use stripreco_core::calibration::{
    AsicParams, ChargeUncertainty, ConstantWidth, LandauTable, ModuleCalibration,
};
use stripreco_core::detector::{DetectorSetup, ModuleSetup};
use stripreco_core::geometry::{LocalToGlobal, ModuleGeometry, SensorClass, StripLayout};
use stripreco_core::params::RecoParams;

use crate::error::{Error, Result};

/// Detector setup and reconstruction parameters of a run.
#[derive(Clone, Debug)]
pub struct RecoSetup {
    /// Validated detector description.
    pub detector: DetectorSetup,
    /// Validated reconstruction parameters.
    pub params: RecoParams,
}

// Intermediate structs for the JSON schema
#[derive(Deserialize)]
struct JsonConfig {
    detector: JsonDetector,
    #[serde(default)]
    reconstruction: RecoParams,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonDetector {
    asic: JsonAsic,
    channels_per_asic: Option<u16>,
    charge_model: JsonChargeModel,
    modules: Vec<JsonModule>,
}

#[derive(Deserialize, Clone, Copy)]
#[serde(default)]
struct JsonAsic {
    n_adc: u16,
    dynamic_range: f64,
    threshold: f64,
    time_resolution: f64,
    dead_time: f64,
    noise: f64,
}

impl Default for JsonAsic {
    fn default() -> Self {
        let asic = AsicParams::default();
        Self {
            n_adc: asic.n_adc,
            dynamic_range: asic.dynamic_range,
            threshold: asic.threshold,
            time_resolution: asic.time_resolution,
            dead_time: asic.dead_time,
            noise: asic.noise,
        }
    }
}

impl From<JsonAsic> for AsicParams {
    fn from(asic: JsonAsic) -> Self {
        Self {
            n_adc: asic.n_adc,
            dynamic_range: asic.dynamic_range,
            threshold: asic.threshold,
            time_resolution: asic.time_resolution,
            dead_time: asic.dead_time,
            noise: asic.noise,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonChargeModel {
    Constant { width: f64 },
    Landau { step: f64, values: Vec<f64> },
}

impl Default for JsonChargeModel {
    fn default() -> Self {
        Self::Constant { width: 0.0 }
    }
}

#[derive(Deserialize)]
struct JsonModule {
    address: Option<u32>,
    position: Option<JsonPosition>,
    sensor: JsonSensor,
    #[serde(default)]
    lorentz_shift: [f64; 2],
    #[serde(default)]
    translation: [f64; 3],
    rotation: Option<[[f64; 3]; 3]>,
    asic: Option<JsonAsic>,
    asics: Option<Vec<JsonAsic>>,
    channels_per_asic: Option<u16>,
}

#[derive(Deserialize)]
struct JsonPosition {
    unit: u32,
    ladder: u32,
    half_ladder: u32,
    module: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonSensor {
    Stereo(JsonStereo),
    Orthogonal(JsonOrthogonal),
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonStereo {
    n_strips: u16,
    pitch: f64,
    stereo_front: f64,
    stereo_back: f64,
    active_height: f64,
}

impl Default for JsonStereo {
    fn default() -> Self {
        Self {
            n_strips: 1024,
            pitch: 0.0058,
            stereo_front: 0.0,
            stereo_back: 7.5,
            active_height: 6.0,
        }
    }
}

#[derive(Deserialize)]
struct JsonOrthogonal {
    front: JsonStrips,
    back: JsonStrips,
}

#[derive(Deserialize)]
struct JsonStrips {
    n_strips: u16,
    pitch: f64,
}

impl From<JsonStrips> for StripLayout {
    fn from(strips: JsonStrips) -> Self {
        StripLayout::new(strips.n_strips, strips.pitch)
    }
}

impl From<JsonSensor> for SensorClass {
    fn from(sensor: JsonSensor) -> Self {
        match sensor {
            JsonSensor::Stereo(s) => SensorClass::StereoPair {
                front: StripLayout::new(s.n_strips, s.pitch),
                back: StripLayout::new(s.n_strips, s.pitch),
                stereo_front: s.stereo_front,
                stereo_back: s.stereo_back,
                active_height: s.active_height,
            },
            JsonSensor::Orthogonal(o) => SensorClass::OrthogonalPair {
                front: o.front.into(),
                back: o.back.into(),
            },
        }
    }
}

impl RecoSetup {
    /// Load the setup from a JSON file.
    ///
    /// Validates every module and the reconstruction parameters.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// describes an inconsistent detector.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Reading detector setup from {}", path.display());
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json_config: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json_config)
    }

    /// Load the setup from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the string is not valid JSON or describes an
    /// inconsistent detector.
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    fn from_json_config(config: JsonConfig) -> Result<Self> {
        let JsonConfig {
            detector,
            reconstruction: params,
        } = config;
        params.validate()?;

        if detector.modules.is_empty() {
            return Err(stripreco_core::Error::ConfigError(
                "detector setup contains no modules".to_string(),
            )
            .into());
        }

        let default_asic = detector.asic;
        let default_per_asic = detector.channels_per_asic;
        let modules = detector
            .modules
            .into_iter()
            .enumerate()
            .map(|(index, module)| build_module(index, module, default_asic, default_per_asic))
            .collect::<Result<Vec<_>>>()?;

        let charge_model: Arc<dyn ChargeUncertainty> = match detector.charge_model {
            JsonChargeModel::Constant { width } => Arc::new(ConstantWidth(width)),
            JsonChargeModel::Landau { step, values } => Arc::new(LandauTable::new(step, values)?),
        };

        let detector = DetectorSetup::new(modules, charge_model);
        detector.validate()?;

        let stereo = detector
            .modules
            .iter()
            .filter(|m| matches!(m.geometry.sensor, SensorClass::StereoPair { .. }))
            .count();
        log::info!(
            "Loaded detector setup: {} modules ({} stereo, {} orthogonal)",
            detector.modules.len(),
            stereo,
            detector.modules.len() - stereo
        );

        Ok(Self { detector, params })
    }
}

fn build_module(
    index: usize,
    module: JsonModule,
    default_asic: JsonAsic,
    default_per_asic: Option<u16>,
) -> Result<ModuleSetup> {
    let addr = match (module.address, module.position) {
        (Some(addr), _) => addr,
        (None, Some(p)) => address::build_module_address(p.unit, p.ladder, p.half_ladder, p.module),
        (None, None) => return Err(Error::MissingAddress { index }),
    };

    let transform = LocalToGlobal {
        rotation: module
            .rotation
            .unwrap_or_else(|| LocalToGlobal::identity().rotation),
        translation: module.translation,
    };
    let geometry = ModuleGeometry::new(addr, module.sensor.into())
        .with_lorentz_shift(module.lorentz_shift[0], module.lorentz_shift[1])
        .with_transform(transform);

    let channels_per_asic = module
        .channels_per_asic
        .or(default_per_asic)
        .unwrap_or(ModuleCalibration::DEFAULT_CHANNELS_PER_ASIC);
    let asics: Vec<AsicParams> = match module.asics {
        Some(list) => list.into_iter().map(AsicParams::from).collect(),
        None => {
            let asic = AsicParams::from(module.asic.unwrap_or(default_asic));
            let n_asics = geometry
                .n_channels_total()
                .div_ceil(u32::from(channels_per_asic.max(1)));
            vec![asic; n_asics as usize]
        }
    };
    let calibration = ModuleCalibration {
        channels_per_asic,
        asics,
    };

    log::debug!(
        "Module {addr:#010x}: {} + {} channels, {} ASICs",
        geometry.n_channels(stripreco_core::ModuleSide::Front),
        geometry.n_channels(stripreco_core::ModuleSide::Back),
        calibration.asics.len()
    );

    Ok(ModuleSetup {
        geometry,
        calibration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use stripreco_core::params::RecoMode;

    const ORTHOGONAL: &str = r#"{
        "detector": {
            "modules": [
                {
                    "position": { "unit": 0, "ladder": 1, "half_ladder": 0, "module": 2 },
                    "sensor": {
                        "type": "orthogonal",
                        "front": { "n_strips": 128, "pitch": 0.01 },
                        "back": { "n_strips": 64, "pitch": 0.02 }
                    },
                    "translation": [1.0, 2.0, 30.0]
                }
            ]
        }
    }"#;

    #[test]
    fn test_minimal_orthogonal_setup() {
        let setup = RecoSetup::from_json(ORTHOGONAL).expect("Should parse minimal setup");

        assert_eq!(setup.detector.modules.len(), 1);
        let module = &setup.detector.modules[0];
        assert_eq!(module.address(), address::build_module_address(0, 1, 0, 2));
        assert_eq!(module.geometry.n_channels_total(), 192);
        assert_relative_eq!(module.geometry.transform.translation[2], 30.0);
        assert_eq!(
            module.calibration.channels_per_asic,
            ModuleCalibration::DEFAULT_CHANNELS_PER_ASIC
        );
        assert_eq!(module.calibration.asics.len(), 2);
        assert_eq!(module.calibration.asics[0], AsicParams::default());

        // Reconstruction section omitted: defaults
        assert_eq!(setup.params, RecoParams::default());
    }

    #[test]
    fn test_stereo_defaults_and_overrides() {
        let json = r#"{
            "detector": {
                "asic": { "time_resolution": 3.5, "dead_time": 400.0 },
                "charge_model": { "type": "landau", "step": 1000.0, "values": [10.0, 20.0, 40.0] },
                "modules": [
                    { "address": 17, "sensor": { "type": "stereo", "stereo_back": -7.5 },
                      "lorentz_shift": [0.001, 0.002] }
                ]
            },
            "reconstruction": {
                "time_cut_digis_abs": 25.0,
                "connect_edge_front": true,
                "mode": "event",
                "num_threads": 2
            }
        }"#;
        let setup = RecoSetup::from_json(json).expect("Should parse stereo setup");

        let module = &setup.detector.modules[0];
        assert_eq!(module.address(), 17);
        match module.geometry.sensor {
            SensorClass::StereoPair {
                front,
                stereo_front,
                stereo_back,
                active_height,
                ..
            } => {
                assert_eq!(front.n_strips, 1024);
                assert_relative_eq!(stereo_front, 0.0);
                assert_relative_eq!(stereo_back, -7.5);
                assert_relative_eq!(active_height, 6.0);
            }
            SensorClass::OrthogonalPair { .. } => panic!("expected a stereo sensor"),
        }
        assert_relative_eq!(module.geometry.lorentz_back, 0.002);
        assert_eq!(module.calibration.asics.len(), 16);
        assert_relative_eq!(module.calibration.asics[0].time_resolution, 3.5);
        assert_relative_eq!(module.calibration.asics[0].noise, 1_000.0);
        assert_relative_eq!(setup.detector.charge_model.width(1500.0), 30.0);

        assert_relative_eq!(setup.params.time_cut_digis_abs, 25.0);
        assert!(setup.params.connect_edge_front);
        assert!(!setup.params.connect_edge_back);
        assert_eq!(setup.params.mode, RecoMode::Event);
        assert_eq!(setup.params.num_threads, 2);
    }

    #[test]
    fn test_explicit_asic_list() {
        let json = r#"{
            "detector": {
                "modules": [
                    { "address": 1,
                      "sensor": { "type": "orthogonal",
                                  "front": { "n_strips": 64, "pitch": 0.01 },
                                  "back": { "n_strips": 64, "pitch": 0.01 } },
                      "channels_per_asic": 64,
                      "asics": [ { "noise": 500.0 }, { "noise": 1500.0 } ] }
                ]
            }
        }"#;
        let setup = RecoSetup::from_json(json).expect("Should parse ASIC list");
        let calibration = &setup.detector.modules[0].calibration;
        assert_eq!(calibration.channels_per_asic, 64);
        assert_relative_eq!(calibration.asic(10).noise, 500.0);
        assert_relative_eq!(calibration.asic(100).noise, 1500.0);
    }

    #[test]
    fn test_missing_address_rejected() {
        let json = r#"{
            "detector": {
                "modules": [ { "sensor": { "type": "stereo" } } ]
            }
        }"#;
        let err = RecoSetup::from_json(json).unwrap_err();
        assert!(matches!(err, Error::MissingAddress { index: 0 }));
    }

    #[test]
    fn test_empty_module_list_rejected() {
        let err = RecoSetup::from_json(r#"{ "detector": {} }"#).unwrap_err();
        assert!(matches!(
            err,
            Error::CoreError(stripreco_core::Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_inconsistent_geometry_rejected() {
        let json = r#"{
            "detector": {
                "modules": [ { "address": 1, "sensor": { "type": "stereo", "pitch": 0.0 } } ]
            }
        }"#;
        let err = RecoSetup::from_json(json).unwrap_err();
        assert!(matches!(
            err,
            Error::CoreError(stripreco_core::Error::InvalidGeometry { address: 1, .. })
        ));
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let json = r#"{
            "detector": {
                "modules": [
                    { "address": 1, "sensor": { "type": "stereo" } },
                    { "position": { "unit": 0, "ladder": 0, "half_ladder": 0, "module": 0 },
                      "sensor": { "type": "stereo" } }
                ]
            }
        }"#;
        let err = RecoSetup::from_json(json).unwrap_err();
        assert!(matches!(
            err,
            Error::CoreError(stripreco_core::Error::DuplicateModule(1))
        ));
    }

    #[test]
    fn test_invalid_reconstruction_params_rejected() {
        let json = r#"{
            "detector": { "modules": [ { "address": 1, "sensor": { "type": "stereo" } } ] },
            "reconstruction": { "charge_correlation_delta": -5.0 }
        }"#;
        let err = RecoSetup::from_json(json).unwrap_err();
        assert!(matches!(
            err,
            Error::CoreError(stripreco_core::Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_malformed_json() {
        let err = RecoSetup::from_json(r#"{ "detector": { "modules": 3 } }"#).unwrap_err();
        assert!(matches!(err, Error::JsonError(_)));
    }
}
