//! stripreco-core: Core types for silicon strip detector reconstruction.
//!
//! This crate provides the data model (digis, clusters, hits), detector
//! addressing, module geometry and calibration, and the reconstruction
//! parameters shared by the algorithms.
//!

pub mod address;
pub mod calibration;
pub mod cluster;
pub mod detector;
pub mod digi;
pub mod error;
pub mod geometry;
pub mod hit;
pub mod params;
pub mod timing;

pub use calibration::{AsicParams, ChargeUncertainty, ConstantWidth, LandauTable, ModuleCalibration};
pub use cluster::Cluster;
pub use detector::{DetectorSetup, ModuleSetup};
pub use digi::{Digi, ModuleSide};
pub use error::{Error, Result};
pub use geometry::{LocalToGlobal, ModuleGeometry, SensorClass, StripLayout};
pub use hit::{Covariance2, Hit};
pub use params::{RecoMode, RecoParams};
pub use timing::TimingPolicy;
