//! stripreco-setup: Detector setup loading for strip reconstruction.
//!
//! Reads module geometry, readout calibration, the charge fluctuation model
//! and the reconstruction parameters from JSON and validates them before any
//! reconstruction runs.
//!

mod config;
mod error;

pub use config::RecoSetup;
pub use error::{Error, Result};
