//! Immutable description of the detector handed to the reconstruction.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::address;
use crate::calibration::{ChargeUncertainty, ModuleCalibration};
use crate::error::{Error, Result};
use crate::geometry::ModuleGeometry;

/// Geometry and calibration of one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSetup {
    /// Module geometry.
    pub geometry: ModuleGeometry,
    /// Module calibration.
    pub calibration: ModuleCalibration,
}

impl ModuleSetup {
    /// Module address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> u32 {
        self.geometry.address
    }

    /// Validates geometry and calibration.
    ///
    /// # Errors
    /// Returns the first geometry or calibration inconsistency found.
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        self.calibration.validate(&self.geometry)
    }
}

/// All modules plus the shared charge uncertainty model.
///
/// Built once per run and shared read-only by every module pipeline.
#[derive(Clone)]
pub struct DetectorSetup {
    /// Modules in processing order.
    pub modules: Vec<ModuleSetup>,
    /// Charge measurement fluctuation model.
    pub charge_model: Arc<dyn ChargeUncertainty>,
}

impl fmt::Debug for DetectorSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorSetup")
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

impl DetectorSetup {
    /// Creates a setup.
    pub fn new(modules: Vec<ModuleSetup>, charge_model: Arc<dyn ChargeUncertainty>) -> Self {
        Self {
            modules,
            charge_model,
        }
    }

    /// Validates every module and checks module addresses.
    ///
    /// # Errors
    /// Returns the first invalid module, [`Error::DuplicateModule`] for a
    /// repeated address, or [`Error::InvalidGeometry`] for an address that is
    /// not a strip module address.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.modules.len());
        for module in &self.modules {
            let addr = module.address();
            if !address::is_strip_address(addr) || address::module_address(addr) != addr {
                return Err(Error::InvalidGeometry {
                    address: addr,
                    reason: "not a strip module address".to_string(),
                });
            }
            if !seen.insert(addr) {
                return Err(Error::DuplicateModule(addr));
            }
            module.validate()?;
        }
        Ok(())
    }
}
