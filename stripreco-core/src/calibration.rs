//! Readout calibration: ADC conversion, timing and charge uncertainties.

use crate::error::{Error, Result};
use crate::geometry::ModuleGeometry;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Operating parameters of one readout ASIC.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AsicParams {
    /// Number of ADC channels.
    pub n_adc: u16,
    /// Dynamic range of the ADC [e].
    pub dynamic_range: f64,
    /// Discriminator threshold [e].
    pub threshold: f64,
    /// Time resolution [ns].
    pub time_resolution: f64,
    /// Channel dead time [ns].
    pub dead_time: f64,
    /// Equivalent noise charge [e].
    pub noise: f64,
}

impl Default for AsicParams {
    fn default() -> Self {
        Self {
            n_adc: 31,
            dynamic_range: 75_000.0,
            threshold: 3_000.0,
            time_resolution: 5.0,
            dead_time: 800.0,
            noise: 1_000.0,
        }
    }
}

impl AsicParams {
    /// Charge corresponding to one ADC step [e].
    #[inline]
    #[must_use]
    pub fn charge_per_adc(&self) -> f64 {
        self.dynamic_range / f64::from(self.n_adc)
    }

    /// Converts an ADC code to charge, taking the centre of the ADC bin.
    #[inline]
    #[must_use]
    pub fn adc_to_charge(&self, adc: u16) -> f64 {
        self.threshold + self.charge_per_adc() * (f64::from(adc) + 0.5)
    }

    /// Squared noise charge [e^2].
    #[inline]
    #[must_use]
    pub fn noise_variance(&self) -> f64 {
        self.noise * self.noise
    }

    /// Variance from the ADC quantisation [e^2].
    #[inline]
    #[must_use]
    pub fn digitisation_variance(&self) -> f64 {
        let step = self.charge_per_adc();
        step * step / 12.0
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let fields = [
            self.dynamic_range,
            self.threshold,
            self.time_resolution,
            self.dead_time,
            self.noise,
        ];
        if fields.iter().any(|value| !value.is_finite()) {
            return Err("ASIC parameters must be finite".to_string());
        }
        if self.n_adc == 0 {
            return Err("ASIC has zero ADC channels".to_string());
        }
        if !(self.dynamic_range > 0.0) {
            return Err(format!("dynamic range {} is not positive", self.dynamic_range));
        }
        if !(self.time_resolution > 0.0) {
            return Err(format!(
                "time resolution {} is not positive",
                self.time_resolution
            ));
        }
        if self.threshold < 0.0 || self.dead_time < 0.0 || self.noise < 0.0 {
            return Err("threshold, dead time and noise must not be negative".to_string());
        }
        Ok(())
    }
}

/// Maps a deposited charge to the width of its measurement fluctuation.
pub trait ChargeUncertainty: Send + Sync {
    /// Fluctuation width [e] for a deposited charge [e].
    fn width(&self, charge: f64) -> f64;
}

/// Charge fluctuation width tabulated in uniform charge steps.
///
/// Entry `i` holds the width at charge `i * step`. Widths are linearly
/// interpolated between entries and clamped to the first/last entry outside
/// the table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawLandauTable"))]
pub struct LandauTable {
    step: f64,
    values: Vec<f64>,
}

/// Unchecked table as read from a serialized setup.
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawLandauTable {
    step: f64,
    values: Vec<f64>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawLandauTable> for LandauTable {
    type Error = Error;

    fn try_from(raw: RawLandauTable) -> Result<Self> {
        Self::new(raw.step, raw.values)
    }
}

impl LandauTable {
    /// Creates a table.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if the step is not positive and finite,
    /// fewer than two entries are given, or an entry is not finite.
    pub fn new(step: f64, values: Vec<f64>) -> Result<Self> {
        if !(step > 0.0 && step.is_finite()) {
            return Err(Error::ConfigError(format!(
                "landau table step {step} is not positive"
            )));
        }
        if values.len() < 2 {
            return Err(Error::ConfigError(
                "landau table needs at least two entries".to_string(),
            ));
        }
        if values.iter().any(|value| !value.is_finite()) {
            return Err(Error::ConfigError(
                "landau table entries must be finite".to_string(),
            ));
        }
        Ok(Self { step, values })
    }
}

impl ChargeUncertainty for LandauTable {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn width(&self, charge: f64) -> f64 {
        let last = self.values.len() - 1;
        if charge <= self.step {
            return self.values[0];
        }
        if charge > self.step * last as f64 {
            return self.values[last];
        }

        let upper = (charge / self.step).ceil() as usize;
        let lower = upper - 1;
        let e1 = lower as f64 * self.step;
        let v1 = self.values[lower];
        let v2 = self.values[upper];
        v1 + (charge - e1) * (v2 - v1) / self.step
    }
}

/// Charge-independent fluctuation width.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstantWidth(pub f64);

impl ChargeUncertainty for ConstantWidth {
    #[inline]
    fn width(&self, _charge: f64) -> f64 {
        self.0
    }
}

/// Calibration of one module: ASIC parameters per readout region.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModuleCalibration {
    /// Channels served by one ASIC.
    pub channels_per_asic: u16,
    /// ASIC parameters, indexed by module-wide channel / `channels_per_asic`.
    pub asics: Vec<AsicParams>,
}

impl ModuleCalibration {
    /// Default channel count per ASIC.
    pub const DEFAULT_CHANNELS_PER_ASIC: u16 = 128;

    /// Calibration with identical parameters for every ASIC of the module.
    #[must_use]
    pub fn uniform(geometry: &ModuleGeometry, asic: AsicParams) -> Self {
        let per_asic = u32::from(Self::DEFAULT_CHANNELS_PER_ASIC);
        let n_asics = geometry.n_channels_total().div_ceil(per_asic);
        Self {
            channels_per_asic: Self::DEFAULT_CHANNELS_PER_ASIC,
            asics: vec![asic; n_asics as usize],
        }
    }

    /// ASIC parameters for a module-wide channel.
    ///
    /// The calibration must have been validated against the module geometry.
    #[inline]
    #[must_use]
    pub fn asic(&self, channel: u16) -> &AsicParams {
        &self.asics[usize::from(channel / self.channels_per_asic)]
    }

    /// Checks that every channel of the module is covered by a valid ASIC.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCalibration`] if `channels_per_asic` is zero,
    /// the ASICs do not cover all channels, or an ASIC has invalid parameters.
    pub fn validate(&self, geometry: &ModuleGeometry) -> Result<()> {
        let invalid = |reason: String| Error::InvalidCalibration {
            address: geometry.address,
            reason,
        };
        if self.channels_per_asic == 0 {
            return Err(invalid("zero channels per ASIC".to_string()));
        }
        let needed = geometry
            .n_channels_total()
            .div_ceil(u32::from(self.channels_per_asic));
        if (self.asics.len() as u64) < u64::from(needed) {
            return Err(invalid(format!(
                "{} ASICs cover fewer than {} channels",
                self.asics.len(),
                geometry.n_channels_total()
            )));
        }
        for (index, asic) in self.asics.iter().enumerate() {
            asic.validate()
                .map_err(|reason| invalid(format!("ASIC {index}: {reason}")))?;
        }
        Ok(())
    }
}
