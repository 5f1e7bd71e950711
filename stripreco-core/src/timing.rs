//! Time-coincidence windows for cluster and hit finding.

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Resolves the maximal time difference of two compatible measurements.
///
/// A positive absolute cut overrides the resolution-based cut. Otherwise the
/// window is `sigma_factor * sqrt(res_a^2 + res_b^2)`, which reduces to
/// `sqrt(2) * res` for two measurements of equal resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimingPolicy {
    /// Absolute cut [ns]; disabled when not positive.
    pub absolute: f64,
    /// Cut in units of the combined time resolution; disabled when not positive.
    pub sigma_factor: f64,
}

impl TimingPolicy {
    /// Creates a policy from an absolute cut and a sigma factor.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if neither cut is enabled.
    pub fn new(absolute: f64, sigma_factor: f64) -> Result<Self> {
        let policy = Self {
            absolute,
            sigma_factor,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Checks that at least one cut is enabled.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if both cuts are disabled or not finite.
    pub fn validate(&self) -> Result<()> {
        let abs_ok = self.absolute > 0.0 && self.absolute.is_finite();
        let sig_ok = self.sigma_factor > 0.0 && self.sigma_factor.is_finite();
        if abs_ok || sig_ok {
            Ok(())
        } else {
            Err(Error::ConfigError(format!(
                "time cut needs a positive absolute value or sigma factor (got {} / {})",
                self.absolute, self.sigma_factor
            )))
        }
    }

    /// Window for two measurements with resolutions `res_a` and `res_b` [ns].
    #[inline]
    #[must_use]
    pub fn coincidence_window(&self, res_a: f64, res_b: f64) -> f64 {
        if self.absolute > 0.0 {
            self.absolute
        } else {
            self.sigma_factor * res_a.hypot(res_b)
        }
    }

    /// Window for two digis of equal resolution [ns].
    #[inline]
    #[must_use]
    pub fn digi_window(&self, resolution: f64) -> f64 {
        self.coincidence_window(resolution, resolution)
    }

    /// Returns true if a time difference lies within the window.
    #[inline]
    #[must_use]
    pub fn is_coincident(&self, time_diff: f64, res_a: f64, res_b: f64) -> bool {
        time_diff.abs() <= self.coincidence_window(res_a, res_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_absolute_cut_overrides_sigma() {
        let policy = TimingPolicy::new(20.0, 3.0).unwrap();
        assert_relative_eq!(policy.coincidence_window(5.0, 8.0), 20.0);
        assert_relative_eq!(policy.digi_window(100.0), 20.0);
    }

    #[test]
    fn test_sigma_cut_for_equal_resolution() {
        let policy = TimingPolicy::new(-1.0, 3.0).unwrap();
        assert_relative_eq!(policy.digi_window(5.0), 3.0 * 2f64.sqrt() * 5.0);
    }

    #[test]
    fn test_sigma_cut_for_differing_resolution() {
        let policy = TimingPolicy::new(-1.0, 4.0).unwrap();
        assert_relative_eq!(policy.coincidence_window(3.0, 4.0), 20.0);
        assert!(policy.is_coincident(-20.0, 3.0, 4.0));
        assert!(!policy.is_coincident(20.5, 3.0, 4.0));
    }

    #[test]
    fn test_disabled_cuts_rejected() {
        assert!(TimingPolicy::new(-1.0, 0.0).is_err());
        assert!(TimingPolicy::new(0.0, -2.0).is_err());
    }
}
