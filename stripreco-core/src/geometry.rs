//! Module geometry: strip layout, sensor class and placement.
//!
//! Geometry is read-only during reconstruction. It is validated once, before
//! any pipeline is built from it.

use crate::digi::ModuleSide;
use crate::error::{Error, Result};
use crate::hit::Covariance2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest stereo angle magnitude accepted, in degrees.
const MAX_STEREO_DEG: f64 = 80.0;

/// Strip count and pitch of one sensor side.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StripLayout {
    /// Number of strips (= readout channels) on the side.
    pub n_strips: u16,
    /// Strip pitch [cm].
    pub pitch: f64,
}

impl StripLayout {
    /// Creates a strip layout.
    #[inline]
    #[must_use]
    pub fn new(n_strips: u16, pitch: f64) -> Self {
        Self { n_strips, pitch }
    }

    /// Extent of the side perpendicular to its strips [cm].
    #[inline]
    #[must_use]
    pub fn width(&self) -> f64 {
        f64::from(self.n_strips) * self.pitch
    }
}

/// The closed set of double-sided sensor types.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorClass {
    /// Both sides share strip count and pitch; strips are tilted by a
    /// per-side stereo angle (degrees, relative to the vertical axis).
    StereoPair {
        /// Front-side strips.
        front: StripLayout,
        /// Back-side strips.
        back: StripLayout,
        /// Front-side stereo angle [deg].
        stereo_front: f64,
        /// Back-side stereo angle [deg].
        stereo_back: f64,
        /// Height of the active area along the strips [cm].
        active_height: f64,
    },
    /// Front strips run vertically, back strips horizontally.
    OrthogonalPair {
        /// Front-side (vertical) strips.
        front: StripLayout,
        /// Back-side (horizontal) strips.
        back: StripLayout,
    },
}

impl SensorClass {
    /// Strip layout of a side.
    #[must_use]
    pub fn layout(&self, side: ModuleSide) -> StripLayout {
        let (front, back) = match self {
            SensorClass::StereoPair { front, back, .. }
            | SensorClass::OrthogonalPair { front, back } => (*front, *back),
        };
        match side {
            ModuleSide::Front => front,
            ModuleSide::Back => back,
        }
    }
}

/// Affine local-to-global transform (rotation followed by translation).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocalToGlobal {
    /// Row-major rotation matrix.
    pub rotation: [[f64; 3]; 3],
    /// Translation [cm].
    pub translation: [f64; 3],
}

impl Default for LocalToGlobal {
    fn default() -> Self {
        Self::identity()
    }
}

impl LocalToGlobal {
    /// Identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// Pure translation.
    #[must_use]
    pub fn from_translation(translation: [f64; 3]) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    /// Maps a local point into the global frame.
    #[inline]
    #[must_use]
    pub fn apply(&self, local: [f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            t[0] + r[0][0] * local[0] + r[0][1] * local[1] + r[0][2] * local[2],
            t[1] + r[1][0] * local[0] + r[1][1] * local[1] + r[1][2] * local[2],
            t[2] + r[2][0] * local[0] + r[2][1] * local[1] + r[2][2] * local[2],
        ]
    }

    /// Rotates an in-plane covariance into the global x/y block (R C R^T).
    #[must_use]
    pub fn rotate_covariance(&self, cov: Covariance2) -> Covariance2 {
        let r = &self.rotation;
        // Only the local x/y block is populated, so the sum runs over two indices.
        let local = [[cov.xx, cov.xy], [cov.xy, cov.yy]];
        let element = |i: usize, j: usize| -> f64 {
            let mut sum = 0.0;
            for (k, row) in local.iter().enumerate() {
                for (l, value) in row.iter().enumerate() {
                    sum += r[i][k] * value * r[j][l];
                }
            }
            sum
        };
        Covariance2::new(element(0, 0), element(0, 1), element(1, 1))
    }

    /// Checks that the rotation is orthonormal.
    fn is_orthonormal(&self) -> bool {
        const TOLERANCE: f64 = 1e-6;
        let r = &self.rotation;
        for i in 0..3 {
            for j in 0..3 {
                let dot: f64 = (0..3).map(|k| r[i][k] * r[j][k]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                if (dot - expected).abs() > TOLERANCE {
                    return false;
                }
            }
        }
        true
    }
}

/// Geometry of one double-sided strip module.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModuleGeometry {
    /// Module address.
    pub address: u32,
    /// Sensor class and strip layout.
    pub sensor: SensorClass,
    /// Lorentz shift of the front-side charge [cm].
    pub lorentz_front: f64,
    /// Lorentz shift of the back-side charge [cm].
    pub lorentz_back: f64,
    /// Local to global transform.
    pub transform: LocalToGlobal,
}

impl ModuleGeometry {
    /// Creates a geometry without Lorentz shift and with identity placement.
    #[must_use]
    pub fn new(address: u32, sensor: SensorClass) -> Self {
        Self {
            address,
            sensor,
            lorentz_front: 0.0,
            lorentz_back: 0.0,
            transform: LocalToGlobal::identity(),
        }
    }

    /// Sets the per-side Lorentz shifts.
    #[must_use]
    pub fn with_lorentz_shift(mut self, front: f64, back: f64) -> Self {
        self.lorentz_front = front;
        self.lorentz_back = back;
        self
    }

    /// Sets the local to global transform.
    #[must_use]
    pub fn with_transform(mut self, transform: LocalToGlobal) -> Self {
        self.transform = transform;
        self
    }

    /// Number of readout channels on one side.
    #[inline]
    #[must_use]
    pub fn n_channels(&self, side: ModuleSide) -> u16 {
        self.sensor.layout(side).n_strips
    }

    /// Number of readout channels of the whole module.
    #[inline]
    #[must_use]
    pub fn n_channels_total(&self) -> u32 {
        u32::from(self.n_channels(ModuleSide::Front)) + u32::from(self.n_channels(ModuleSide::Back))
    }

    /// Lorentz shift of a side [cm].
    #[inline]
    #[must_use]
    pub fn lorentz_shift(&self, side: ModuleSide) -> f64 {
        match side {
            ModuleSide::Front => self.lorentz_front,
            ModuleSide::Back => self.lorentz_back,
        }
    }

    /// Maps a module-wide channel to its side and side-local channel.
    ///
    /// Returns `None` for channels beyond the module's channel count.
    #[inline]
    #[must_use]
    pub fn side_of_channel(&self, channel: u16) -> Option<(ModuleSide, u16)> {
        let n_front = self.n_channels(ModuleSide::Front);
        if channel < n_front {
            return Some((ModuleSide::Front, channel));
        }
        let local = channel - n_front;
        (local < self.n_channels(ModuleSide::Back)).then_some((ModuleSide::Back, local))
    }

    /// Width of the active area [cm].
    #[must_use]
    pub fn active_width(&self) -> f64 {
        self.sensor.layout(ModuleSide::Front).width()
    }

    /// Height of the active area [cm].
    #[must_use]
    pub fn active_height(&self) -> f64 {
        match self.sensor {
            SensorClass::StereoPair { active_height, .. } => active_height,
            SensorClass::OrthogonalPair { back, .. } => back.width(),
        }
    }

    /// Checks the geometry for inconsistencies.
    ///
    /// # Errors
    /// Returns [`Error::InvalidGeometry`] for empty sides, non-positive pitch,
    /// a stereo pair with differing strip layouts, a non-positive active height,
    /// out-of-range stereo angles, more channels than a digi can address, or a
    /// non-orthonormal rotation.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidGeometry {
            address: self.address,
            reason,
        };

        for side in ModuleSide::BOTH {
            let layout = self.sensor.layout(side);
            if layout.n_strips == 0 {
                return Err(invalid(format!("{side:?} side has no strips")));
            }
            if !(layout.pitch > 0.0) {
                return Err(invalid(format!(
                    "{side:?} side pitch {} is not positive",
                    layout.pitch
                )));
            }
        }

        if self.n_channels_total() > u32::from(u16::MAX) + 1 {
            return Err(invalid(format!(
                "{} channels exceed the digi channel range",
                self.n_channels_total()
            )));
        }

        if let SensorClass::StereoPair {
            front,
            back,
            stereo_front,
            stereo_back,
            active_height,
        } = self.sensor
        {
            if front.n_strips != back.n_strips {
                return Err(invalid(format!(
                    "stereo pair strip counts differ: front {} back {}",
                    front.n_strips, back.n_strips
                )));
            }
            if (front.pitch - back.pitch).abs() > f64::EPSILON * front.pitch.max(back.pitch) {
                return Err(invalid(format!(
                    "stereo pair pitches differ: front {} back {}",
                    front.pitch, back.pitch
                )));
            }
            if !(active_height > 0.0) {
                return Err(invalid(format!(
                    "active height {active_height} is not positive"
                )));
            }
            for angle in [stereo_front, stereo_back] {
                if !angle.is_finite() || angle.abs() > MAX_STEREO_DEG {
                    return Err(invalid(format!("stereo angle {angle} out of range")));
                }
            }
        }

        if !self.transform.is_orthonormal() {
            return Err(invalid("rotation is not orthonormal".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn stereo(n_front: u16, n_back: u16, pitch: f64) -> ModuleGeometry {
        ModuleGeometry::new(
            0x21,
            SensorClass::StereoPair {
                front: StripLayout::new(n_front, pitch),
                back: StripLayout::new(n_back, pitch),
                stereo_front: 0.0,
                stereo_back: 7.5,
                active_height: 6.0,
            },
        )
    }

    #[test]
    fn test_valid_stereo_pair() {
        let geometry = stereo(1024, 1024, 0.0058);
        assert!(geometry.validate().is_ok());
        assert_eq!(geometry.n_channels_total(), 2048);
        assert_relative_eq!(geometry.active_width(), 1024.0 * 0.0058);
        assert_relative_eq!(geometry.active_height(), 6.0);
    }

    #[test]
    fn test_stereo_pair_strip_mismatch_rejected() {
        let err = stereo(1024, 512, 0.0058).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry { address: 0x21, .. }));
        assert!(err.to_string().contains("strip counts differ"));
    }

    #[test]
    fn test_non_positive_pitch_rejected() {
        assert!(stereo(128, 128, 0.0).validate().is_err());
        assert!(stereo(128, 128, -0.01).validate().is_err());
        assert!(stereo(128, 128, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_orthogonal_extents() {
        let geometry = ModuleGeometry::new(
            0x31,
            SensorClass::OrthogonalPair {
                front: StripLayout::new(128, 0.01),
                back: StripLayout::new(64, 0.02),
            },
        );
        assert!(geometry.validate().is_ok());
        assert_relative_eq!(geometry.active_width(), 1.28);
        assert_relative_eq!(geometry.active_height(), 1.28);
    }

    #[test]
    fn test_side_of_channel() {
        let geometry = stereo(128, 128, 0.01);
        assert_eq!(geometry.side_of_channel(0), Some((ModuleSide::Front, 0)));
        assert_eq!(geometry.side_of_channel(127), Some((ModuleSide::Front, 127)));
        assert_eq!(geometry.side_of_channel(128), Some((ModuleSide::Back, 0)));
        assert_eq!(geometry.side_of_channel(255), Some((ModuleSide::Back, 127)));
        assert_eq!(geometry.side_of_channel(256), None);
    }

    #[test]
    fn test_transform_and_covariance_rotation() {
        // 180 degree rotation about z, shifted along z
        let transform = LocalToGlobal {
            rotation: [[-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [1.0, 2.0, 30.0],
        };
        let global = transform.apply([0.5, 0.25, 0.0]);
        assert_relative_eq!(global[0], 0.5);
        assert_relative_eq!(global[1], 1.75);
        assert_relative_eq!(global[2], 30.0);

        let cov = transform.rotate_covariance(Covariance2::new(4.0, 1.0, 9.0));
        assert_relative_eq!(cov.xx, 4.0);
        assert_relative_eq!(cov.xy, 1.0);
        assert_relative_eq!(cov.yy, 9.0);

        // 90 degree rotation swaps the axes and flips the correlation
        let quarter = LocalToGlobal {
            rotation: [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        };
        let cov = quarter.rotate_covariance(Covariance2::new(4.0, 1.0, 9.0));
        assert_relative_eq!(cov.xx, 9.0);
        assert_relative_eq!(cov.xy, -1.0);
        assert_relative_eq!(cov.yy, 4.0);
    }

    #[test]
    fn test_non_orthonormal_rotation_rejected() {
        let geometry = stereo(128, 128, 0.01).with_transform(LocalToGlobal {
            rotation: [[2.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        });
        assert!(geometry.validate().is_err());
    }
}
