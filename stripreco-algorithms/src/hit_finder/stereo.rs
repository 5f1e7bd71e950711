//! Intersection of tilted strips on a stereo sensor.
//!
//! In the frame with origin at the bottom-left sensor corner, a strip whose
//! centre meets the top (readout) edge at `x0` follows
//! `y(x) = dY - (x - x0) / tan(phi)` for a non-zero stereo angle `phi`.
//! Strips leaving the sensor through a side edge continue on the opposite
//! edge (cross-connection), so one cluster may correspond to several line
//! segments shifted by multiples of the sensor width.

use stripreco_core::cluster::Cluster;
use stripreco_core::digi::ModuleSide;
use stripreco_core::geometry::ModuleGeometry;
use stripreco_core::hit::Covariance2;

use super::{edge_position, LocalHit};

/// Stereo angles closer than this never yield an intersection [deg].
pub const MIN_STEREO_DIFFERENCE_DEG: f64 = 0.5;

/// Stereo angles below this are treated as vertical strips [deg].
const VERTICAL_DEG: f64 = 0.001;

/// Hit finder for sensors with stereo-angled strips on both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoHitFinder {
    pitch: f64,
    width: f64,
    height: f64,
    stereo_front: f64,
    stereo_back: f64,
    tan_front: f64,
    tan_back: f64,
    cos_front: f64,
    cos_back: f64,
    lorentz_front: f64,
    lorentz_back: f64,
}

impl StereoHitFinder {
    /// Derives the finder constants from a validated stereo geometry.
    ///
    /// `stereo_front`/`stereo_back` are in degrees; pitch and active area
    /// come from the geometry.
    #[must_use]
    pub fn new(geometry: &ModuleGeometry, stereo_front: f64, stereo_back: f64) -> Self {
        let (front_rad, back_rad) = (stereo_front.to_radians(), stereo_back.to_radians());
        Self {
            pitch: geometry.sensor.layout(ModuleSide::Front).pitch,
            width: geometry.active_width(),
            height: geometry.active_height(),
            stereo_front,
            stereo_back,
            tan_front: front_rad.tan(),
            tan_back: back_rad.tan(),
            cos_front: front_rad.cos(),
            cos_back: back_rad.cos(),
            lorentz_front: geometry.lorentz_shift(ModuleSide::Front),
            lorentz_back: geometry.lorentz_shift(ModuleSide::Back),
        }
    }

    /// Returns false if the stereo angles are too close for any intersection.
    #[inline]
    #[must_use]
    pub fn can_intersect(&self) -> bool {
        (self.stereo_front - self.stereo_back).abs() >= MIN_STEREO_DIFFERENCE_DEG
    }

    /// Calls `emit` for every intersection of the two clusters inside the
    /// active area, in sensor-centre coordinates.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn intersect<F: FnMut(LocalHit)>(&self, front: &Cluster, back: &Cluster, mut emit: F) {
        if !self.can_intersect() {
            return;
        }

        let Some(x_front) = edge_position(front.position, self.pitch, self.lorentz_front, self.width)
        else {
            return;
        };
        let Some(x_back) = edge_position(back.position, self.pitch, self.lorentz_back, self.width)
        else {
            return;
        };
        let ex_front = front.position_error * self.pitch;
        let ex_back = back.position_error * self.pitch;
        let du = ex_front * self.cos_front;
        let dv = ex_back * self.cos_back;

        // Line segments to consider: the strip is shifted by one sensor width
        // for every side edge it crosses on the way to the bottom edge.
        let n_front = ((x_front + self.height * self.tan_front) / self.width).floor() as i64;
        let n_back = ((x_back + self.height * self.tan_back) / self.width).floor() as i64;

        for i_front in n_front.min(0)..=n_front.max(0) {
            #[allow(clippy::cast_precision_loss)]
            let x_front_i = x_front - i_front as f64 * self.width;
            for i_back in n_back.min(0)..=n_back.max(0) {
                #[allow(clippy::cast_precision_loss)]
                let x_back_i = x_back - i_back as f64 * self.width;
                if let Some((x, y, covariance)) =
                    self.intersect_lines(x_front_i, ex_front, x_back_i, ex_back)
                {
                    emit(LocalHit {
                        x: x - 0.5 * self.width,
                        y: y - 0.5 * self.height,
                        covariance,
                        du,
                        dv,
                    });
                }
            }
        }
    }

    /// Intersects the two strip lines given by their top-edge coordinates.
    fn intersect_lines(
        &self,
        x_front: f64,
        ex_front: f64,
        x_back: f64,
        ex_back: f64,
    ) -> Option<(f64, f64, Covariance2)> {
        let (vf, vb) = (ex_front * ex_front, ex_back * ex_back);
        let (tf, tb) = (self.tan_front, self.tan_back);

        let (x, y, covariance) = if self.stereo_front.abs() < VERTICAL_DEG {
            (
                x_front,
                self.height - (x_front - x_back) / tb,
                Covariance2::new(vf, -vf / tb, (vf + vb) / (tb * tb)),
            )
        } else if self.stereo_back.abs() < VERTICAL_DEG {
            (
                x_back,
                self.height - (x_back - x_front) / tf,
                Covariance2::new(vb, -vb / tf, (vf + vb) / (tf * tf)),
            )
        } else {
            let denominator = tb - tf;
            let error_factor = 1.0 / (denominator * denominator);
            (
                (tb * x_front - tf * x_back) / denominator,
                self.height + (x_back - x_front) / denominator,
                Covariance2::new(
                    error_factor * (vf * tb * tb + vb * tf * tf),
                    -error_factor * (vf * tb + vb * tf),
                    error_factor * (vf + vb),
                ),
            )
        };

        self.is_inside(x, y).then_some((x, y, covariance))
    }

    #[inline]
    fn is_inside(&self, x: f64, y: f64) -> bool {
        (0.0..=self.width).contains(&x) && (0.0..=self.height).contains(&y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use stripreco_core::geometry::{SensorClass, StripLayout};

    fn geometry(stereo_front: f64, stereo_back: f64, n_strips: u16, pitch: f64, height: f64) -> ModuleGeometry {
        ModuleGeometry::new(
            1,
            SensorClass::StereoPair {
                front: StripLayout::new(n_strips, pitch),
                back: StripLayout::new(n_strips, pitch),
                stereo_front,
                stereo_back,
                active_height: height,
            },
        )
    }

    fn cluster(side: ModuleSide, position: f64) -> Cluster {
        let mut cluster = Cluster::new(1, side, vec![0]);
        cluster.position = position;
        cluster.position_error = 0.3;
        cluster
    }

    fn collect(finder: &StereoHitFinder, front: f64, back: f64) -> Vec<LocalHit> {
        let mut hits = Vec::new();
        finder.intersect(
            &cluster(ModuleSide::Front, front),
            &cluster(ModuleSide::Back, back),
            |hit| hits.push(hit),
        );
        hits
    }

    #[test]
    fn test_vertical_front_intersection() {
        let height = 1.28;
        let geometry = geometry(0.0, 7.5, 128, 0.01, height);
        let finder = StereoHitFinder::new(&geometry, 0.0, 7.5);
        let hits = collect(&finder, 50.0, 40.0);
        assert_eq!(hits.len(), 1);

        let tan_b = 7.5f64.to_radians().tan();
        let x_front = 50.5 * 0.01;
        let x_back = 40.5 * 0.01;
        assert_relative_eq!(hits[0].x, x_front - 0.64, epsilon = 1e-12);
        assert_relative_eq!(hits[0].y, height - (x_front - x_back) / tan_b - 0.64, epsilon = 1e-12);

        let vf = (0.3 * 0.01f64).powi(2);
        assert_relative_eq!(hits[0].covariance.xx, vf, epsilon = 1e-18);
        assert_relative_eq!(hits[0].covariance.xy, -vf / tan_b, epsilon = 1e-16);
        assert_relative_eq!(hits[0].covariance.yy, 2.0 * vf / (tan_b * tan_b), epsilon = 1e-16);
    }

    #[test]
    fn test_intersection_outside_is_rejected() {
        let height = 1.28;
        let geometry = geometry(0.0, 7.5, 128, 0.01, height);
        let finder = StereoHitFinder::new(&geometry, 0.0, 7.5);
        // Back strip right of the front strip meets it above the sensor.
        assert!(collect(&finder, 40.0, 50.0).is_empty());
    }

    #[test]
    fn test_symmetric_stereo_intersection() {
        let height = 2.0;
        let geometry = geometry(-7.5, 7.5, 64, 0.01, height);
        let finder = StereoHitFinder::new(&geometry, -7.5, 7.5);
        // Equal top-edge coordinates meet on the top edge.
        let hits = collect(&finder, 31.5, 31.5);
        assert_eq!(hits.len(), 1);
        assert_relative_eq!(hits[0].x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(hits[0].y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parallel_strips_never_intersect() {
        let height = 1.0;
        let geometry = geometry(7.5, 7.6, 64, 0.01, height);
        let finder = StereoHitFinder::new(&geometry, 7.5, 7.6);
        assert!(!finder.can_intersect());
        assert!(collect(&finder, 10.0, 10.0).is_empty());
    }

    #[test]
    fn test_cross_connected_strips_give_several_hits() {
        // Long sensor: the tilted strips wrap several times across the width.
        let height = 6.0;
        let geometry = geometry(-7.5, 7.5, 64, 0.01, height);
        let finder = StereoHitFinder::new(&geometry, -7.5, 7.5);
        let hits = collect(&finder, 20.0, 40.0);
        assert!(hits.len() > 1);
        for hit in &hits {
            assert!(hit.x.abs() <= 0.32 + 1e-12);
            assert!(hit.y.abs() <= 3.0 + 1e-12);
        }
    }
}
