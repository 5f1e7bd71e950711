//! Intersection of vertical front strips with horizontal back strips.

use stripreco_core::cluster::Cluster;
use stripreco_core::digi::ModuleSide;
use stripreco_core::geometry::ModuleGeometry;
use stripreco_core::hit::Covariance2;

use super::{edge_position, LocalHit};

/// Hit finder for sensors whose back strips are perpendicular to the front strips.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthogonalHitFinder {
    pitch_front: f64,
    pitch_back: f64,
    width: f64,
    height: f64,
    lorentz_front: f64,
    lorentz_back: f64,
}

impl OrthogonalHitFinder {
    /// Derives the finder constants from a validated orthogonal geometry.
    #[must_use]
    pub fn new(geometry: &ModuleGeometry) -> Self {
        Self {
            pitch_front: geometry.sensor.layout(ModuleSide::Front).pitch,
            pitch_back: geometry.sensor.layout(ModuleSide::Back).pitch,
            width: geometry.active_width(),
            height: geometry.active_height(),
            lorentz_front: geometry.lorentz_shift(ModuleSide::Front),
            lorentz_back: geometry.lorentz_shift(ModuleSide::Back),
        }
    }

    /// Calls `emit` once if the two clusters cross inside the active area.
    pub(crate) fn intersect<F: FnMut(LocalHit)>(&self, front: &Cluster, back: &Cluster, mut emit: F) {
        let Some(x) = edge_position(front.position, self.pitch_front, self.lorentz_front, self.width)
        else {
            return;
        };
        let Some(y) = edge_position(back.position, self.pitch_back, self.lorentz_back, self.height)
        else {
            return;
        };
        let ex = front.position_error * self.pitch_front;
        let ey = back.position_error * self.pitch_back;

        emit(LocalHit {
            x: x - 0.5 * self.width,
            y: y - 0.5 * self.height,
            covariance: Covariance2::new(ex * ex, 0.0, ey * ey),
            du: ex,
            dv: ey,
        });
    }
}
