//! Combination of front and back clusters into hits.
//!
//! Both sensor classes share the time scan over the two time-sorted cluster
//! lists; only the geometric intersection differs. The variant is chosen once
//! per module from its [`SensorClass`].

mod orthogonal;
mod stereo;

pub use orthogonal::OrthogonalHitFinder;
pub use stereo::{StereoHitFinder, MIN_STEREO_DIFFERENCE_DEG};

use stripreco_core::cluster::Cluster;
use stripreco_core::geometry::{ModuleGeometry, SensorClass};
use stripreco_core::hit::{Covariance2, Hit};
use stripreco_core::timing::TimingPolicy;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Width of the scan bound in units of the combined cluster time error.
const SCAN_SIGMAS: f64 = 4.0;

/// Intersection point in the sensor frame (origin at the sensor centre).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LocalHit {
    pub x: f64,
    pub y: f64,
    pub covariance: Covariance2,
    pub du: f64,
    pub dv: f64,
}

/// Converts a cluster position [channel] to a coordinate along the readout
/// edge [cm], measured from the sensor edge and corrected for the Lorentz
/// shift. Returns `None` if the coordinate falls outside `[0, extent]`.
#[inline]
pub(crate) fn edge_position(position: f64, pitch: f64, lorentz: f64, extent: f64) -> Option<f64> {
    let x = (position + 0.5) * pitch - lorentz;
    (0.0..=extent).contains(&x).then_some(x)
}

/// Pair selection applied before the geometric intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitCuts {
    /// Front/back cluster time coincidence.
    pub timing: TimingPolicy,
    /// Maximal front/back charge difference [e]; disabled if `None`.
    pub charge_delta: Option<f64>,
    /// Hits kept per pass; further hits are counted as overflow.
    pub max_hits: Option<usize>,
}

/// Counters of one hit finding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitFinderStatistics {
    /// Pairs within the scan bound.
    pub pairs_tested: usize,
    /// Pairs failing the time coincidence.
    pub time_rejected: usize,
    /// Pairs failing the charge correlation.
    pub charge_rejected: usize,
    /// Pairs without an intersection inside the active area.
    pub geometry_rejected: usize,
    /// Hits created.
    pub hits: usize,
    /// Hits discarded because the hit limit was reached.
    pub overflow: usize,
}

impl HitFinderStatistics {
    /// Adds the counters of another pass.
    pub fn merge(&mut self, other: &Self) {
        self.pairs_tested += other.pairs_tested;
        self.time_rejected += other.time_rejected;
        self.charge_rejected += other.charge_rejected;
        self.geometry_rejected += other.geometry_rejected;
        self.hits += other.hits;
        self.overflow += other.overflow;
    }
}

/// Hit finder variant of one module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitFinder {
    /// Both sides carry stereo-angled strips.
    Stereo(StereoHitFinder),
    /// Front strips vertical, back strips horizontal.
    Orthogonal(OrthogonalHitFinder),
}

impl HitFinder {
    /// Selects the variant matching the module's sensor class.
    #[must_use]
    pub fn for_geometry(geometry: &ModuleGeometry) -> Self {
        match geometry.sensor {
            SensorClass::StereoPair {
                stereo_front,
                stereo_back,
                ..
            } => Self::Stereo(StereoHitFinder::new(geometry, stereo_front, stereo_back)),
            SensorClass::OrthogonalPair { .. } => Self::Orthogonal(OrthogonalHitFinder::new(geometry)),
        }
    }

    /// Creates hits from time-sorted front and back clusters of one module.
    ///
    /// Hits are appended to `hits` with cluster references into `front` and
    /// `back`; global positions use the module's local-to-global transform.
    pub fn find_hits(
        &self,
        geometry: &ModuleGeometry,
        front: &[Cluster],
        back: &[Cluster],
        cuts: &HitCuts,
        hits: &mut Vec<Hit>,
    ) -> HitFinderStatistics {
        match self {
            Self::Stereo(finder) => scan_pairs(geometry, front, back, cuts, hits, |f, b, emit| {
                finder.intersect(f, b, emit);
            }),
            Self::Orthogonal(finder) => scan_pairs(geometry, front, back, cuts, hits, |f, b, emit| {
                finder.intersect(f, b, emit);
            }),
        }
    }
}

/// Sliding-window scan over time-sorted cluster lists.
///
/// Back clusters earlier than the front cluster by more than the widest
/// possible bound are skipped for good; the inner loop stops at the first back
/// cluster later than the per-front bound.
///
/// With a hit limit, hits beyond it are counted but not stored, and no further
/// front clusters are scanned once twice the limit has been produced.
fn scan_pairs<I>(
    geometry: &ModuleGeometry,
    front: &[Cluster],
    back: &[Cluster],
    cuts: &HitCuts,
    hits: &mut Vec<Hit>,
    intersect: I,
) -> HitFinderStatistics
where
    I: Fn(&Cluster, &Cluster, &mut dyn FnMut(LocalHit)),
{
    let mut stats = HitFinderStatistics::default();
    if front.is_empty() || back.is_empty() {
        return stats;
    }

    let max_error_front = front.iter().map(|c| c.time_error).fold(0.0, f64::max);
    let max_error_back = back.iter().map(|c| c.time_error).fold(0.0, f64::max);
    let bound_both = scan_bound(&cuts.timing, max_error_front, max_error_back);
    let max_hits = cuts.max_hits.unwrap_or(usize::MAX);

    let mut start_back = 0;
    for (i_front, cluster_front) in front.iter().enumerate() {
        if stats.hits + stats.overflow > max_hits.saturating_mul(2) {
            break;
        }
        while start_back < back.len()
            && cluster_front.time - back[start_back].time > bound_both
        {
            start_back += 1;
        }
        let bound = scan_bound(&cuts.timing, cluster_front.time_error, max_error_back);

        for (offset, cluster_back) in back[start_back..].iter().enumerate() {
            let time_diff = cluster_front.time - cluster_back.time;
            if time_diff > bound {
                continue;
            }
            if -time_diff > bound {
                break;
            }

            stats.pairs_tested += 1;
            if !cuts.timing.is_coincident(
                time_diff,
                cluster_front.time_error,
                cluster_back.time_error,
            ) {
                stats.time_rejected += 1;
                continue;
            }
            if let Some(delta) = cuts.charge_delta {
                if (cluster_front.charge - cluster_back.charge).abs() > delta {
                    stats.charge_rejected += 1;
                    continue;
                }
            }

            let i_back = start_back + offset;
            let mut created = 0;
            intersect(cluster_front, cluster_back, &mut |local| {
                created += 1;
                if stats.hits < max_hits {
                    hits.push(make_hit(geometry, &local, cluster_front, cluster_back, i_front, i_back));
                    stats.hits += 1;
                } else {
                    stats.overflow += 1;
                }
            });
            if created == 0 {
                stats.geometry_rejected += 1;
            }
        }
    }
    stats
}

/// Time bound of the scan: never narrower than the coincidence window itself.
#[inline]
fn scan_bound(timing: &TimingPolicy, error_front: f64, error_back: f64) -> f64 {
    (SCAN_SIGMAS * error_front.hypot(error_back)).max(timing.coincidence_window(error_front, error_back))
}

fn make_hit(
    geometry: &ModuleGeometry,
    local: &LocalHit,
    front: &Cluster,
    back: &Cluster,
    front_index: usize,
    back_index: usize,
) -> Hit {
    let [x, y, z] = geometry.transform.apply([local.x, local.y, 0.0]);
    let global = geometry.transform.rotate_covariance(local.covariance);
    Hit {
        module_address: geometry.address,
        x,
        y,
        z,
        local_covariance: local.covariance,
        dx: global.xx.sqrt(),
        dy: global.yy.sqrt(),
        dxy: global.xy,
        time: 0.5 * (front.time + back.time),
        time_error: 0.5 * front.time_error.hypot(back.time_error),
        front_cluster: front_index,
        back_cluster: back_index,
        du: local.du,
        dv: local.dv,
    }
}
