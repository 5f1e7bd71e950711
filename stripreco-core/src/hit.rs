//! Space points reconstructed from a front/back cluster pair.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Symmetric 2x2 covariance of a point in a plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Covariance2 {
    /// Variance along x.
    pub xx: f64,
    /// Covariance of x and y.
    pub xy: f64,
    /// Variance along y.
    pub yy: f64,
}

impl Covariance2 {
    /// Creates a covariance from its three independent entries.
    #[inline]
    #[must_use]
    pub fn new(xx: f64, xy: f64, yy: f64) -> Self {
        Self { xx, xy, yy }
    }
}

/// A 2D space point on a strip module, expressed in the global frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hit {
    /// Address of the module.
    pub module_address: u32,
    /// Global x coordinate [cm].
    pub x: f64,
    /// Global y coordinate [cm].
    pub y: f64,
    /// Global z coordinate [cm].
    pub z: f64,
    /// Position covariance in the local sensor frame [cm^2].
    pub local_covariance: Covariance2,
    /// Global x uncertainty [cm].
    pub dx: f64,
    /// Global y uncertainty [cm].
    pub dy: f64,
    /// Global x/y covariance [cm^2].
    pub dxy: f64,
    /// Hit time [ns].
    pub time: f64,
    /// Hit time uncertainty [ns].
    pub time_error: f64,
    /// Index of the front-side cluster.
    ///
    /// Within a module pipeline this indexes the module's front clusters;
    /// after merging it indexes the global cluster array.
    pub front_cluster: usize,
    /// Index of the back-side cluster (same convention as `front_cluster`).
    pub back_cluster: usize,
    /// Position uncertainty across the front strips [cm].
    pub du: f64,
    /// Position uncertainty across the back strips [cm].
    pub dv: f64,
}
