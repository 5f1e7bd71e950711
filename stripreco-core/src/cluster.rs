//! Strip clusters.

use crate::digi::ModuleSide;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A contiguous-channel group of digis on one sensor side.
///
/// Created by the cluster finder with only `digis` filled in; the cluster
/// estimator then sets position, time and charge.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Cluster {
    /// Address of the module the cluster belongs to.
    pub module_address: u32,
    /// Sensor side.
    pub side: ModuleSide,
    /// Indices of the contributing digis in the input batch, ordered by
    /// ascending channel (possibly wrapping around the side).
    pub digis: Vec<usize>,
    /// Position in side-local channel units.
    pub position: f64,
    /// Position uncertainty in channel units.
    pub position_error: f64,
    /// Time in nanoseconds.
    pub time: f64,
    /// Time uncertainty in nanoseconds.
    pub time_error: f64,
    /// Total charge in electrons.
    pub charge: f64,
    /// Channel span, last channel - first channel + 1.
    pub size: u32,
}

impl Cluster {
    /// Creates an unestimated cluster from its digi indices.
    #[must_use]
    pub fn new(module_address: u32, side: ModuleSide, digis: Vec<usize>) -> Self {
        Self {
            module_address,
            side,
            digis,
            position: 0.0,
            position_error: 0.0,
            time: 0.0,
            time_error: 0.0,
            charge: 0.0,
            size: 0,
        }
    }

    /// Number of contributing digis.
    #[inline]
    #[must_use]
    pub fn n_digis(&self) -> usize {
        self.digis.len()
    }
}
