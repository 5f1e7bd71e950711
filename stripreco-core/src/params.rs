//! Reconstruction parameters.

use crate::error::{Error, Result};
use crate::timing::TimingPolicy;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unit of work handed to the reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RecoMode {
    /// The entire digi batch is reconstructed at once.
    #[default]
    Timeslice,
    /// Each event sub-range of the batch is reconstructed separately.
    Event,
}

/// Configuration of cluster and hit finding.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RecoParams {
    /// Absolute digi time cut for cluster finding [ns]; overrides the sigma cut if positive.
    pub time_cut_digis_abs: f64,
    /// Digi time cut in units of the digi time resolution.
    pub time_cut_digis_sig: f64,
    /// Absolute cluster time cut for hit finding [ns]; overrides the sigma cut if positive.
    pub time_cut_clusters_abs: f64,
    /// Cluster time cut in units of the combined cluster time error.
    pub time_cut_clusters_sig: f64,
    /// Treat the first and last front channel as neighbours.
    pub connect_edge_front: bool,
    /// Treat the first and last back channel as neighbours.
    pub connect_edge_back: bool,
    /// Maximal charge difference of front and back cluster [e]; disabled if `None`.
    pub charge_correlation_delta: Option<f64>,
    /// Time-slice or event-by-event processing.
    pub mode: RecoMode,
    /// Worker threads for module processing (0 = one per core).
    pub num_threads: usize,
    /// Hits kept per module and pass; unlimited if `None`.
    pub max_hits_per_module: Option<usize>,
    /// Copy the clusters into the reconstruction output.
    pub store_clusters: bool,
}

impl Default for RecoParams {
    fn default() -> Self {
        Self {
            time_cut_digis_abs: -1.0,
            time_cut_digis_sig: 3.0,
            time_cut_clusters_abs: -1.0,
            time_cut_clusters_sig: 4.0,
            connect_edge_front: false,
            connect_edge_back: false,
            charge_correlation_delta: None,
            mode: RecoMode::Timeslice,
            num_threads: 0,
            max_hits_per_module: None,
            store_clusters: true,
        }
    }
}

impl RecoParams {
    /// Creates parameters with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the absolute digi time cut.
    #[must_use]
    pub fn with_time_cut_digis_abs(mut self, value: f64) -> Self {
        self.time_cut_digis_abs = value;
        self
    }

    /// Sets the digi time cut in units of the time resolution.
    #[must_use]
    pub fn with_time_cut_digis_sig(mut self, value: f64) -> Self {
        self.time_cut_digis_sig = value;
        self
    }

    /// Sets the absolute cluster time cut.
    #[must_use]
    pub fn with_time_cut_clusters_abs(mut self, value: f64) -> Self {
        self.time_cut_clusters_abs = value;
        self
    }

    /// Sets the cluster time cut in units of the combined time error.
    #[must_use]
    pub fn with_time_cut_clusters_sig(mut self, value: f64) -> Self {
        self.time_cut_clusters_sig = value;
        self
    }

    /// Enables or disables the periodic channel connection per side.
    #[must_use]
    pub fn with_connect_edge(mut self, front: bool, back: bool) -> Self {
        self.connect_edge_front = front;
        self.connect_edge_back = back;
        self
    }

    /// Sets the front/back charge correlation cut.
    #[must_use]
    pub fn with_charge_correlation(mut self, delta: f64) -> Self {
        self.charge_correlation_delta = Some(delta);
        self
    }

    /// Sets the processing mode.
    #[must_use]
    pub fn with_mode(mut self, mode: RecoMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Limits the number of hits kept per module.
    #[must_use]
    pub fn with_max_hits_per_module(mut self, max_hits: usize) -> Self {
        self.max_hits_per_module = Some(max_hits);
        self
    }

    /// Enables or disables cluster output.
    #[must_use]
    pub fn with_store_clusters(mut self, store: bool) -> Self {
        self.store_clusters = store;
        self
    }

    /// Timing policy for cluster finding.
    #[must_use]
    pub fn digi_timing(&self) -> TimingPolicy {
        TimingPolicy {
            absolute: self.time_cut_digis_abs,
            sigma_factor: self.time_cut_digis_sig,
        }
    }

    /// Timing policy for hit finding.
    #[must_use]
    pub fn cluster_timing(&self) -> TimingPolicy {
        TimingPolicy {
            absolute: self.time_cut_clusters_abs,
            sigma_factor: self.time_cut_clusters_sig,
        }
    }

    /// Checks the parameters for consistency.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if a time cut is fully disabled, the
    /// charge correlation delta is negative or the hit limit is zero.
    pub fn validate(&self) -> Result<()> {
        self.digi_timing().validate()?;
        self.cluster_timing().validate()?;
        if let Some(delta) = self.charge_correlation_delta {
            if !(delta >= 0.0) {
                return Err(Error::ConfigError(format!(
                    "charge correlation delta {delta} is negative"
                )));
            }
        }
        if self.max_hits_per_module == Some(0) {
            return Err(Error::ConfigError(
                "max hits per module must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = RecoParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.mode, RecoMode::Timeslice);
        assert!(!params.connect_edge_front);
        assert!(params.store_clusters);
        assert_eq!(params.max_hits_per_module, None);
    }

    #[test]
    fn test_builder() {
        let params = RecoParams::new()
            .with_time_cut_digis_abs(25.0)
            .with_time_cut_clusters_sig(5.0)
            .with_connect_edge(true, false)
            .with_charge_correlation(20_000.0)
            .with_mode(RecoMode::Event)
            .with_num_threads(4)
            .with_max_hits_per_module(1000)
            .with_store_clusters(false);

        assert!((params.digi_timing().absolute - 25.0).abs() < f64::EPSILON);
        assert!((params.cluster_timing().sigma_factor - 5.0).abs() < f64::EPSILON);
        assert!(params.connect_edge_front);
        assert!(!params.connect_edge_back);
        assert_eq!(params.charge_correlation_delta, Some(20_000.0));
        assert_eq!(params.mode, RecoMode::Event);
        assert_eq!(params.num_threads, 4);
        assert_eq!(params.max_hits_per_module, Some(1000));
        assert!(!params.store_clusters);
    }

    #[test]
    fn test_disabled_time_cut_rejected() {
        let params = RecoParams::new()
            .with_time_cut_clusters_abs(-1.0)
            .with_time_cut_clusters_sig(0.0);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_zero_hit_limit_rejected() {
        let params = RecoParams::new().with_max_hits_per_module(0);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_negative_charge_delta_rejected() {
        let params = RecoParams::new().with_charge_correlation(-1.0);
        assert!(params.validate().is_err());
    }
}
