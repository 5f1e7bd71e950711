//! Per-module reconstruction pipeline.
//!
//! A pipeline owns all per-pass buffers of one module and runs the stages
//! `sort_digis -> find_clusters -> sort_clusters -> find_hits` in order.
//! Digis may be enqueued concurrently from several threads; the queue is the
//! only state guarded by a lock.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use stripreco_core::calibration::{ChargeUncertainty, ModuleCalibration};
use stripreco_core::cluster::Cluster;
use stripreco_core::detector::ModuleSetup;
use stripreco_core::digi::{Digi, ModuleSide};
use stripreco_core::error::{Error, Result};
use stripreco_core::geometry::ModuleGeometry;
use stripreco_core::hit::Hit;
use stripreco_core::params::RecoParams;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::cluster_estimator::ClusterEstimator;
use crate::cluster_finder::{ChannelTiming, ClusterFinder, SideDigi};
use crate::hit_finder::{HitCuts, HitFinder, HitFinderStatistics};

/// Processing state of a module pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Reset, nothing queued.
    Idle,
    /// Reset, digis waiting in the queue.
    DigisQueued,
    /// Digis sorted by time.
    Sorted,
    /// Clusters found and estimated.
    Clustered,
    /// Clusters sorted by time.
    ClustersSorted,
    /// Hits found.
    HitsFound,
}

impl PipelineStage {
    /// Stage name used in error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DigisQueued => "digis queued",
            Self::Sorted => "digis sorted",
            Self::Clustered => "clusters found",
            Self::ClustersSorted => "clusters sorted",
            Self::HitsFound => "hits found",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counters of the current pass of one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModuleStatistics {
    /// Digis taken from the queue.
    pub digis: usize,
    /// Digis dropped by the dead-time rule.
    pub digis_dead_time: usize,
    /// Front-side clusters.
    pub clusters_front: usize,
    /// Back-side clusters.
    pub clusters_back: usize,
    /// Hit finder counters.
    pub hits: HitFinderStatistics,
}

/// Reconstruction state of one module.
pub struct ModulePipeline {
    geometry: ModuleGeometry,
    calibration: ModuleCalibration,
    charge_model: Arc<dyn ChargeUncertainty>,
    cuts: HitCuts,
    finders: [ClusterFinder; 2],
    hit_finder: HitFinder,
    queue: Mutex<[Vec<SideDigi>; 2]>,
    digis: [Vec<SideDigi>; 2],
    clusters: [Vec<Cluster>; 2],
    hits: Vec<Hit>,
    stage: PipelineStage,
    statistics: ModuleStatistics,
}

impl fmt::Debug for ModulePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModulePipeline")
            .field("address", &format_args!("{:#010x}", self.geometry.address))
            .field("stage", &self.stage)
            .field("statistics", &self.statistics)
            .finish_non_exhaustive()
    }
}

impl ModulePipeline {
    /// Builds a pipeline for one module.
    ///
    /// # Errors
    /// Returns an error if the module setup or the parameters are invalid.
    pub fn new(
        setup: &ModuleSetup,
        charge_model: Arc<dyn ChargeUncertainty>,
        params: &RecoParams,
    ) -> Result<Self> {
        setup.validate()?;
        params.validate()?;

        let geometry = setup.geometry;
        let calibration = setup.calibration.clone();
        let finder = |side: ModuleSide, connect_edge: bool| {
            let offset = match side {
                ModuleSide::Front => 0,
                ModuleSide::Back => geometry.n_channels(ModuleSide::Front),
            };
            let channels = (0..geometry.n_channels(side))
                .map(|channel| {
                    let asic = calibration.asic(offset + channel);
                    ChannelTiming {
                        resolution: asic.time_resolution,
                        dead_time: asic.dead_time,
                    }
                })
                .collect();
            ClusterFinder::new(params.digi_timing(), channels, connect_edge)
        };
        let finders = [
            finder(ModuleSide::Front, params.connect_edge_front),
            finder(ModuleSide::Back, params.connect_edge_back),
        ];

        Ok(Self {
            hit_finder: HitFinder::for_geometry(&geometry),
            cuts: HitCuts {
                timing: params.cluster_timing(),
                charge_delta: params.charge_correlation_delta,
                max_hits: params.max_hits_per_module,
            },
            geometry,
            calibration,
            charge_model,
            finders,
            queue: Mutex::new([Vec::new(), Vec::new()]),
            digis: [Vec::new(), Vec::new()],
            clusters: [Vec::new(), Vec::new()],
            hits: Vec::new(),
            stage: PipelineStage::Idle,
            statistics: ModuleStatistics::default(),
        })
    }

    /// Module address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> u32 {
        self.geometry.address
    }

    /// Module geometry.
    #[must_use]
    pub fn geometry(&self) -> &ModuleGeometry {
        &self.geometry
    }

    /// Current processing stage.
    #[must_use]
    pub fn stage(&self) -> PipelineStage {
        if self.stage == PipelineStage::Idle {
            let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.iter().any(|side| !side.is_empty()) {
                return PipelineStage::DigisQueued;
            }
        }
        self.stage
    }

    /// Counters of the current pass.
    #[must_use]
    pub fn statistics(&self) -> &ModuleStatistics {
        &self.statistics
    }

    /// Clusters of one side. Time-sorted once the clusters have been sorted.
    #[must_use]
    pub fn clusters(&self, side: ModuleSide) -> &[Cluster] {
        &self.clusters[side.index()]
    }

    /// Hits of the current pass, sorted by time, referencing this module's clusters.
    #[must_use]
    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    /// Queues a digi for the next pass.
    ///
    /// `index` is the position of the digi in the input batch. Returns false
    /// (and queues nothing) if the channel is beyond the module's channels.
    pub fn enqueue_digi(&self, digi: &Digi, index: usize) -> bool {
        let Some((side, channel)) = self.geometry.side_of_channel(digi.channel) else {
            return false;
        };
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue[side.index()].push(SideDigi {
            digi: *digi,
            index,
            channel,
        });
        true
    }

    /// Clears all per-pass buffers. Geometry and calibration are kept.
    pub fn reset(&mut self) {
        let queue = self.queue.get_mut().unwrap_or_else(PoisonError::into_inner);
        queue.iter_mut().for_each(Vec::clear);
        self.digis.iter_mut().for_each(Vec::clear);
        self.clusters.iter_mut().for_each(Vec::clear);
        self.hits.clear();
        self.finders.iter_mut().for_each(ClusterFinder::reset);
        self.statistics = ModuleStatistics::default();
        self.stage = PipelineStage::Idle;
    }

    fn expect_stage(&self, requested: PipelineStage, allowed: PipelineStage) -> Result<()> {
        if self.stage == allowed {
            Ok(())
        } else {
            Err(Error::StageOrder {
                requested: requested.name(),
                current: self.stage.name(),
            })
        }
    }

    /// Moves the queued digis into the pass and sorts them by time per side.
    ///
    /// Ties are broken by batch index so that the order does not depend on
    /// the order in which digis were enqueued.
    ///
    /// # Errors
    /// Returns [`Error::StageOrder`] unless the pipeline has just been reset.
    pub fn sort_digis(&mut self) -> Result<()> {
        self.expect_stage(PipelineStage::Sorted, PipelineStage::Idle)?;
        let queue = self.queue.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (digis, queued) in self.digis.iter_mut().zip(queue.iter_mut()) {
            std::mem::swap(digis, queued);
            queued.clear();
            digis.sort_unstable_by_key(|d| (d.digi.time, d.index));
        }
        self.statistics.digis = self.digis.iter().map(Vec::len).sum();
        self.stage = PipelineStage::Sorted;
        Ok(())
    }

    /// Runs cluster finding and estimation on both sides.
    ///
    /// # Errors
    /// Returns [`Error::StageOrder`] unless the digis have been sorted.
    pub fn find_clusters(&mut self) -> Result<()> {
        self.expect_stage(PipelineStage::Clustered, PipelineStage::Sorted)?;
        let address = self.geometry.address;
        for side in ModuleSide::BOTH {
            let i = side.index();
            let digis = &self.digis[i];
            let finder = &mut self.finders[i];
            let estimator = ClusterEstimator::new(
                &self.calibration,
                &*self.charge_model,
                self.geometry.n_channels(side),
            );

            let groups = finder.find(digis);
            let clusters = &mut self.clusters[i];
            clusters.reserve(groups.len());
            for members in groups {
                let indices = members.iter().map(|&slot| digis[slot].index).collect();
                let mut cluster = Cluster::new(address, side, indices);
                estimator.estimate(digis, &members, &mut cluster);
                clusters.push(cluster);
            }
            self.statistics.digis_dead_time += finder.dead_time_drops();
        }
        self.statistics.clusters_front = self.clusters[0].len();
        self.statistics.clusters_back = self.clusters[1].len();
        self.stage = PipelineStage::Clustered;
        Ok(())
    }

    /// Sorts the clusters of each side by time, keeping the finder order on ties.
    ///
    /// # Errors
    /// Returns [`Error::StageOrder`] unless clusters have been found.
    pub fn sort_clusters(&mut self) -> Result<()> {
        self.expect_stage(PipelineStage::ClustersSorted, PipelineStage::Clustered)?;
        for clusters in &mut self.clusters {
            clusters.sort_by(|a, b| a.time.total_cmp(&b.time));
        }
        self.stage = PipelineStage::ClustersSorted;
        Ok(())
    }

    /// Combines front and back clusters into hits and sorts them by time,
    /// keeping the scan order on ties.
    ///
    /// # Errors
    /// Returns [`Error::StageOrder`] unless the clusters have been sorted.
    pub fn find_hits(&mut self) -> Result<()> {
        self.expect_stage(PipelineStage::HitsFound, PipelineStage::ClustersSorted)?;
        let [front, back] = &self.clusters;
        self.statistics.hits =
            self.hit_finder
                .find_hits(&self.geometry, front, back, &self.cuts, &mut self.hits);
        if self.statistics.hits.overflow > 0 {
            log::warn!(
                "Hit limit reached in module {:#010x}: {} hits discarded",
                self.geometry.address,
                self.statistics.hits.overflow
            );
        }
        self.hits.sort_by(|a, b| a.time.total_cmp(&b.time));
        self.stage = PipelineStage::HitsFound;
        Ok(())
    }

    /// Runs all stages on the queued digis.
    ///
    /// # Errors
    /// Returns [`Error::StageOrder`] unless the pipeline has just been reset.
    pub fn process(&mut self) -> Result<()> {
        self.sort_digis()?;
        self.find_clusters()?;
        self.sort_clusters()?;
        self.find_hits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use stripreco_core::address;
    use stripreco_core::calibration::{AsicParams, ConstantWidth};
    use stripreco_core::geometry::{SensorClass, StripLayout};

    fn setup() -> ModuleSetup {
        let geometry = ModuleGeometry::new(
            address::build_module_address(0, 1, 0, 2),
            SensorClass::OrthogonalPair {
                front: StripLayout::new(128, 0.01),
                back: StripLayout::new(128, 0.01),
            },
        );
        let calibration = ModuleCalibration::uniform(&geometry, AsicParams::default());
        ModuleSetup {
            geometry,
            calibration,
        }
    }

    fn pipeline() -> ModulePipeline {
        ModulePipeline::new(&setup(), Arc::new(ConstantWidth(0.0)), &RecoParams::default()).unwrap()
    }

    #[test]
    fn test_stage_progression() {
        let mut module = pipeline();
        assert_eq!(module.stage(), PipelineStage::Idle);
        assert!(module.enqueue_digi(&Digi::new(module.address(), 3, 100, 5), 0));
        assert_eq!(module.stage(), PipelineStage::DigisQueued);

        module.sort_digis().unwrap();
        assert_eq!(module.stage(), PipelineStage::Sorted);
        module.find_clusters().unwrap();
        assert_eq!(module.stage(), PipelineStage::Clustered);
        module.sort_clusters().unwrap();
        module.find_hits().unwrap();
        assert_eq!(module.stage(), PipelineStage::HitsFound);

        module.reset();
        assert_eq!(module.stage(), PipelineStage::Idle);
        assert!(module.clusters(ModuleSide::Front).is_empty());
    }

    #[test]
    fn test_out_of_order_stage_rejected() {
        let mut module = pipeline();
        let err = module.find_hits().unwrap_err();
        assert!(matches!(err, Error::StageOrder { .. }));
        module.sort_digis().unwrap();
        assert!(module.sort_digis().is_err());
        assert!(module.sort_clusters().is_err());
    }

    #[test]
    fn test_bad_channel_not_queued() {
        let module = pipeline();
        assert!(!module.enqueue_digi(&Digi::new(module.address(), 256, 100, 5), 0));
        assert_eq!(module.stage(), PipelineStage::Idle);
    }

    #[test]
    fn test_orthogonal_module_creates_one_hit() {
        let mut module = pipeline();
        let addr = module.address();
        // Front channels 10 and 11, back channel 5 (module-wide 133).
        module.enqueue_digi(&Digi::new(addr, 10, 100, 50), 0);
        module.enqueue_digi(&Digi::new(addr, 11, 101, 50), 1);
        module.enqueue_digi(&Digi::new(addr, 133, 100, 100), 2);
        module.process().unwrap();

        assert_eq!(module.clusters(ModuleSide::Front).len(), 1);
        assert_eq!(module.clusters(ModuleSide::Back).len(), 1);
        assert_eq!(module.clusters(ModuleSide::Front)[0].digis, vec![0, 1]);
        assert_eq!(module.clusters(ModuleSide::Back)[0].digis, vec![2]);
        assert_eq!(module.hits().len(), 1);

        let hit = &module.hits()[0];
        assert_relative_eq!(hit.x, 11.0 * 0.01 - 0.64, epsilon = 1e-12);
        assert_relative_eq!(hit.y, 5.5 * 0.01 - 0.64, epsilon = 1e-12);
        assert_eq!(module.statistics().digis, 3);
        assert_eq!(module.statistics().hits.hits, 1);
    }

    #[test]
    fn test_hits_sorted_by_time() {
        let mut module = pipeline();
        let addr = module.address();
        // Every front/back pair coincides; the scan emits them front by front.
        module.enqueue_digi(&Digi::new(addr, 10, 100, 50), 0);
        module.enqueue_digi(&Digi::new(addr, 40, 110, 50), 1);
        module.enqueue_digi(&Digi::new(addr, 133, 125, 50), 2);
        module.enqueue_digi(&Digi::new(addr, 160, 85, 50), 3);
        module.process().unwrap();

        let pairs: Vec<(usize, usize)> = module
            .hits()
            .iter()
            .map(|h| (h.front_cluster, h.back_cluster))
            .collect();
        assert_eq!(pairs, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
        let times: Vec<f64> = module.hits().iter().map(|h| h.time).collect();
        assert_relative_eq!(times[0], 92.5);
        assert_relative_eq!(times[3], 117.5);
    }

    #[test]
    fn test_hit_limit_applies_per_module() {
        let params = RecoParams::default().with_max_hits_per_module(1);
        let mut module = ModulePipeline::new(&setup(), Arc::new(ConstantWidth(0.0)), &params).unwrap();
        let addr = module.address();
        for (i, channel) in [10, 20, 140, 150].into_iter().enumerate() {
            module.enqueue_digi(&Digi::new(addr, channel, 100, 50), i);
        }
        module.process().unwrap();

        assert_eq!(module.hits().len(), 1);
        assert_eq!(module.statistics().hits.hits, 1);
        assert_eq!(module.statistics().hits.overflow, 3);
    }

    #[test]
    fn test_dead_time_drop_is_counted() {
        let mut module = pipeline();
        let addr = module.address();
        module.enqueue_digi(&Digi::new(addr, 7, 0, 10), 0);
        module.enqueue_digi(&Digi::new(addr, 7, 1, 10), 1);
        module.process().unwrap();
        assert_eq!(module.clusters(ModuleSide::Front).len(), 1);
        assert_eq!(module.clusters(ModuleSide::Front)[0].digis, vec![0]);
        assert_eq!(module.statistics().digis_dead_time, 1);
    }

    #[test]
    fn test_enqueue_order_does_not_matter() {
        let digis = [
            Digi::new(0, 20, 300, 9),
            Digi::new(0, 21, 300, 12),
            Digi::new(0, 150, 302, 20),
            Digi::new(0, 40, 900, 8),
        ];
        let run = |order: &[usize]| {
            let mut module = pipeline();
            let addr = module.address();
            for &i in order {
                let digi = Digi { address: addr, ..digis[i] };
                module.enqueue_digi(&digi, i);
            }
            module.process().unwrap();
            (
                module.clusters(ModuleSide::Front).to_vec(),
                module.hits().to_vec(),
            )
        };
        assert_eq!(run(&[0, 1, 2, 3]), run(&[3, 2, 1, 0]));
    }

    #[test]
    fn test_invalid_setup_rejected() {
        let mut setup = setup();
        setup.calibration.asics.clear();
        let result = ModulePipeline::new(&setup, Arc::new(ConstantWidth(0.0)), &RecoParams::default());
        assert!(result.is_err());
    }
}
