//! Parallel reconstruction of all modules.
//!
//! Each batch (a time slice, or one event of it) runs through:
//! 1. reset of every module pipeline
//! 2. parallel distribution of the input digis to their module queues
//! 3. the four pipeline stages, each as a parallel loop over all modules
//! 4. concatenation of module outputs into global cluster and hit arrays
//!
//! Modules share no mutable state, so every stage is embarrassingly parallel;
//! the stages are separated by the implicit barrier of each parallel loop.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use stripreco_core::address;
use stripreco_core::cluster::Cluster;
use stripreco_core::detector::DetectorSetup;
use stripreco_core::digi::{Digi, ModuleSide};
use stripreco_core::error::{Error, Result};
use stripreco_core::hit::Hit;
use stripreco_core::params::{RecoMode, RecoParams};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::module::ModulePipeline;
use crate::statistics::{BatchStatistics, RunStatistics};

/// Digis handed to one distribution task.
const DISTRIBUTION_CHUNK: usize = 4096;

/// Output index ranges belonging to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventRecord {
    /// Input digi range of the event.
    pub digis: Range<usize>,
    /// Range of the event's clusters in [`RecoOutput::clusters`].
    pub clusters: Range<usize>,
    /// Range of the event's hits in [`RecoOutput::hits`].
    pub hits: Range<usize>,
}

/// Output index ranges belonging to one module.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModulePartition {
    /// Module address.
    pub address: u32,
    /// Range of the module's clusters, front then back.
    pub clusters: Range<usize>,
    /// Range of the module's hits in [`RecoOutput::hits`], sorted by time.
    pub hits: Range<usize>,
}

/// Clusters and hits of one call to [`Reconstruction::process`].
///
/// Cluster ranges and hit cluster references count clusters in output order
/// even when cluster storage is disabled and `clusters` stays empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoOutput {
    /// Clusters of all modules: per module, front clusters then back clusters.
    pub clusters: Vec<Cluster>,
    /// Hits of all modules, referencing `clusters` by index.
    pub hits: Vec<Hit>,
    /// Per-module ranges in module order, repeated for every event in event mode.
    pub modules: Vec<ModulePartition>,
    /// Per-event ranges (event mode only).
    pub events: Vec<EventRecord>,
    /// Counters of this call.
    pub statistics: BatchStatistics,
}

impl RecoOutput {
    /// Number of clusters produced, whether stored or not.
    #[must_use]
    pub fn n_clusters(&self) -> usize {
        self.modules.last().map_or(0, |m| m.clusters.end)
    }
}

/// Reconstruction of all modules of the detector.
pub struct Reconstruction {
    modules: Vec<ModulePipeline>,
    index: HashMap<u32, usize>,
    params: RecoParams,
    pool: rayon::ThreadPool,
    run: RunStatistics,
}

impl Reconstruction {
    /// Builds one pipeline per module of the setup.
    ///
    /// # Errors
    /// Returns an error if the setup or the parameters are invalid, or the
    /// worker pool cannot be created.
    pub fn new(setup: &DetectorSetup, params: RecoParams) -> Result<Self> {
        setup.validate()?;
        params.validate()?;

        let modules = setup
            .modules
            .iter()
            .map(|module| ModulePipeline::new(module, setup.charge_model.clone(), &params))
            .collect::<Result<Vec<_>>>()?;
        let index = modules
            .iter()
            .enumerate()
            .map(|(i, module)| (module.address(), i))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.num_threads)
            .build()
            .map_err(|e| Error::ConfigError(format!("cannot create worker pool: {e}")))?;

        match params.mode {
            RecoMode::Timeslice => log::info!("Strip reconstruction: using time-slice mode"),
            RecoMode::Event => log::info!("Strip reconstruction: using event-by-event mode"),
        }
        log::info!(
            "Strip reconstruction: created {} modules, {} worker threads",
            modules.len(),
            pool.current_num_threads()
        );

        Ok(Self {
            modules,
            index,
            params,
            pool,
            run: RunStatistics::default(),
        })
    }

    /// Reconstruction parameters.
    #[must_use]
    pub fn params(&self) -> &RecoParams {
        &self.params
    }

    /// Number of modules.
    #[must_use]
    pub fn n_modules(&self) -> usize {
        self.modules.len()
    }

    /// Pipeline of a module, if the address is known.
    #[must_use]
    pub fn module(&self, address: u32) -> Option<&ModulePipeline> {
        self.index.get(&address).map(|&i| &self.modules[i])
    }

    /// Counters accumulated over all calls.
    #[must_use]
    pub fn run_statistics(&self) -> &RunStatistics {
        &self.run
    }

    /// Writes the run summary to the log.
    pub fn log_summary(&self) {
        self.run.log_summary();
    }

    /// Reconstructs one batch of digis.
    ///
    /// In time-slice mode the whole batch is processed and `events` is
    /// ignored. In event mode each range of `events` is processed on its own,
    /// and the outputs are appended in event order.
    ///
    /// # Errors
    /// Returns [`Error::InvalidEventRange`] if an event range lies outside the
    /// batch; in that case nothing is processed.
    pub fn process(&mut self, digis: &[Digi], events: &[Range<usize>]) -> Result<RecoOutput> {
        match self.params.mode {
            RecoMode::Timeslice => self.process_timeslice(digis),
            RecoMode::Event => self.process_events(digis, events),
        }
    }

    /// Reconstructs the whole batch at once.
    ///
    /// # Errors
    /// Returns an error only if a pipeline stage is run out of order, which
    /// indicates a bug.
    pub fn process_timeslice(&mut self, digis: &[Digi]) -> Result<RecoOutput> {
        let mut output = RecoOutput::default();
        let stats = self.reconstruct(digis, 0..digis.len(), &mut output)?;
        output.statistics = stats;

        self.run.timeslices += 1;
        self.run.totals.accumulate(&stats);
        log::debug!(
            "Strip reconstruction: time slice {} [{:.4} s], digis: {}, ignored: {}, clusters: {}, hits: {}",
            self.run.timeslices,
            stats.timings.total().as_secs_f64(),
            stats.digis,
            stats.digis_ignored(),
            stats.clusters,
            stats.hits
        );
        Ok(output)
    }

    /// Reconstructs each event range separately.
    ///
    /// # Errors
    /// Returns [`Error::InvalidEventRange`] if a range is reversed or ends
    /// beyond the batch.
    pub fn process_events(&mut self, digis: &[Digi], events: &[Range<usize>]) -> Result<RecoOutput> {
        if let Some(bad) = events.iter().find(|r| r.start > r.end || r.end > digis.len()) {
            return Err(Error::InvalidEventRange {
                start: bad.start,
                end: bad.end,
                len: digis.len(),
            });
        }

        let mut output = RecoOutput::default();
        let mut totals = BatchStatistics::default();
        for (number, range) in events.iter().enumerate() {
            let (clusters_start, hits_start) = (output.n_clusters(), output.hits.len());
            let stats = self.reconstruct(digis, range.clone(), &mut output)?;
            output.events.push(EventRecord {
                digis: range.clone(),
                clusters: clusters_start..output.n_clusters(),
                hits: hits_start..output.hits.len(),
            });
            totals.accumulate(&stats);
            log::debug!(
                "Strip reconstruction: event {number} [{:.4} s], digis: {}, ignored: {}, clusters: {}, hits: {}",
                stats.timings.total().as_secs_f64(),
                stats.digis,
                stats.digis_ignored(),
                stats.clusters,
                stats.hits
            );
        }
        output.statistics = totals;

        self.run.timeslices += 1;
        self.run.events += events.len();
        self.run.totals.accumulate(&totals);
        Ok(output)
    }

    /// Runs all stages for the digis in `range` and appends the results.
    fn reconstruct(
        &mut self,
        digis: &[Digi],
        range: Range<usize>,
        output: &mut RecoOutput,
    ) -> Result<BatchStatistics> {
        let mut stats = BatchStatistics {
            digis: range.len(),
            ..BatchStatistics::default()
        };
        let modules = &mut self.modules;
        let index = &self.index;

        let ((), elapsed) = timed(|| {
            self.pool
                .install(|| modules.par_iter_mut().for_each(ModulePipeline::reset));
        });
        stats.timings.reset = elapsed;

        let (counts, elapsed) = timed(|| self.pool.install(|| distribute(modules, index, digis, range)));
        stats.digis_foreign = counts.foreign;
        stats.digis_unknown_module = counts.unknown_module;
        stats.digis_bad_channel = counts.bad_channel;
        stats.digis_used = stats.digis - stats.digis_ignored();
        stats.timings.distribute = elapsed;

        let pool = &self.pool;
        let mut stage = |f: fn(&mut ModulePipeline) -> Result<()>| {
            timed(|| pool.install(|| modules.par_iter_mut().try_for_each(f)))
        };
        let (result, elapsed) = stage(ModulePipeline::sort_digis);
        result?;
        stats.timings.sort_digis = elapsed;
        let (result, elapsed) = stage(ModulePipeline::find_clusters);
        result?;
        stats.timings.find_clusters = elapsed;
        let (result, elapsed) = stage(ModulePipeline::sort_clusters);
        result?;
        stats.timings.sort_clusters = elapsed;
        let (result, elapsed) = stage(ModulePipeline::find_hits);
        result?;
        stats.timings.find_hits = elapsed;

        let store_clusters = self.params.store_clusters;
        let ((), elapsed) = timed(|| merge(&self.modules, store_clusters, output, &mut stats));
        stats.timings.merge = elapsed;
        Ok(stats)
    }
}

#[derive(Debug, Default)]
struct DistributionCounts {
    foreign: usize,
    unknown_module: usize,
    bad_channel: usize,
}

/// Routes the digis of `range` to their module queues.
fn distribute(
    modules: &[ModulePipeline],
    index: &HashMap<u32, usize>,
    digis: &[Digi],
    range: Range<usize>,
) -> DistributionCounts {
    let foreign = AtomicUsize::new(0);
    let unknown = AtomicUsize::new(0);
    let bad_channel = AtomicUsize::new(0);
    let unknown_addresses = Mutex::new(Vec::new());
    let start = range.start;

    digis[range]
        .par_chunks(DISTRIBUTION_CHUNK)
        .enumerate()
        .for_each(|(chunk, slice)| {
            let offset = start + chunk * DISTRIBUTION_CHUNK;
            for (i, digi) in slice.iter().enumerate() {
                if !address::is_strip_address(digi.address) {
                    foreign.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let module_address = address::module_address(digi.address);
                let Some(&m) = index.get(&module_address) else {
                    unknown.fetch_add(1, Ordering::Relaxed);
                    unknown_addresses
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .push(module_address);
                    continue;
                };
                if !modules[m].enqueue_digi(digi, offset + i) {
                    bad_channel.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

    let mut unknown_addresses = unknown_addresses
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    unknown_addresses.sort_unstable();
    unknown_addresses.dedup();
    for address in unknown_addresses {
        log::warn!("Strip reconstruction: unknown module address {address:#010x}");
    }

    DistributionCounts {
        foreign: foreign.into_inner(),
        unknown_module: unknown.into_inner(),
        bad_channel: bad_channel.into_inner(),
    }
}

/// Appends module outputs in module order, remapping hit cluster references
/// to the global cluster array.
fn merge(
    modules: &[ModulePipeline],
    store_clusters: bool,
    output: &mut RecoOutput,
    stats: &mut BatchStatistics,
) {
    let n_clusters: usize = modules
        .iter()
        .map(|m| m.clusters(ModuleSide::Front).len() + m.clusters(ModuleSide::Back).len())
        .sum();
    let n_hits: usize = modules.iter().map(|m| m.hits().len()).sum();
    if store_clusters {
        output.clusters.reserve(n_clusters);
    }
    output.hits.reserve(n_hits);
    output.modules.reserve(modules.len());

    let mut cluster_end = output.n_clusters();
    for module in modules {
        let (front, back) = (module.clusters(ModuleSide::Front), module.clusters(ModuleSide::Back));
        let offset_front = cluster_end;
        let offset_back = offset_front + front.len();
        cluster_end = offset_back + back.len();
        if store_clusters {
            output.clusters.extend_from_slice(front);
            output.clusters.extend_from_slice(back);
        }

        let hits_start = output.hits.len();
        output.hits.extend(module.hits().iter().map(|hit| Hit {
            front_cluster: hit.front_cluster + offset_front,
            back_cluster: hit.back_cluster + offset_back,
            ..*hit
        }));
        output.modules.push(ModulePartition {
            address: module.address(),
            clusters: offset_front..cluster_end,
            hits: hits_start..output.hits.len(),
        });

        let module_stats = module.statistics();
        stats.digis_dead_time += module_stats.digis_dead_time;
        stats.pairs.merge(&module_stats.hits);
    }
    stats.clusters += n_clusters;
    stats.hits += n_hits;
}

fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let value = f();
    (value, start.elapsed())
}
