//! Bookkeeping of reconstruction batches and runs.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hit_finder::HitFinderStatistics;

/// Wall-clock time spent in each reconstruction stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StageTimings {
    /// Resetting the module pipelines.
    pub reset: Duration,
    /// Routing digis to modules.
    pub distribute: Duration,
    /// Sorting digis by time.
    pub sort_digis: Duration,
    /// Cluster finding and estimation.
    pub find_clusters: Duration,
    /// Sorting clusters by time.
    pub sort_clusters: Duration,
    /// Hit finding.
    pub find_hits: Duration,
    /// Concatenating module outputs.
    pub merge: Duration,
}

impl StageTimings {
    /// Sum over all stages.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.reset
            + self.distribute
            + self.sort_digis
            + self.find_clusters
            + self.sort_clusters
            + self.find_hits
            + self.merge
    }

    /// Adds the timings of another batch.
    pub fn accumulate(&mut self, other: &Self) {
        self.reset += other.reset;
        self.distribute += other.distribute;
        self.sort_digis += other.sort_digis;
        self.find_clusters += other.find_clusters;
        self.sort_clusters += other.sort_clusters;
        self.find_hits += other.find_hits;
        self.merge += other.merge;
    }
}

/// Counters of one time slice or event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchStatistics {
    /// Input digis.
    pub digis: usize,
    /// Digis handed to a module.
    pub digis_used: usize,
    /// Digis from another detector system.
    pub digis_foreign: usize,
    /// Digis addressed to a module without setup.
    pub digis_unknown_module: usize,
    /// Digis with a channel beyond the module's channel count.
    pub digis_bad_channel: usize,
    /// Digis dropped because their channel was still busy.
    pub digis_dead_time: usize,
    /// Clusters created.
    pub clusters: usize,
    /// Hits created.
    pub hits: usize,
    /// Front/back pair counters of the hit finders.
    pub pairs: HitFinderStatistics,
    /// Stage timings.
    pub timings: StageTimings,
}

impl BatchStatistics {
    /// Digis not handed to any module.
    #[must_use]
    pub fn digis_ignored(&self) -> usize {
        self.digis_foreign + self.digis_unknown_module + self.digis_bad_channel
    }

    /// Adds the counters of another batch.
    pub fn accumulate(&mut self, other: &Self) {
        self.digis += other.digis;
        self.digis_used += other.digis_used;
        self.digis_foreign += other.digis_foreign;
        self.digis_unknown_module += other.digis_unknown_module;
        self.digis_bad_channel += other.digis_bad_channel;
        self.digis_dead_time += other.digis_dead_time;
        self.clusters += other.clusters;
        self.hits += other.hits;
        self.pairs.merge(&other.pairs);
        self.timings.accumulate(&other.timings);
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunStatistics {
    /// Processed time slices (calls to the reconstruction).
    pub timeslices: usize,
    /// Processed events (event mode only).
    pub events: usize,
    /// Sums over all batches.
    pub totals: BatchStatistics,
}

impl RunStatistics {
    /// Mean of a counter per time slice.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn per_timeslice(&self, count: usize) -> f64 {
        if self.timeslices > 0 {
            count as f64 / self.timeslices as f64
        } else {
            0.0
        }
    }

    /// Mean number of used digis per cluster.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn digis_per_cluster(&self) -> f64 {
        if self.totals.clusters > 0 {
            self.totals.digis_used as f64 / self.totals.clusters as f64
        } else {
            0.0
        }
    }

    /// Mean number of clusters per hit.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn clusters_per_hit(&self) -> f64 {
        if self.totals.hits > 0 {
            self.totals.clusters as f64 / self.totals.hits as f64
        } else {
            0.0
        }
    }

    /// Digi throughput in digis/sec.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn digi_rate(&self) -> f64 {
        let secs = self.totals.timings.total().as_secs_f64();
        if secs > 0.0 {
            self.totals.digis as f64 / secs
        } else {
            0.0
        }
    }

    /// Writes the run summary to the log.
    pub fn log_summary(&self) {
        let totals = &self.totals;
        let timings = &totals.timings;
        let ms_per_ts = |d: Duration| 1000.0 * self.per_timeslice(1) * d.as_secs_f64();

        log::info!("=====================================");
        log::info!("Strip reconstruction: run summary");
        log::info!("Time slices            : {}", self.timeslices);
        if self.events > 0 {
            log::info!("Events                 : {}", self.events);
        }
        log::info!("Digis / TSlice         : {:.2}", self.per_timeslice(totals.digis));
        log::info!("Digis used / TSlice    : {:.2}", self.per_timeslice(totals.digis_used));
        log::info!("Digis ignored / TSlice : {:.2}", self.per_timeslice(totals.digis_ignored()));
        log::info!("Digis dead / TSlice    : {:.2}", self.per_timeslice(totals.digis_dead_time));
        log::info!("Clusters / TSlice      : {:.2}", self.per_timeslice(totals.clusters));
        log::info!("Hits / TSlice          : {:.2}", self.per_timeslice(totals.hits));
        if totals.pairs.overflow > 0 {
            log::info!("Hits over limit        : {}", totals.pairs.overflow);
        }
        log::info!("Digis per cluster      : {:.2}", self.digis_per_cluster());
        log::info!("Clusters per hit       : {:.2}", self.clusters_per_hit());
        log::info!("Time per TSlice        : {:.2} ms", ms_per_ts(timings.total()));
        log::info!("Digi rate              : {:.0} digis/s", self.digi_rate());
        log::info!(
            "Time by step (ms/TSlice): reset {:.2}, distribute {:.2}, sort digis {:.2}, \
             find clusters {:.2}, sort clusters {:.2}, find hits {:.2}, merge {:.2}",
            ms_per_ts(timings.reset),
            ms_per_ts(timings.distribute),
            ms_per_ts(timings.sort_digis),
            ms_per_ts(timings.find_clusters),
            ms_per_ts(timings.sort_clusters),
            ms_per_ts(timings.find_hits),
            ms_per_ts(timings.merge),
        );
        log::info!("=====================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_accumulate_and_ratios() {
        let batch = BatchStatistics {
            digis: 100,
            digis_used: 90,
            digis_foreign: 6,
            digis_unknown_module: 3,
            digis_bad_channel: 1,
            clusters: 30,
            hits: 15,
            ..BatchStatistics::default()
        };
        let mut run = RunStatistics::default();
        for _ in 0..2 {
            run.timeslices += 1;
            run.totals.accumulate(&batch);
        }

        assert_eq!(run.totals.digis, 200);
        assert_eq!(run.totals.digis_ignored(), 20);
        assert_relative_eq!(run.per_timeslice(run.totals.hits), 15.0);
        assert_relative_eq!(run.digis_per_cluster(), 3.0);
        assert_relative_eq!(run.clusters_per_hit(), 2.0);
    }

    #[test]
    fn test_empty_run_has_zero_ratios() {
        let run = RunStatistics::default();
        assert_relative_eq!(run.per_timeslice(10), 0.0);
        assert_relative_eq!(run.digis_per_cluster(), 0.0);
        assert_relative_eq!(run.digi_rate(), 0.0);
    }

    #[test]
    fn test_digi_rate_uses_total_time() {
        let mut run = RunStatistics::default();
        run.timeslices = 1;
        run.totals.digis = 1_000;
        run.totals.timings.find_clusters = Duration::from_millis(1_500);
        run.totals.timings.find_hits = Duration::from_millis(500);
        assert_relative_eq!(run.digi_rate(), 500.0);
    }

    #[test]
    fn test_timings_total() {
        let timings = StageTimings {
            sort_digis: Duration::from_millis(2),
            find_hits: Duration::from_millis(3),
            ..StageTimings::default()
        };
        assert_eq!(timings.total(), Duration::from_millis(5));

        let mut sum = StageTimings::default();
        sum.accumulate(&timings);
        sum.accumulate(&timings);
        assert_eq!(sum.find_hits, Duration::from_millis(6));
    }
}
