//! Streaming per-channel cluster finder.
//!
//! Key characteristics:
//! - Complexity: O(n) in the number of digis plus one final sweep over the channels
//! - One "active" slot per channel holding the latest digi of that channel
//! - Clusters are closed as soon as a later digi in the same or a neighbouring
//!   channel is out of time, without waiting for the end of the stream
//! - Optional periodic connection of the first and last channel
//!
//! Input digis must be sorted by time. Emitted clusters are not time-sorted.

use stripreco_core::digi::Digi;
use stripreco_core::timing::TimingPolicy;

/// A digi queued for one sensor side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideDigi {
    /// The digi itself.
    pub digi: Digi,
    /// Index of the digi in the input batch.
    pub index: usize,
    /// Side-local channel number.
    pub channel: u16,
}

impl SideDigi {
    /// Digi time [ns].
    #[inline]
    #[must_use]
    pub fn time(&self) -> f64 {
        f64::from(self.digi.time)
    }
}

/// Timing properties of one readout channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelTiming {
    /// Time resolution [ns].
    pub resolution: f64,
    /// Dead time [ns].
    pub dead_time: f64,
}

#[derive(Debug, Clone, Copy)]
struct ActiveDigi {
    /// Position of the digi in the side's digi slice.
    slot: usize,
    time: f64,
}

/// Cluster finder for one sensor side.
pub struct ClusterFinder {
    timing: TimingPolicy,
    channels: Vec<ChannelTiming>,
    connect_edge: bool,
    active: Vec<Option<ActiveDigi>>,
    dead_time_drops: usize,
}

impl ClusterFinder {
    /// Creates a finder for a side with one [`ChannelTiming`] per channel.
    #[must_use]
    pub fn new(timing: TimingPolicy, channels: Vec<ChannelTiming>, connect_edge: bool) -> Self {
        let n_channels = channels.len();
        Self {
            timing,
            channels,
            connect_edge,
            active: vec![None; n_channels],
            dead_time_drops: 0,
        }
    }

    /// Number of channels on the side.
    #[inline]
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Whether the first and last channel are neighbours.
    #[inline]
    #[must_use]
    pub fn connect_edge(&self) -> bool {
        self.connect_edge
    }

    /// Digis dropped since the last reset because their channel was still
    /// busy with an earlier digi.
    #[must_use]
    pub fn dead_time_drops(&self) -> usize {
        self.dead_time_drops
    }

    /// Clears all channels and counters.
    pub fn reset(&mut self) {
        self.active.iter_mut().for_each(|slot| *slot = None);
        self.dead_time_drops = 0;
    }

    /// Runs the finder over a time-sorted digi sequence.
    ///
    /// Returns one entry per cluster, each listing positions in `digis` in
    /// ascending channel order (wrapping around the side if the edge is
    /// connected). Digis with a channel beyond the side are skipped.
    pub fn find(&mut self, digis: &[SideDigi]) -> Vec<Vec<usize>> {
        let mut clusters = Vec::new();
        for (slot, digi) in digis.iter().enumerate() {
            let channel = usize::from(digi.channel);
            if channel >= self.n_channels() {
                continue;
            }
            self.process(slot, channel, digi.time(), &mut clusters);
        }
        for channel in 0..self.n_channels() {
            self.finish(channel, &mut clusters);
        }
        clusters
    }

    fn process(&mut self, slot: usize, channel: usize, time: f64, out: &mut Vec<Vec<usize>>) {
        let own = self.channels[channel];

        if let Some(previous) = self.active[channel] {
            let dt = time - previous.time;
            if dt < own.dead_time || dt.abs() <= self.timing.digi_window(own.resolution) {
                self.dead_time_drops += 1;
                return;
            }
            self.finish(channel, out);
        }

        for neighbour in [self.left(channel), self.right(channel)].into_iter().flatten() {
            if let Some(other) = self.active[neighbour] {
                let resolution = self.channels[neighbour].resolution;
                if !self
                    .timing
                    .is_coincident(time - other.time, own.resolution, resolution)
                {
                    self.finish(neighbour, out);
                }
            }
        }

        self.active[channel] = Some(ActiveDigi { slot, time });
    }

    /// Closes the cluster containing `channel`, if that channel is active.
    fn finish(&mut self, channel: usize, out: &mut Vec<Vec<usize>>) {
        if self.active[channel].is_none() {
            return;
        }

        // Walk to the first channel of the run. The step bound stops the walk
        // on a fully active ring.
        let mut first = channel;
        for _ in 1..self.n_channels() {
            match self.left(first) {
                Some(left) if self.active[left].is_some() => first = left,
                _ => break,
            }
        }

        let mut members = Vec::new();
        let mut current = first;
        while let Some(active) = self.active[current].take() {
            members.push(active.slot);
            match self.right(current) {
                Some(right) => current = right,
                None => break,
            }
        }
        out.push(members);
    }

    #[inline]
    fn left(&self, channel: usize) -> Option<usize> {
        if channel > 0 {
            Some(channel - 1)
        } else if self.connect_edge && self.n_channels() > 1 {
            Some(self.n_channels() - 1)
        } else {
            None
        }
    }

    #[inline]
    fn right(&self, channel: usize) -> Option<usize> {
        if channel + 1 < self.n_channels() {
            Some(channel + 1)
        } else if self.connect_edge && self.n_channels() > 1 {
            Some(0)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW_NS: f64 = 20.0;

    fn finder(n_channels: usize, connect_edge: bool) -> ClusterFinder {
        let timing = TimingPolicy::new(WINDOW_NS, 3.0).unwrap();
        let channels = vec![
            ChannelTiming {
                resolution: 5.0,
                dead_time: 0.0,
            };
            n_channels
        ];
        ClusterFinder::new(timing, channels, connect_edge)
    }

    fn digis(entries: &[(u16, u64)]) -> Vec<SideDigi> {
        entries
            .iter()
            .enumerate()
            .map(|(index, &(channel, time))| SideDigi {
                digi: Digi::new(1, channel, time, 10),
                index,
                channel,
            })
            .collect()
    }

    fn sorted(mut clusters: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        clusters.sort();
        clusters
    }

    #[test]
    fn test_adjacent_in_time_digis_form_one_cluster() {
        let mut finder = finder(128, false);
        let input = digis(&[(10, 100), (11, 101), (12, 102), (13, 103)]);
        let clusters = finder.find(&input);
        assert_eq!(clusters, vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn test_members_are_in_channel_order() {
        let mut finder = finder(128, false);
        let input = digis(&[(12, 100), (10, 101), (11, 102)]);
        let clusters = finder.find(&input);
        assert_eq!(clusters, vec![vec![1, 2, 0]]);
    }

    #[test]
    fn test_out_of_time_neighbours_are_separate() {
        let mut finder = finder(128, false);
        let input = digis(&[(10, 100), (11, 200), (12, 300)]);
        let clusters = sorted(finder.find(&input));
        assert_eq!(clusters, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_neighbour_cluster_closed_early() {
        let mut finder = finder(128, false);
        // Channel 10 is closed when channel 11 arrives out of time,
        // before the end-of-stream sweep.
        let input = digis(&[(10, 100), (11, 500)]);
        let clusters = finder.find(&input);
        assert_eq!(clusters, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_same_channel_within_window_is_dropped() {
        let mut finder = finder(128, false);
        let input = digis(&[(5, 0), (5, 1)]);
        let clusters = finder.find(&input);
        assert_eq!(clusters, vec![vec![0]]);
        assert_eq!(finder.dead_time_drops(), 1);
    }

    #[test]
    fn test_same_channel_within_dead_time_is_dropped() {
        let timing = TimingPolicy::new(WINDOW_NS, 3.0).unwrap();
        let channels = vec![
            ChannelTiming {
                resolution: 5.0,
                dead_time: 800.0,
            };
            16
        ];
        let mut finder = ClusterFinder::new(timing, channels, false);
        let input = digis(&[(5, 0), (5, 300), (5, 900)]);
        let clusters = sorted(finder.find(&input));
        assert_eq!(clusters, vec![vec![0], vec![2]]);
        assert_eq!(finder.dead_time_drops(), 1);
    }

    #[test]
    fn test_same_channel_out_of_time_starts_new_cluster() {
        let mut finder = finder(128, false);
        let input = digis(&[(5, 0), (5, 100)]);
        let clusters = finder.find(&input);
        assert_eq!(clusters, vec![vec![0], vec![1]]);
        assert_eq!(finder.dead_time_drops(), 0);
    }

    #[test]
    fn test_edges_not_connected_without_wrap() {
        let mut finder = finder(64, false);
        let input = digis(&[(0, 100), (63, 100)]);
        let clusters = sorted(finder.find(&input));
        assert_eq!(clusters, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_edges_connected_with_wrap() {
        let mut finder = finder(64, true);
        let input = digis(&[(0, 100), (63, 101), (1, 102)]);
        let clusters = finder.find(&input);
        assert_eq!(clusters, vec![vec![1, 0, 2]]);
    }

    #[test]
    fn test_fully_active_ring_terminates() {
        let mut finder = finder(4, true);
        let input = digis(&[(0, 100), (1, 100), (2, 100), (3, 100)]);
        let clusters = finder.find(&input);
        assert_eq!(clusters.len(), 1);
        let mut members = clusters[0].clone();
        members.sort_unstable();
        assert_eq!(members, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut finder = finder(16, false);
        let _ = finder.find(&digis(&[(3, 0), (3, 1)]));
        assert_eq!(finder.dead_time_drops(), 1);
        finder.reset();
        assert_eq!(finder.dead_time_drops(), 0);
        let clusters = finder.find(&digis(&[(3, 0)]));
        assert_eq!(clusters, vec![vec![0]]);
    }
}
