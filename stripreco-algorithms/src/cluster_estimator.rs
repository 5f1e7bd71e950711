//! Cluster parameter estimation.
//!
//! Position, time and charge of a cluster, with uncertainties, are computed by
//! one of three algorithms chosen by the number of contributing digis:
//! - one digi: the channel itself with a flat uncertainty over one channel
//! - two digis: charge-ratio interpolation between the two channels
//! - three or more: head/tail charge interpolation using the mean interior charge
//!
//! Positions are side-local channel numbers. Wrap-around clusters are
//! unwrapped for the arithmetic and folded back into `[-0.5, n - 0.5)`.

use stripreco_core::calibration::{AsicParams, ChargeUncertainty, ModuleCalibration};
use stripreco_core::cluster::Cluster;

use crate::cluster_finder::SideDigi;

/// Position uncertainty of a single-channel cluster in channel units (`1/sqrt(12)`).
pub const SINGLE_CHANNEL_ERROR: f64 = 0.288_675_134_594_812_9;

/// Calibrated charge, its variance, time and time resolution of one digi.
#[derive(Debug, Clone, Copy)]
struct Measurement {
    channel: f64,
    charge: f64,
    charge_variance: f64,
    time: f64,
    resolution: f64,
}

/// Computes cluster parameters for one module side.
pub struct ClusterEstimator<'a> {
    calibration: &'a ModuleCalibration,
    charge_model: &'a dyn ChargeUncertainty,
    n_channels: u16,
}

impl<'a> ClusterEstimator<'a> {
    /// Creates an estimator for a side with `n_channels` channels.
    #[must_use]
    pub fn new(
        calibration: &'a ModuleCalibration,
        charge_model: &'a dyn ChargeUncertainty,
        n_channels: u16,
    ) -> Self {
        Self {
            calibration,
            charge_model,
            n_channels,
        }
    }

    /// Fills position, time, charge and size of `cluster`.
    ///
    /// `members` are positions in `digis`, ordered by channel as produced by
    /// the cluster finder. An empty member list leaves the cluster untouched.
    pub fn estimate(&self, digis: &[SideDigi], members: &[usize], cluster: &mut Cluster) {
        let measurements: Vec<Measurement> = members
            .iter()
            .map(|&slot| self.measure(&digis[slot]))
            .collect();

        match measurements.as_slice() {
            [] => {}
            [single] => Self::estimate_single(single, cluster),
            [first, second] => self.estimate_pair(first, second, cluster),
            all => self.estimate_many(all, cluster),
        }
    }

    fn measure(&self, digi: &SideDigi) -> Measurement {
        let asic: &AsicParams = self.calibration.asic(digi.digi.channel);
        let charge = asic.adc_to_charge(digi.digi.charge);
        let width = self.charge_model.width(charge);
        Measurement {
            channel: f64::from(digi.channel),
            charge,
            charge_variance: width * width
                + asic.noise_variance()
                + asic.digitisation_variance(),
            time: digi.time(),
            resolution: asic.time_resolution,
        }
    }

    fn estimate_single(m: &Measurement, cluster: &mut Cluster) {
        cluster.position = m.channel;
        cluster.position_error = SINGLE_CHANNEL_ERROR;
        cluster.time = m.time;
        cluster.time_error = m.resolution;
        cluster.charge = m.charge;
        cluster.size = 1;
    }

    fn estimate_pair(&self, m1: &Measurement, m2: &Measurement, cluster: &mut Cluster) {
        let n = f64::from(self.n_channels);
        let (q1, q2) = (m1.charge, m2.charge);

        let mut x1 = m1.channel;
        if m1.channel > m2.channel {
            x1 -= n;
        }

        let mut x = x1 + 0.5 + (q2 - q1) / 3.0 / q1.max(q2);
        if x < -0.5 {
            x += n;
        }

        let dq = q2 - q1;
        let (ex0, ex1, ex2) = if q1 < q2 {
            (
                dq * dq / (q2 * q2) / 72.0,
                m1.charge_variance / (q2 * q2) / 9.0,
                m2.charge_variance * q1 * q1 / q2.powi(4) / 9.0,
            )
        } else {
            (
                dq * dq / (q1 * q1) / 72.0,
                m1.charge_variance * q2 * q2 / q1.powi(4) / 9.0,
                m2.charge_variance / (q1 * q1) / 9.0,
            )
        };

        cluster.position = x;
        cluster.position_error = (ex0 + ex1 + ex2).sqrt();
        cluster.time = 0.5 * (m1.time + m2.time);
        cluster.time_error = 0.5 * (m1.resolution + m2.resolution) * std::f64::consts::FRAC_1_SQRT_2;
        cluster.charge = q1 + q2;
        cluster.size = 2;
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn estimate_many(&self, all: &[Measurement], cluster: &mut Cluster) {
        let n = f64::from(self.n_channels);
        let count = all.len() as f64;
        let (first, last) = (&all[0], &all[all.len() - 1]);
        let interior = &all[1..all.len() - 1];

        let mut chan_first = first.channel;
        let chan_last = last.channel;
        if chan_first > chan_last {
            chan_first -= n;
        }

        let q_sum: f64 = all.iter().map(|m| m.charge).sum();
        let q_mid = interior.iter().map(|m| m.charge).sum::<f64>() / (count - 2.0);
        let var_mid = interior.iter().map(|m| m.charge_variance).sum::<f64>() / (count - 2.0);
        let (q_first, q_last) = (first.charge, last.charge);

        let mut x = 0.5 * (chan_first + chan_last + (q_last - q_first) / q_mid);
        if x < chan_first || x > chan_last {
            // Charge-weighted mean over the unwrapped channels.
            let weighted: f64 = all
                .iter()
                .map(|m| {
                    let channel = if m.channel > chan_last { m.channel - n } else { m.channel };
                    m.charge * channel
                })
                .sum();
            x = weighted / q_sum;
        }
        if x < -0.5 {
            x += n;
        }

        let q_mid_sq = q_mid * q_mid;
        let dq = q_last - q_first;
        let ex_first = first.charge_variance / q_mid_sq / 4.0;
        let ex_mid = var_mid * dq * dq / (q_mid_sq * q_mid_sq) / 4.0;
        let ex_last = last.charge_variance / q_mid_sq / 4.0;

        let mean_resolution = all.iter().map(|m| m.resolution).sum::<f64>() / count;

        cluster.position = x;
        cluster.position_error = (ex_first + ex_mid + ex_last).sqrt();
        cluster.time = all.iter().map(|m| m.time).sum::<f64>() / count;
        cluster.time_error = mean_resolution / count.sqrt();
        cluster.charge = q_sum;
        cluster.size = (chan_last - chan_first) as u32 + 1;
    }
}
