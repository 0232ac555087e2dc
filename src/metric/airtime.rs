//! Airtime link metric.
//!
//! The cost of a link is the channel time a standard test frame would
//! occupy, in 10.24 us units, inflated by the link's failure rate. The
//! failure rate comes either from rate-control statistics or from the
//! peer link's beacon reception history, per configuration. Optional
//! additions: a square-root transmission-time variant that softens the
//! penalty on slow rates, and a receive-power compensation term that
//! penalizes links heard barely above the detection threshold.

use super::PhyInfo;
use crate::addr::MacAddr;
use crate::config::{FailureSource, MetricConfig};
use tracing::trace;

/// LLC/SNAP encapsulation added to the test payload.
const LLC_HEADER_BYTES: u32 = 6;
/// Data frame MAC header and trailer.
const MAC_OVERHEAD_BYTES: u32 = 36;

/// One metric unit is 10.24 microseconds of channel time.
const METRIC_UNIT_US: f64 = 10.24;

/// Links with a receive-power budget below this many dB over the
/// detection threshold get compensated.
const POWER_BUDGET_DB: f64 = 3.0;

/// Airtime metric calculator for one interface.
pub struct AirtimeMetric {
    cfg: MetricConfig,
}

impl AirtimeMetric {
    pub fn new(cfg: MetricConfig) -> Self {
        Self { cfg }
    }

    /// Compute the airtime cost toward `peer`.
    ///
    /// `beacon_fail_avg` is the peer link's current beacon failure
    /// average; it is only consulted when the configured failure source
    /// is [`FailureSource::Beacons`]. A failure rate of 1 makes the link
    /// unusable and returns `u32::MAX`.
    pub fn calculate(&self, peer: MacAddr, phy: &dyn PhyInfo, beacon_fail_avg: f64) -> u32 {
        let rate = phy.current_rate(peer, self.cfg.tid);
        let fail_avg = match self.cfg.failure_source {
            FailureSource::RateControl => phy.frame_error_rate(peer, rate),
            FailureSource::Beacons => beacon_fail_avg,
        };
        if fail_avg >= 1.0 {
            return u32::MAX;
        }

        let frame_bytes =
            u32::from(self.cfg.test_frame_len) + LLC_HEADER_BYTES + MAC_OVERHEAD_BYTES;
        let tx_us = phy.tx_duration_us(frame_bytes, rate) as f64;
        let tx_term = if self.cfg.sqrt_time {
            // Square-root variant: sub-linear in transmission time, so a
            // slow-but-clean link is not dismissed outright.
            20.0 * tx_us.sqrt()
        } else {
            tx_us
        };
        let overhead_us = (phy.pifs_us() + phy.slot_us() + phy.eifs_no_difs_us()) as f64;

        let power_comp = self.power_compensation(peer, phy);
        let metric = ((overhead_us + tx_term) / METRIC_UNIT_US + power_comp) / (1.0 - fail_avg);
        trace!(peer = %peer, rate = %rate, fail_avg, metric, "Airtime metric");
        metric as u32
    }

    /// Extra cost for links received close to the detection threshold.
    fn power_compensation(&self, peer: MacAddr, phy: &dyn PhyInfo) -> f64 {
        if self.cfg.rx_power_coef == 0 {
            return 0.0;
        }
        let budget = phy.rx_power_dbm(peer) - phy.ed_threshold_dbm();
        if budget >= POWER_BUDGET_DB {
            return 0.0;
        }
        f64::from(self.cfg.rx_power_coef)
            * (10f64.powf((POWER_BUDGET_DB - budget) / 10.0) - 1.0)
    }
}
