//! Link quality metrics: the airtime cost of reaching a neighbor and an
//! ETX estimate built from link probe exchanges.

pub mod airtime;
pub mod etx;

pub use airtime::AirtimeMetric;
pub use etx::{EtxTracker, ETX_MAX};

use crate::addr::MacAddr;
use std::fmt;

/// A transmission bitrate in bits per second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Bitrate(pub u64);

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

/// Physical-layer facts the airtime metric needs, supplied by the device
/// layer. Implementations answer for the interface the metric runs on.
pub trait PhyInfo {
    /// Current data rate toward `peer` for the given traffic class.
    fn current_rate(&self, peer: MacAddr, tid: u8) -> Bitrate;

    /// Time to transmit a frame of `bytes` at `rate`, microseconds,
    /// including PHY preamble and headers.
    fn tx_duration_us(&self, bytes: u32, rate: Bitrate) -> u64;

    /// Frame error rate toward `peer` at `rate`, in `[0, 1]`, as estimated
    /// by the rate-control layer.
    fn frame_error_rate(&self, peer: MacAddr, rate: Bitrate) -> f64;

    /// Average received signal power from `peer`, dBm.
    fn rx_power_dbm(&self, peer: MacAddr) -> f64;

    /// Energy-detection threshold of the receiver, dBm.
    fn ed_threshold_dbm(&self) -> f64;

    /// PIFS duration, microseconds.
    fn pifs_us(&self) -> u64;

    /// Slot duration, microseconds.
    fn slot_us(&self) -> u64;

    /// EIFS minus DIFS, microseconds.
    fn eifs_no_difs_us(&self) -> u64;
}
