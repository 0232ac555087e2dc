//! Bidirectional beacon reception history and failure-rate estimation.
//!
//! Two fixed-width shift registers record, tick by tick, whether we heard
//! the neighbor's beacon (forward) and whether the neighbor heard ours
//! (reverse, reconstructed from its beacon timing reports). Registers are
//! plain `u32` with explicit shifting so width and wraparound behavior are
//! exactly reproducible; both start all-ones, i.e. optimistic.

/// One tick of the protocol's time base is 256 microseconds.
pub const TIME_UNIT_US: u64 = 256;

/// Difference `t1 - t2` in 256 us time units on the wrapping 16-bit clock.
pub fn tu_difference(t1: u16, t2: u16) -> u16 {
    t1.wrapping_sub(t2)
}

/// Beacon reception history for one peer link.
#[derive(Clone, Copy, Debug)]
pub struct BeaconHistory {
    /// Bit-wise sequence of the last beacons heard from the neighbor.
    fwd_beacons: u32,
    /// Bit-wise sequence of our last beacons the neighbor reports hearing.
    rev_beacons: u32,
    /// Consecutive expected-but-missing local beacon receptions.
    missed_beacons: u8,
    /// Arrival time of the neighbor's last reported beacon, in TU.
    last_rem_beacon_update_tu: u16,
    /// Last known remote beacon interval in TU. Kept here so the
    /// no-report update path has a defined interval to extrapolate with.
    remote_interval_tu: u16,
}

impl Default for BeaconHistory {
    fn default() -> Self {
        Self {
            fwd_beacons: 0xffff_ffff,
            rev_beacons: 0xffff_ffff,
            missed_beacons: 0,
            last_rem_beacon_update_tu: 0,
            remote_interval_tu: 0,
        }
    }
}

impl BeaconHistory {
    /// Shift a "received" bit into a sequence.
    fn shift_in_reception(seq: u32) -> u32 {
        (seq << 1) | 0x01
    }

    /// Shift a "missed" bit into a sequence.
    fn shift_in_miss(seq: u32) -> u32 {
        seq << 1
    }

    /// Record that we heard the neighbor's beacon.
    pub fn record_forward_reception(&mut self) {
        self.fwd_beacons = Self::shift_in_reception(self.fwd_beacons);
    }

    /// Record that we missed an expected neighbor beacon.
    pub fn record_forward_miss(&mut self) {
        self.fwd_beacons = Self::shift_in_miss(self.fwd_beacons);
    }

    /// Record that the neighbor heard one of our beacons.
    pub fn record_reverse_reception(&mut self) {
        self.rev_beacons = Self::shift_in_reception(self.rev_beacons);
    }

    /// Record that the neighbor missed one of our beacons.
    pub fn record_reverse_miss(&mut self) {
        self.rev_beacons = Self::shift_in_miss(self.rev_beacons);
    }

    /// Consecutive missed local beacon expectations.
    pub fn missed_beacons(&self) -> u8 {
        self.missed_beacons
    }

    /// Bump the missed counter, saturating at 255.
    pub fn increment_missed(&mut self) {
        self.missed_beacons = self.missed_beacons.saturating_add(1);
    }

    /// Reset the missed counter after a beacon arrives.
    pub fn reset_missed(&mut self) {
        self.missed_beacons = 0;
    }

    /// Time of the last remote beacon update, in TU.
    pub fn last_remote_update_tu(&self) -> u16 {
        self.last_rem_beacon_update_tu
    }

    /// Overwrite the remote-update time with a reported arrival.
    pub fn set_last_remote_update_tu(&mut self, tu: u16) {
        self.last_rem_beacon_update_tu = tu;
    }

    /// Extrapolate the remote-update time by `count` remote intervals.
    pub fn advance_last_remote_update(&mut self, interval_tu: u16, count: u16) {
        self.last_rem_beacon_update_tu = self
            .last_rem_beacon_update_tu
            .wrapping_add(interval_tu.wrapping_mul(count));
    }

    /// Last known remote beacon interval in TU (0 until first report).
    pub fn remote_interval_tu(&self) -> u16 {
        self.remote_interval_tu
    }

    pub fn set_remote_interval_tu(&mut self, tu: u16) {
        self.remote_interval_tu = tu;
    }

    /// Count set bits over the `window` most recent positions.
    fn count_window(seq: u32, window: u16) -> u32 {
        let mut count = 0;
        for i in 0..window.min(32) {
            count += (seq >> i) & 0x1;
        }
        count
    }

    /// Failure average over both directions of the link.
    ///
    /// `1 - (fwd * rev) / (w * w)`: the product penalizes asymmetric links
    /// multiplicatively.
    pub fn fail_avg(&self, window: u16) -> f64 {
        let fwd = Self::count_window(self.fwd_beacons, window);
        let rev = Self::count_window(self.rev_beacons, window);
        let w = window as f64;
        1.0 - (fwd * rev) as f64 / (w * w)
    }

    #[cfg(test)]
    pub(crate) fn forward_bits(&self) -> u32 {
        self.fwd_beacons
    }

    #[cfg(test)]
    pub(crate) fn reverse_bits(&self) -> u32 {
        self.rev_beacons
    }
}

/// How many of our beacons the neighbor received and missed since its
/// previous report, as reconstructed from cyclic 16-bit TU timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RemoteEstimate {
    pub received: i32,
    pub missed: i32,
}

/// Reconstruct remote reception counts from a beacon timing report.
///
/// The arithmetic follows the protocol's reference formulation exactly:
/// missed counts may come out negative when the report falls inside the
/// tolerance and are clamped to zero, and are capped at the failure
/// window so a long silence cannot flush more history than the window
/// holds. The formula is sensitive to the interplay of tolerance and
/// interval; change only with the reconciliation tests in hand.
#[allow(clippy::too_many_arguments)]
pub(crate) fn estimate_remote_beacons(
    report_last_tu: u16,
    remote_interval_tu: u16,
    prev_report_tu: u16,
    last_update_tu: u16,
    local_last_beacon_tu: u16,
    tolerance_tu: u16,
    local_missed: u8,
    new_link: bool,
    window: u16,
) -> RemoteEstimate {
    // First report after link creation: optimistically one received.
    if new_link {
        return RemoteEstimate {
            received: 1,
            missed: 0,
        };
    }

    let interval = i32::from(remote_interval_tu).max(1);
    let tolerance = i32::from(tolerance_tu);
    let report_changed = prev_report_tu != report_last_tu;

    let received = if local_missed == 0 {
        if report_changed {
            (i32::from(tu_difference(report_last_tu, last_update_tu)) + tolerance) / interval
        } else {
            0
        }
    } else if report_changed {
        1
    } else {
        0
    };

    // Several intervals between the reported arrival and our own beacon
    // time mean recent beacons of ours went unheard. The report itself is
    // slightly delayed, so it is excluded by the tolerance subtraction.
    let gap_from = if report_changed {
        report_last_tu
    } else {
        last_update_tu
    };
    let mut missed = (i32::from(tu_difference(local_last_beacon_tu, gap_from)) - tolerance) / interval;
    if missed < 0 {
        missed = 0;
    }
    if missed > i32::from(window) {
        missed = i32::from(window);
    }

    RemoteEstimate { received, missed }
}
