//! ETX estimation from periodic link probe exchanges.
//!
//! Each probe carries a cyclic timestamp in `0..12`. Per neighbor we keep
//! a 12-slot bitmap of which recent probes of theirs we heard (forward
//! direction) and their latest report of how many of ours they heard
//! (reverse direction). The probe scheduler advances the tracker's own
//! timestamp once per probe interval, retiring the oldest slot.

use crate::addr::MacAddr;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Number of probe slots tracked per neighbor.
const PROBE_SLOTS: u8 = 12;

/// Mask selecting the valid slot bits of the bitmap.
const SLOT_MASK: u16 = 0x0fff;

/// Cost reported for a link with no probe deliveries in either direction.
pub const ETX_MAX: u32 = 200_000;

#[derive(Clone, Copy, Debug, Default)]
struct ProbeRecord {
    /// Bitmap of received probe timestamps, one bit per slot.
    heard: u16,
    /// The neighbor's latest count of our probes it received.
    reverse: u8,
}

/// Per-interface ETX state across all probed neighbors.
///
/// The timestamp is tracker-wide: every outgoing probe carries it, and
/// [`advance`](Self::advance) moves it forward once per probe interval.
#[derive(Debug, Default)]
pub struct EtxTracker {
    time_stamp: u8,
    neighbors: HashMap<MacAddr, ProbeRecord>,
}

fn next_slot(slot: u8) -> u8 {
    if slot == PROBE_SLOTS - 1 {
        0
    } else {
        slot + 1
    }
}

impl EtxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp to stamp onto the next outgoing probe.
    pub fn time_stamp(&self) -> u8 {
        self.time_stamp
    }

    /// Advance to the next probe interval: step the timestamp and retire
    /// the slot that now represents the oldest probe for every neighbor.
    pub fn advance(&mut self) {
        self.time_stamp = next_slot(self.time_stamp);
        let retire = next_slot(self.time_stamp);
        for record in self.neighbors.values_mut() {
            record.heard &= !(1u16 << retire) & SLOT_MASK;
        }
    }

    /// Record a probe received from `peer`.
    ///
    /// `slot` is the timestamp the probe carried; `reverse` is the
    /// neighbor's report of how many of our probes it heard. Probes with
    /// an out-of-range timestamp are dropped.
    pub fn record_probe(&mut self, peer: MacAddr, slot: u8, reverse: u8) {
        if slot >= PROBE_SLOTS {
            debug!(peer = %peer, slot, "Dropping probe with out-of-range timestamp");
            return;
        }
        let record = self.neighbors.entry(peer).or_default();
        record.heard |= 1u16 << slot;
        record.reverse = reverse;
        trace!(peer = %peer, slot, reverse, "Probe recorded");
    }

    /// Probes heard from `peer` over the settled window.
    ///
    /// The current slot and its successor are excluded: the current one
    /// is still accumulating, and the successor is the retiring one.
    pub fn forward_count(&self, peer: &MacAddr) -> u32 {
        let record = match self.neighbors.get(peer) {
            Some(r) => *r,
            None => return 0,
        };
        let mut count = 0;
        let skip_a = self.time_stamp;
        let skip_b = next_slot(self.time_stamp);
        for slot in 0..PROBE_SLOTS {
            if slot == skip_a || slot == skip_b {
                continue;
            }
            count += u32::from((record.heard >> slot) & 0x1);
        }
        count
    }

    /// ETX-derived link cost toward `peer`.
    ///
    /// `100000 / (forward * reverse)`, rounded; [`ETX_MAX`] when either
    /// direction has seen nothing.
    pub fn cost(&self, peer: &MacAddr) -> u32 {
        let forward = self.forward_count(peer);
        let reverse = self
            .neighbors
            .get(peer)
            .map(|r| u32::from(r.reverse))
            .unwrap_or(0);
        if forward == 0 || reverse == 0 {
            return ETX_MAX;
        }
        (100_000.0 / f64::from(forward * reverse)).round() as u32
    }

    /// Forward counts to report in the next outgoing probe, for every
    /// neighbor we have heard from.
    pub fn report_counts(&self) -> Vec<(MacAddr, u8)> {
        self.neighbors
            .keys()
            .filter_map(|peer| {
                let count = self.forward_count(peer);
                if count > 0 {
                    Some((*peer, count as u8))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Drop all probe state for `peer`, e.g. when its peering closes.
    pub fn forget(&mut self, peer: &MacAddr) {
        self.neighbors.remove(peer);
    }
}
