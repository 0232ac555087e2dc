//! Table of peer links for one interface.
//!
//! The table owns every [`PeerLink`], allocates link and association
//! identifiers, routes decoded frames and beacons to the right link,
//! polls link timers against a caller-supplied clock, and drains link
//! outputs. Freshly computed failure averages are intercepted into a
//! per-neighbor map for the metric layer; everything else is handed to
//! the caller tagged with the neighbor address.

use super::event::LinkOutput;
use super::frame::{BeaconTiming, PeerFrameEvent};
use super::PeerLink;
use crate::addr::MacAddr;
use crate::config::PeeringConfig;
use std::collections::HashMap;
use tracing::debug;

/// Peer link table for a single mesh interface.
pub struct PeerLinkTable {
    iface: u32,
    cfg: PeeringConfig,
    links: HashMap<MacAddr, PeerLink>,
    /// Last assigned local link identifier; 0 is the unknown sentinel and
    /// is never handed out.
    last_link_id: u16,
    /// Last assigned association identifier; 0 means unassigned.
    last_aid: u16,
    /// Latest beacon failure average per neighbor, fed by link outputs.
    fail_avg: HashMap<MacAddr, f64>,
}

impl PeerLinkTable {
    pub fn new(iface: u32, cfg: PeeringConfig) -> Self {
        Self {
            iface,
            cfg,
            links: HashMap::new(),
            last_link_id: 0,
            last_aid: 0,
            fail_avg: HashMap::new(),
        }
    }

    pub fn interface(&self) -> u32 {
        self.iface
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn link(&self, peer: &MacAddr) -> Option<&PeerLink> {
        self.links.get(peer)
    }

    /// Neighbors whose peering is currently established.
    pub fn established_peers(&self) -> Vec<MacAddr> {
        self.links
            .values()
            .filter(|l| l.is_established())
            .map(|l| l.peer_addr())
            .collect()
    }

    /// Latest beacon failure average for a neighbor; 0 until the first
    /// beacon accounting ran (all-ones history, optimistic).
    pub fn fail_avg(&self, peer: &MacAddr) -> f64 {
        self.fail_avg.get(peer).copied().unwrap_or(0.0)
    }

    fn next_link_id(&mut self) -> u16 {
        self.last_link_id = self.last_link_id.wrapping_add(1);
        if self.last_link_id == 0 {
            self.last_link_id = 1;
        }
        self.last_link_id
    }

    fn next_aid(&mut self) -> u16 {
        self.last_aid = self.last_aid.wrapping_add(1);
        if self.last_aid == 0 {
            self.last_aid = 1;
        }
        self.last_aid
    }

    /// Look up or create the link toward `peer`.
    pub fn ensure_link(&mut self, peer: MacAddr) -> &mut PeerLink {
        if !self.links.contains_key(&peer) {
            let link_id = self.next_link_id();
            let aid = self.next_aid();
            debug!(peer = %peer, link_id, aid, "Creating peer link");
            self.links.insert(
                peer,
                PeerLink::new(self.iface, peer, link_id, aid, self.cfg.clone()),
            );
        }
        self.links.get_mut(&peer).expect("just inserted")
    }

    /// Actively open a peering toward `peer`, creating the link if needed.
    pub fn active_open(&mut self, peer: MacAddr, now_us: u64) {
        self.ensure_link(peer).active_open(now_us);
    }

    /// Route a decoded peering frame to its link.
    ///
    /// Open frames create the link on demand; Confirm and Close frames
    /// for unknown neighbors are dropped, they can only be stale.
    pub fn handle_frame(&mut self, peer: MacAddr, frame: PeerFrameEvent, now_us: u64) {
        let creates = matches!(
            frame,
            PeerFrameEvent::OpenAccept { .. } | PeerFrameEvent::OpenReject { .. }
        );
        if creates {
            self.ensure_link(peer).handle_frame(frame, now_us);
        } else if let Some(link) = self.links.get_mut(&peer) {
            link.handle_frame(frame, now_us);
        } else {
            debug!(peer = %peer, "Dropping frame for unknown peer link");
        }
    }

    /// Account a received beacon from `peer`: store its timing element,
    /// refresh arrival bookkeeping and reconcile reception histories.
    pub fn on_beacon(
        &mut self,
        peer: MacAddr,
        now_us: u64,
        interval_us: u64,
        timing: BeaconTiming,
    ) {
        let link = self.ensure_link(peer);
        link.set_beacon_timing(timing);
        link.set_beacon_information(now_us, interval_us);
        link.update_beacon_received(now_us);
    }

    /// A frame toward `peer` was delivered.
    pub fn transmission_success(&mut self, peer: &MacAddr) {
        if let Some(link) = self.links.get_mut(peer) {
            link.transmission_success();
        }
    }

    /// A frame toward `peer` failed.
    pub fn transmission_failure(&mut self, peer: &MacAddr, now_us: u64) {
        if let Some(link) = self.links.get_mut(peer) {
            link.transmission_failure(now_us);
        }
    }

    /// Fire every expired link timer, earliest first per link.
    ///
    /// Firing a timer can arm or cancel others on the same link, so each
    /// link is re-polled until nothing is due.
    pub fn run_timers(&mut self, now_us: u64) {
        for link in self.links.values_mut() {
            while let Some(kind) = link.next_expired_timer(now_us) {
                link.fire_timer(kind, now_us);
            }
        }
    }

    /// Drain all link outputs, tagged with the neighbor address, and
    /// reclaim links that finished tearing down.
    ///
    /// `FailAvg` records are consumed into the table's per-neighbor map
    /// instead of being returned.
    pub fn drain_outputs(&mut self) -> Vec<(MacAddr, LinkOutput)> {
        let mut out = Vec::new();
        for (addr, link) in self.links.iter_mut() {
            for output in link.drain_outputs() {
                if let LinkOutput::FailAvg(avg) = output {
                    self.fail_avg.insert(*addr, avg);
                } else {
                    out.push((*addr, output));
                }
            }
        }
        self.links.retain(|addr, link| {
            if link.is_reclaimable() {
                debug!(peer = %addr, "Reclaiming closed peer link");
                false
            } else {
                true
            }
        });
        out
    }
}
