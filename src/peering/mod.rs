//! Peer link management: per-neighbor peering state machine with retry,
//! confirm, holding, beacon-loss and beacon-missed timers.
//!
//! A `PeerLink` is a pure, serially-driven unit: decoded frame events and
//! timer expiries go in, `LinkOutput` records (frame intents, state
//! changes, failure averages) come out through a queue its owner drains.
//! Timers are deadline fields polled by the owning [`PeerLinkTable`];
//! cancelling a timer that never armed or already fired is a no-op.

pub mod beacon;
pub mod event;
pub mod frame;
pub mod table;
#[cfg(test)]
mod tests;

use crate::addr::MacAddr;
use crate::config::PeeringConfig;
use beacon::{estimate_remote_beacons, BeaconHistory};
use event::{LinkOutput, PeerEvent, PeerState, ReasonCode};
use frame::{BeaconTiming, MeshConfig, PeerFrameEvent};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, trace, warn};

pub use table::PeerLinkTable;

/// The five timers a peer link can hold. At most one of the protocol
/// timers (retry, confirm, holding) is armed at a time; the beacon timers
/// run whenever beacon information is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Retry,
    Confirm,
    Holding,
    BeaconLoss,
    BeaconMissed,
}

/// Deadline set for one link, in absolute microseconds.
///
/// Re-arming overwrites the previous deadline; `None` means not armed.
#[derive(Clone, Copy, Debug, Default)]
struct TimerSet {
    retry: Option<u64>,
    confirm: Option<u64>,
    holding: Option<u64>,
    beacon_loss: Option<u64>,
    beacon_missed: Option<u64>,
}

impl TimerSet {
    fn cancel_all(&mut self) {
        *self = TimerSet::default();
    }

    /// Earliest deadline at or before `now`, with a fixed tie order.
    fn next_expired(&self, now_us: u64) -> Option<(u64, TimerKind)> {
        let candidates = [
            (self.retry, TimerKind::Retry),
            (self.confirm, TimerKind::Confirm),
            (self.holding, TimerKind::Holding),
            (self.beacon_loss, TimerKind::BeaconLoss),
            (self.beacon_missed, TimerKind::BeaconMissed),
        ];
        candidates
            .iter()
            .filter_map(|(deadline, kind)| deadline.map(|d| (d, *kind)))
            .filter(|(d, _)| *d <= now_us)
            .min_by_key(|(d, _)| *d)
    }
}

/// Peering state machine for one neighbor on one interface.
pub struct PeerLink {
    /// Index of the owning interface.
    iface: u32,
    /// Link-layer address of the neighbor.
    peer_addr: MacAddr,
    /// Mesh-point address of the neighbor, bound on first sight. Equals
    /// `peer_addr` for single-interface mesh points.
    peer_mesh_addr: Option<MacAddr>,
    /// Our identifier for this link.
    local_link_id: u16,
    /// The neighbor's identifier for this link; 0 until learned (wire
    /// sentinel, shared with the frame encoding).
    peer_link_id: u16,
    /// Association identifier we assigned to the neighbor.
    local_aid: u16,
    /// Association identifier the neighbor assigned to us.
    peer_aid: u16,

    state: PeerState,
    retry_counter: u16,
    /// Consecutive transmission failures toward this neighbor.
    packet_fail: u16,

    /// Arrival time of the neighbor's last beacon, microseconds.
    last_beacon_us: u64,
    /// The neighbor's beacon interval, microseconds.
    beacon_interval_us: u64,
    history: BeaconHistory,
    /// The neighbor's most recent beacon timing element.
    beacon_timing: BeaconTiming,
    /// Our-beacon arrival time from the neighbor's previous report, TU.
    prev_report_tu: u16,
    /// Set until the first beacon timing reconciliation.
    new_link: bool,
    /// Set when the link returned to idle after teardown; the owning
    /// table reclaims such links.
    closed: bool,

    /// Most recent configuration payload from the neighbor.
    config_ie: MeshConfig,

    cfg: PeeringConfig,
    timers: TimerSet,
    outputs: VecDeque<LinkOutput>,
}

impl PeerLink {
    /// Create an idle link toward `peer_addr`.
    pub fn new(
        iface: u32,
        peer_addr: MacAddr,
        local_link_id: u16,
        local_aid: u16,
        cfg: PeeringConfig,
    ) -> Self {
        Self {
            iface,
            peer_addr,
            peer_mesh_addr: None,
            local_link_id,
            peer_link_id: 0,
            local_aid,
            peer_aid: 0,
            state: PeerState::Idle,
            retry_counter: 0,
            packet_fail: 0,
            last_beacon_us: 0,
            beacon_interval_us: 0,
            history: BeaconHistory::default(),
            beacon_timing: BeaconTiming::default(),
            prev_report_tu: 0,
            new_link: true,
            closed: false,
            config_ie: MeshConfig::default(),
            cfg,
            timers: TimerSet::default(),
            outputs: VecDeque::new(),
        }
    }

    // === Accessors ===

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn peer_addr(&self) -> MacAddr {
        self.peer_addr
    }

    /// Mesh-point address of the neighbor, once known.
    pub fn peer_mesh_addr(&self) -> Option<MacAddr> {
        self.peer_mesh_addr
    }

    pub fn local_link_id(&self) -> u16 {
        self.local_link_id
    }

    /// The neighbor's link identifier, 0 until learned.
    pub fn peer_link_id(&self) -> u16 {
        self.peer_link_id
    }

    pub fn local_aid(&self) -> u16 {
        self.local_aid
    }

    pub fn peer_aid(&self) -> u16 {
        self.peer_aid
    }

    /// Most recent configuration payload received from the neighbor.
    pub fn peer_config(&self) -> &MeshConfig {
        &self.config_ie
    }

    pub fn interface(&self) -> u32 {
        self.iface
    }

    pub fn is_established(&self) -> bool {
        self.state.is_established()
    }

    /// True once the link has torn down and may be dropped by its owner.
    pub fn is_reclaimable(&self) -> bool {
        self.closed && self.state.is_idle()
    }

    /// Arrival time of the neighbor's last beacon, microseconds.
    pub fn last_beacon_us(&self) -> u64 {
        self.last_beacon_us
    }

    pub fn beacon_interval_us(&self) -> u64 {
        self.beacon_interval_us
    }

    /// Current beacon failure average over the configured window.
    pub fn fail_avg(&self) -> f64 {
        self.history.fail_avg(self.cfg.beacon_window)
    }

    /// Drain queued outputs in emission order.
    pub fn drain_outputs(&mut self) -> Vec<LinkOutput> {
        self.outputs.drain(..).collect()
    }

    // === Requests from the peering protocol ===

    /// Actively open the peering toward the neighbor.
    pub fn active_open(&mut self, now_us: u64) {
        self.state_machine(PeerEvent::ActiveOpen, ReasonCode::Reserved, now_us);
    }

    /// Cancel the peering with the given reason.
    pub fn cancel(&mut self, now_us: u64, reason: ReasonCode) {
        self.state_machine(PeerEvent::Cancel, reason, now_us);
    }

    /// Reject an inbound peering request for local policy reasons.
    pub fn request_reject(&mut self, now_us: u64) {
        self.state_machine(
            PeerEvent::RequestReject,
            ReasonCode::PeeringCancelled,
            now_us,
        );
    }

    // === Inbound decoded frames ===

    /// Deliver a decoded management frame event.
    ///
    /// Performs link identifier reconciliation first: an unknown peer link
    /// identifier is adopted, a mismatching one drops the event silently
    /// (stale or duplicate frame). A mesh-point address that contradicts
    /// the bound one is a genuine conflict and tears the link down.
    pub fn handle_frame(&mut self, frame: PeerFrameEvent, now_us: u64) {
        match frame {
            PeerFrameEvent::OpenAccept {
                sender_link_id,
                config,
                peer_mesh_addr,
            } => {
                self.peer_link_id = sender_link_id;
                self.config_ie = config;
                if !self.bind_mesh_addr(peer_mesh_addr, now_us) {
                    return;
                }
                self.state_machine(PeerEvent::OpenAccept, ReasonCode::Reserved, now_us);
            }
            PeerFrameEvent::OpenReject {
                sender_link_id,
                config,
                peer_mesh_addr,
                reason,
            } => {
                if self.peer_link_id == 0 {
                    self.peer_link_id = sender_link_id;
                }
                self.config_ie = config;
                if !self.bind_mesh_addr(peer_mesh_addr, now_us) {
                    return;
                }
                self.state_machine(PeerEvent::OpenReject, reason, now_us);
            }
            PeerFrameEvent::ConfirmAccept {
                sender_link_id,
                echoed_link_id,
                peer_aid,
                config,
                peer_mesh_addr,
            } => {
                if self.local_link_id != echoed_link_id {
                    self.drop_frame("confirm", echoed_link_id);
                    return;
                }
                if !self.reconcile_peer_link_id(sender_link_id) {
                    return;
                }
                self.config_ie = config;
                self.peer_aid = peer_aid;
                if !self.bind_mesh_addr(peer_mesh_addr, now_us) {
                    return;
                }
                self.state_machine(PeerEvent::ConfirmAccept, ReasonCode::Reserved, now_us);
            }
            PeerFrameEvent::ConfirmReject {
                sender_link_id,
                echoed_link_id,
                config,
                peer_mesh_addr,
                reason,
            } => {
                if self.local_link_id != echoed_link_id {
                    self.drop_frame("confirm reject", echoed_link_id);
                    return;
                }
                if !self.reconcile_peer_link_id(sender_link_id) {
                    return;
                }
                self.config_ie = config;
                if !self.bind_mesh_addr(peer_mesh_addr, now_us) {
                    return;
                }
                self.state_machine(PeerEvent::ConfirmReject, reason, now_us);
            }
            PeerFrameEvent::Close {
                sender_link_id,
                echoed_link_id,
                reason,
            } => {
                if echoed_link_id != 0 && self.local_link_id != echoed_link_id {
                    self.drop_frame("close", echoed_link_id);
                    return;
                }
                if !self.reconcile_peer_link_id(sender_link_id) {
                    return;
                }
                self.state_machine(PeerEvent::CloseAccept, reason, now_us);
            }
        }
    }

    fn drop_frame(&self, what: &str, echoed: u16) {
        debug!(
            peer = %self.peer_addr,
            local_link_id = self.local_link_id,
            echoed_link_id = echoed,
            "Dropping {} with stale link identifier", what
        );
    }

    /// Adopt an unknown peer link identifier, or require a match.
    fn reconcile_peer_link_id(&mut self, presented: u16) -> bool {
        if self.peer_link_id == 0 {
            self.peer_link_id = presented;
            return true;
        }
        if self.peer_link_id != presented {
            debug!(
                peer = %self.peer_addr,
                known = self.peer_link_id,
                presented,
                "Dropping frame with mismatched peer link identifier"
            );
            return false;
        }
        true
    }

    /// Bind the peer mesh-point address on first sight; a later conflict
    /// terminates the link.
    fn bind_mesh_addr(&mut self, addr: MacAddr, now_us: u64) -> bool {
        match self.peer_mesh_addr {
            None => {
                self.peer_mesh_addr = Some(addr);
                true
            }
            Some(known) if known == addr => true,
            Some(known) => {
                warn!(
                    peer = %self.peer_addr,
                    known = %known,
                    presented = %addr,
                    "Mesh-point address conflict, closing link"
                );
                self.state_machine(PeerEvent::Cancel, ReasonCode::InvalidParameters, now_us);
                false
            }
        }
    }

    // === Beacon side channel ===

    /// Store the neighbor's beacon timing element from a received beacon.
    pub fn set_beacon_timing(&mut self, timing: BeaconTiming) {
        self.beacon_timing = timing;
    }

    /// Record beacon arrival time and interval, and (re)arm the beacon
    /// loss timer for `interval * max_beacon_loss`.
    pub fn set_beacon_information(&mut self, last_beacon_us: u64, interval_us: u64) {
        self.last_beacon_us = last_beacon_us;
        self.beacon_interval_us = interval_us;
        self.timers.beacon_loss = None;
        if interval_us == 0 {
            // Interval not yet advertised; nothing to arm against.
            return;
        }
        let delay = interval_us * u64::from(self.cfg.max_beacon_loss);
        self.timers.beacon_loss = Some(last_beacon_us + delay);
    }

    /// Process an actually received beacon: extend the forward history,
    /// reconcile the neighbor's report of our beacons into the reverse
    /// history, and emit a fresh failure average.
    pub fn update_beacon_received(&mut self, now_us: u64) {
        let tol_ms = u64::from(self.cfg.beacon_interval_tolerance_ms);
        let tol_tu = ((u32::from(self.cfg.beacon_interval_tolerance_ms) * 1000) >> 8) as u16;

        // Next beacon is expected within one interval plus tolerance. A
        // zero interval cannot arm a deadline that makes progress.
        self.timers.beacon_missed = None;
        if self.beacon_interval_us > 0 {
            self.timers.beacon_missed =
                Some(now_us + self.beacon_interval_us + tol_ms * 1000);
        }

        self.history.record_forward_reception();

        match self.beacon_timing.entry_for_aid(self.peer_aid).copied() {
            Some(entry) => {
                let interval_tu = entry.interval.wrapping_mul(4);
                let estimate = estimate_remote_beacons(
                    entry.last_beacon_tu,
                    interval_tu,
                    self.prev_report_tu,
                    self.history.last_remote_update_tu(),
                    (self.last_beacon_us >> 8) as u16,
                    tol_tu,
                    self.history.missed_beacons(),
                    self.new_link,
                    self.cfg.beacon_window,
                );
                for _ in 0..estimate.received {
                    self.history.record_reverse_reception();
                }
                self.history.set_last_remote_update_tu(entry.last_beacon_tu);
                for _ in 0..estimate.missed {
                    self.history.record_reverse_miss();
                }
                self.history
                    .advance_last_remote_update(interval_tu, estimate.missed as u16);
                self.history.set_remote_interval_tu(interval_tu);
                self.prev_report_tu = entry.last_beacon_tu;
                self.new_link = false;
            }
            None if !self.new_link => {
                // The neighbor stopped reporting our beacons: every local
                // expectation since its last report went unheard.
                let gap = u16::from(self.history.missed_beacons()) + 1;
                for _ in 0..gap {
                    self.history.record_reverse_miss();
                }
                let interval_tu = self.history.remote_interval_tu();
                self.history.advance_last_remote_update(interval_tu, gap);
            }
            None => {}
        }

        self.history.reset_missed();
        self.push_fail_avg();
    }

    /// No beacon arrived within the expected window.
    fn beacon_missed_expired(&mut self, now_us: u64) {
        self.history.increment_missed();
        // The tolerance was already spent waiting; re-arm for a bare
        // interval. An interval of zero stays disarmed, it would only
        // produce a deadline that is already due.
        if self.beacon_interval_us > 0 {
            self.timers.beacon_missed = Some(now_us + self.beacon_interval_us);
        }
        self.history.record_forward_miss();
        self.push_fail_avg();
    }

    fn push_fail_avg(&mut self) {
        self.outputs
            .push_back(LinkOutput::FailAvg(self.history.fail_avg(self.cfg.beacon_window)));
    }

    // === Transmission outcome hooks ===

    /// A frame toward the neighbor was delivered.
    pub fn transmission_success(&mut self) {
        self.packet_fail = 0;
    }

    /// A frame toward the neighbor failed; enough consecutive failures
    /// cancel the peering.
    pub fn transmission_failure(&mut self, now_us: u64) {
        self.packet_fail += 1;
        if self.packet_fail == self.cfg.max_packet_failure {
            debug!(peer = %self.peer_addr, "Transmission failure limit reached, cancelling");
            self.state_machine(PeerEvent::Cancel, ReasonCode::PeeringCancelled, now_us);
            self.packet_fail = 0;
        }
    }

    // === Timer polling (owner-driven) ===

    pub(crate) fn next_expired_timer(&self, now_us: u64) -> Option<TimerKind> {
        self.timers.next_expired(now_us).map(|(_, kind)| kind)
    }

    pub(crate) fn fire_timer(&mut self, kind: TimerKind, now_us: u64) {
        match kind {
            TimerKind::Retry => {
                self.timers.retry = None;
                if self.retry_counter < self.cfg.max_retries {
                    self.state_machine(PeerEvent::RetryTimeout, ReasonCode::Reserved, now_us);
                } else {
                    self.state_machine(
                        PeerEvent::RetriesExhausted,
                        ReasonCode::MaxRetries,
                        now_us,
                    );
                }
            }
            TimerKind::Confirm => {
                self.timers.confirm = None;
                self.state_machine(PeerEvent::ConfirmTimeout, ReasonCode::ConfirmTimeout, now_us);
            }
            TimerKind::Holding => {
                self.timers.holding = None;
                self.state_machine(PeerEvent::HoldingTimeout, ReasonCode::Reserved, now_us);
            }
            TimerKind::BeaconLoss => {
                self.timers.beacon_loss = None;
                debug!(peer = %self.peer_addr, "Beacon loss limit reached, cancelling");
                self.state_machine(PeerEvent::Cancel, ReasonCode::PeeringCancelled, now_us);
            }
            TimerKind::BeaconMissed => {
                self.timers.beacon_missed = None;
                self.beacon_missed_expired(now_us);
            }
        }
    }

    // === State machine ===

    /// Drive one event through the transition table. Pairs not listed are
    /// ignored on purpose, per the peering protocol.
    fn state_machine(&mut self, event: PeerEvent, reason: ReasonCode, now_us: u64) {
        use PeerEvent::*;
        use PeerState::*;

        match (self.state, event) {
            // --- IDLE ---
            (Idle, Cancel) | (Idle, CloseAccept) => {
                self.notify_state(Idle, Idle);
            }
            (Idle, RequestReject) => {
                self.send_close(reason);
            }
            (Idle, ActiveOpen) => {
                self.set_state(OpnSnt);
                self.send_open();
                self.arm_retry(now_us);
            }
            (Idle, OpenAccept) => {
                self.set_state(OpnRcvd);
                self.send_confirm();
                self.send_open();
                self.arm_retry(now_us);
            }

            // --- OPN_SNT ---
            (OpnSnt, RetryTimeout) => {
                self.send_open();
                self.retry_counter += 1;
                self.arm_retry(now_us);
            }
            (OpnSnt, ConfirmAccept) => {
                self.set_state(CnfRcvd);
                self.timers.retry = None;
                self.timers.confirm = Some(now_us + self.cfg.confirm_timeout_us);
            }
            (OpnSnt, OpenAccept) => {
                self.set_state(OpnRcvd);
                self.send_confirm();
            }
            (OpnSnt, CloseAccept) => self.enter_holding(now_us, ReasonCode::CloseReceived),
            (OpnSnt, OpenReject) | (OpnSnt, ConfirmReject) => self.enter_holding(now_us, reason),
            (OpnSnt, RetriesExhausted) => self.enter_holding(now_us, ReasonCode::MaxRetries),
            (OpnSnt, Cancel) => self.enter_holding(now_us, reason),

            // --- CNF_RCVD ---
            (CnfRcvd, ConfirmAccept) => {}
            (CnfRcvd, OpenAccept) => {
                self.set_state(Estab);
                self.timers.confirm = None;
                self.send_confirm();
                debug_assert!(self.peer_mesh_addr.is_some());
            }
            (CnfRcvd, CloseAccept) => self.enter_holding(now_us, ReasonCode::CloseReceived),
            (CnfRcvd, ConfirmReject) | (CnfRcvd, OpenReject) => {
                self.enter_holding(now_us, reason)
            }
            (CnfRcvd, Cancel) => self.enter_holding(now_us, reason),
            (CnfRcvd, ConfirmTimeout) => self.enter_holding(now_us, ReasonCode::ConfirmTimeout),

            // --- OPN_RCVD ---
            (OpnRcvd, RetryTimeout) => {
                self.send_open();
                self.retry_counter += 1;
                self.arm_retry(now_us);
            }
            (OpnRcvd, ConfirmAccept) => {
                self.set_state(Estab);
                self.timers.retry = None;
                debug_assert!(self.peer_mesh_addr.is_some());
            }
            (OpnRcvd, CloseAccept) => self.enter_holding(now_us, ReasonCode::CloseReceived),
            (OpnRcvd, OpenReject) | (OpnRcvd, ConfirmReject) => self.enter_holding(now_us, reason),
            (OpnRcvd, RetriesExhausted) => self.enter_holding(now_us, ReasonCode::MaxRetries),
            (OpnRcvd, Cancel) => self.enter_holding(now_us, reason),

            // --- ESTAB ---
            (Estab, OpenAccept) => {
                self.send_confirm();
            }
            (Estab, CloseAccept) => self.enter_holding(now_us, ReasonCode::CloseReceived),
            (Estab, OpenReject) | (Estab, ConfirmReject) => self.enter_holding(now_us, reason),
            (Estab, Cancel) => self.enter_holding(now_us, reason),

            // --- HOLDING ---
            // A Close from the peer cuts the holding period short: clear
            // the timer and take the same path as its expiry.
            (Holding, CloseAccept) => {
                self.timers.holding = None;
                self.enter_idle();
            }
            (Holding, HoldingTimeout) => self.enter_idle(),
            (Holding, OpenAccept) | (Holding, ConfirmAccept) => {
                self.notify_state(Holding, Holding);
                self.send_close(ReasonCode::PeeringCancelled);
            }
            (Holding, OpenReject) | (Holding, ConfirmReject) => {
                self.notify_state(Holding, Holding);
                self.send_close(reason);
            }

            // All other pairs shall be ignored in their state.
            (state, event) => {
                trace!(peer = %self.peer_addr, state = %state, ?event, "Event ignored");
            }
        }
    }

    fn set_state(&mut self, to: PeerState) {
        let from = self.state;
        self.state = to;
        debug!(peer = %self.peer_addr, from = %from, to = %to, "Peer link state change");
        self.notify_state(from, to);
    }

    fn notify_state(&mut self, from: PeerState, to: PeerState) {
        self.outputs.push_back(LinkOutput::StateChange {
            peer_addr: self.peer_addr,
            peer_mesh_addr: self.peer_mesh_addr,
            from,
            to,
        });
    }

    fn arm_retry(&mut self, now_us: u64) {
        self.timers.retry = Some(now_us + self.cfg.retry_timeout_us);
    }

    fn enter_holding(&mut self, now_us: u64, reason: ReasonCode) {
        self.set_state(PeerState::Holding);
        self.timers.cancel_all();
        self.send_close(reason);
        self.timers.holding = Some(now_us + self.cfg.holding_timeout_us);
    }

    fn enter_idle(&mut self) {
        self.timers.cancel_all();
        self.closed = true;
        self.set_state(PeerState::Idle);
    }

    fn send_open(&mut self) {
        self.outputs.push_back(LinkOutput::SendOpen {
            local_link_id: self.local_link_id,
        });
    }

    fn send_confirm(&mut self) {
        self.outputs.push_back(LinkOutput::SendConfirm {
            local_link_id: self.local_link_id,
            peer_link_id: self.peer_link_id,
        });
    }

    fn send_close(&mut self, reason: ReasonCode) {
        self.outputs.push_back(LinkOutput::SendClose {
            local_link_id: self.local_link_id,
            peer_link_id: self.peer_link_id,
            reason,
        });
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> &BeaconHistory {
        &self.history
    }

    #[cfg(test)]
    pub(crate) fn timer_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Retry => self.timers.retry.is_some(),
            TimerKind::Confirm => self.timers.confirm.is_some(),
            TimerKind::Holding => self.timers.holding.is_some(),
            TimerKind::BeaconLoss => self.timers.beacon_loss.is_some(),
            TimerKind::BeaconMissed => self.timers.beacon_missed.is_some(),
        }
    }
}

impl fmt::Display for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "peer={} state={} local_link_id={} peer_link_id={} aid={}/{}",
            self.peer_addr,
            self.state,
            self.local_link_id,
            self.peer_link_id,
            self.local_aid,
            self.peer_aid
        )
    }
}
