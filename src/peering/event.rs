//! Peering states, events, reason codes and owner-visible outputs.

use crate::addr::MacAddr;
use std::fmt;

/// Peer link state, as named by the peering protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// No peering activity; a link in this state may be reclaimed.
    Idle,
    /// We sent an Open and are waiting for the peer's Confirm.
    OpnSnt,
    /// Confirm received; waiting for the peer's Open.
    CnfRcvd,
    /// Open received; Confirm and Open sent, waiting for the peer's Confirm.
    OpnRcvd,
    /// Peering established in both directions.
    Estab,
    /// Graceful teardown before returning to idle.
    Holding,
}

impl PeerState {
    /// True when the link is usable by the routing layer.
    pub fn is_established(&self) -> bool {
        matches!(self, PeerState::Estab)
    }

    /// True when the link holds no peering state.
    pub fn is_idle(&self) -> bool {
        matches!(self, PeerState::Idle)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::Idle => "IDLE",
            PeerState::OpnSnt => "OPN_SNT",
            PeerState::CnfRcvd => "CNF_RCVD",
            PeerState::OpnRcvd => "OPN_RCVD",
            PeerState::Estab => "ESTAB",
            PeerState::Holding => "HOLDING",
        };
        write!(f, "{}", s)
    }
}

/// Events driving the peer link state machine.
///
/// Frame-derived events are produced by the inbound handlers after link
/// identifier reconciliation; timeout events by the owner's timer poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PeerEvent {
    /// Cancel the peering (beacon loss, transmission failures, or request).
    Cancel,
    /// Actively open the peering toward the neighbor.
    ActiveOpen,
    /// A peering Close frame was accepted.
    CloseAccept,
    /// A peering Open frame was accepted.
    OpenAccept,
    /// A peering Open frame was rejected by the peer.
    OpenReject,
    /// An inbound peering request was rejected locally.
    RequestReject,
    /// A peering Confirm frame was accepted.
    ConfirmAccept,
    /// A peering Confirm frame was rejected by the peer.
    ConfirmReject,
    /// Retry timer fired with retries remaining.
    RetryTimeout,
    /// Retry timer fired with the retry budget exhausted.
    RetriesExhausted,
    /// Confirm timer fired.
    ConfirmTimeout,
    /// Holding timer fired.
    HoldingTimeout,
}

/// Reason codes carried by peering Close frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ReasonCode {
    /// No specific reason.
    Reserved = 0,
    /// Peering cancelled by the local entity.
    PeeringCancelled = 2,
    /// A Close frame was received from the peer.
    CloseReceived = 3,
    /// The maximum number of Open retries was reached.
    MaxRetries = 4,
    /// The confirm timer expired.
    ConfirmTimeout = 5,
    /// Inbound frame carried parameters inconsistent with link state.
    InvalidParameters = 6,
}

impl ReasonCode {
    /// Convert to the wire representation.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Try to convert from the wire representation.
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(ReasonCode::Reserved),
            2 => Some(ReasonCode::PeeringCancelled),
            3 => Some(ReasonCode::CloseReceived),
            4 => Some(ReasonCode::MaxRetries),
            5 => Some(ReasonCode::ConfirmTimeout),
            6 => Some(ReasonCode::InvalidParameters),
            _ => None,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasonCode::Reserved => "reserved",
            ReasonCode::PeeringCancelled => "peering_cancelled",
            ReasonCode::CloseReceived => "close_received",
            ReasonCode::MaxRetries => "max_retries",
            ReasonCode::ConfirmTimeout => "confirm_timeout",
            ReasonCode::InvalidParameters => "invalid_parameters",
        };
        write!(f, "{}", s)
    }
}

/// Records emitted by a peer link for its owner to drain.
///
/// Frame intents are serialized and transmitted by the management-frame
/// codec; state changes and failure averages feed the owning interface.
/// This replaces inline upward callbacks so the state machine stays a
/// pure, independently testable unit.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkOutput {
    /// Send a peering Open frame carrying our link identifier.
    SendOpen { local_link_id: u16 },
    /// Send a peering Confirm frame carrying both link identifiers.
    SendConfirm { local_link_id: u16, peer_link_id: u16 },
    /// Send a peering Close frame with the given reason.
    SendClose {
        local_link_id: u16,
        peer_link_id: u16,
        reason: ReasonCode,
    },
    /// The link changed state (or re-confirmed its state for same-state
    /// protocol events).
    StateChange {
        peer_addr: MacAddr,
        peer_mesh_addr: Option<MacAddr>,
        from: PeerState,
        to: PeerState,
    },
    /// Freshly computed beacon failure average for this neighbor.
    FailAvg(f64),
}
