//! Decoded management-frame events delivered to a peer link.
//!
//! Byte-level encoding and decoding of management frames is owned by an
//! external codec. The codec hands us the fields a link cares about: the
//! sender's link identifier, an echo of ours where the frame type carries
//! one, the opaque configuration payload and the sender's mesh-point
//! address. Link identifier 0 means "not yet known" on the wire.

use super::event::ReasonCode;
use crate::addr::MacAddr;

/// Opaque mesh configuration payload carried by Open and Confirm frames.
///
/// Contents are produced and consumed by the frame codec and the profile
/// negotiation above us; a peer link only stores the most recent copy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshConfig(pub Vec<u8>);

/// A decoded inbound peering management frame, classified by the
/// accept/reject decision of the peering protocol above the link.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerFrameEvent {
    /// Open frame, accepted.
    OpenAccept {
        /// The sender's local link identifier.
        sender_link_id: u16,
        config: MeshConfig,
        peer_mesh_addr: MacAddr,
    },
    /// Open frame, rejected by the peer.
    OpenReject {
        sender_link_id: u16,
        config: MeshConfig,
        peer_mesh_addr: MacAddr,
        reason: ReasonCode,
    },
    /// Confirm frame, accepted.
    ConfirmAccept {
        sender_link_id: u16,
        /// Echo of our link identifier, as seen by the sender.
        echoed_link_id: u16,
        /// Association identifier the peer assigned to us.
        peer_aid: u16,
        config: MeshConfig,
        peer_mesh_addr: MacAddr,
    },
    /// Confirm frame, rejected by the peer.
    ConfirmReject {
        sender_link_id: u16,
        echoed_link_id: u16,
        config: MeshConfig,
        peer_mesh_addr: MacAddr,
        reason: ReasonCode,
    },
    /// Close frame.
    Close {
        sender_link_id: u16,
        /// Echo of our link identifier; 0 when the sender never learned it.
        echoed_link_id: u16,
        reason: ReasonCode,
    },
}

/// Timing record for one neighbor inside a received beacon's timing
/// element: when that neighbor last heard a beacon from each station it
/// tracks, keyed by association identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborTiming {
    /// Association identifier of the tracked station (0 = unassigned).
    pub aid: u16,
    /// Arrival time of that station's last beacon, in 256 us time units,
    /// truncated to 16 bits.
    pub last_beacon_tu: u16,
    /// That station's beacon interval in 4-TU (1.024 ms) units, as the
    /// timing element compresses it.
    pub interval: u16,
}

/// The beacon timing element of a received beacon: the neighbor's view of
/// every station it hears, ours included.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BeaconTiming {
    pub entries: Vec<NeighborTiming>,
}

impl BeaconTiming {
    /// Find the entry describing our own beacons, by the association
    /// identifier the peer assigned to us. Entries with aid 0 are skipped.
    pub fn entry_for_aid(&self, aid: u16) -> Option<&NeighborTiming> {
        self.entries
            .iter()
            .find(|e| e.aid != 0 && e.aid == aid)
    }
}
