//! meshpeer: neighbor peering and link quality for wireless mesh nodes.
//!
//! Implements the peer management protocol (open/confirm/close handshake
//! with retry, confirm and holding timers), bidirectional beacon
//! reception accounting, and the link metrics built on top of it: the
//! airtime cost and an ETX estimate from link probes.

pub mod addr;
pub mod config;
pub mod metric;
pub mod peering;

// Re-export address types
pub use addr::{AddrParseError, MacAddr};

// Re-export config types
pub use config::{Config, ConfigError, FailureSource, InterfaceConfig, MetricConfig, PeeringConfig};

// Re-export peering types
pub use peering::event::{LinkOutput, PeerState, ReasonCode};
pub use peering::frame::{BeaconTiming, MeshConfig, NeighborTiming, PeerFrameEvent};
pub use peering::{PeerLink, PeerLinkTable};

// Re-export metric types
pub use metric::{AirtimeMetric, Bitrate, EtxTracker, PhyInfo, ETX_MAX};
