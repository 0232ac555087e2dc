//! End-to-end scenarios for the peer link state machine: handshakes,
//! retries, teardown paths and the beacon side channel.

use super::event::{LinkOutput, PeerState, ReasonCode};
use super::frame::{BeaconTiming, MeshConfig, NeighborTiming, PeerFrameEvent};
use super::{PeerLink, TimerKind};
use crate::addr::MacAddr;
use crate::config::PeeringConfig;

const PEER: MacAddr = MacAddr::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
const LOCAL_LINK_ID: u16 = 100;
const LOCAL_AID: u16 = 1;

fn link() -> PeerLink {
    PeerLink::new(0, PEER, LOCAL_LINK_ID, LOCAL_AID, PeeringConfig::default())
}

fn open_accept(sender_link_id: u16) -> PeerFrameEvent {
    PeerFrameEvent::OpenAccept {
        sender_link_id,
        config: MeshConfig::default(),
        peer_mesh_addr: PEER,
    }
}

fn confirm_accept(sender_link_id: u16, echoed_link_id: u16) -> PeerFrameEvent {
    PeerFrameEvent::ConfirmAccept {
        sender_link_id,
        echoed_link_id,
        peer_aid: 7,
        config: MeshConfig::default(),
        peer_mesh_addr: PEER,
    }
}

fn close(sender_link_id: u16, echoed_link_id: u16) -> PeerFrameEvent {
    PeerFrameEvent::Close {
        sender_link_id,
        echoed_link_id,
        reason: ReasonCode::PeeringCancelled,
    }
}

fn has_close_with(outputs: &[LinkOutput], want: ReasonCode) -> bool {
    outputs
        .iter()
        .any(|o| matches!(o, LinkOutput::SendClose { reason, .. } if *reason == want))
}

#[test]
fn test_active_handshake_establishes() {
    let mut l = link();

    l.active_open(0);
    assert_eq!(l.state(), PeerState::OpnSnt);
    assert!(l.timer_armed(TimerKind::Retry));
    let outputs = l.drain_outputs();
    assert!(outputs.iter().any(|o| matches!(
        o,
        LinkOutput::SendOpen { local_link_id: LOCAL_LINK_ID }
    )));

    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 1_000);
    assert_eq!(l.state(), PeerState::CnfRcvd);
    assert_eq!(l.peer_link_id(), 55);
    assert_eq!(l.peer_aid(), 7);
    assert!(!l.timer_armed(TimerKind::Retry));
    assert!(l.timer_armed(TimerKind::Confirm));

    l.handle_frame(open_accept(55), 2_000);
    assert!(l.is_established());
    assert!(!l.timer_armed(TimerKind::Confirm));
    let outputs = l.drain_outputs();
    assert!(outputs.iter().any(|o| matches!(
        o,
        LinkOutput::SendConfirm {
            local_link_id: LOCAL_LINK_ID,
            peer_link_id: 55,
        }
    )));
    assert_eq!(l.peer_mesh_addr(), Some(PEER));
}

#[test]
fn test_passive_handshake_establishes() {
    let mut l = link();

    l.handle_frame(open_accept(55), 0);
    assert_eq!(l.state(), PeerState::OpnRcvd);
    assert!(l.timer_armed(TimerKind::Retry));
    let outputs = l.drain_outputs();
    // confirm for their open plus our own open
    assert!(outputs
        .iter()
        .any(|o| matches!(o, LinkOutput::SendConfirm { .. })));
    assert!(outputs
        .iter()
        .any(|o| matches!(o, LinkOutput::SendOpen { .. })));

    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 1_000);
    assert!(l.is_established());
    assert!(!l.timer_armed(TimerKind::Retry));
}

#[test]
fn test_retry_exhaustion_reaches_holding() {
    let mut l = link();
    l.active_open(0);
    l.drain_outputs();

    // with a budget of 4 retries the first four expiries resend the open
    for i in 1..=4u64 {
        assert_eq!(l.next_expired_timer(i * 41_000), Some(TimerKind::Retry));
        l.fire_timer(TimerKind::Retry, i * 41_000);
        assert_eq!(l.state(), PeerState::OpnSnt);
        let outputs = l.drain_outputs();
        assert!(outputs
            .iter()
            .any(|o| matches!(o, LinkOutput::SendOpen { .. })));
    }

    // the fifth expiry exhausts the budget
    l.fire_timer(TimerKind::Retry, 5 * 41_000);
    assert_eq!(l.state(), PeerState::Holding);
    assert!(l.timer_armed(TimerKind::Holding));
    assert!(!l.timer_armed(TimerKind::Retry));
    assert!(has_close_with(&l.drain_outputs(), ReasonCode::MaxRetries));

    l.fire_timer(TimerKind::Holding, 300_000);
    assert_eq!(l.state(), PeerState::Idle);
    assert!(l.is_reclaimable());
}

#[test]
fn test_confirm_timeout_closes() {
    let mut l = link();
    l.active_open(0);
    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 1_000);
    assert_eq!(l.state(), PeerState::CnfRcvd);
    l.drain_outputs();

    l.fire_timer(TimerKind::Confirm, 50_000);
    assert_eq!(l.state(), PeerState::Holding);
    assert!(has_close_with(&l.drain_outputs(), ReasonCode::ConfirmTimeout));
}

#[test]
fn test_close_received_then_holding_cut_short() {
    let mut l = link();
    l.active_open(0);

    l.handle_frame(close(55, LOCAL_LINK_ID), 1_000);
    assert_eq!(l.state(), PeerState::Holding);
    assert!(has_close_with(&l.drain_outputs(), ReasonCode::CloseReceived));

    // a second close ends the holding period without waiting for the timer
    l.handle_frame(close(55, LOCAL_LINK_ID), 2_000);
    assert_eq!(l.state(), PeerState::Idle);
    assert!(!l.timer_armed(TimerKind::Holding));
    assert!(l.is_reclaimable());
}

#[test]
fn test_open_reject_from_opn_snt() {
    let mut l = link();
    l.active_open(0);
    l.handle_frame(
        PeerFrameEvent::OpenReject {
            sender_link_id: 55,
            config: MeshConfig::default(),
            peer_mesh_addr: PEER,
            reason: ReasonCode::PeeringCancelled,
        },
        1_000,
    );
    assert_eq!(l.state(), PeerState::Holding);
    assert!(has_close_with(&l.drain_outputs(), ReasonCode::PeeringCancelled));
}

#[test]
fn test_unlisted_pairs_are_ignored() {
    let mut l = link();
    l.active_open(0);
    l.drain_outputs();

    // a second active open in OPN_SNT is not a listed transition
    l.active_open(1_000);
    assert_eq!(l.state(), PeerState::OpnSnt);
    assert!(l.drain_outputs().is_empty());

    // a duplicate confirm in CNF_RCVD does nothing
    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 2_000);
    l.drain_outputs();
    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 3_000);
    assert_eq!(l.state(), PeerState::CnfRcvd);
    assert!(l.drain_outputs().is_empty());
}

#[test]
fn test_stale_link_identifiers_drop_frames() {
    let mut l = link();
    l.active_open(0);
    l.drain_outputs();

    // confirm echoing a foreign link identifier
    l.handle_frame(confirm_accept(55, 999), 1_000);
    assert_eq!(l.state(), PeerState::OpnSnt);

    // adopt 55, then a close presenting a different sender identifier
    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 2_000);
    assert_eq!(l.state(), PeerState::CnfRcvd);
    l.handle_frame(close(66, LOCAL_LINK_ID), 3_000);
    assert_eq!(l.state(), PeerState::CnfRcvd);

    // close echoing the unknown sentinel is accepted
    l.handle_frame(close(55, 0), 4_000);
    assert_eq!(l.state(), PeerState::Holding);
}

#[test]
fn test_mesh_addr_conflict_closes_link() {
    let mut l = link();
    l.active_open(0);
    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 1_000);
    assert_eq!(l.peer_mesh_addr(), Some(PEER));
    l.drain_outputs();

    let other = MacAddr::new([0x02, 0xde, 0xad, 0xbe, 0xef, 0x01]);
    l.handle_frame(
        PeerFrameEvent::OpenAccept {
            sender_link_id: 55,
            config: MeshConfig::default(),
            peer_mesh_addr: other,
        },
        2_000,
    );
    assert_eq!(l.state(), PeerState::Holding);
    assert!(has_close_with(&l.drain_outputs(), ReasonCode::InvalidParameters));
    // the original binding is kept
    assert_eq!(l.peer_mesh_addr(), Some(PEER));
}

#[test]
fn test_holding_answers_opens_with_close() {
    let mut l = link();
    l.active_open(0);
    l.handle_frame(close(55, LOCAL_LINK_ID), 1_000);
    assert_eq!(l.state(), PeerState::Holding);
    l.drain_outputs();

    l.handle_frame(open_accept(55), 2_000);
    assert_eq!(l.state(), PeerState::Holding);
    assert!(has_close_with(&l.drain_outputs(), ReasonCode::PeeringCancelled));
}

#[test]
fn test_request_reject_sends_close_from_idle() {
    let mut l = link();
    l.request_reject(0);
    assert_eq!(l.state(), PeerState::Idle);
    assert!(has_close_with(&l.drain_outputs(), ReasonCode::PeeringCancelled));
}

#[test]
fn test_beacon_loss_cancels_peering() {
    let mut l = link();
    l.active_open(0);
    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 1_000);
    l.handle_frame(open_accept(55), 2_000);
    assert!(l.is_established());
    l.drain_outputs();

    // interval 102.4 ms, loss limit 2 -> deadline at +204.8 ms
    l.set_beacon_information(1_000_000, 102_400);
    assert!(l.timer_armed(TimerKind::BeaconLoss));
    assert_eq!(l.next_expired_timer(1_204_799), None);
    assert_eq!(
        l.next_expired_timer(1_204_800),
        Some(TimerKind::BeaconLoss)
    );

    l.fire_timer(TimerKind::BeaconLoss, 1_204_800);
    assert_eq!(l.state(), PeerState::Holding);
    assert!(has_close_with(&l.drain_outputs(), ReasonCode::PeeringCancelled));
    // entering holding cancelled the remaining timers
    assert!(!l.timer_armed(TimerKind::BeaconLoss));
    assert!(!l.timer_armed(TimerKind::Retry));
}

#[test]
fn test_zero_interval_arms_no_beacon_timers() {
    let mut l = link();
    // no interval advertised yet: nothing to expect a beacon against
    l.set_beacon_information(1_000_000, 0);
    assert!(!l.timer_armed(TimerKind::BeaconLoss));
    l.update_beacon_received(1_000_000);
    assert!(!l.timer_armed(TimerKind::BeaconMissed));
    assert_eq!(l.next_expired_timer(u64::MAX), None);

    // an armed missed timer stops re-arming once the interval drops to
    // zero, so the owner's timer poll keeps terminating
    l.set_beacon_information(2_000_000, 102_400);
    l.update_beacon_received(2_000_000);
    assert!(l.timer_armed(TimerKind::BeaconMissed));
    l.set_beacon_information(3_000_000, 0);
    l.fire_timer(TimerKind::BeaconMissed, 3_000_000);
    assert!(!l.timer_armed(TimerKind::BeaconMissed));
    assert_eq!(l.next_expired_timer(u64::MAX), None);
}

#[test]
fn test_missed_beacons_degrade_fail_avg() {
    // loss limit high enough that only the missed timer is in play
    let cfg = PeeringConfig {
        max_beacon_loss: 5,
        ..PeeringConfig::default()
    };
    let mut l = PeerLink::new(0, PEER, LOCAL_LINK_ID, LOCAL_AID, cfg);
    l.set_beacon_information(1_000_000, 102_400);
    l.update_beacon_received(1_000_000);
    let outputs = l.drain_outputs();
    assert!(outputs
        .iter()
        .any(|o| matches!(o, LinkOutput::FailAvg(avg) if *avg == 0.0)));
    // expected within interval plus 35 ms tolerance
    assert_eq!(l.next_expired_timer(1_137_399), None);
    assert_eq!(
        l.next_expired_timer(1_137_400),
        Some(TimerKind::BeaconMissed)
    );

    l.fire_timer(TimerKind::BeaconMissed, 1_137_400);
    let outputs = l.drain_outputs();
    // one miss in a 20-beacon window: 1 - (19 * 20) / 400
    assert!(outputs
        .iter()
        .any(|o| matches!(o, LinkOutput::FailAvg(avg) if (*avg - 0.05).abs() < 1e-9)));
    // re-armed a bare interval ahead
    assert_eq!(
        l.next_expired_timer(1_239_800),
        Some(TimerKind::BeaconMissed)
    );
}

#[test]
fn test_beacon_reception_reconciles_remote_report() {
    let mut l = link();
    // learn our association identifier from the peer's confirm
    l.active_open(0);
    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 1_000);
    l.drain_outputs();

    let interval_us = 102_400u64; // 400 TU
    let now = 10_000_000u64;
    l.set_beacon_information(now, interval_us);
    l.set_beacon_timing(BeaconTiming {
        entries: vec![NeighborTiming {
            aid: 7,
            last_beacon_tu: (now >> 8) as u16,
            interval: 100, // 4-TU units -> 400 TU
        }],
    });
    l.update_beacon_received(now);
    // first report on a new link: one reverse reception, none missed
    assert_eq!(l.history().missed_beacons(), 0);
    assert_eq!(l.history().reverse_bits() & 0x1, 1);
    assert_eq!(l.history().remote_interval_tu(), 400);
    assert!(l
        .drain_outputs()
        .iter()
        .any(|o| matches!(o, LinkOutput::FailAvg(avg) if *avg == 0.0)));
}

#[test]
fn test_beacon_without_our_entry_counts_reverse_misses() {
    let mut l = link();
    l.active_open(0);
    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 1_000);
    l.drain_outputs();

    let interval_us = 102_400u64;
    let now = 10_000_000u64;
    l.set_beacon_information(now, interval_us);
    l.set_beacon_timing(BeaconTiming {
        entries: vec![NeighborTiming {
            aid: 7,
            last_beacon_tu: (now >> 8) as u16,
            interval: 100,
        }],
    });
    l.update_beacon_received(now);
    assert_eq!(l.history().reverse_bits() & 0x1, 1);

    // next beacon's timing element no longer mentions us: every local
    // expectation since the last report counts as a reverse miss
    let later = now + interval_us;
    l.set_beacon_information(later, interval_us);
    l.set_beacon_timing(BeaconTiming::default());
    l.update_beacon_received(later);
    assert_eq!(l.history().reverse_bits() & 0x1, 0);
    // one miss in the 20-beacon reverse window against a full forward one
    assert!(l
        .drain_outputs()
        .iter()
        .any(|o| matches!(o, LinkOutput::FailAvg(avg) if (*avg - 0.05).abs() < 1e-9)));
}

#[test]
fn test_transmission_failures_cancel_peering() {
    let mut l = link();
    l.active_open(0);
    l.handle_frame(confirm_accept(55, LOCAL_LINK_ID), 1_000);
    l.handle_frame(open_accept(55), 2_000);
    assert!(l.is_established());
    l.drain_outputs();

    l.transmission_failure(3_000);
    assert!(l.is_established());
    // a success resets the failure run
    l.transmission_success();
    l.transmission_failure(4_000);
    assert!(l.is_established());
    l.transmission_failure(5_000);
    assert_eq!(l.state(), PeerState::Holding);
    assert!(has_close_with(&l.drain_outputs(), ReasonCode::PeeringCancelled));
}

#[test]
fn test_state_changes_are_reported() {
    let mut l = link();
    l.active_open(0);
    let outputs = l.drain_outputs();
    assert!(outputs.iter().any(|o| matches!(
        o,
        LinkOutput::StateChange {
            from: PeerState::Idle,
            to: PeerState::OpnSnt,
            ..
        }
    )));
}
