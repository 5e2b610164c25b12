//! Integration tests for the session lifecycle: registry routing, the
//! WAITING → ACTIVE → ENDING → CLOSED machine, tick broadcasts and every
//! way a session can end.
//!
//! Timer-driven tests run on a paused clock, so tick times are exact.

use std::sync::Arc;
use std::time::Duration;

use matchsync_participant::{Outbound, OutboundReceiver, ParticipantHandle};
use matchsync_protocol::{
    MatchConfirmed, MatchId, Outcome, ParticipantState, ServerMessage, StateSnapshot, UserId,
};
use matchsync_session::{SessionConfig, SessionError, SessionOutcome, SessionPhase, SessionRegistry};
use matchsync_transport::ConnectionId;
use tokio::time::Instant;

// =========================================================================
// Helpers
// =========================================================================

const TICK: Duration = Duration::from_millis(100);

fn registry() -> SessionRegistry {
    SessionRegistry::new(SessionConfig::default())
}

/// An authenticated participant with user id `n`.
fn participant(n: i64) -> (Arc<ParticipantHandle>, OutboundReceiver) {
    let (handle, rx) = ParticipantHandle::channel(ConnectionId::new(n as u64));
    handle.assign_identity(UserId(n)).unwrap();
    (Arc::new(handle), rx)
}

fn m(id: &str) -> MatchId {
    MatchId::from(id)
}

async fn recv(rx: &mut OutboundReceiver) -> ServerMessage {
    match rx.recv().await {
        Some(Outbound::Message(msg)) => msg,
        other => panic!("expected a message, got {other:?}"),
    }
}

async fn recv_snapshot(rx: &mut OutboundReceiver) -> StateSnapshot {
    match recv(rx).await {
        ServerMessage::StateSnapshot(s) => s,
        other => panic!("expected StateSnapshot, got {other:?}"),
    }
}

async fn expect_close(rx: &mut OutboundReceiver) {
    assert_eq!(rx.recv().await, Some(Outbound::Close));
}

/// Final sequence every participant gets: snapshot, outcome, close.
async fn expect_ending(rx: &mut OutboundReceiver, success: bool) -> StateSnapshot {
    let snapshot = recv_snapshot(rx).await;
    assert_eq!(recv(rx).await, ServerMessage::Outcome(Outcome { success }));
    expect_close(rx).await;
    snapshot
}

/// Lets spawned tasks (tick loop, registry cleanup) run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn state(snapshot: &StateSnapshot, id: i64) -> ParticipantState {
    *snapshot
        .participants
        .iter()
        .find(|p| p.identity == UserId(id))
        .unwrap_or_else(|| panic!("U-{id} missing from snapshot"))
}

/// Registers two participants in `id` and drains their MatchConfirmed.
async fn active_pair(
    reg: &SessionRegistry,
    id: &str,
) -> (
    (Arc<ParticipantHandle>, OutboundReceiver),
    (Arc<ParticipantHandle>, OutboundReceiver),
) {
    let (a, mut a_rx) = participant(1);
    let (b, mut b_rx) = participant(2);
    reg.register_participant(&a, m(id)).await.unwrap();
    reg.register_participant(&b, m(id)).await.unwrap();
    recv(&mut a_rx).await;
    recv(&mut b_rx).await;
    ((a, a_rx), (b, b_rx))
}

// =========================================================================
// Joining
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_first_join_creates_waiting_session() {
    let reg = registry();
    let (a, mut a_rx) = participant(1);

    let session = reg.register_participant(&a, m("m1")).await.unwrap();

    assert_eq!(session.id(), &m("m1"));
    assert_eq!(session.phase().await, SessionPhase::Waiting);
    assert_eq!(session.participant_count().await, 1);
    assert!(!session.has_ticker().await);
    assert_eq!(reg.len().await, 1);
    assert_eq!(a.session_id(), Some(m("m1")));
    assert!(a_rx.try_recv().is_err(), "nothing is sent while waiting");
}

#[tokio::test(start_paused = true)]
async fn test_second_join_activates_and_confirms_both() {
    let reg = registry();
    let (a, mut a_rx) = participant(1);
    let (b, mut b_rx) = participant(2);

    let first = reg.register_participant(&a, m("m1")).await.unwrap();
    let second = reg.register_participant(&b, m("m1")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.phase().await, SessionPhase::Active);
    assert!(second.has_ticker().await);
    assert_eq!(reg.len().await, 1);

    let expected = ServerMessage::MatchConfirmed(MatchConfirmed {
        match_id: m("m1"),
        starting: true,
        tick_interval_ms: 100,
        participants: vec![UserId(1), UserId(2)],
    });
    assert_eq!(recv(&mut a_rx).await, expected);
    assert_eq!(recv(&mut b_rx).await, expected);
}

#[tokio::test(start_paused = true)]
async fn test_third_join_is_rejected_without_mutation() {
    let reg = registry();
    let ((_a, _a_rx), (_b, _b_rx)) = active_pair(&reg, "m1").await;
    let (c, mut c_rx) = participant(3);

    let result = reg.register_participant(&c, m("m1")).await;

    assert!(matches!(result, Err(SessionError::CapacityExceeded(id)) if id == m("m1")));
    let session = reg.get(&m("m1")).await.unwrap();
    assert_eq!(session.participant_count().await, 2);
    assert_eq!(session.phase().await, SessionPhase::Active);
    assert_eq!(c.session_id(), None);
    assert!(c_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_register_same_handle_twice_is_already_registered() {
    let reg = registry();
    let (a, _a_rx) = participant(1);
    reg.register_participant(&a, m("m1")).await.unwrap();

    let result = reg.register_participant(&a, m("m1")).await;
    assert!(matches!(result, Err(SessionError::AlreadyRegistered(_))));
    assert_eq!(reg.get(&m("m1")).await.unwrap().participant_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_register_into_second_match_is_already_in_session() {
    let reg = registry();
    let (a, _a_rx) = participant(1);
    reg.register_participant(&a, m("m1")).await.unwrap();

    let result = reg.register_participant(&a, m("m2")).await;
    assert!(matches!(result, Err(SessionError::AlreadyInSession(id)) if id == m("m1")));
    assert!(reg.get(&m("m2")).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_register_unidentified_handle_is_rejected() {
    let reg = registry();
    let (handle, _rx) = ParticipantHandle::channel(ConnectionId::new(99));
    let handle = Arc::new(handle);

    let result = reg.register_participant(&handle, m("m1")).await;
    assert!(matches!(result, Err(SessionError::Unidentified)));
    assert!(reg.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_register_concluded_handle_is_disconnected() {
    let reg = registry();
    let ((a, mut a_rx), (_b, _b_rx)) = active_pair(&reg, "m1").await;
    reg.abort(&a).await.unwrap();
    expect_ending(&mut a_rx, false).await;
    assert!(!a.is_alive());
    assert!(a.is_closed());

    let result = reg.register_participant(&a, m("m2")).await;

    assert!(matches!(result, Err(SessionError::Disconnected)));
    assert!(reg.get(&m("m2")).await.is_none());
    assert_eq!(a.session_id(), None);
    assert!(a_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_register_dead_handle_leaves_waiting_session_unchanged() {
    let reg = registry();
    let (a, mut a_rx) = participant(1);
    let session = reg.register_participant(&a, m("m1")).await.unwrap();
    let (b, _b_rx) = participant(2);
    b.mark_dead();

    let result = reg.register_participant(&b, m("m1")).await;

    assert!(matches!(result, Err(SessionError::Disconnected)));
    assert_eq!(session.phase().await, SessionPhase::Waiting);
    assert_eq!(session.participant_count().await, 1);
    assert_eq!(b.session_id(), None);
    assert!(a_rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_create_exactly_one_session() {
    let reg = registry();
    // Keep every outbound queue open so no session ends on its own.
    let mut queues = Vec::new();

    for round in 0..50 {
        let id = format!("race-{round}");
        let (a, a_rx) = participant(1);
        let (b, b_rx) = participant(2);
        queues.push((a_rx, b_rx));

        let ra = reg.clone();
        let ia = m(&id);
        let ta = tokio::spawn(async move { ra.register_participant(&a, ia).await });
        let rb = reg.clone();
        let ib = m(&id);
        let tb = tokio::spawn(async move { rb.register_participant(&b, ib).await });

        let sa = ta.await.unwrap().unwrap();
        let sb = tb.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&sa, &sb), "round {round}: two sessions created");
        assert_eq!(sa.participant_count().await, 2);
        assert_eq!(sa.phase().await, SessionPhase::Active);
    }

    assert_eq!(reg.len().await, 50);
    reg.shutdown().await;
    assert!(reg.is_empty().await);
}

// =========================================================================
// Ticking
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_tick_broadcasts_snapshot_after_interval() {
    let reg = registry();
    let activated = Instant::now();
    let ((_a, mut a_rx), (_b, mut b_rx)) = active_pair(&reg, "m1").await;

    let snap_a = recv_snapshot(&mut a_rx).await;
    assert_eq!(Instant::now() - activated, TICK);
    let snap_b = recv_snapshot(&mut b_rx).await;

    assert_eq!(snap_a, snap_b);
    assert_eq!(snap_a.elapsed_ms, 100);
    assert_eq!(snap_a.participants.len(), 2);
    assert!(snap_a.participants.iter().all(|p| p.alive));
    assert_eq!(snap_a.participants[0].identity, UserId(1));
    assert_eq!(snap_a.participants[1].identity, UserId(2));
}

#[tokio::test(start_paused = true)]
async fn test_ticks_are_sequential_and_elapsed_grows() {
    let reg = registry();
    let ((_a, mut a_rx), (_b, _b_rx)) = active_pair(&reg, "m1").await;

    let elapsed: Vec<u64> = {
        let mut out = Vec::new();
        for _ in 0..4 {
            out.push(recv_snapshot(&mut a_rx).await.elapsed_ms);
        }
        out
    };
    assert_eq!(elapsed, vec![100, 200, 300, 400]);
}

#[tokio::test(start_paused = true)]
async fn test_position_update_appears_in_next_snapshot() {
    let reg = registry();
    let ((a, _a_rx), (_b, mut b_rx)) = active_pair(&reg, "m1").await;

    a.set_position(1.5, 2.0);

    let snapshot = recv_snapshot(&mut b_rx).await;
    let a_state = state(&snapshot, 1);
    assert_eq!((a_state.x, a_state.y), (1.5, 2.0));
}

#[tokio::test(start_paused = true)]
async fn test_closed_outbound_queue_ends_session_on_next_tick() {
    let reg = registry();
    let ((_a, mut a_rx), (b, b_rx)) = active_pair(&reg, "m1").await;
    drop(b_rx);

    // Tick 1 still goes out to A; B's send fails and B is marked dead.
    let first = recv_snapshot(&mut a_rx).await;
    assert!(state(&first, 2).alive, "B was alive when tick 1 was built");
    assert!(!b.is_alive());

    // Tick 2 ends the session.
    let last = expect_ending(&mut a_rx, false).await;
    assert!(state(&last, 1).alive);
    assert!(!state(&last, 2).alive);

    settle().await;
    assert!(reg.is_empty().await);
}

// =========================================================================
// Ending
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_abort_while_active_ends_both() {
    let reg = registry();
    let ((a, mut a_rx), (b, mut b_rx)) = active_pair(&reg, "m1").await;
    let session = reg.get(&m("m1")).await.unwrap();

    reg.abort(&a).await.unwrap();

    let snap_a = expect_ending(&mut a_rx, false).await;
    let snap_b = expect_ending(&mut b_rx, false).await;
    assert_eq!(snap_a, snap_b);
    assert_eq!(session.phase().await, SessionPhase::Closed);
    assert_eq!(session.outcome().await, SessionOutcome::Aborted);
    assert!(!session.has_ticker().await);
    assert_eq!(session.participant_count().await, 0);
    assert!(reg.get(&m("m1")).await.is_none());
    assert_eq!(a.session_id(), None);
    assert_eq!(b.session_id(), None);
}

#[tokio::test(start_paused = true)]
async fn test_abort_while_waiting_ends_single_participant() {
    let reg = registry();
    let (a, mut a_rx) = participant(1);
    let session = reg.register_participant(&a, m("m1")).await.unwrap();

    reg.abort(&a).await.unwrap();

    let snapshot = expect_ending(&mut a_rx, false).await;
    assert_eq!(snapshot.elapsed_ms, 0);
    assert_eq!(snapshot.participants.len(), 1);
    assert_eq!(session.outcome().await, SessionOutcome::Aborted);
    assert!(reg.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_abort_without_session_is_not_in_session() {
    let reg = registry();
    let (a, _a_rx) = participant(1);
    assert!(matches!(reg.abort(&a).await, Err(SessionError::NotInSession)));
}

#[tokio::test(start_paused = true)]
async fn test_no_ticks_after_session_closed() {
    let reg = registry();
    let ((a, mut a_rx), (_b, _b_rx)) = active_pair(&reg, "m1").await;

    reg.abort(&a).await.unwrap();
    expect_ending(&mut a_rx, false).await;

    tokio::time::sleep(TICK * 5).await;
    assert!(a_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_active_notifies_remaining_participant() {
    let reg = registry();
    let ((_a, mut a_rx), (b, _b_rx)) = active_pair(&reg, "m1").await;
    let session = reg.get(&m("m1")).await.unwrap();

    reg.deregister_participant(&b).await;

    let last = expect_ending(&mut a_rx, false).await;
    assert!(state(&last, 1).alive);
    assert!(!state(&last, 2).alive, "lost participant is reported not-alive");
    assert_eq!(session.phase().await, SessionPhase::Closed);
    assert!(reg.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_waiting_removes_empty_session() {
    let reg = registry();
    let (a, mut a_rx) = participant(1);
    let session = reg.register_participant(&a, m("m1")).await.unwrap();

    reg.deregister_participant(&a).await;

    assert!(reg.is_empty().await);
    assert_eq!(session.phase().await, SessionPhase::Closed);
    assert_eq!(session.outcome().await, SessionOutcome::Aborted);
    assert_eq!(a.session_id(), None);
    assert!(a_rx.try_recv().is_err(), "a departed participant is not notified");
}

#[tokio::test(start_paused = true)]
async fn test_deregister_without_session_is_noop() {
    let reg = registry();
    let (a, _a_rx) = participant(1);
    reg.deregister_participant(&a).await;
    reg.deregister_participant(&a).await;
    assert!(reg.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_deregister_after_session_closed_is_noop() {
    let reg = registry();
    let ((a, mut a_rx), (b, _b_rx)) = active_pair(&reg, "m1").await;
    reg.abort(&a).await.unwrap();
    expect_ending(&mut a_rx, false).await;

    reg.deregister_participant(&a).await;
    reg.deregister_participant(&b).await;

    assert!(a_rx.try_recv().is_err());
    assert!(reg.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_mark_completed_reports_success() {
    let reg = registry();
    let ((_a, mut a_rx), (_b, mut b_rx)) = active_pair(&reg, "m1").await;
    let session = reg.get(&m("m1")).await.unwrap();

    reg.mark_completed(&m("m1")).await.unwrap();

    expect_ending(&mut a_rx, true).await;
    expect_ending(&mut b_rx, true).await;
    assert_eq!(session.outcome().await, SessionOutcome::Success);
    assert!(reg.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_mark_completed_while_waiting_is_invalid_phase() {
    let reg = registry();
    let (a, mut a_rx) = participant(1);
    reg.register_participant(&a, m("m1")).await.unwrap();

    let result = reg.mark_completed(&m("m1")).await;

    assert!(matches!(
        result,
        Err(SessionError::InvalidPhase { phase: SessionPhase::Waiting, .. })
    ));
    assert_eq!(reg.len().await, 1);
    assert!(a_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_session_mark_completed_removes_registry_entry() {
    let reg = registry();
    let ((_a, mut a_rx), (_b, _b_rx)) = active_pair(&reg, "m1").await;
    let session = reg.get(&m("m1")).await.unwrap();

    session.mark_completed().await.unwrap();

    expect_ending(&mut a_rx, true).await;
    assert!(reg.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_outcome_is_set_once() {
    let reg = registry();
    let ((_a, mut a_rx), (_b, _b_rx)) = active_pair(&reg, "m1").await;
    let session = reg.get(&m("m1")).await.unwrap();

    session.mark_completed().await.unwrap();
    let second = session.abort().await;

    assert!(matches!(second, Err(SessionError::Closed(_))));
    assert_eq!(session.outcome().await, SessionOutcome::Success);
    expect_ending(&mut a_rx, true).await;
    assert!(a_rx.try_recv().is_err(), "ending is reported exactly once");
}

/// Counts what a closed session left on a participant's queue.
fn endings(rx: &mut OutboundReceiver) -> (usize, usize) {
    let (mut outcomes, mut closes) = (0, 0);
    while let Ok(item) = rx.try_recv() {
        match item {
            Outbound::Message(ServerMessage::Outcome(_)) => outcomes += 1,
            Outbound::Close => closes += 1,
            Outbound::Message(_) => {}
        }
    }
    (outcomes, closes)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_abort_disconnect_and_tick_end_session_once() {
    let reg = SessionRegistry::new(SessionConfig {
        tick_interval_ms: 1,
        ..SessionConfig::default()
    });

    for round in 0..50 {
        let id = format!("end-race-{round}");
        let ((a, mut a_rx), (b, mut b_rx)) = active_pair(&reg, &id).await;
        let session = reg.get(&m(&id)).await.unwrap();

        // A dead participant lets the next tick end the session as well.
        let ticked = {
            let a = Arc::clone(&a);
            tokio::spawn(async move {
                a.mark_dead();
            })
        };
        let aborted = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.abort().await })
        };
        let lost = {
            let reg = reg.clone();
            let b = Arc::clone(&b);
            tokio::spawn(async move { reg.deregister_participant(&b).await })
        };
        ticked.await.unwrap();
        let _ = aborted.await.unwrap();
        lost.await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(session.phase().await, SessionPhase::Closed, "round {round}");
        assert_eq!(session.outcome().await, SessionOutcome::Aborted, "round {round}");
        assert_eq!(endings(&mut a_rx), (1, 1), "round {round}: A");
        assert_eq!(endings(&mut b_rx), (1, 1), "round {round}: B");
        assert!(reg.get(&m(&id)).await.is_none(), "round {round}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_match_id_is_reusable_after_close() {
    let reg = registry();
    let ((a, _a_rx), (_b, _b_rx)) = active_pair(&reg, "m1").await;
    let old = reg.get(&m("m1")).await.unwrap();
    reg.abort(&a).await.unwrap();

    let (c, _c_rx) = participant(3);
    let fresh = reg.register_participant(&c, m("m1")).await.unwrap();

    assert!(!Arc::ptr_eq(&old, &fresh));
    assert_eq!(fresh.phase().await, SessionPhase::Waiting);
    assert_eq!(old.phase().await, SessionPhase::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_every_session() {
    let reg = registry();
    let ((_a, mut a_rx), (_b, _b_rx)) = active_pair(&reg, "m1").await;
    let (c, mut c_rx) = participant(3);
    reg.register_participant(&c, m("m2")).await.unwrap();

    reg.shutdown().await;

    expect_ending(&mut a_rx, false).await;
    expect_ending(&mut c_rx, false).await;
    assert!(reg.is_empty().await);
}
