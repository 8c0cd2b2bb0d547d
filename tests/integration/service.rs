//! The engine running as a task, driven only through `EngineHandle`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_test::assert_ok;

use lastclick::autoplay::Disabled;
use lastclick::clock::TokioClock;
use lastclick::events::{EngineEvent, EventKind};
use lastclick::ledger::Ledger;
use lastclick::service::{self, EngineHandle};
use lastclick::types::{Command, DebugCommand, MemberState, RoomId, RoundState};

use crate::harness::{engine, p, SharedLedger};

fn start() -> (EngineHandle, JoinHandle<()>, RoomId, SharedLedger) {
    let (scheduler, room, ledger) = engine(1, Box::new(Disabled));
    let (handle, task) = service::spawn(
        scheduler,
        Duration::from_millis(100),
        Arc::new(TokioClock::starting_at(0)),
    );
    (handle, task, room, ledger)
}

async fn stop(handle: EngineHandle, task: JoinHandle<()>) {
    assert_ok!(handle.shutdown().await);
    assert_ok!(task.await);
}

#[tokio::test(start_paused = true)]
async fn test_round_lifecycle_over_the_handle() {
    let (handle, task, room, _) = start();
    let mut transitions = handle.subscribe_to(&[EventKind::RoundTransition]);
    let mut payouts = handle.subscribe_to(&[EventKind::Payout]);

    for id in 1..=3 {
        assert_ok!(handle.dispatch(Command::join(p(id), room.clone(), 0)).await);
    }
    tokio::time::sleep(Duration::from_millis(5_300)).await;
    assert_ok!(
        handle
            .debug(DebugCommand::ForceLiquidation { room_id: Some(room.clone()) })
            .await
    );
    let snap = assert_ok!(handle.snapshot(room.clone()).await).unwrap();
    assert_eq!(snap.state, RoundState::RoundComplete);
    assert_eq!(snap.top3.len(), 3);

    let mut seen = Vec::new();
    for _ in 0..4 {
        match transitions.recv().await.map(|e| e.event) {
            Some(EngineEvent::RoundTransition(t)) => seen.push((t.from, t.to)),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(
        seen,
        vec![
            (RoundState::WaitingForPlayers, RoundState::Countdown),
            (RoundState::Countdown, RoundState::SurvivalPhase),
            (RoundState::SurvivalPhase, RoundState::Liquidated),
            (RoundState::Liquidated, RoundState::RoundComplete),
        ]
    );

    let paid: Vec<u64> = payouts
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Payout(pay) => Some(pay.amount),
            _ => None,
        })
        .collect();
    assert_eq!(paid, vec![9, 3, 2]);

    stop(handle, task).await;
}

#[tokio::test(start_paused = true)]
async fn test_injected_latency_delays_commands() {
    let (handle, task, room, _) = start();
    assert_ok!(handle.debug(DebugCommand::InjectLatency { lag_ms: 300 }).await);

    for id in 1..=3 {
        assert_ok!(handle.dispatch(Command::join(p(id), room.clone(), 0)).await);
    }
    assert_eq!(assert_ok!(handle.room_of(p(1)).await), None);

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(assert_ok!(handle.room_of(p(1)).await), Some(room.clone()));
    let snap = assert_ok!(handle.snapshot(room).await).unwrap();
    assert_eq!(snap.state, RoundState::Countdown);

    stop(handle, task).await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_joins_respect_the_start_threshold() {
    let (handle, task, room, _) = start();

    let joins: Vec<JoinHandle<()>> = (1..=10)
        .map(|id| {
            let handle = handle.clone();
            let room = room.clone();
            tokio::spawn(async move {
                let _ = handle.dispatch(Command::join(p(id), room, 0)).await;
            })
        })
        .collect();
    for join in joins {
        assert_ok!(join.await);
    }

    // The third seat starts the countdown; later joins are turned away.
    let snap = assert_ok!(handle.snapshot(room.clone()).await).unwrap();
    assert_eq!(snap.state, RoundState::Countdown);
    assert_eq!(snap.total, 3);
    assert_eq!(snap.pool, 15);

    let mut seated = 0;
    for id in 1..=10 {
        if assert_ok!(handle.room_of(p(id)).await).is_some() {
            seated += 1;
        }
    }
    assert_eq!(seated, 3);

    stop(handle, task).await;
}

#[tokio::test(start_paused = true)]
async fn test_broke_player_gets_an_error_event() {
    let (handle, task, room, mut ledger) = start();
    ledger.open_account(p(9), 3);
    let mut errors = handle.subscribe_to(&[EventKind::Error]);

    assert_ok!(handle.dispatch(Command::join(p(9), room.clone(), 0)).await);
    let envelope = errors.recv().await.unwrap();
    match envelope.event {
        EngineEvent::Error(e) => {
            assert_eq!(e.player_id, p(9));
            assert_eq!(e.room_id, Some(room.clone()));
            assert!(e.message.contains("Insufficient"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(assert_ok!(handle.room_of(p(9)).await), None);
    assert_eq!(assert_ok!(handle.balance(p(9)).await).stars, 3);

    stop(handle, task).await;
}

#[tokio::test(start_paused = true)]
async fn test_force_disconnect_then_reconnect() {
    let (handle, task, room, _) = start();
    let mut states = handle.subscribe_to(&[EventKind::MemberState]);

    for id in 1..=3 {
        assert_ok!(handle.dispatch(Command::join(p(id), room.clone(), 0)).await);
    }
    tokio::time::sleep(Duration::from_millis(5_300)).await;

    assert_ok!(handle.debug(DebugCommand::ForceDisconnect { player_id: p(2) }).await);
    assert_ok!(handle.dispatch(Command::reconnect(p(2), room.clone(), 0)).await);

    let mut seen = Vec::new();
    for _ in 0..2 {
        if let Some(EngineEvent::MemberState(m)) = states.recv().await.map(|e| e.event) {
            seen.push((m.player_id, m.state));
        }
    }
    assert_eq!(
        seen,
        vec![(p(2), MemberState::Disconnected), (p(2), MemberState::Active)]
    );

    stop(handle, task).await;
}
