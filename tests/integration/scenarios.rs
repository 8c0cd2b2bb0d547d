//! End-to-end round scenarios driven through the scheduler's public API.

use lastclick::autoplay::{Disabled, SkillBots};
use lastclick::engine::scheduler::Scheduler;
use lastclick::events::{EngineEvent, EventKind};
use lastclick::types::{Command, DebugCommand, MemberState, RoomId, RoundState};

use crate::harness::{engine, p, ScriptedBots, START_STARS};

const STEP: i64 = 100;

/// Advance from `from` (exclusive) to `to` (inclusive) in 100 ms steps,
/// calling `before` ahead of each step.
fn run(s: &mut Scheduler, from: i64, to: i64, mut before: impl FnMut(&mut Scheduler, i64)) {
    let mut t = from;
    while t < to {
        t += STEP;
        before(s, t);
        s.advance(t);
    }
}

fn state(s: &Scheduler, room: &RoomId) -> RoundState {
    s.room(room).unwrap().state()
}

#[test]
fn test_tier1_three_players_two_never_pulse() {
    let (mut s, room, ledger) = engine(1, Box::new(Disabled));
    let mut events = s.subscribe();
    s.advance(0);

    for id in 1..=3 {
        s.dispatch(Command::join(p(id), room.clone(), 0), 0);
    }
    assert_eq!(state(&s, &room), RoundState::Countdown);
    assert_eq!(s.room(&room).unwrap().pool(), 15);
    for id in 1..=3 {
        assert_eq!(s.balance(p(id)).stars, START_STARS - 5);
    }

    run(&mut s, 0, 5_000, |_, _| {});
    assert_eq!(state(&s, &room), RoundState::SurvivalPhase);
    assert_eq!(s.room(&room).unwrap().timer_ms(), 120_000);

    run(&mut s, 5_000, 10_100, |s, t| {
        if t % 1_000 == 0 {
            s.dispatch(Command::pulse(p(1), room.clone(), t), t);
        }
    });
    assert_eq!(state(&s, &room), RoundState::RoundComplete);

    let r = s.room(&room).unwrap();
    assert_eq!(r.winner_id(), Some(p(1)));
    assert_eq!(r.member(p(1)).unwrap().state, MemberState::Winner);
    assert_eq!(s.balance(p(1)).stars, START_STARS - 5 + 9);
    for id in 2..=3 {
        assert_eq!(s.balance(p(id)).shards, 2);
        assert_eq!(r.member(p(id)).unwrap().eliminated_at_ms, Some(10_100));
    }

    // Both eliminations land in the same step, ahead of the completion.
    let tail: Vec<EventKind> = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e.kind(), EventKind::Elimination | EventKind::RoundTransition))
        .map(|e| e.kind())
        .collect();
    let n = tail.len();
    assert_eq!(
        &tail[n - 3..],
        &[EventKind::Elimination, EventKind::Elimination, EventKind::RoundTransition]
    );
    assert_eq!(ledger.star_credits(), 3);
}

#[test]
fn test_forced_liquidation_eliminates_everyone_at_once() {
    let bots = ScriptedBots {
        count: 6,
        step_ms: 100,
        skill: 0.8,
        pulse_after_ms: 1_000,
    };
    let (mut s, room, ledger) = engine(2, Box::new(bots));
    let mut events = s.subscribe();
    s.advance(0);
    s.dispatch(Command::join(p(1), room.clone(), 0), 0);

    // Four bots are enough to reach the tier-2 minimum of five.
    run(&mut s, 0, 400, |_, _| {});
    assert_eq!(state(&s, &room), RoundState::Countdown);
    assert_eq!(s.room(&room).unwrap().member_count(), 5);
    assert_eq!(s.pending_timers(), 0, "remaining bot joins cancelled");

    run(&mut s, 400, 5_400, |_, _| {});
    assert_eq!(state(&s, &room), RoundState::SurvivalPhase);
    events.drain();

    s.debug(DebugCommand::ForceLiquidation { room_id: None }, 5_450);
    let r = s.room(&room).unwrap();
    assert_eq!(r.state(), RoundState::RoundComplete);
    assert!(r.members().all(|m| m.eliminated_at_ms == Some(5_450)));

    let drained = events.drain();
    let transitions: Vec<(RoundState, RoundState)> = drained
        .iter()
        .filter_map(|e| match e {
            EngineEvent::RoundTransition(t) => Some((t.from, t.to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (RoundState::SurvivalPhase, RoundState::Liquidated),
            (RoundState::Liquidated, RoundState::RoundComplete),
        ]
    );
    let eliminated = drained.iter().filter(|e| e.kind() == EventKind::Elimination).count();
    assert_eq!(eliminated, 5);

    // Ties on survival time fall back to ascending id: the human ranks first.
    assert_eq!(r.winner_id(), Some(p(1)));
    assert_eq!(ledger.star_credits(), 3);
}

#[test]
fn test_reconnect_after_lapsed_window_eliminates() {
    let (mut s, room, _) = engine(2, Box::new(Disabled));
    s.advance(0);
    for id in 1..=5 {
        s.dispatch(Command::join(p(id), room.clone(), 0), 0);
    }
    run(&mut s, 0, 5_000, |_, _| {});
    assert_eq!(state(&s, &room), RoundState::SurvivalPhase);

    s.dispatch(Command::disconnect(p(5), room.clone(), 5_500), 5_500);
    // Keep the others alive while player 5 is away.
    run(&mut s, 5_000, 8_900, |s, t| {
        if t % 1_000 == 0 {
            for id in 1..=4 {
                s.dispatch(Command::pulse(p(id), room.clone(), t), t);
            }
        }
    });
    // The tick-time check already enforces the deadline for the absent.
    assert_eq!(
        s.room(&room).unwrap().member(p(5)).unwrap().state,
        MemberState::Disconnected
    );

    s.dispatch(Command::reconnect(p(5), room.clone(), 9_050), 9_050);
    let r = s.room(&room).unwrap();
    assert_eq!(r.member(p(5)).unwrap().state, MemberState::Eliminated);
    assert_eq!(r.alive_count(), 4);
    assert_eq!(r.state(), RoundState::SurvivalPhase);
}

#[test]
fn test_pulse_after_deadline_is_not_a_cure() {
    let (mut s, room, _) = engine(1, Box::new(Disabled));
    s.advance(0);
    for id in 1..=3 {
        s.dispatch(Command::join(p(id), room.clone(), 0), 0);
    }
    run(&mut s, 0, 5_000, |_, _| {});
    run(&mut s, 5_000, 10_000, |s, t| {
        if t == 9_000 {
            s.dispatch(Command::pulse(p(1), room.clone(), t), t);
        }
    });

    // At exactly the deadline the tick keeps player 2.
    assert_eq!(
        s.room(&room).unwrap().member(p(2)).unwrap().state,
        MemberState::Active
    );
    s.dispatch(Command::pulse(p(2), room.clone(), 10_001), 10_001);
    assert_eq!(
        s.room(&room).unwrap().member(p(2)).unwrap().state,
        MemberState::Eliminated
    );
}

#[test]
fn test_join_only_while_waiting_and_never_past_capacity() {
    let bots = ScriptedBots {
        count: 40,
        step_ms: 10,
        skill: 0.5,
        pulse_after_ms: 500,
    };
    let (mut s, room, _) = engine(1, Box::new(bots));
    s.advance(0);
    s.dispatch(Command::join(p(1), room.clone(), 0), 0);

    let max = s.room(&room).unwrap().tier().max_players;
    run(&mut s, 0, 1_000, |s, _| {
        assert!(s.room(&room).unwrap().member_count() <= max);
    });
    assert_eq!(state(&s, &room), RoundState::Countdown);
    assert_eq!(s.room(&room).unwrap().member_count(), 3);

    s.dispatch(Command::join(p(2), room.clone(), 1_000), 1_000);
    assert!(s.room_of(p(2)).is_none());
    assert!(s.room(&room).unwrap().member(p(2)).is_none());
}

#[test]
fn test_completed_round_pays_once() {
    let (mut s, room, ledger) = engine(1, Box::new(Disabled));
    s.advance(0);
    for id in 1..=3 {
        s.dispatch(Command::join(p(id), room.clone(), 0), 0);
    }
    s.debug(DebugCommand::ForceCountdownEnd { room_id: Some(room.clone()) }, 0);
    s.advance(100);
    s.debug(DebugCommand::ForceLiquidation { room_id: Some(room.clone()) }, 200);
    let balances: Vec<_> = (1..=3).map(|id| s.balance(p(id))).collect();
    let ops = ledger.ops().len();

    // Repeat liquidation requests and idle ticks before the reset.
    s.debug(DebugCommand::ForceLiquidation { room_id: None }, 300);
    run(&mut s, 200, 10_000, |_, _| {});
    assert_eq!(state(&s, &room), RoundState::RoundComplete);
    assert_eq!(ledger.ops().len(), ops);
    let after: Vec<_> = (1..=3).map(|id| s.balance(p(id))).collect();
    assert_eq!(balances, after);
}

#[test]
fn test_leave_during_countdown_forfeits_fee_and_purges_at_reset() {
    let (mut s, room, _) = engine(1, Box::new(Disabled));
    s.advance(0);
    for id in 1..=4 {
        // The fourth join arrives after the countdown started and is dropped.
        s.dispatch(Command::join(p(id), room.clone(), 0), 0);
    }
    s.dispatch(Command::leave(p(3), room.clone(), 1_000), 1_000);
    assert!(s.room_of(p(3)).is_none());
    assert_eq!(s.balance(p(3)).stars, START_STARS - 5);
    assert_eq!(s.room(&room).unwrap().pool(), 15);

    run(&mut s, 0, 5_000, |_, _| {});
    s.debug(DebugCommand::ForceLiquidation { room_id: None }, 5_050);
    assert_eq!(s.balance(p(3)).shards, 2);

    // Reset after the delay drops the leaver; two remain, so the room waits.
    run(&mut s, 5_000, 20_100, |_, _| {});
    let r = s.room(&room).unwrap();
    assert_eq!(r.state(), RoundState::WaitingForPlayers);
    assert!(r.member(p(3)).is_none());
    assert_eq!(r.member_count(), 2);
    assert_eq!(r.round(), 2);
}

#[test]
fn test_skill_bots_play_full_rounds() {
    let (mut s, room, _) = engine(1, Box::new(SkillBots::new(8, 500, 500, 99)));
    let mut events = s.subscribe();
    s.advance(0);
    s.dispatch(Command::join(p(1), room.clone(), 0), 0);

    run(&mut s, 0, 150_000, |s, t| {
        if t % 2_000 == 0 {
            s.dispatch(Command::pulse(p(1), room.clone(), t), t);
        }
    });

    let drained = events.drain();
    let completed = drained
        .iter()
        .filter(|e| matches!(e, EngineEvent::RoundTransition(t) if t.to == RoundState::RoundComplete))
        .count();
    assert!(completed >= 1, "a round must finish within the survival time");

    for e in &drained {
        if let EngineEvent::Tick(tick) = e {
            assert!(tick.margin_ratio >= 0.01 && tick.margin_ratio <= 1.0);
            assert!(tick.timer_ms >= 0);
        }
    }

    // The first round seats at most nine players at 5 stars each.
    let paid: u64 = drained
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Payout(pay) => Some(pay.amount),
            _ => None,
        })
        .take(3)
        .sum();
    assert!(paid <= 45);

    assert!(s.room(&room).unwrap().members().filter(|m| m.is_bot()).count() <= 8);
}

#[test]
fn test_latency_change_mid_round_keeps_player_order() {
    let (mut s, room, _) = engine(1, Box::new(Disabled));
    s.advance(0);
    for id in 1..=3 {
        s.dispatch(Command::join(p(id), room.clone(), 0), 0);
    }
    run(&mut s, 0, 5_000, |_, _| {});

    s.debug(DebugCommand::InjectLatency { lag_ms: 3_000 }, 5_000);
    s.dispatch(Command::pulse(p(1), room.clone(), 5_000), 5_000);
    s.debug(DebugCommand::InjectLatency { lag_ms: 0 }, 5_000);
    s.dispatch(Command::leave(p(1), room.clone(), 5_100), 5_100);

    run(&mut s, 5_000, 7_900, |_, _| {});
    let member = s.room(&room).unwrap().member(p(1)).unwrap();
    assert_eq!(member.state, MemberState::Active);
    assert_eq!(member.pulse_count, 0);

    // The queued pulse lands first, then the leave behind it.
    s.advance(8_000);
    let member = s.room(&room).unwrap().member(p(1)).unwrap();
    assert_eq!(member.pulse_count, 1);
    assert_eq!(member.state, MemberState::Eliminated);
    assert!(s.room_of(p(1)).is_none());
    assert_eq!(s.room(&room).unwrap().state(), RoundState::SurvivalPhase);
}
