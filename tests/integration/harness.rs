//! Test doubles for integration testing.
//!
//! Provides a `Ledger` whose state stays inspectable after the scheduler
//! takes ownership of it, and a deterministic `AutoplayStrategy`. Both are
//! in-memory with no external dependencies.

use std::sync::{Arc, Mutex};

use rust_decimal_macros::dec;

use lastclick::autoplay::{AutoplayStrategy, BotJoinPlan, BotTurn};
use lastclick::engine::scheduler::{Scheduler, SchedulerSettings};
use lastclick::events::EventBus;
use lastclick::ledger::{Balance, InMemoryLedger, Ledger, LedgerError};
use lastclick::tiers::TierConfig;
use lastclick::types::{PlayerId, RoomId, RoomKind};

pub const START_STARS: u64 = 500;

/// A ledger operation, as recorded by [`SharedLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    Debit(PlayerId, u64),
    CreditStars(PlayerId, u64),
    CreditShards(PlayerId, u64),
}

/// A ledger shared between the scheduler and the test.
///
/// Every mutation is recorded so tests can count payouts and credits.
#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<InMemoryLedger>>,
    ops: Arc<Mutex<Vec<LedgerOp>>>,
}

impl SharedLedger {
    pub fn new(starting_stars: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryLedger::new(starting_stars))),
            ops: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn ops(&self) -> Vec<LedgerOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn star_credits(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, LedgerOp::CreditStars(..)))
            .count()
    }

    fn record(&self, op: LedgerOp) {
        self.ops.lock().unwrap().push(op);
    }
}

impl Ledger for SharedLedger {
    fn balance(&self, player: PlayerId) -> Balance {
        self.inner.lock().unwrap().balance(player)
    }

    fn debit_stars(&mut self, player: PlayerId, amount: u64) -> Result<Balance, LedgerError> {
        let balance = self.inner.lock().unwrap().debit_stars(player, amount)?;
        self.record(LedgerOp::Debit(player, amount));
        Ok(balance)
    }

    fn credit_stars(&mut self, player: PlayerId, amount: u64) -> Balance {
        self.record(LedgerOp::CreditStars(player, amount));
        self.inner.lock().unwrap().credit_stars(player, amount)
    }

    fn credit_shards(&mut self, player: PlayerId, amount: u64) -> Balance {
        self.record(LedgerOp::CreditShards(player, amount));
        self.inner.lock().unwrap().credit_shards(player, amount)
    }

    fn open_account(&mut self, player: PlayerId, stars: u64) {
        self.inner.lock().unwrap().open_account(player, stars);
    }
}

/// Deterministic bots: a fixed number join at fixed intervals, all with
/// the same skill, and each pulses once `pulse_after_ms` has passed.
pub struct ScriptedBots {
    pub count: usize,
    pub step_ms: i64,
    pub skill: f64,
    pub pulse_after_ms: i64,
}

impl AutoplayStrategy for ScriptedBots {
    fn plan_fill(&mut self, tier: &TierConfig, seated: usize) -> Vec<BotJoinPlan> {
        let count = self.count.min(tier.max_players.saturating_sub(seated));
        (1..=count as i64)
            .map(|i| BotJoinPlan {
                delay_ms: i * self.step_ms,
                skill: self.skill,
            })
            .collect()
    }

    fn should_pulse(&mut self, turn: &BotTurn) -> bool {
        turn.since_pulse_ms >= self.pulse_after_ms
    }
}

pub fn settings() -> SchedulerSettings {
    SchedulerSettings {
        countdown_ms: 5_000,
        round_complete_delay_ms: 15_000,
        shard_rate: dec!(0.5),
        bot_starting_stars: 1_000,
        seed: 2024,
    }
}

/// Scheduler with one room of the given tier and a shared ledger.
pub fn engine(
    tier: u8,
    autoplay: Box<dyn AutoplayStrategy>,
) -> (Scheduler, RoomId, SharedLedger) {
    let ledger = SharedLedger::new(START_STARS);
    let mut scheduler = Scheduler::new(
        settings(),
        Box::new(ledger.clone()),
        autoplay,
        EventBus::new(65_536),
    );
    let room = scheduler
        .add_room_with_id(RoomId::new(format!("blitz-t{tier}")), RoomKind::Blitz, tier)
        .unwrap();
    (scheduler, room, ledger)
}

pub fn p(id: i64) -> PlayerId {
    PlayerId(id)
}
