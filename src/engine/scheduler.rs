//! Scheduler: owns every room and advances them on a shared clock.
//!
//! All engine state lives here and is mutated from exactly one caller (the
//! service actor). Each public operation is one atomic step: it mutates one
//! or more rooms, updates the player→room index, and publishes the events
//! the rooms produced, in order, before returning.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, trace, warn};

use crate::autoplay::{AutoplayStrategy, BotTurn};
use crate::engine::room::{BotProfile, Room, RoomSettings};
use crate::engine::timers::{TimerId, TimerQueue};
use crate::events::{EngineEvent, ErrorPayload, EventBus, Subscription};
use crate::ledger::{Balance, Ledger};
use crate::types::{
    Command, CommandKind, DebugCommand, EngineError, MemberState, PlayerId, RoomId, RoomKind,
    RoomSnapshot, RoomSummary, RoundState,
};

/// Bot player ids start here, well clear of real account ids.
pub const BOT_ID_BASE: i64 = 1 << 40;

/// Largest latency the debug knob accepts; larger requests are clamped.
pub const MAX_INJECTED_LAG_MS: i64 = 60_000;

/// Scheduler-wide knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub countdown_ms: i64,
    /// Pause between ROUND_COMPLETE and the next round.
    pub round_complete_delay_ms: i64,
    pub shard_rate: Decimal,
    pub bot_starting_stars: u64,
    /// Master seed for room volatility models.
    pub seed: u64,
}

/// Work parked in the timer queue.
#[derive(Debug, Clone, PartialEq)]
enum Deferred {
    /// A command held back by injected latency.
    Command(Command),
    BotJoin {
        room: RoomId,
        player: PlayerId,
        skill: f64,
    },
    ResetRound(RoomId),
}

pub struct Scheduler {
    rooms: BTreeMap<RoomId, Room>,
    index: HashMap<PlayerId, RoomId>,
    timers: TimerQueue<Deferred>,
    reset_timers: HashMap<RoomId, TimerId>,
    bot_timers: HashMap<RoomId, Vec<TimerId>>,
    /// Latest due time of each player's queued commands.
    last_player_due: HashMap<PlayerId, i64>,
    ledger: Box<dyn Ledger>,
    autoplay: Box<dyn AutoplayStrategy>,
    bus: EventBus,
    settings: SchedulerSettings,
    lag_ms: i64,
    pulse_window_override_ms: Option<i64>,
    last_tick_ms: Option<i64>,
    next_bot_id: i64,
    rng: ChaCha8Rng,
    last_room_list: Vec<RoomSummary>,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        ledger: Box<dyn Ledger>,
        autoplay: Box<dyn AutoplayStrategy>,
        bus: EventBus,
    ) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(settings.seed);
        Self {
            rooms: BTreeMap::new(),
            index: HashMap::new(),
            timers: TimerQueue::new(),
            reset_timers: HashMap::new(),
            bot_timers: HashMap::new(),
            last_player_due: HashMap::new(),
            ledger,
            autoplay,
            bus,
            settings,
            lag_ms: 0,
            pulse_window_override_ms: None,
            last_tick_ms: None,
            next_bot_id: BOT_ID_BASE,
            rng,
            last_room_list: Vec::new(),
        }
    }

    // -- Rooms -----------------------------------------------------------

    /// Create one room per (kind, tier) pair.
    pub fn seed_rooms(&mut self, kinds: &[RoomKind], tiers: &[u8]) -> Result<Vec<RoomId>, EngineError> {
        let mut ids = Vec::with_capacity(kinds.len() * tiers.len());
        for &kind in kinds {
            for &tier in tiers {
                ids.push(self.add_room(kind, tier)?);
            }
        }
        info!(rooms = ids.len(), "Rooms seeded");
        Ok(ids)
    }

    pub fn add_room(&mut self, kind: RoomKind, tier: u8) -> Result<RoomId, EngineError> {
        self.add_room_with_id(RoomId::generate(kind, tier), kind, tier)
    }

    /// Create a room under a caller-chosen id.
    pub fn add_room_with_id(
        &mut self,
        id: RoomId,
        kind: RoomKind,
        tier: u8,
    ) -> Result<RoomId, EngineError> {
        if self.rooms.contains_key(&id) {
            return Err(EngineError::DuplicateRoom(id));
        }
        let settings = RoomSettings {
            countdown_ms: self.settings.countdown_ms,
            shard_rate: self.settings.shard_rate,
        };
        let mut room = Room::new(id.clone(), kind, tier, settings, self.rng.next_u64())?;
        room.set_pulse_window_override(self.pulse_window_override_ms);
        debug!(room = %id, kind = %kind, tier, "Room created");
        self.rooms.insert(id.clone(), room);
        self.publish_room_list();
        Ok(id)
    }

    // -- Commands --------------------------------------------------------

    /// Accept a player command. With injected latency the command is parked
    /// and applied by a later [`Scheduler::advance`].
    ///
    /// A player with commands still queued has every later command queued
    /// behind them, even after the latency drops to zero.
    pub fn dispatch(&mut self, cmd: Command, now_ms: i64) {
        let player = cmd.player_id;
        let floor = self.last_player_due.get(&player).copied();
        if self.lag_ms <= 0 && floor.is_none() {
            self.apply(cmd, now_ms);
            return;
        }
        let due = now_ms
            .saturating_add(self.lag_ms)
            .max(floor.unwrap_or(i64::MIN));
        self.last_player_due.insert(player, due);
        trace!(player = %player, due, "Command delayed");
        self.timers.schedule(due, Deferred::Command(cmd));
    }

    fn apply(&mut self, cmd: Command, now_ms: i64) {
        let room_id = match cmd.kind {
            CommandKind::JoinRoom => cmd.room_id.clone(),
            _ => match self.index.get(&cmd.player_id) {
                Some(id) => id.clone(),
                None => {
                    debug!(player = %cmd.player_id, kind = ?cmd.kind, "Command from unseated player ignored");
                    return;
                }
            },
        };

        if let Err(e) = self.route(&room_id, &cmd, now_ms) {
            self.reject(cmd.player_id, &room_id, e);
        }
        self.flush(&room_id, now_ms);
    }

    fn route(&mut self, room_id: &RoomId, cmd: &Command, now_ms: i64) -> Result<(), EngineError> {
        let player = cmd.player_id;
        if cmd.kind == CommandKind::JoinRoom {
            if let Some(seated) = self.index.get(&player) {
                return Err(EngineError::AlreadySeated {
                    player,
                    room: seated.clone(),
                });
            }
        }

        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| EngineError::UnknownRoom(room_id.clone()))?;
        let ledger = self.ledger.as_mut();

        match cmd.kind {
            CommandKind::JoinRoom => {
                room.join(player, None, now_ms, ledger)?;
                self.index.insert(player, room_id.clone());
                self.plan_bot_fill(room_id, now_ms);
            }
            CommandKind::Pulse => room.pulse(player, now_ms, ledger)?,
            CommandKind::LeaveRoom => room.leave(player, now_ms, ledger)?,
            CommandKind::Disconnect => room.disconnect(player)?,
            CommandKind::Reconnect => room.reconnect(player, now_ms, ledger)?,
        }
        Ok(())
    }

    /// Player-facing rejections become `error` events; the rest are dropped.
    fn reject(&self, player: PlayerId, room_id: &RoomId, err: EngineError) {
        if err.is_player_facing() {
            warn!(player = %player, room = %room_id, error = %err, "Command rejected");
            self.bus.publish(EngineEvent::Error(ErrorPayload {
                player_id: player,
                room_id: Some(room_id.clone()),
                message: err.to_string(),
            }));
        } else {
            debug!(player = %player, room = %room_id, error = %err, "Command ignored");
        }
    }

    // -- Debug -----------------------------------------------------------

    pub fn debug(&mut self, cmd: DebugCommand, now_ms: i64) {
        info!(command = ?cmd, "Debug command");
        match cmd {
            DebugCommand::ForceLiquidation { room_id } => {
                for id in self.targets(room_id) {
                    if let Some(room) = self.rooms.get_mut(&id) {
                        room.force_liquidation(now_ms, self.ledger.as_mut());
                    }
                    self.flush(&id, now_ms);
                }
            }
            DebugCommand::ForceDisconnect { player_id } => {
                let Some(id) = self.index.get(&player_id).cloned() else {
                    debug!(player = %player_id, "Force disconnect of unseated player");
                    return;
                };
                if let Some(room) = self.rooms.get_mut(&id) {
                    if let Err(e) = room.disconnect(player_id) {
                        debug!(player = %player_id, error = %e, "Force disconnect ignored");
                    }
                }
                self.flush(&id, now_ms);
            }
            DebugCommand::ForceTop3 { room_id } => {
                for id in self.targets(room_id) {
                    if let Some(room) = self.rooms.get_mut(&id) {
                        room.force_top3(now_ms, self.ledger.as_mut());
                    }
                    self.flush(&id, now_ms);
                }
            }
            DebugCommand::InjectLatency { lag_ms } => {
                if lag_ms > MAX_INJECTED_LAG_MS {
                    warn!(requested = lag_ms, max = MAX_INJECTED_LAG_MS, "Injected latency clamped");
                }
                self.lag_ms = lag_ms.clamp(0, MAX_INJECTED_LAG_MS);
            }
            DebugCommand::MassElimination { count, room_id } => {
                for id in self.targets(room_id) {
                    if let Some(room) = self.rooms.get_mut(&id) {
                        room.eliminate_bots(count, now_ms, self.ledger.as_mut());
                    }
                    self.flush(&id, now_ms);
                }
            }
            DebugCommand::SetPulseWindow { window_ms } => {
                self.pulse_window_override_ms = window_ms.filter(|w| *w > 0);
                for room in self.rooms.values_mut() {
                    room.set_pulse_window_override(self.pulse_window_override_ms);
                }
            }
            DebugCommand::ForceCountdownEnd { room_id } => {
                for id in self.targets(room_id) {
                    if let Some(room) = self.rooms.get_mut(&id) {
                        room.force_countdown_end();
                    }
                }
            }
        }
    }

    fn targets(&self, room_id: Option<RoomId>) -> Vec<RoomId> {
        match room_id {
            Some(id) if self.rooms.contains_key(&id) => vec![id],
            Some(id) => {
                debug!(room = %id, "Debug command for unknown room");
                Vec::new()
            }
            None => self.rooms.keys().cloned().collect(),
        }
    }

    // -- Tick ------------------------------------------------------------

    /// One scheduler step: fire due deferred work, tick live rooms, then let
    /// bots pulse.
    pub fn advance(&mut self, now_ms: i64) {
        while let Some((id, item)) = self.timers.pop_due(now_ms) {
            self.fire(id, item, now_ms);
        }

        let dt = self.last_tick_ms.map(|last| (now_ms - last).max(0)).unwrap_or(0);
        self.last_tick_ms = Some(now_ms);

        let live: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, r)| matches!(r.state(), RoundState::Countdown | RoundState::SurvivalPhase))
            .map(|(id, _)| id.clone())
            .collect();
        for id in live {
            if let Some(room) = self.rooms.get_mut(&id) {
                room.tick(dt, now_ms, self.ledger.as_mut());
            }
            self.run_bots(&id, now_ms);
            self.flush(&id, now_ms);
        }
    }

    fn fire(&mut self, id: TimerId, item: Deferred, now_ms: i64) {
        match item {
            Deferred::Command(cmd) => {
                let player = cmd.player_id;
                if self.last_player_due.get(&player).is_some_and(|&due| due <= now_ms) {
                    self.last_player_due.remove(&player);
                }
                self.apply(cmd, now_ms);
            }
            Deferred::BotJoin { room, player, skill } => {
                if let Some(pending) = self.bot_timers.get_mut(&room) {
                    pending.retain(|t| *t != id);
                }
                self.join_bot(&room, player, skill, now_ms);
            }
            Deferred::ResetRound(room) => {
                self.reset_timers.remove(&room);
                self.reset(&room, now_ms);
            }
        }
    }

    fn run_bots(&mut self, room_id: &RoomId, now_ms: i64) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        if room.state() != RoundState::SurvivalPhase {
            return;
        }
        let window = room.pulse_window_ms();
        let turns: Vec<BotTurn> = room
            .members()
            .filter(|m| m.state == MemberState::Active)
            .filter_map(|m| {
                m.bot.map(|bot| BotTurn {
                    player_id: m.player_id,
                    skill: bot.skill,
                    since_pulse_ms: now_ms - m.last_pulse_ms,
                    pulse_window_ms: window,
                })
            })
            .collect();

        for turn in turns {
            if !self.autoplay.should_pulse(&turn) {
                continue;
            }
            let Some(room) = self.rooms.get_mut(room_id) else {
                return;
            };
            if let Err(e) = room.pulse(turn.player_id, now_ms, self.ledger.as_mut()) {
                trace!(bot = %turn.player_id, error = %e, "Bot pulse dropped");
            }
        }
    }

    // -- Bots ------------------------------------------------------------

    /// Schedule bot joins for a waiting room, unless a fill is already
    /// pending for it.
    fn plan_bot_fill(&mut self, room_id: &RoomId, now_ms: i64) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        if room.state() != RoundState::WaitingForPlayers {
            return;
        }
        if self.bot_timers.get(room_id).is_some_and(|t| !t.is_empty()) {
            return;
        }

        let plans = self.autoplay.plan_fill(room.tier(), room.member_count());
        if plans.is_empty() {
            return;
        }
        debug!(room = %room_id, bots = plans.len(), "Bot fill planned");
        let mut pending = Vec::with_capacity(plans.len());
        for plan in plans {
            let player = self.allocate_bot_id();
            let deferred = Deferred::BotJoin {
                room: room_id.clone(),
                player,
                skill: plan.skill,
            };
            let due = now_ms.saturating_add(plan.delay_ms.max(0));
            pending.push(self.timers.schedule(due, deferred));
        }
        self.bot_timers.insert(room_id.clone(), pending);
    }

    /// Seat a planned bot. The account opens at the seat attempt, so bots
    /// whose joins were cancelled never get one.
    fn join_bot(&mut self, room_id: &RoomId, player: PlayerId, skill: f64, now_ms: i64) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if room.state() != RoundState::WaitingForPlayers {
            debug!(room = %room_id, bot = %player, "Bot join after room closed");
            return;
        }
        self.ledger.open_account(player, self.settings.bot_starting_stars);
        match room.join(player, Some(BotProfile { skill }), now_ms, self.ledger.as_mut()) {
            Ok(()) => {
                self.index.insert(player, room_id.clone());
            }
            Err(e) => debug!(room = %room_id, bot = %player, error = %e, "Bot join dropped"),
        }
        self.flush(room_id, now_ms);
    }

    fn cancel_bot_fill(&mut self, room_id: &RoomId) {
        if let Some(pending) = self.bot_timers.remove(room_id) {
            let cancelled = pending.into_iter().filter_map(|t| self.timers.cancel(t)).count();
            if cancelled > 0 {
                debug!(room = %room_id, cancelled, "Pending bot joins cancelled");
            }
        }
    }

    fn allocate_bot_id(&mut self) -> PlayerId {
        loop {
            let id = PlayerId(self.next_bot_id);
            self.next_bot_id += 1;
            if !self.index.contains_key(&id) {
                return id;
            }
        }
    }

    // -- Round reset -----------------------------------------------------

    fn schedule_reset(&mut self, room_id: &RoomId, now_ms: i64) {
        if let Some(previous) = self.reset_timers.remove(room_id) {
            self.timers.cancel(previous);
        }
        let due = now_ms.saturating_add(self.settings.round_complete_delay_ms);
        let timer = self.timers.schedule(due, Deferred::ResetRound(room_id.clone()));
        self.reset_timers.insert(room_id.clone(), timer);
        debug!(room = %room_id, due, "Round reset scheduled");
    }

    /// Reset a completed room immediately, cancelling its scheduled reset.
    pub fn reset_room_now(&mut self, room_id: &RoomId, now_ms: i64) -> bool {
        if let Some(pending) = self.reset_timers.remove(room_id) {
            self.timers.cancel(pending);
        }
        self.reset(room_id, now_ms)
    }

    fn reset(&mut self, room_id: &RoomId, now_ms: i64) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let done = room.reset_round(self.ledger.as_mut());
        let has_humans = room.members().any(|m| !m.is_bot());
        self.flush(room_id, now_ms);
        if done && has_humans {
            self.plan_bot_fill(room_id, now_ms);
        }
        done
    }

    // -- Publication -----------------------------------------------------

    /// Publish what a room produced and keep the index and timers in step.
    fn flush(&mut self, room_id: &RoomId, now_ms: i64) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        let outbox = room.take_outbox();
        let state = room.state();

        for player in &outbox.departed {
            if self.index.get(player) == Some(room_id) {
                self.index.remove(player);
            }
        }
        let completed = outbox.events.iter().any(|e| {
            matches!(e, EngineEvent::RoundTransition(t) if t.to == RoundState::RoundComplete)
        });
        self.bus.publish_all(outbox.events);

        if completed {
            self.schedule_reset(room_id, now_ms);
        }
        if state != RoundState::WaitingForPlayers {
            self.cancel_bot_fill(room_id);
        }
        self.publish_room_list();
    }

    fn publish_room_list(&mut self) {
        let list = self.room_list();
        if list != self.last_room_list {
            self.last_room_list = list.clone();
            self.bus.publish(EngineEvent::RoomList(list));
        }
    }

    // -- Queries ---------------------------------------------------------

    pub fn room_list(&self) -> Vec<RoomSummary> {
        self.rooms.values().map(Room::summary).collect()
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn snapshot(&self, id: &RoomId) -> Option<RoomSnapshot> {
        self.rooms.get(id).map(Room::snapshot)
    }

    pub fn room_of(&self, player: PlayerId) -> Option<&RoomId> {
        self.index.get(&player)
    }

    pub fn balance(&self, player: PlayerId) -> Balance {
        self.ledger.balance(player)
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    pub fn ledger_mut(&mut self) -> &mut dyn Ledger {
        self.ledger.as_mut()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn lag_ms(&self) -> i64 {
        self.lag_ms
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Drop all deferred work.
    pub fn shutdown(&mut self) {
        let dropped = self.timers.len();
        self.timers.clear();
        self.reset_timers.clear();
        self.bot_timers.clear();
        self.last_player_due.clear();
        info!(rooms = self.rooms.len(), dropped, "Scheduler stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
