//! Room engine: one room's state and its lifecycle state machine.
//!
//! A room cycles `WAITING_FOR_PLAYERS → COUNTDOWN → SURVIVAL_PHASE →
//! (LIQUIDATED) → ROUND_COMPLETE → WAITING_FOR_PLAYERS` forever. Every
//! mutation appends the events it causes to the room's [`Outbox`] in the
//! order the transitions happen; the scheduler drains and publishes them
//! after each operation. Players who stop being routable to this room are
//! listed in `Outbox::departed` so the scheduler can update its index in
//! the same operation.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info, trace, warn};

use crate::engine::ranking::{self, Finisher};
use crate::engine::volatility::{VolatilityModel, LIQUIDATION_MARGIN};
use crate::events::{
    BalancePayload, EliminationPayload, EngineEvent, ErrorPayload, MemberStatePayload,
    PayoutPayload, PulseAckPayload, RoundTransitionPayload, ShardCreditPayload, TickPayload,
};
use crate::ledger::Ledger;
use crate::tiers::{TierConfig, TierTable};
use crate::types::{
    EngineError, MemberState, PlayerId, RoomId, RoomKind, RoomSnapshot, RoomSummary, RoundState,
};

// ---------------------------------------------------------------------------
// Settings and members
// ---------------------------------------------------------------------------

/// Engine-wide knobs every room shares.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSettings {
    pub countdown_ms: i64,
    /// Fraction of the entry cost paid back as consolation shards.
    pub shard_rate: Decimal,
}

/// Autoplay parameters of a synthetic player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotProfile {
    /// Pulse discipline in (0, 1); higher pulses earlier and more reliably.
    pub skill: f64,
}

/// A player seated in a room.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub player_id: PlayerId,
    pub state: MemberState,
    pub last_pulse_ms: i64,
    pub alive: bool,
    pub stars_spent: u64,
    pub time_survived_ms: i64,
    pub joined_at_ms: i64,
    pub eliminated_at_ms: Option<i64>,
    pub shards_earned: u64,
    pub payout: u64,
    pub pulse_count: u32,
    pub bot: Option<BotProfile>,
    /// Left on purpose; removed from the room at the next reset.
    pub voluntary_exit: bool,
}

impl Member {
    fn new(player_id: PlayerId, now_ms: i64, bot: Option<BotProfile>) -> Self {
        Self {
            player_id,
            state: MemberState::Joined,
            last_pulse_ms: now_ms,
            alive: true,
            stars_spent: 0,
            time_survived_ms: 0,
            joined_at_ms: now_ms,
            eliminated_at_ms: None,
            shards_earned: 0,
            payout: 0,
            pulse_count: 0,
            bot,
            voluntary_exit: false,
        }
    }

    pub fn is_bot(&self) -> bool {
        self.bot.is_some()
    }

    /// Everyone but the winner who was knocked out, walked out, or never
    /// came back gets consolation, placed or not.
    fn earns_consolation(&self, winner: Option<PlayerId>) -> bool {
        winner != Some(self.player_id)
            && (self.eliminated_at_ms.is_some() || self.state.earns_consolation())
    }

    /// Ready the member for the next round.
    fn rearm(&mut self) {
        self.state = MemberState::Joined;
        self.last_pulse_ms = 0;
        self.alive = true;
        self.stars_spent = 0;
        self.time_survived_ms = 0;
        self.eliminated_at_ms = None;
        self.shards_earned = 0;
        self.payout = 0;
        self.pulse_count = 0;
    }
}

/// Side effects of room operations, drained by the scheduler.
#[derive(Debug, Default)]
pub struct Outbox {
    pub events: Vec<EngineEvent>,
    /// Players no longer routed to this room.
    pub departed: Vec<PlayerId>,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

pub struct Room {
    id: RoomId,
    kind: RoomKind,
    tier: &'static TierConfig,
    settings: RoomSettings,
    state: RoundState,
    round: u64,
    members: BTreeMap<PlayerId, Member>,
    pool: u64,
    countdown_ms: i64,
    timer_ms: i64,
    margin_ratio: f64,
    volatility_mul: f64,
    winner_id: Option<PlayerId>,
    top3: Vec<PlayerId>,
    round_paid: bool,
    survival_started_at: Option<i64>,
    started_with: usize,
    model: Option<VolatilityModel>,
    seed: u64,
    pulse_window_override_ms: Option<i64>,
    outbox: Outbox,
}

impl Room {
    pub fn new(
        id: RoomId,
        kind: RoomKind,
        tier: u8,
        settings: RoomSettings,
        seed: u64,
    ) -> Result<Self, EngineError> {
        let tier = TierTable::get(tier)?;
        Ok(Self {
            id,
            kind,
            tier,
            settings,
            state: RoundState::WaitingForPlayers,
            round: 1,
            members: BTreeMap::new(),
            pool: 0,
            countdown_ms: 0,
            timer_ms: 0,
            margin_ratio: 0.0,
            volatility_mul: 1.0,
            winner_id: None,
            top3: Vec::new(),
            round_paid: false,
            survival_started_at: None,
            started_with: 0,
            model: None,
            seed,
            pulse_window_override_ms: None,
            outbox: Outbox::default(),
        })
    }

    // -- Accessors -------------------------------------------------------

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    pub fn tier(&self) -> &'static TierConfig {
        self.tier
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn pool(&self) -> u64 {
        self.pool
    }

    pub fn timer_ms(&self) -> i64 {
        self.timer_ms
    }

    pub fn countdown_ms(&self) -> i64 {
        self.countdown_ms
    }

    pub fn margin_ratio(&self) -> f64 {
        self.margin_ratio
    }

    pub fn volatility_mul(&self) -> f64 {
        self.volatility_mul
    }

    pub fn winner_id(&self) -> Option<PlayerId> {
        self.winner_id
    }

    pub fn top3(&self) -> &[PlayerId] {
        &self.top3
    }

    pub fn is_paid(&self) -> bool {
        self.round_paid
    }

    pub fn member(&self, player: PlayerId) -> Option<&Member> {
        self.members.get(&player)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Members still in the running (not eliminated, not left).
    pub fn alive_count(&self) -> usize {
        self.members.values().filter(|m| m.alive && m.state != MemberState::Left).count()
    }

    /// Effective pulse window, honouring the debug override.
    pub fn pulse_window_ms(&self) -> i64 {
        self.pulse_window_override_ms.unwrap_or(self.tier.pulse_window_ms)
    }

    pub fn set_pulse_window_override(&mut self, window_ms: Option<i64>) {
        self.pulse_window_override_ms = window_ms;
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            kind: self.kind,
            tier: self.tier.tier,
            state: self.state,
            phase: self.state.phase().to_string(),
            members: self.members.len(),
            pool: self.pool,
        }
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id.clone(),
            kind: self.kind,
            tier: self.tier.tier,
            state: self.state,
            round: self.round,
            pool: self.pool,
            alive: self.alive_count(),
            total: self.members.len(),
            timer_ms: if self.state == RoundState::Countdown {
                self.countdown_ms
            } else {
                self.timer_ms
            },
            margin_ratio: self.margin_ratio,
            volatility_mul: self.volatility_mul,
            winner_id: self.winner_id,
            top3: self.top3.clone(),
        }
    }

    /// Take everything emitted since the last call.
    pub fn take_outbox(&mut self) -> Outbox {
        std::mem::take(&mut self.outbox)
    }

    // -- Commands --------------------------------------------------------

    /// Seat a player. Only allowed while waiting for players; joining is
    /// free, the entry fee is charged when the countdown starts.
    pub fn join(
        &mut self,
        player: PlayerId,
        bot: Option<BotProfile>,
        now_ms: i64,
        ledger: &mut dyn Ledger,
    ) -> Result<(), EngineError> {
        if self.state != RoundState::WaitingForPlayers {
            return Err(EngineError::JoinClosed {
                room: self.id.clone(),
                state: self.state,
            });
        }
        if self.members.contains_key(&player) {
            return Err(EngineError::AlreadySeated {
                player,
                room: self.id.clone(),
            });
        }
        if self.members.len() >= self.tier.max_players {
            return Err(EngineError::RoomFull {
                room: self.id.clone(),
                max: self.tier.max_players,
            });
        }
        let cost = self.tier.entry_cost;
        if !ledger.can_afford(player, cost) {
            return Err(EngineError::InsufficientFunds {
                player,
                needed: cost,
                available: ledger.balance(player).stars,
            });
        }

        self.members.insert(player, Member::new(player, now_ms, bot));
        debug!(
            room = %self.id,
            player = %player,
            bot = bot.is_some(),
            members = self.members.len(),
            "Player joined"
        );
        self.emit_room_state();

        if self.members.len() >= self.tier.min_players {
            self.start_countdown(ledger);
        }
        Ok(())
    }

    /// Accept a liveness pulse from an active player.
    ///
    /// A pulse that arrives after the player's deadline does not cure the
    /// miss: the player is eliminated instead.
    pub fn pulse(
        &mut self,
        player: PlayerId,
        now_ms: i64,
        ledger: &mut dyn Ledger,
    ) -> Result<(), EngineError> {
        if self.state != RoundState::SurvivalPhase {
            return Err(EngineError::RoundNotLive {
                room: self.id.clone(),
                state: self.state,
            });
        }
        let window = self.pulse_window_ms();
        let timer_ms = self.timer_ms;
        let member = self
            .members
            .get_mut(&player)
            .ok_or(EngineError::NotSeated(player))?;
        if member.state != MemberState::Active {
            return Err(EngineError::InvalidMemberState {
                player,
                state: member.state,
            });
        }

        if now_ms - member.last_pulse_ms > window {
            debug!(room = %self.id, player = %player, "Pulse after deadline");
            self.eliminate(player, now_ms);
            self.check_round_end(now_ms, ledger);
            return Ok(());
        }

        member.last_pulse_ms = now_ms;
        member.pulse_count += 1;
        trace!(room = %self.id, player = %player, "Pulse accepted");
        self.outbox.events.push(EngineEvent::PulseAck(PulseAckPayload {
            room_id: self.id.clone(),
            player_id: player,
            extension_ms: window,
            timer_ms,
            server_time_ms: now_ms,
        }));
        Ok(())
    }

    /// Voluntary leave.
    ///
    /// Before any fee is charged the seat is simply released. After the
    /// countdown has charged fees the player is marked `LEFT` without a
    /// refund. During survival leaving is a forfeit, identical to a timeout
    /// elimination. In every case the player is removed at the next reset.
    pub fn leave(
        &mut self,
        player: PlayerId,
        now_ms: i64,
        ledger: &mut dyn Ledger,
    ) -> Result<(), EngineError> {
        let member_state = self
            .members
            .get(&player)
            .map(|m| m.state)
            .ok_or(EngineError::NotSeated(player))?;

        match (self.state, member_state) {
            (
                RoundState::WaitingForPlayers,
                MemberState::Joined | MemberState::Disconnected,
            ) => {
                self.members.remove(&player);
            }
            (RoundState::Countdown, MemberState::Joined | MemberState::Disconnected) => {
                self.mark_exit(player, Some(MemberState::Left));
            }
            (RoundState::SurvivalPhase, MemberState::Active | MemberState::Disconnected) => {
                self.eliminate(player, now_ms);
                self.mark_exit(player, None);
                self.check_round_end(now_ms, ledger);
            }
            _ => {
                self.mark_exit(player, None);
            }
        }

        self.outbox.departed.push(player);
        info!(room = %self.id, player = %player, state = %self.state, "Player left");
        self.emit_room_state();
        Ok(())
    }

    /// Connection lost. The player keeps their seat and their deadline.
    pub fn disconnect(&mut self, player: PlayerId) -> Result<(), EngineError> {
        let member = self
            .members
            .get_mut(&player)
            .ok_or(EngineError::NotSeated(player))?;
        if !matches!(member.state, MemberState::Active | MemberState::Joined) {
            return Err(EngineError::InvalidMemberState {
                player,
                state: member.state,
            });
        }
        member.state = MemberState::Disconnected;
        debug!(room = %self.id, player = %player, "Player disconnected");
        self.push_member_state(player, MemberState::Disconnected);
        self.emit_room_state();
        Ok(())
    }

    /// Connection restored. During survival the deadline is checked
    /// immediately: a lapsed window eliminates instead of restoring.
    pub fn reconnect(
        &mut self,
        player: PlayerId,
        now_ms: i64,
        ledger: &mut dyn Ledger,
    ) -> Result<(), EngineError> {
        let window = self.pulse_window_ms();
        let state = self.state;
        let member = self
            .members
            .get_mut(&player)
            .ok_or(EngineError::NotSeated(player))?;
        if member.state != MemberState::Disconnected {
            return Err(EngineError::InvalidMemberState {
                player,
                state: member.state,
            });
        }

        match state {
            RoundState::SurvivalPhase if now_ms - member.last_pulse_ms > window => {
                info!(room = %self.id, player = %player, "Reconnected after deadline");
                self.eliminate(player, now_ms);
                self.check_round_end(now_ms, ledger);
            }
            RoundState::SurvivalPhase => {
                member.state = MemberState::Active;
                self.push_member_state(player, MemberState::Active);
            }
            RoundState::WaitingForPlayers | RoundState::Countdown => {
                member.state = MemberState::Joined;
                self.push_member_state(player, MemberState::Joined);
            }
            RoundState::Liquidated | RoundState::RoundComplete => return Ok(()),
        }

        self.emit_room_state();
        Ok(())
    }

    // -- Tick ------------------------------------------------------------

    /// Advance the room by `dt_ms`.
    pub fn tick(&mut self, dt_ms: i64, now_ms: i64, ledger: &mut dyn Ledger) {
        match self.state {
            RoundState::Countdown => {
                self.countdown_ms -= dt_ms;
                if self.countdown_ms <= 0 {
                    self.countdown_ms = 0;
                    self.enter_survival(now_ms, ledger);
                } else {
                    self.emit_room_state();
                }
            }
            RoundState::SurvivalPhase => self.tick_survival(dt_ms, now_ms, ledger),
            _ => {}
        }
    }

    fn tick_survival(&mut self, dt_ms: i64, now_ms: i64, ledger: &mut dyn Ledger) {
        if let Some(model) = self.model.as_mut() {
            let sample = model.tick(dt_ms);
            self.margin_ratio = sample.margin_ratio;
            self.volatility_mul = sample.volatility_mul;
        }
        self.timer_ms = (self.timer_ms - dt_ms).max(0);

        if self.margin_ratio >= LIQUIDATION_MARGIN {
            self.liquidate(now_ms, ledger);
            return;
        }

        let window = self.pulse_window_ms();
        let expired: Vec<PlayerId> = self
            .members
            .values()
            .filter(|m| matches!(m.state, MemberState::Active | MemberState::Disconnected))
            .filter(|m| now_ms - m.last_pulse_ms > window)
            .map(|m| m.player_id)
            .collect();
        for player in expired {
            self.eliminate(player, now_ms);
        }

        if self.check_round_end(now_ms, ledger) {
            return;
        }

        self.outbox.events.push(EngineEvent::Tick(TickPayload {
            room_id: self.id.clone(),
            timer_ms: self.timer_ms,
            margin_ratio: self.margin_ratio,
            volatility_mul: self.volatility_mul,
            alive: self.alive_count(),
        }));
    }

    // -- Debug hooks -----------------------------------------------------

    /// Drive the margin to 1.0 and liquidate now.
    pub fn force_liquidation(&mut self, now_ms: i64, ledger: &mut dyn Ledger) -> bool {
        if self.state != RoundState::SurvivalPhase {
            return false;
        }
        if let Some(model) = self.model.as_mut() {
            model.force_margin(LIQUIDATION_MARGIN);
        }
        self.margin_ratio = LIQUIDATION_MARGIN;
        self.liquidate(now_ms, ledger);
        true
    }

    /// End the countdown on the next tick.
    pub fn force_countdown_end(&mut self) -> bool {
        if self.state != RoundState::Countdown {
            return false;
        }
        self.countdown_ms = 0;
        true
    }

    /// Eliminate up to `count` active bots, lowest id first.
    pub fn eliminate_bots(&mut self, count: usize, now_ms: i64, ledger: &mut dyn Ledger) -> usize {
        if self.state != RoundState::SurvivalPhase {
            return 0;
        }
        let bots: Vec<PlayerId> = self
            .members
            .values()
            .filter(|m| m.is_bot() && m.state == MemberState::Active)
            .map(|m| m.player_id)
            .take(count)
            .collect();
        for &bot in &bots {
            self.eliminate(bot, now_ms);
        }
        if !bots.is_empty() && !self.check_round_end(now_ms, ledger) {
            self.emit_room_state();
        }
        bots.len()
    }

    /// Eliminate bots until at most three players are alive.
    pub fn force_top3(&mut self, now_ms: i64, ledger: &mut dyn Ledger) -> usize {
        let excess = self.alive_count().saturating_sub(3);
        self.eliminate_bots(excess, now_ms, ledger)
    }

    // -- Round completion ------------------------------------------------

    /// Pay the pool and grant consolation shards.
    ///
    /// Runs at most once per round; later calls return `false` and change
    /// nothing.
    pub fn settle(&mut self, ledger: &mut dyn Ledger) -> bool {
        if self.round_paid || self.state != RoundState::RoundComplete {
            return false;
        }
        self.round_paid = true;

        for (i, &player) in self.top3.iter().enumerate() {
            let rank = i + 1;
            let amount = ranking::payout_for_rank(self.pool, rank);
            if let Some(member) = self.members.get_mut(&player) {
                member.payout = amount;
            }
            let balance = ledger.credit_stars(player, amount);
            self.outbox.events.push(EngineEvent::Payout(PayoutPayload {
                room_id: self.id.clone(),
                player_id: player,
                amount,
                rank,
            }));
            self.outbox.events.push(EngineEvent::Balance(BalancePayload {
                player_id: player,
                stars: balance.stars,
                shards: balance.shards,
            }));
        }

        let shards = ranking::consolation_shards(self.tier.entry_cost, self.settings.shard_rate);
        let winner = self.winner_id;
        for member in self.members.values_mut() {
            if !member.earns_consolation(winner) {
                continue;
            }
            member.shards_earned = shards;
            let balance = ledger.credit_shards(member.player_id, shards);
            self.outbox.events.push(EngineEvent::ShardCredit(ShardCreditPayload {
                room_id: self.id.clone(),
                player_id: member.player_id,
                amount: shards,
            }));
            self.outbox.events.push(EngineEvent::Balance(BalancePayload {
                player_id: member.player_id,
                stars: balance.stars,
                shards: balance.shards,
            }));
        }

        info!(
            room = %self.id,
            round = self.round,
            pool = self.pool,
            winner = ?self.winner_id,
            top3 = ?self.top3,
            "Round settled"
        );
        true
    }

    /// Start the next round. Voluntary leavers are dropped; everyone else
    /// is rearmed and, if enough remain, charged for a new countdown.
    pub fn reset_round(&mut self, ledger: &mut dyn Ledger) -> bool {
        if self.state != RoundState::RoundComplete {
            return false;
        }

        let leavers: Vec<PlayerId> = self
            .members
            .values()
            .filter(|m| m.voluntary_exit)
            .map(|m| m.player_id)
            .collect();
        for player in &leavers {
            self.members.remove(player);
        }
        self.outbox.departed.extend(leavers);
        for member in self.members.values_mut() {
            member.rearm();
        }

        self.pool = 0;
        self.round_paid = false;
        self.winner_id = None;
        self.top3.clear();
        self.timer_ms = 0;
        self.countdown_ms = 0;
        self.margin_ratio = 0.0;
        self.volatility_mul = 1.0;
        self.survival_started_at = None;
        self.started_with = 0;
        self.model = None;
        self.round += 1;

        self.set_state(RoundState::WaitingForPlayers);
        self.emit_room_state();

        if self.members.len() >= self.tier.min_players {
            self.start_countdown(ledger);
        }
        true
    }

    // -- Transitions -----------------------------------------------------

    fn set_state(&mut self, to: RoundState) {
        let from = self.state;
        self.state = to;
        info!(room = %self.id, round = self.round, from = %from, to = %to, "Round transition");
        self.outbox
            .events
            .push(EngineEvent::RoundTransition(RoundTransitionPayload {
                room_id: self.id.clone(),
                from,
                to,
            }));
    }

    /// Charge every member and start the countdown.
    ///
    /// Members who can no longer cover the fee are unseated first, so the
    /// charge is all-or-nothing per member and nobody pays for a countdown
    /// that does not start.
    fn start_countdown(&mut self, ledger: &mut dyn Ledger) {
        let cost = self.tier.entry_cost;
        let short: Vec<PlayerId> = self
            .members
            .keys()
            .copied()
            .filter(|&p| !ledger.can_afford(p, cost))
            .collect();
        for player in short {
            self.unseat_for_funds(player, ledger);
        }
        if self.members.len() < self.tier.min_players {
            self.emit_room_state();
            return;
        }

        let players: Vec<PlayerId> = self.members.keys().copied().collect();
        for player in players {
            match ledger.debit_stars(player, cost) {
                Ok(balance) => {
                    if let Some(member) = self.members.get_mut(&player) {
                        member.stars_spent = cost;
                    }
                    self.pool += cost;
                    self.outbox.events.push(EngineEvent::Balance(BalancePayload {
                        player_id: player,
                        stars: balance.stars,
                        shards: balance.shards,
                    }));
                }
                Err(e) => {
                    warn!(room = %self.id, player = %player, error = %e, "Entry fee debit failed");
                    self.unseat_for_funds(player, ledger);
                }
            }
        }

        self.countdown_ms = self.settings.countdown_ms;
        self.set_state(RoundState::Countdown);
        self.emit_room_state();
    }

    fn unseat_for_funds(&mut self, player: PlayerId, ledger: &dyn Ledger) {
        self.members.remove(&player);
        self.outbox.departed.push(player);
        let err = EngineError::InsufficientFunds {
            player,
            needed: self.tier.entry_cost,
            available: ledger.balance(player).stars,
        };
        warn!(room = %self.id, player = %player, "Unseated, cannot cover entry fee");
        self.outbox.events.push(EngineEvent::Error(ErrorPayload {
            player_id: player,
            room_id: Some(self.id.clone()),
            message: err.to_string(),
        }));
    }

    fn enter_survival(&mut self, now_ms: i64, ledger: &mut dyn Ledger) {
        self.set_state(RoundState::SurvivalPhase);
        self.survival_started_at = Some(now_ms);
        for member in self.members.values_mut() {
            match member.state {
                MemberState::Joined => {
                    member.state = MemberState::Active;
                    member.last_pulse_ms = now_ms;
                }
                MemberState::Disconnected => member.last_pulse_ms = now_ms,
                _ => {}
            }
        }
        self.started_with = self.alive_count();

        let model = VolatilityModel::new(self.tier.tier, self.seed.wrapping_add(self.round));
        self.margin_ratio = model.margin();
        self.volatility_mul = 1.0;
        self.model = Some(model);
        self.timer_ms = self.tier.survival_time_ms;

        self.emit_room_state();
        self.check_round_end(now_ms, ledger);
    }

    fn liquidate(&mut self, now_ms: i64, ledger: &mut dyn Ledger) {
        self.set_state(RoundState::Liquidated);
        self.margin_ratio = LIQUIDATION_MARGIN;
        let active: Vec<PlayerId> = self
            .members
            .values()
            .filter(|m| m.state == MemberState::Active)
            .map(|m| m.player_id)
            .collect();
        warn!(room = %self.id, eliminated = active.len(), "Room liquidated");
        for player in active {
            self.eliminate(player, now_ms);
        }
        self.finish_round(now_ms, ledger);
    }

    /// Round-over rule: a field that started above three ends at three,
    /// any field ends at one, and the survival clock running out ends it.
    fn check_round_end(&mut self, now_ms: i64, ledger: &mut dyn Ledger) -> bool {
        if self.state != RoundState::SurvivalPhase {
            return false;
        }
        let alive = self.alive_count();
        let over = alive <= 1 || (alive <= 3 && self.started_with > 3) || self.timer_ms <= 0;
        if over {
            self.finish_round(now_ms, ledger);
        }
        over
    }

    fn finish_round(&mut self, now_ms: i64, ledger: &mut dyn Ledger) {
        let elapsed = self.survived_at(now_ms);
        for member in self.members.values_mut() {
            if member.alive && member.state != MemberState::Left {
                member.time_survived_ms = elapsed;
            }
        }
        self.assign_rankings();
        self.set_state(RoundState::RoundComplete);
        self.settle(ledger);
        self.emit_room_state();
    }

    fn assign_rankings(&mut self) {
        let finishers: Vec<Finisher> = self
            .members
            .values()
            .filter(|m| {
                matches!(
                    m.state,
                    MemberState::Active | MemberState::Eliminated | MemberState::Disconnected
                )
            })
            .map(|m| Finisher {
                player_id: m.player_id,
                survived_round: m.state == MemberState::Active,
                time_survived_ms: m.time_survived_ms,
            })
            .collect();

        self.top3 = ranking::rank(&finishers).into_iter().take(3).collect();
        self.winner_id = self.top3.first().copied();
        for (i, player) in self.top3.iter().enumerate() {
            if let Some(member) = self.members.get_mut(player) {
                member.state = if i == 0 {
                    MemberState::Winner
                } else {
                    MemberState::Top3
                };
            }
        }
    }

    fn eliminate(&mut self, player: PlayerId, now_ms: i64) -> bool {
        let survived = self.survived_at(now_ms);
        let Some(member) = self.members.get_mut(&player) else {
            return false;
        };
        if !member.alive {
            return false;
        }
        member.state = MemberState::Eliminated;
        member.alive = false;
        member.eliminated_at_ms = Some(now_ms);
        member.time_survived_ms = survived;

        let alive = self.alive_count();
        info!(room = %self.id, player = %player, alive, "Player eliminated");
        self.outbox.events.push(EngineEvent::Elimination(EliminationPayload {
            room_id: self.id.clone(),
            player_id: player,
            alive,
        }));
        true
    }

    fn mark_exit(&mut self, player: PlayerId, state: Option<MemberState>) {
        if let Some(member) = self.members.get_mut(&player) {
            member.voluntary_exit = true;
            if let Some(state) = state {
                member.state = state;
                member.alive = false;
            }
        }
    }

    fn survived_at(&self, now_ms: i64) -> i64 {
        self.survival_started_at
            .map(|start| (now_ms - start).max(0))
            .unwrap_or(0)
    }

    fn push_member_state(&mut self, player: PlayerId, state: MemberState) {
        self.outbox.events.push(EngineEvent::MemberState(MemberStatePayload {
            room_id: self.id.clone(),
            player_id: player,
            state,
        }));
    }

    fn emit_room_state(&mut self) {
        let snapshot = self.snapshot();
        self.outbox.events.push(EngineEvent::RoomState(snapshot));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
