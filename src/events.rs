//! Event bus: typed publish/subscribe fan-out of engine events.
//!
//! The engine publishes [`EngineEvent`]s in the order its state transitions
//! happen; every subscriber sees that same order. Delivery rides on a
//! `tokio::sync::broadcast` channel, so the engine never blocks on a slow
//! consumer. A consumer that falls more than `capacity` events behind
//! loses the oldest ones and is told how many it missed.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::types::{MemberState, PlayerId, RoomId, RoomSnapshot, RoomSummary, RoundState};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickPayload {
    pub room_id: RoomId,
    pub timer_ms: i64,
    pub margin_ratio: f64,
    pub volatility_mul: f64,
    pub alive: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EliminationPayload {
    pub room_id: RoomId,
    pub player_id: PlayerId,
    /// Alive count after this elimination.
    pub alive: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseAckPayload {
    pub room_id: RoomId,
    pub player_id: PlayerId,
    /// Time until the next pulse is due.
    pub extension_ms: i64,
    pub timer_ms: i64,
    pub server_time_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTransitionPayload {
    pub room_id: RoomId,
    pub from: RoundState,
    pub to: RoundState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutPayload {
    pub room_id: RoomId,
    pub player_id: PlayerId,
    pub amount: u64,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardCreditPayload {
    pub room_id: RoomId,
    pub player_id: PlayerId,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancePayload {
    pub player_id: PlayerId,
    pub stars: u64,
    pub shards: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStatePayload {
    pub room_id: RoomId,
    pub player_id: PlayerId,
    pub state: MemberState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub player_id: PlayerId,
    pub room_id: Option<RoomId>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Event enum
// ---------------------------------------------------------------------------

/// Everything the engine tells the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    RoomList(Vec<RoomSummary>),
    RoomState(RoomSnapshot),
    Tick(TickPayload),
    Elimination(EliminationPayload),
    PulseAck(PulseAckPayload),
    RoundTransition(RoundTransitionPayload),
    Payout(PayoutPayload),
    ShardCredit(ShardCreditPayload),
    Balance(BalancePayload),
    MemberState(MemberStatePayload),
    Error(ErrorPayload),
}

/// Discriminant of [`EngineEvent`], used for filtered subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RoomList,
    RoomState,
    Tick,
    Elimination,
    PulseAck,
    RoundTransition,
    Payout,
    ShardCredit,
    Balance,
    MemberState,
    Error,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::RoomList(_) => EventKind::RoomList,
            EngineEvent::RoomState(_) => EventKind::RoomState,
            EngineEvent::Tick(_) => EventKind::Tick,
            EngineEvent::Elimination(_) => EventKind::Elimination,
            EngineEvent::PulseAck(_) => EventKind::PulseAck,
            EngineEvent::RoundTransition(_) => EventKind::RoundTransition,
            EngineEvent::Payout(_) => EventKind::Payout,
            EngineEvent::ShardCredit(_) => EventKind::ShardCredit,
            EngineEvent::Balance(_) => EventKind::Balance,
            EngineEvent::MemberState(_) => EventKind::MemberState,
            EngineEvent::Error(_) => EventKind::Error,
        }
    }

    /// The room an event describes, if any.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            EngineEvent::RoomList(_) | EngineEvent::Balance(_) => None,
            EngineEvent::RoomState(s) => Some(&s.room_id),
            EngineEvent::Tick(p) => Some(&p.room_id),
            EngineEvent::Elimination(p) => Some(&p.room_id),
            EngineEvent::PulseAck(p) => Some(&p.room_id),
            EngineEvent::RoundTransition(p) => Some(&p.room_id),
            EngineEvent::Payout(p) => Some(&p.room_id),
            EngineEvent::ShardCredit(p) => Some(&p.room_id),
            EngineEvent::MemberState(p) => Some(&p.room_id),
            EngineEvent::Error(p) => p.room_id.as_ref(),
        }
    }
}

/// An event stamped with its global publication order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub seq: u64,
    #[serde(flatten)]
    pub event: EngineEvent,
}

impl Envelope {
    /// Wire form: `{"seq": .., "type": .., "data": ..}` on one line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Cloneable publisher handle. All clones share one channel and one
/// sequence counter.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
    seq: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish one event. Having no subscribers is not an error.
    pub fn publish(&self, event: EngineEvent) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(seq, kind = ?event.kind(), "Publishing event");
        let _ = self.tx.send(Envelope { seq, event });
        seq
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = EngineEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: None,
        }
    }

    /// Subscribe to a subset of event kinds.
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: Some(kinds.to_vec()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side of the bus.
pub struct Subscription {
    rx: broadcast::Receiver<Envelope>,
    kinds: Option<Vec<EventKind>>,
}

impl Subscription {
    fn wants(&self, envelope: &Envelope) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&envelope.event.kind()),
            None => true,
        }
    }

    /// Wait for the next matching event. Returns `None` once every
    /// publisher has been dropped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if self.wants(&envelope) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event that is already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if self.wants(&envelope) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    /// Every matching event that is already buffered.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Some(envelope) = self.try_recv() {
            out.push(envelope.event);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
