//! Engine service: the actor that owns the scheduler.
//!
//! One tokio task holds the [`Scheduler`] and is the only thing that ever
//! touches it. It wakes on a fixed-interval tick or on a request from an
//! [`EngineHandle`], handles it to completion, and goes back to waiting.
//! Ticks, commands, and queries are therefore strictly serialised.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::engine::scheduler::Scheduler;
use crate::events::{EventBus, EventKind, Subscription};
use crate::ledger::Balance;
use crate::types::{Command, DebugCommand, EngineError, PlayerId, RoomId, RoomSnapshot, RoomSummary};

const REQUEST_CAPACITY: usize = 1_024;

enum Request {
    Command(Command),
    Debug(DebugCommand),
    Rooms(oneshot::Sender<Vec<RoomSummary>>),
    Snapshot(RoomId, oneshot::Sender<Option<RoomSnapshot>>),
    Balance(PlayerId, oneshot::Sender<Balance>),
    RoomOf(PlayerId, oneshot::Sender<Option<RoomId>>),
    Shutdown,
}

/// Cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Request>,
    bus: EventBus,
}

impl EngineHandle {
    pub async fn dispatch(&self, cmd: Command) -> Result<(), EngineError> {
        self.send(Request::Command(cmd)).await
    }

    pub async fn debug(&self, cmd: DebugCommand) -> Result<(), EngineError> {
        self.send(Request::Debug(cmd)).await
    }

    pub async fn rooms(&self) -> Result<Vec<RoomSummary>, EngineError> {
        self.ask(Request::Rooms).await
    }

    pub async fn snapshot(&self, room: RoomId) -> Result<Option<RoomSnapshot>, EngineError> {
        self.ask(|tx| Request::Snapshot(room, tx)).await
    }

    pub async fn balance(&self, player: PlayerId) -> Result<Balance, EngineError> {
        self.ask(|tx| Request::Balance(player, tx)).await
    }

    pub async fn room_of(&self, player: PlayerId) -> Result<Option<RoomId>, EngineError> {
        self.ask(|tx| Request::RoomOf(player, tx)).await
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        self.bus.subscribe_to(kinds)
    }

    /// Ask the engine to stop. Requests already queued are handled first.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(Request::Shutdown).await
    }

    async fn send(&self, request: Request) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ServiceStopped)
    }

    async fn ask<T>(&self, request: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(request(tx)).await?;
        rx.await.map_err(|_| EngineError::ServiceStopped)
    }
}

/// Start the engine task.
pub fn spawn(
    scheduler: Scheduler,
    tick: Duration,
    clock: Arc<dyn Clock>,
) -> (EngineHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
    let handle = EngineHandle {
        tx,
        bus: scheduler.bus().clone(),
    };
    let task = tokio::spawn(run(scheduler, rx, tick, clock));
    (handle, task)
}

async fn run(
    mut scheduler: Scheduler,
    mut rx: mpsc::Receiver<Request>,
    tick: Duration,
    clock: Arc<dyn Clock>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(tick_ms = tick.as_millis() as u64, "Engine running");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                scheduler.advance(clock.now_ms());
            }
            request = rx.recv() => {
                let Some(request) = request else {
                    debug!("All engine handles dropped");
                    break;
                };
                match request {
                    Request::Command(cmd) => scheduler.dispatch(cmd, clock.now_ms()),
                    Request::Debug(cmd) => scheduler.debug(cmd, clock.now_ms()),
                    Request::Rooms(reply) => {
                        let _ = reply.send(scheduler.room_list());
                    }
                    Request::Snapshot(room, reply) => {
                        let _ = reply.send(scheduler.snapshot(&room));
                    }
                    Request::Balance(player, reply) => {
                        let _ = reply.send(scheduler.balance(player));
                    }
                    Request::RoomOf(player, reply) => {
                        let _ = reply.send(scheduler.room_of(player).cloned());
                    }
                    Request::Shutdown => {
                        info!("Engine shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    scheduler.shutdown();
}
