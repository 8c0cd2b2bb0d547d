//! LASTCLICK: survival room simulation engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! seeds the rooms, and runs the engine service until Ctrl+C. Engine
//! events are written to the log; an optional scripted player keeps a
//! room busy when running standalone.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use lastclick::autoplay::{AutoplayStrategy, Disabled, SkillBots};
use lastclick::clock::{Clock, SystemClock, TokioClock};
use lastclick::config::{self, DemoConfig};
use lastclick::engine::scheduler::Scheduler;
use lastclick::events::{EngineEvent, EventBus, Subscription};
use lastclick::ledger::InMemoryLedger;
use lastclick::service::{self, EngineHandle};
use lastclick::types::{Command, PlayerId};

const BANNER: &str = r#"
 _      _    ____ _____ ____ _     ___ ____ _  __
| |    / \  / ___|_   _/ ___| |   |_ _/ ___| |/ /
| |   / _ \ \___ \ | || |   | |    | | |   | ' /
| |__/ ___ \ ___) || || |___| |___ | | |___| . \
|_____/_/ \_\____/ |_| \____|_____|___\____|_|\_\

  Survival room engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("LASTCLICK_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load_or_default(&config_path)?;

    init_logging();

    println!("{BANNER}");
    let seed = cfg.seed();
    info!(
        config = %config_path,
        tick_ms = cfg.engine.tick_interval_ms,
        bots = cfg.bots.enabled,
        seed,
        "LASTCLICK starting up"
    );

    // -- Build the engine ------------------------------------------------

    let autoplay: Box<dyn AutoplayStrategy> = if cfg.bots.enabled {
        Box::new(SkillBots::new(
            cfg.bots.count,
            cfg.bots.join_delay_ms,
            cfg.bots.join_jitter_ms,
            seed.wrapping_add(1),
        ))
    } else {
        warn!("Bots disabled, rooms fill with real players only");
        Box::new(Disabled)
    };

    let bus = EventBus::new(cfg.events.capacity);
    let mut scheduler = Scheduler::new(
        cfg.scheduler_settings(seed),
        Box::new(InMemoryLedger::new(cfg.engine.starting_stars)),
        autoplay,
        bus,
    );
    scheduler
        .seed_rooms(&cfg.rooms.kinds, &cfg.rooms.tiers)
        .context("Failed to seed rooms")?;

    let events = scheduler.subscribe();
    let (handle, mut engine) =
        service::spawn(scheduler, cfg.tick_interval(), Arc::new(TokioClock::new()));

    tokio::spawn(log_events(events, cfg.events.echo_json));
    if cfg.demo.enabled {
        tokio::spawn(run_demo_player(handle.clone(), cfg.demo.clone()));
    }

    // -- Run until Ctrl+C ------------------------------------------------

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    info!("Engine running. Press Ctrl+C to stop.");

    let by_signal = tokio::select! {
        _ = &mut shutdown => true,
        result = &mut engine => {
            error!(result = ?result, "Engine task exited unexpectedly");
            false
        }
    };

    if by_signal {
        info!("Shutdown signal received.");
        if handle.shutdown().await.is_ok() {
            if let Err(e) = engine.await {
                error!(error = %e, "Engine task failed during shutdown");
            }
        }
    }

    info!("LASTCLICK shut down cleanly.");
    Ok(())
}

/// Initialise the tracing subscriber.
///
/// `RUST_LOG` overrides the default filter; `LASTCLICK_LOG_JSON` switches
/// to JSON lines.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lastclick=info"));

    if std::env::var("LASTCLICK_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}

/// Write engine events to the log until the bus closes. With `echo_json`
/// every event is also printed to stdout in its wire form.
async fn log_events(mut events: Subscription, echo_json: bool) {
    while let Some(envelope) = events.recv().await {
        if echo_json {
            match envelope.to_json() {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(seq = envelope.seq, error = %e, "Event not serialisable"),
            }
        }
        let seq = envelope.seq;
        match envelope.event {
            EngineEvent::RoundTransition(t) => {
                info!(seq, room = %t.room_id, from = %t.from, to = %t.to, "Round transition");
            }
            EngineEvent::Payout(p) => {
                info!(seq, room = %p.room_id, player = %p.player_id, rank = p.rank, amount = p.amount, "Payout");
            }
            EngineEvent::ShardCredit(s) => {
                debug!(seq, room = %s.room_id, player = %s.player_id, amount = s.amount, "Shards credited");
            }
            EngineEvent::Elimination(e) => {
                debug!(seq, room = %e.room_id, player = %e.player_id, alive = e.alive, "Elimination");
            }
            EngineEvent::Error(e) => {
                warn!(seq, player = %e.player_id, room = ?e.room_id, message = %e.message, "Player error");
            }
            EngineEvent::RoomList(rooms) => {
                debug!(seq, rooms = rooms.len(), "Room list");
            }
            other => {
                trace!(seq, kind = ?other.kind(), room = ?other.room_id(), "Event");
            }
        }
    }
}

/// Keep one scripted player seated in a room and pulsing.
async fn run_demo_player(handle: EngineHandle, demo: DemoConfig) {
    let player = PlayerId(demo.player_id);
    let clock = SystemClock;
    let mut interval = tokio::time::interval(Duration::from_millis(demo.pulse_interval_ms));

    loop {
        interval.tick().await;

        let seated = match handle.room_of(player).await {
            Ok(seated) => seated,
            Err(_) => break,
        };

        let cmd = match seated {
            Some(room) => Command::pulse(player, room, clock.now_ms()),
            None => {
                let rooms = match handle.rooms().await {
                    Ok(rooms) => rooms,
                    Err(_) => break,
                };
                let Some(room) = rooms
                    .into_iter()
                    .find(|r| r.kind == demo.kind && r.tier == demo.tier)
                else {
                    warn!(kind = %demo.kind, tier = demo.tier, "No room for demo player");
                    break;
                };
                info!(player = %player, room = %room.id, "Demo player joining");
                Command::join(player, room.id, clock.now_ms())
            }
        };

        if handle.dispatch(cmd).await.is_err() {
            break;
        }
    }
    debug!("Demo player stopped");
}
