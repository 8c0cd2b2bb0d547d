//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! field has a default, so a partial file (or none at all) still yields a
//! runnable engine.

use anyhow::{bail, ensure, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::time::Duration;

use crate::engine::scheduler::SchedulerSettings;
use crate::tiers::TierTable;
use crate::types::RoomKind;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub bots: BotsConfig,
    pub rooms: RoomsConfig,
    pub events: EventsConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub tick_interval_ms: u64,
    pub countdown_ms: i64,
    pub round_complete_delay_ms: i64,
    /// Fraction of the entry cost paid back as shards.
    pub shard_rate: Decimal,
    /// Opening star balance of a new player account.
    pub starting_stars: u64,
    /// Fixed master seed. Unset means seeded from the clock.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            countdown_ms: 5_000,
            round_complete_delay_ms: 15_000,
            shard_rate: dec!(0.5),
            starting_stars: 500,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BotsConfig {
    pub enabled: bool,
    /// Bots sent into a room when a human joins it.
    pub count: usize,
    pub join_delay_ms: i64,
    pub join_jitter_ms: i64,
    pub starting_stars: u64,
}

impl Default for BotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 8,
            join_delay_ms: 500,
            join_jitter_ms: 500,
            starting_stars: 1_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RoomsConfig {
    pub kinds: Vec<RoomKind>,
    pub tiers: Vec<u8>,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            kinds: RoomKind::ALL.to_vec(),
            tiers: vec![1, 2, 3],
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered per subscriber before the oldest are dropped.
    pub capacity: usize,
    /// Print every event to stdout as one JSON line.
    pub echo_json: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: 1_024,
            echo_json: false,
        }
    }
}

/// A scripted local player for running the binary on its own.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DemoConfig {
    pub enabled: bool,
    pub player_id: i64,
    pub kind: RoomKind,
    pub tier: u8,
    pub pulse_interval_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            player_id: 1,
            kind: RoomKind::Alpha,
            tier: 1,
            pulse_interval_ms: 2_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read config file: {path}")),
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.engine.tick_interval_ms > 0, "engine.tick_interval_ms must be positive");
        ensure!(self.engine.countdown_ms >= 0, "engine.countdown_ms must not be negative");
        ensure!(
            self.engine.round_complete_delay_ms >= 0,
            "engine.round_complete_delay_ms must not be negative"
        );
        ensure!(
            self.engine.shard_rate >= Decimal::ZERO && self.engine.shard_rate <= Decimal::ONE,
            "engine.shard_rate must be within [0, 1], got {}",
            self.engine.shard_rate
        );
        ensure!(self.events.capacity > 0, "events.capacity must be positive");
        ensure!(
            self.bots.join_delay_ms >= 0 && self.bots.join_jitter_ms >= 0,
            "bot join delays must not be negative"
        );
        for &tier in &self.rooms.tiers {
            if TierTable::get(tier).is_err() {
                bail!("rooms.tiers contains unknown tier {tier}");
            }
        }
        if self.demo.enabled {
            TierTable::get(self.demo.tier)
                .with_context(|| format!("demo.tier {} is not a known tier", self.demo.tier))?;
            ensure!(self.demo.pulse_interval_ms > 0, "demo.pulse_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.engine.tick_interval_ms)
    }

    /// The configured seed, or one taken from the clock.
    pub fn seed(&self) -> u64 {
        self.engine
            .seed
            .unwrap_or_else(|| chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64)
    }

    pub fn scheduler_settings(&self, seed: u64) -> SchedulerSettings {
        SchedulerSettings {
            countdown_ms: self.engine.countdown_ms,
            round_complete_delay_ms: self.engine.round_complete_delay_ms,
            shard_rate: self.engine.shard_rate,
            bot_starting_stars: self.bots.starting_stars,
            seed,
        }
    }
}
