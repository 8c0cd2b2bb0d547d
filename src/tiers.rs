//! Tier table.
//!
//! Static, process-wide configuration keyed by integer tier. A room's tier
//! fixes its entry cost, player bounds, pulse window, and survival length.

use serde::Serialize;

use crate::types::EngineError;

/// One row of the tier table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierConfig {
    pub tier: u8,
    /// Entry fee in stars, charged when the countdown starts.
    pub entry_cost: u64,
    pub min_players: usize,
    pub max_players: usize,
    /// Time a player has to pulse before elimination.
    pub pulse_window_ms: i64,
    /// Nominal timer extension granted per pulse (informational).
    pub base_extension_ms: i64,
    /// Total survival phase duration.
    pub survival_time_ms: i64,
    pub prestige_multiplier: f64,
}

static TIERS: [TierConfig; 3] = [
    TierConfig {
        tier: 1,
        entry_cost: 5,
        min_players: 3,
        max_players: 20,
        pulse_window_ms: 5_000,
        base_extension_ms: 3_000,
        survival_time_ms: 120_000,
        prestige_multiplier: 1.0,
    },
    TierConfig {
        tier: 2,
        entry_cost: 20,
        min_players: 5,
        max_players: 30,
        pulse_window_ms: 4_000,
        base_extension_ms: 2_500,
        survival_time_ms: 150_000,
        prestige_multiplier: 1.5,
    },
    TierConfig {
        tier: 3,
        entry_cost: 100,
        min_players: 5,
        max_players: 50,
        pulse_window_ms: 3_000,
        base_extension_ms: 2_000,
        survival_time_ms: 180_000,
        prestige_multiplier: 2.0,
    },
];

/// Read-only lookup over the static tier rows.
pub struct TierTable;

impl TierTable {
    /// Look up a tier.
    pub fn get(tier: u8) -> Result<&'static TierConfig, EngineError> {
        TIERS
            .iter()
            .find(|t| t.tier == tier)
            .ok_or(EngineError::UnknownTier(tier))
    }

    /// All tiers in ascending order.
    pub fn all() -> &'static [TierConfig] {
        &TIERS
    }
}
