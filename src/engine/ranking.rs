//! Ranking and payout math.
//!
//! Pure functions over round results: finishing order, pool splits, and
//! consolation shards. Money uses `Decimal` so exact splits floor exactly.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

use crate::types::PlayerId;

/// Pool share for ranks 1, 2, 3.
pub const PAYOUT_SPLITS: [Decimal; 3] = [dec!(0.60), dec!(0.25), dec!(0.15)];

/// A finisher as seen by the ranking pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Finisher {
    pub player_id: PlayerId,
    /// Still active when the round ended.
    pub survived_round: bool,
    pub time_survived_ms: i64,
}

/// Order finishers best-first.
///
/// Round survivors rank above everyone else; within each group a longer
/// survival time ranks higher. Equal times fall back to ascending player id
/// so the order is total and reproducible.
pub fn rank(finishers: &[Finisher]) -> Vec<PlayerId> {
    let mut sorted = finishers.to_vec();
    sorted.sort_by(|a, b| {
        b.survived_round
            .cmp(&a.survived_round)
            .then(b.time_survived_ms.cmp(&a.time_survived_ms))
            .then(a.player_id.cmp(&b.player_id))
    });
    sorted.into_iter().map(|f| f.player_id).collect()
}

/// Payout for a 1-based `rank`, floored to whole stars. Ranks past 3 get 0.
pub fn payout_for_rank(pool: u64, rank: usize) -> u64 {
    match rank.checked_sub(1).and_then(|i| PAYOUT_SPLITS.get(i)) {
        Some(split) => floor_units(Decimal::from(pool) * *split),
        None => 0,
    }
}

/// Consolation shards for a non-winning participant.
pub fn consolation_shards(entry_cost: u64, shard_rate: Decimal) -> u64 {
    floor_units(Decimal::from(entry_cost) * shard_rate)
}

fn floor_units(amount: Decimal) -> u64 {
    amount.floor().to_u64().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
