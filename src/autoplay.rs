//! Autoplay: synthetic players that fill rooms and pulse on their own.
//!
//! The scheduler asks an [`AutoplayStrategy`] two questions: how many bots
//! to send into an under-populated room (and when), and whether a given bot
//! pulses on this tick. Bots then act through the ordinary join and pulse
//! paths, so nothing else in the engine knows they are synthetic.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::tiers::TierConfig;
use crate::types::PlayerId;

/// Lowest and span of the skill range bots are drawn from.
const SKILL_MIN: f64 = 0.3;
const SKILL_SPAN: f64 = 0.6;

/// Scale of the per-attempt miss chance once a bot decides to pulse.
const MISS_SCALE: f64 = 0.15;

/// One bot join to schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotJoinPlan {
    /// Delay after the triggering human join.
    pub delay_ms: i64,
    pub skill: f64,
}

/// What a bot knows when deciding whether to pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotTurn {
    pub player_id: PlayerId,
    pub skill: f64,
    pub since_pulse_ms: i64,
    pub pulse_window_ms: i64,
}

/// Pluggable bot behaviour.
#[cfg_attr(test, mockall::automock)]
pub trait AutoplayStrategy: Send {
    /// Bot joins for a waiting room that currently seats `seated` players.
    fn plan_fill(&mut self, tier: &TierConfig, seated: usize) -> Vec<BotJoinPlan>;

    /// Whether the bot pulses now.
    fn should_pulse(&mut self, turn: &BotTurn) -> bool;
}

// ---------------------------------------------------------------------------
// SkillBots
// ---------------------------------------------------------------------------

/// Default strategy: each bot gets a random skill, waits for that fraction
/// of the pulse window, then pulses with a small skill-dependent chance of
/// fumbling each attempt.
#[derive(Debug)]
pub struct SkillBots {
    bot_count: usize,
    join_delay_ms: i64,
    join_jitter_ms: i64,
    rng: ChaCha8Rng,
}

impl SkillBots {
    pub fn new(bot_count: usize, join_delay_ms: i64, join_jitter_ms: i64, seed: u64) -> Self {
        Self {
            bot_count,
            join_delay_ms: join_delay_ms.max(0),
            join_jitter_ms: join_jitter_ms.max(0),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl AutoplayStrategy for SkillBots {
    fn plan_fill(&mut self, tier: &TierConfig, seated: usize) -> Vec<BotJoinPlan> {
        let count = self.bot_count.min(tier.max_players.saturating_sub(seated));
        (0..count)
            .map(|i| {
                let jitter = if self.join_jitter_ms > 0 {
                    self.rng.gen_range(0..=self.join_jitter_ms)
                } else {
                    0
                };
                BotJoinPlan {
                    delay_ms: (i as i64 + 1) * self.join_delay_ms + jitter,
                    skill: SKILL_MIN + self.rng.gen::<f64>() * SKILL_SPAN,
                }
            })
            .collect()
    }

    fn should_pulse(&mut self, turn: &BotTurn) -> bool {
        let threshold = turn.pulse_window_ms as f64 * turn.skill;
        if (turn.since_pulse_ms as f64) <= threshold {
            return false;
        }
        let miss = (1.0 - turn.skill) * MISS_SCALE;
        self.rng.gen::<f64>() > miss
    }
}

/// No bots at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct Disabled;

impl AutoplayStrategy for Disabled {
    fn plan_fill(&mut self, _tier: &TierConfig, _seated: usize) -> Vec<BotJoinPlan> {
        Vec::new()
    }

    fn should_pulse(&mut self, _turn: &BotTurn) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::TierTable;

    fn turn(skill: f64, since: i64) -> BotTurn {
        BotTurn {
            player_id: PlayerId(1 << 40),
            skill,
            since_pulse_ms: since,
            pulse_window_ms: 5_000,
        }
    }

    #[test]
    fn test_plan_fill_respects_room_capacity() {
        let mut bots = SkillBots::new(8, 500, 500, 1);
        let tier1 = TierTable::get(1).unwrap();
        assert_eq!(bots.plan_fill(tier1, 1).len(), 8);
        assert_eq!(bots.plan_fill(tier1, 15).len(), 5);
        assert!(bots.plan_fill(tier1, 20).is_empty());
    }

    #[test]
    fn test_plan_fill_staggers_and_draws_skill() {
        let mut bots = SkillBots::new(4, 500, 500, 9);
        let plans = bots.plan_fill(TierTable::get(2).unwrap(), 1);
        for (i, plan) in plans.iter().enumerate() {
            let base = (i as i64 + 1) * 500;
            assert!(plan.delay_ms >= base && plan.delay_ms <= base + 500);
            assert!(plan.skill >= SKILL_MIN && plan.skill < SKILL_MIN + SKILL_SPAN);
        }
    }

    #[test]
    fn test_no_jitter_is_exact() {
        let mut bots = SkillBots::new(3, 250, 0, 2);
        let delays: Vec<_> = bots
            .plan_fill(TierTable::get(1).unwrap(), 0)
            .iter()
            .map(|p| p.delay_ms)
            .collect();
        assert_eq!(delays, vec![250, 500, 750]);
    }

    #[test]
    fn test_bot_waits_for_threshold() {
        let mut bots = SkillBots::new(1, 0, 0, 3);
        assert!(!bots.should_pulse(&turn(0.5, 2_000)));
        assert!(!bots.should_pulse(&turn(0.5, 2_500)));
    }

    #[test]
    fn test_skilled_bot_rarely_misses() {
        let mut bots = SkillBots::new(1, 0, 0, 4);
        let pulses = (0..1_000).filter(|_| bots.should_pulse(&turn(0.9, 4_600))).count();
        // Miss chance is 1.5% per attempt.
        assert!(pulses > 950, "pulsed {pulses} times");
    }

    #[test]
    fn test_same_seed_same_plan() {
        let tier = TierTable::get(3).unwrap();
        let a = SkillBots::new(5, 500, 500, 77).plan_fill(tier, 2);
        let b = SkillBots::new(5, 500, 500, 77).plan_fill(tier, 2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_disabled_does_nothing() {
        let mut off = Disabled;
        assert!(off.plan_fill(TierTable::get(1).unwrap(), 0).is_empty());
        assert!(!off.should_pulse(&turn(0.9, 10_000)));
    }
}
