//! Volatility model: the per-room margin process.
//!
//! The margin ratio follows a biased random walk: a deterministic drift that
//! grows with tier and elapsed time, noise scaled by a tier-dependent
//! volatility coefficient, and a rare positive spike. It is clamped to
//! `[MARGIN_FLOOR, 1.0]` every tick; reaching 1.0 liquidates the room.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Lowest margin the random process can produce.
pub const MARGIN_FLOOR: f64 = 0.01;

/// Margin at which the room liquidates.
pub const LIQUIDATION_MARGIN: f64 = 1.0;

/// Probability per tick of a shock spike.
const SPIKE_CHANCE: f64 = 0.005;

/// Spike magnitude upper bound per tier level.
const SPIKE_SCALE: f64 = 0.05;

/// Noise centre below 0.5 biases the walk upward.
const NOISE_CENTRE: f64 = 0.48;

/// Per-tier volatility and drift coefficients. Drift is per 100 ms.
const VOL_PER_TIER: f64 = 0.008;
const DRIFT_PER_TIER: f64 = 0.0003;

/// Elapsed time over which the growth factor rises by 1.0.
const GROWTH_PERIOD_MS: f64 = 60_000.0;

/// Divisor of the multiplier's sinusoid argument.
const OSCILLATION_MS: f64 = 10_000.0;
const OSCILLATION_AMPLITUDE: f64 = 0.15;
const MULTIPLIER_FLOOR: f64 = 0.5;

/// Output of one model step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilitySample {
    pub margin_ratio: f64,
    pub volatility_mul: f64,
}

/// Stochastic margin process for one room's survival phase.
#[derive(Debug, Clone)]
pub struct VolatilityModel {
    margin: f64,
    vol: f64,
    drift: f64,
    elapsed_ms: i64,
    tier: u8,
    rng: ChaCha8Rng,
}

impl VolatilityModel {
    /// Fresh model for a room of `tier`, seeded for reproducibility.
    pub fn new(tier: u8, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let margin = 0.15 + rng.gen::<f64>() * 0.1;
        let level = f64::from(tier.max(1));
        Self {
            margin,
            vol: VOL_PER_TIER * level,
            drift: DRIFT_PER_TIER * level,
            elapsed_ms: 0,
            tier: tier.max(1),
            rng,
        }
    }

    /// Advance the process by `dt_ms` milliseconds.
    pub fn tick(&mut self, dt_ms: i64) -> VolatilitySample {
        let dt_ms = dt_ms.max(0);
        self.elapsed_ms += dt_ms;
        let growth = self.growth_factor();

        let noise = (self.rng.gen::<f64>() - NOISE_CENTRE) * self.vol * growth;
        let spike = if self.rng.gen_bool(SPIKE_CHANCE) {
            self.rng.gen::<f64>() * SPIKE_SCALE * f64::from(self.tier)
        } else {
            0.0
        };
        let drift = self.drift * (dt_ms as f64 / 100.0);

        self.margin = (self.margin + drift + noise + spike).clamp(MARGIN_FLOOR, LIQUIDATION_MARGIN);

        VolatilitySample {
            margin_ratio: self.margin,
            volatility_mul: self.multiplier(),
        }
    }

    /// Set the margin directly. Used by tests and the force-liquidation
    /// debug command only.
    pub fn force_margin(&mut self, value: f64) {
        self.margin = value.clamp(0.0, LIQUIDATION_MARGIN);
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed_ms
    }

    fn growth_factor(&self) -> f64 {
        1.0 + self.elapsed_ms as f64 / GROWTH_PERIOD_MS
    }

    fn multiplier(&self) -> f64 {
        let wave = 1.0 + (self.elapsed_ms as f64 / OSCILLATION_MS).sin() * OSCILLATION_AMPLITUDE;
        (self.growth_factor() * wave).max(MULTIPLIER_FLOOR)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
