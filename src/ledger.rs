//! Ledger: player currency balances.
//!
//! The engine never owns player accounts; it debits entry fees, credits
//! payouts, and grants consolation shards through the [`Ledger`] seam.
//! [`InMemoryLedger`] backs the standalone engine and the tests.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::types::PlayerId;

// ---------------------------------------------------------------------------
// Balance
// ---------------------------------------------------------------------------

/// Currency totals for one player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Entry currency, spent on room fees and won from pools.
    pub stars: u64,
    /// Consolation currency.
    pub shards: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient stars for player {player}: need {needed}, have {available}")]
    InsufficientStars {
        player: PlayerId,
        needed: u64,
        available: u64,
    },
}

// ---------------------------------------------------------------------------
// Ledger trait
// ---------------------------------------------------------------------------

/// Abstraction over the player-account collaborator.
pub trait Ledger: Send {
    /// Current balance. Unknown players report the opening balance.
    fn balance(&self, player: PlayerId) -> Balance;

    /// Remove `amount` stars. Fails without side effects if the player
    /// cannot cover it.
    fn debit_stars(&mut self, player: PlayerId, amount: u64) -> Result<Balance, LedgerError>;

    fn credit_stars(&mut self, player: PlayerId, amount: u64) -> Balance;

    fn credit_shards(&mut self, player: PlayerId, amount: u64) -> Balance;

    /// Open an account with a specific star balance if it does not exist yet.
    fn open_account(&mut self, player: PlayerId, stars: u64);

    fn can_afford(&self, player: PlayerId, amount: u64) -> bool {
        self.balance(player).stars >= amount
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Hash-map ledger. Accounts open lazily with `starting_stars`.
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    accounts: HashMap<PlayerId, Balance>,
    starting_stars: u64,
}

impl InMemoryLedger {
    pub fn new(starting_stars: u64) -> Self {
        Self {
            accounts: HashMap::new(),
            starting_stars,
        }
    }

    fn account(&mut self, player: PlayerId) -> &mut Balance {
        let starting_stars = self.starting_stars;
        self.accounts.entry(player).or_insert(Balance {
            stars: starting_stars,
            shards: 0,
        })
    }

    /// Number of accounts that have been touched.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl Ledger for InMemoryLedger {
    fn balance(&self, player: PlayerId) -> Balance {
        self.accounts.get(&player).copied().unwrap_or(Balance {
            stars: self.starting_stars,
            shards: 0,
        })
    }

    fn debit_stars(&mut self, player: PlayerId, amount: u64) -> Result<Balance, LedgerError> {
        let account = self.account(player);
        if account.stars < amount {
            return Err(LedgerError::InsufficientStars {
                player,
                needed: amount,
                available: account.stars,
            });
        }
        account.stars -= amount;
        debug!(player = %player, amount, stars = account.stars, "Stars debited");
        Ok(*account)
    }

    fn credit_stars(&mut self, player: PlayerId, amount: u64) -> Balance {
        let account = self.account(player);
        account.stars += amount;
        debug!(player = %player, amount, stars = account.stars, "Stars credited");
        *account
    }

    fn credit_shards(&mut self, player: PlayerId, amount: u64) -> Balance {
        let account = self.account(player);
        account.shards += amount;
        debug!(player = %player, amount, shards = account.shards, "Shards credited");
        *account
    }

    fn open_account(&mut self, player: PlayerId, stars: u64) {
        self.accounts.entry(player).or_insert(Balance { stars, shards: 0 });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
