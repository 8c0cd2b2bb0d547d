//! LASTCLICK: survival room simulation engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod autoplay;
pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod service;
pub mod tiers;
pub mod types;
