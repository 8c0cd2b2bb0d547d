//! Core engine: rooms, their clocks, and the scheduler that drives them.

pub mod ranking;
pub mod room;
pub mod scheduler;
pub mod timers;
pub mod volatility;
