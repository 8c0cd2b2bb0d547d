//! Integration tests: whole rounds through the scheduler and the running
//! engine service.

mod harness;
mod scenarios;
mod service;
