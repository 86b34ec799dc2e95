//! ScanLink edge agent: library crate for the device session manager.
//!
//! Re-exports all modules so external crates (e.g. `sl-e2e-tests`) can
//! drive the `Supervisor` with mock collaborators.

pub mod clock;
pub mod config;
pub mod credential;
pub mod encoder;
pub mod error;
pub mod inbox;
pub mod network;
pub mod scanner;
pub mod storage;
pub mod supervisor;
