//! # relaydrop-engine
//!
//! Runtime logic for relaydrop, used by the CLI and the integration tests.
//!
//! This crate provides:
//! - **Relay server**: accept loop, per-connection handshake tasks, pairing
//!   table, relay workers and the join queue that reaps them
//! - **Shutdown sequence**: stop accepting, close unmatched senders, then
//!   drain or cancel running transfers
//! - **Clients**: the sender and receiver sides of the protocol
//! - **Transport implementation**: plain TCP behind the `Connection` traits
//! - **Event bus**: relay events consumed by CLI loggers and tests

pub mod client;
pub mod config;
pub mod event;
pub mod handshake;
pub mod pairing;
pub mod reaper;
pub mod server;
pub mod tcp;
pub mod worker;

#[cfg(test)]
mod memory;

pub use config::{RelayConfig, ShutdownPolicy};
pub use event::{RelayEvent, ShutdownReport};
pub use server::{Relay, RelayHandle, RelayServer};
