//! # relaydrop-core
//!
//! Shared building blocks for the relaydrop file relay.
//!
//! This crate provides the types used by `relaydrop-engine` and the
//! `relaydrop` binary.
//!
//! ## Responsibilities
//!
//! - **Wire protocol**: fixed 4-byte identity and role tokens, the sender /
//!   receiver hello, and the filename header frame the relay writes to the
//!   receiver before any payload byte.
//!
//! - **Digests & secrets**: human-readable word secrets and the 40-byte
//!   hex digest that is the only thing the relay ever sees of them.
//!
//! - **Transport seam**: connection / listener / connector traits so the
//!   relay runs over TCP in production and in-memory pipes in tests.
//!
//! - **Error taxonomy**: [`error::RelayError`], shared by the relay and the
//!   clients.
//!
//! - **Filename handling**: sanitisation of the name a sender announces
//!   before a receiver writes it to disk.

pub mod digest;
pub mod error;
pub mod filename;
pub mod protocol;
pub mod secret;
pub mod transport;
