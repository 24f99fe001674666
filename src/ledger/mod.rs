//! XRP Ledger integration module
//!
//! This module provides the WebSocket client for a rippled node, the shared
//! connection used by every other component, the binary transaction codec and
//! the address/seed encodings. Everything that talks to the ledger network
//! goes through a [`LedgerConnection`].

/// Classic address and family seed encodings
pub mod address;
/// WebSocket JSON client for rippled
mod client;
/// Canonical binary serialization and signing of transactions
pub mod codec;
/// Shared, lazily established connection and composite ledger operations
mod connection;
/// Test network faucet client
mod faucet;
/// Type definitions for ledger requests and outcomes
mod types;

pub use client::{LedgerApi, RippledClient};
pub use connection::{LedgerConnection, LedgerSettings};
pub use faucet::FaucetClient;
pub use types::*;
