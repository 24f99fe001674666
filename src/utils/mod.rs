//!
//! Utility module for the ledger core.
//!
//! Re-exports amount conversion and formatting helpers used throughout the codebase.
/// Amount conversion and display helpers
pub mod index;

pub use index::{drops_to_xrp, format_token_amount, issued_value, xrp_to_drops, XRP_DECIMALS};
