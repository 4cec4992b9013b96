//!
//! Utility module for the randomness agent.
//!
//! Re-exports formatting helpers used in log lines and API responses.
/// Utility functions for formatting and display
pub mod index;

pub use index::{TOKEN_DECIMALS, format_token_amount, short_hash};
