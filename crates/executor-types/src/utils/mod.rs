//! Formatting and time helpers shared across crates.

pub mod formatting;
pub mod helpers;

pub use formatting::{format_token_amount, truncate_id, with_0x_prefix, without_0x_prefix};
pub use helpers::current_timestamp;
