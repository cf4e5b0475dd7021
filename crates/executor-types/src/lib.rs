//! Shared data model for the transaction executor.
//!
//! Every crate in the workspace speaks in terms of the types defined here:
//! the canonical sign request, transaction records, allowlist policy data,
//! delegation results, notification and response payloads, and the
//! configuration-schema helpers used to validate implementation tables.

/// Allowlist policy data for deep-link requests.
pub mod allowlist;
/// HTTP API payloads and error mapping.
pub mod api;
/// Delegation status and EIP-7702 designator helpers.
pub mod delegation;
/// Event types published on the engine's event bus.
pub mod events;
/// Network configuration types.
pub mod networks;
/// User-facing notification events.
pub mod notification;
/// Self-registering implementation registries.
pub mod registry;
/// Canonical sign requests and their raw inbound shapes.
pub mod request;
/// Origin response payloads (JSON-RPC, webhook, completion).
pub mod response;
/// Redacted secret values.
pub mod secret_string;
/// Storage namespaces.
pub mod storage;
/// Transaction hashes, receipts and persisted records.
pub mod transaction;
/// Formatting and time helpers.
pub mod utils;
/// Configuration schema validation.
pub mod validation;

pub use allowlist::*;
pub use api::*;
pub use delegation::*;
pub use events::*;
pub use networks::{NetworkConfig, NetworksConfig};
pub use notification::*;
pub use registry::ImplementationRegistry;
pub use request::*;
pub use response::*;
pub use secret_string::SecretString;
pub use storage::*;
pub use transaction::*;
pub use utils::{
	current_timestamp, format_token_amount, truncate_id, with_0x_prefix, without_0x_prefix,
};
pub use validation::*;

pub use alloy_primitives::{Address, Bytes, U256};
