//! Network configuration types.
//!
//! Each chain lists its public RPC endpoints, optionally a set of private
//! relay endpoints, and optionally the delegation contract accounts on that
//! chain may be upgraded to.

use alloy_primitives::Address;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Configuration for a single chain.
///
/// # Fields
///
/// * `rpc_urls` - Public endpoints, tried in order
/// * `private_rpc_urls` - Private relay endpoints; empty when the chain has none
/// * `delegation_contract` - Contract used for bundled delegation signing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkConfig {
	pub rpc_urls: Vec<String>,
	#[serde(default)]
	pub private_rpc_urls: Vec<String>,
	#[serde(default)]
	pub delegation_contract: Option<Address>,
}

impl NetworkConfig {
	pub fn supports_private(&self) -> bool {
		!self.private_rpc_urls.is_empty()
	}
}

/// Chain id to network configuration.
pub type NetworksConfig = HashMap<u64, NetworkConfig>;

/// Deserializes networks whose TOML table keys are chain ids as strings.
///
/// # Errors
///
/// Returns a deserialization error if a key is not a valid u64.
pub fn deserialize_networks<'de, D>(deserializer: D) -> Result<NetworksConfig, D::Error>
where
	D: Deserializer<'de>,
{
	HashMap::<String, NetworkConfig>::deserialize(deserializer)?
		.into_iter()
		.map(|(key, network)| {
			key.parse::<u64>()
				.map(|chain_id| (chain_id, network))
				.map_err(|e| serde::de::Error::custom(format!("Invalid chain_id '{}': {}", key, e)))
		})
		.collect()
}
