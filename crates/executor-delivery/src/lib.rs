//! Chain access for the transaction executor.
//!
//! A [`DeliveryInterface`] wraps one RPC endpoint of one chain. The
//! [`ProviderResolver`] pools endpoints per chain and privacy tier and hands
//! out one that answered a liveness check at acquisition time.

use alloy_primitives::{Address, Bytes};
use alloy_rpc_types::TransactionRequest;
use async_trait::async_trait;
use executor_types::{
	ConfigSchema, FeeEstimate, ImplementationRegistry, TransactionHash, TransactionReceipt,
};
use thiserror::Error;

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}
pub mod resolver;

pub use resolver::{ProviderResolver, ProviderTier};

/// Errors that can occur during chain access.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// The endpoint could not be reached or answered with garbage.
	#[error("Network error: {0}")]
	Network(String),
	/// The node refused the transaction (insufficient funds, nonce too low...).
	#[error("Transaction rejected: {0}")]
	Rejected(String),
	/// No live endpoint is configured for the chain and tier.
	#[error("No provider available for chain {0}")]
	NoProviderAvailable(u64),
	/// Endpoint configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// One RPC endpoint of one chain.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	/// Returns the configuration schema for this delivery implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Endpoint URL, for logs.
	fn endpoint(&self) -> String;

	/// Chain id reported by the endpoint. Used as the liveness check.
	async fn chain_id(&self) -> Result<u64, DeliveryError>;

	/// Transaction count of `address` including pending transactions.
	async fn pending_nonce(&self, address: Address) -> Result<u64, DeliveryError>;

	/// Code deployed at `address`; empty for plain accounts.
	async fn get_code(&self, address: Address) -> Result<Bytes, DeliveryError>;

	/// Current EIP-1559 fee suggestion.
	async fn estimate_fees(&self) -> Result<FeeEstimate, DeliveryError>;

	/// Gas needed to execute `request`.
	async fn estimate_gas(&self, request: TransactionRequest) -> Result<u64, DeliveryError>;

	/// Broadcasts an EIP-2718 encoded signed transaction.
	async fn send_raw(&self, raw: &[u8]) -> Result<TransactionHash, DeliveryError>;

	/// Receipt of a transaction, or `None` while it is not mined.
	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;

	async fn get_block_number(&self) -> Result<u64, DeliveryError>;
}

/// Type alias for delivery factory functions.
///
/// The table carries `rpc_url` and the expected `chain_id` of the endpoint.
pub type DeliveryFactory = fn(&toml::Value) -> Result<Box<dyn DeliveryInterface>, DeliveryError>;

/// Registry trait for delivery implementations.
pub trait DeliveryRegistry: ImplementationRegistry<Factory = DeliveryFactory> {}

/// Get all registered delivery implementations.
pub fn get_all_implementations() -> Vec<(&'static str, DeliveryFactory)> {
	use implementations::evm::alloy;

	vec![(alloy::Registry::NAME, alloy::Registry::factory())]
}
