//! Account key management for the transaction executor.
//!
//! Each [`AccountInterface`] holds the key material of exactly one account.
//! The [`AccountService`] indexes them by address, so signing for one
//! account never touches another account's key.

use alloy_consensus::{TxEnvelope, TypedTransaction};
use alloy_dyn_abi::TypedData;
use alloy_primitives::{Address, Signature, B256};
use async_trait::async_trait;
use executor_types::{ConfigSchema, ImplementationRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// The signing operation itself failed.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// A configured key is invalid or malformed.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// No key is configured for the account.
	#[error("No key material for account {0}")]
	UnknownAccount(Address),
	/// The key service could not be reached.
	#[error("Key service unavailable: {0}")]
	Unavailable(String),
}

impl AccountError {
	/// Whether retrying the same operation may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, AccountError::Unavailable(_))
	}
}

/// Interface of a single signing account.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this account implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Address controlled by this account.
	fn address(&self) -> Address;

	/// Signs a raw 32-byte digest.
	async fn sign_hash(&self, hash: &B256) -> Result<Signature, AccountError>;

	/// Signs `message` with EIP-191 personal-message hashing.
	async fn sign_message(&self, message: &[u8]) -> Result<Signature, AccountError>;

	/// Signs an EIP-712 typed data document.
	async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<Signature, AccountError>;

	/// Signs a transaction and returns the signed envelope.
	async fn sign_transaction(&self, tx: TypedTransaction) -> Result<TxEnvelope, AccountError>;
}

/// Type alias for account factory functions.
///
/// One implementation table may configure several accounts; each is
/// returned as its own [`AccountInterface`].
pub type AccountFactory =
	fn(&toml::Value) -> Result<Vec<Box<dyn AccountInterface>>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Get all registered account implementations.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Accounts available to the executor, indexed by address.
pub struct AccountService {
	accounts: HashMap<Address, Arc<dyn AccountInterface>>,
}

impl AccountService {
	/// Indexes `accounts` by address. A later account with the same address
	/// replaces an earlier one.
	pub fn new(accounts: Vec<Box<dyn AccountInterface>>) -> Self {
		let accounts = accounts
			.into_iter()
			.map(|account| {
				let account: Arc<dyn AccountInterface> = Arc::from(account);
				(account.address(), account)
			})
			.collect();
		Self { accounts }
	}

	/// Returns the signer for `address` only.
	pub fn signer(&self, address: &Address) -> Result<Arc<dyn AccountInterface>, AccountError> {
		self.accounts
			.get(address)
			.cloned()
			.ok_or(AccountError::UnknownAccount(*address))
	}

	pub fn addresses(&self) -> Vec<Address> {
		self.accounts.keys().copied().collect()
	}

	pub fn contains(&self, address: &Address) -> bool {
		self.accounts.contains_key(address)
	}
}
