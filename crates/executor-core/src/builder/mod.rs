//! Builder for constructing execution engines.
//!
//! Composes an [`ExecutionEngine`] from configuration and factory functions
//! for the pluggable storage, account and delivery implementations. Any
//! component can be supplied directly instead, which is how tests inject
//! fakes.

use crate::allowlist::AllowlistValidator;
use crate::engine::ExecutionEngine;
use crate::monitoring::transaction::DEFAULT_POLL_INTERVAL;
use crate::signer::{ApprovalGate, ChannelApprovalGate, TransactionSigner};
use executor_account::{AccountFactory, AccountInterface, AccountService};
use executor_config::Config;
use executor_delivery::{DeliveryFactory, ProviderResolver};
use executor_storage::{StorageFactory, StorageInterface, StorageService};
use executor_types::Allowlist;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Timeout of the liveness check run when an endpoint is handed out.
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for the pluggable components, keyed by implementation
/// name.
#[derive(Default)]
pub struct ExecutorFactories {
	pub storage_factories: HashMap<String, StorageFactory>,
	pub account_factories: HashMap<String, AccountFactory>,
	pub delivery_factory: Option<DeliveryFactory>,
}

/// Builder for an [`ExecutionEngine`] with pluggable implementations.
pub struct ExecutorBuilder {
	config: Config,
	storage: Option<Box<dyn StorageInterface>>,
	accounts: Option<Vec<Box<dyn AccountInterface>>>,
	providers: Option<ProviderResolver>,
	approvals: Option<Arc<dyn ApprovalGate>>,
	allowlist: Option<Allowlist>,
	poll_interval: Duration,
}

impl ExecutorBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage: None,
			accounts: None,
			providers: None,
			approvals: None,
			allowlist: None,
			poll_interval: DEFAULT_POLL_INTERVAL,
		}
	}

	/// Uses `storage` instead of the configured storage implementation.
	pub fn with_storage(mut self, storage: Box<dyn StorageInterface>) -> Self {
		self.storage = Some(storage);
		self
	}

	/// Uses `accounts` instead of the configured account implementation.
	pub fn with_accounts(mut self, accounts: Vec<Box<dyn AccountInterface>>) -> Self {
		self.accounts = Some(accounts);
		self
	}

	/// Uses `providers` instead of endpoints built from the network config.
	pub fn with_providers(mut self, providers: ProviderResolver) -> Self {
		self.providers = Some(providers);
		self
	}

	/// Uses `approvals` instead of a [`ChannelApprovalGate`].
	pub fn with_approval_gate(mut self, approvals: Arc<dyn ApprovalGate>) -> Self {
		self.approvals = Some(approvals);
		self
	}

	/// Uses `allowlist` instead of loading the configured file.
	pub fn with_allowlist(mut self, allowlist: Allowlist) -> Self {
		self.allowlist = Some(allowlist);
		self
	}

	pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
		self.poll_interval = poll_interval;
		self
	}

	/// Builds the engine, creating every component not supplied directly
	/// through `factories`.
	pub async fn build(self, factories: ExecutorFactories) -> Result<ExecutionEngine, BuilderError> {
		let storage_backend = match self.storage {
			Some(storage) => storage,
			None => load_storage(&self.config, &factories.storage_factories)?,
		};
		let storage = Arc::new(StorageService::new(storage_backend));

		let accounts = match self.accounts {
			Some(accounts) => accounts,
			None => load_accounts(&self.config, &factories.account_factories)?,
		};
		if accounts.is_empty() {
			return Err(BuilderError::Config(
				"No account implementations available".to_string(),
			));
		}
		let accounts = Arc::new(AccountService::new(accounts));
		tracing::info!(component = "account", accounts = accounts.addresses().len(), "Loaded");

		let providers = match self.providers {
			Some(providers) => providers,
			None => {
				let factory = factories
					.delivery_factory
					.ok_or_else(|| BuilderError::MissingComponent("delivery".to_string()))?;
				ProviderResolver::from_networks(&self.config.networks, factory, CHECK_TIMEOUT)
					.map_err(|e| {
						BuilderError::Config(format!("Failed to create delivery endpoints: {}", e))
					})?
			},
		};
		for (chain_id, network) in &self.config.networks {
			tracing::info!(
				component = "delivery",
				chain_id,
				public = network.rpc_urls.len(),
				private = network.private_rpc_urls.len(),
				"Loaded"
			);
		}

		let approvals = self.approvals.unwrap_or_else(|| {
			Arc::new(ChannelApprovalGate::new(Duration::from_secs(
				self.config.executor.approval_timeout_seconds,
			)))
		});

		let allowlist = match self.allowlist {
			Some(allowlist) => AllowlistValidator::new(allowlist),
			None => AllowlistValidator::load(self.config.allowlist.path.as_deref()).await,
		};

		let signer = Arc::new(TransactionSigner::new(accounts, approvals));

		Ok(ExecutionEngine::new(
			self.config,
			storage,
			Arc::new(providers),
			signer,
			Arc::new(allowlist),
			self.poll_interval,
		))
	}
}

fn load_storage(
	config: &Config,
	factories: &HashMap<String, StorageFactory>,
) -> Result<Box<dyn StorageInterface>, BuilderError> {
	let primary = &config.storage.primary;
	let table = config
		.storage
		.implementations
		.get(primary)
		.ok_or_else(|| BuilderError::MissingComponent(format!("storage '{}'", primary)))?;
	let factory = factories.get(primary).ok_or_else(|| {
		BuilderError::Config(format!("Unknown storage implementation '{}'", primary))
	})?;

	match factory(table) {
		Ok(implementation) => {
			tracing::info!(component = "storage", implementation = %primary, enabled = true, "Loaded");
			Ok(implementation)
		},
		Err(e) => {
			tracing::error!(
				component = "storage",
				implementation = %primary,
				error = %e,
				"Failed to create storage implementation"
			);
			Err(BuilderError::Config(format!(
				"Failed to create storage implementation '{}': {}",
				primary, e
			)))
		},
	}
}

fn load_accounts(
	config: &Config,
	factories: &HashMap<String, AccountFactory>,
) -> Result<Vec<Box<dyn AccountInterface>>, BuilderError> {
	let primary = &config.account.primary;
	let table = config
		.account
		.implementations
		.get(primary)
		.ok_or_else(|| BuilderError::MissingComponent(format!("account '{}'", primary)))?;
	let factory = factories.get(primary).ok_or_else(|| {
		BuilderError::Config(format!("Unknown account implementation '{}'", primary))
	})?;

	factory(table).map_err(|e| {
		tracing::error!(
			component = "account",
			implementation = %primary,
			error = %e,
			"Failed to create account implementation"
		);
		BuilderError::Config(format!(
			"Failed to create account implementation '{}': {}",
			primary, e
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use executor_config::builders::ConfigBuilder;
	use executor_storage::implementations::memory;
	use executor_types::ImplementationRegistry;

	const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	fn factories() -> ExecutorFactories {
		let mut factories = ExecutorFactories::default();
		factories.storage_factories.insert(
			memory::Registry::NAME.to_string(),
			memory::Registry::factory(),
		);
		factories.account_factories.insert(
			executor_account::implementations::local::Registry::NAME.to_string(),
			executor_account::implementations::local::Registry::factory(),
		);
		factories
	}

	fn config_with_tables() -> Config {
		let mut config = ConfigBuilder::new().build();
		config.storage.implementations.insert(
			"memory".to_string(),
			toml::Value::Table(toml::map::Map::new()),
		);
		let mut local = toml::map::Map::new();
		local.insert("private_key".to_string(), toml::Value::String(KEY.to_string()));
		config
			.account
			.implementations
			.insert("local".to_string(), toml::Value::Table(local));
		config
	}

	#[tokio::test]
	async fn test_build_from_factories() {
		let engine = ExecutorBuilder::new(config_with_tables())
			.with_providers(ProviderResolver::new(Duration::from_secs(1)))
			.build(factories())
			.await;
		assert!(engine.is_ok());
	}

	#[tokio::test]
	async fn test_missing_delivery_factory() {
		let result = ExecutorBuilder::new(config_with_tables())
			.build(factories())
			.await;
		assert!(matches!(result, Err(BuilderError::MissingComponent(name)) if name == "delivery"));
	}

	#[tokio::test]
	async fn test_missing_storage_table() {
		let result = ExecutorBuilder::new(ConfigBuilder::new().build())
			.build(factories())
			.await;
		assert!(matches!(result, Err(BuilderError::MissingComponent(_))));
	}
}
