//! Factory registry for executor implementations.
//!
//! Collects the factory functions every implementation crate exports and
//! selects the ones the configuration names.

use executor_account::AccountFactory;
use executor_config::Config;
use executor_core::{ExecutionEngine, ExecutorBuilder, ExecutorFactories};
use executor_delivery::DeliveryFactory;
use executor_storage::StorageFactory;
use executor_types::ImplementationRegistry;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Every known implementation, by name.
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub account: HashMap<String, AccountFactory>,
	pub delivery: HashMap<String, DeliveryFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			account: HashMap::new(),
			delivery: HashMap::new(),
		}
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the registry, filling it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in executor_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.storage.insert(name.to_string(), factory);
		}

		for (name, factory) in executor_account::get_all_implementations() {
			tracing::debug!("Registering account implementation: {}", name);
			registry.account.insert(name.to_string(), factory);
		}

		for (name, factory) in executor_delivery::get_all_implementations() {
			tracing::debug!("Registering delivery implementation: {}", name);
			registry.delivery.insert(name.to_string(), factory);
		}

		registry
	})
}

/// Picks the registry entries for the implementations a config section
/// names, failing on unknown names.
macro_rules! build_factories {
	($registry:expr, $config_impls:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $config_impls.keys() {
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

/// Builds the engine from configuration using the registered factories.
pub async fn build_executor_from_config(
	config: Config,
) -> Result<ExecutionEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let storage_factories =
		build_factories!(registry, config.storage.implementations, storage, "storage");
	let account_factories =
		build_factories!(registry, config.account.implementations, account, "account");
	let delivery_factory = registry
		.delivery
		.get(executor_delivery::implementations::evm::alloy::Registry::NAME)
		.copied();

	let factories = ExecutorFactories {
		storage_factories,
		account_factories,
		delivery_factory,
	};

	Ok(ExecutorBuilder::new(config).build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn test_registry_knows_builtin_implementations() {
		let registry = get_registry();

		assert!(registry.storage.contains_key("memory"));
		assert!(registry.storage.contains_key("file"));
		assert!(registry.account.contains_key("local"));
		assert!(!registry.delivery.is_empty());
	}

	#[tokio::test]
	async fn test_unknown_storage_implementation_is_reported() {
		let temp_dir = tempdir().unwrap();
		let config_path = temp_dir.path().join("executor.toml");
		std::fs::write(
			&config_path,
			r#"
[executor]
id = "test-executor"

[networks.31337]
rpc_urls = ["http://localhost:8545"]

[storage]
primary = "redis"
cleanup_interval_seconds = 60
[storage.implementations.redis]

[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
"#,
		)
		.unwrap();
		let config = Config::from_file(config_path.to_str().unwrap()).await.unwrap();

		let error = build_executor_from_config(config).await.err().unwrap();

		assert!(error.to_string().contains("Unknown storage implementation 'redis'"));
		assert!(error.to_string().contains("memory"));
	}
}
