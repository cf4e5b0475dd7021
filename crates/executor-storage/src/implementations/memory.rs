//! In-memory storage backend.
//!
//! Used in tests and for deployments that accept losing pending records on
//! restart. TTLs are ignored.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use executor_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory storage implementation.
pub struct MemoryStorage {
	store: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			store: RwLock::new(HashMap::new()),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		store.get(key).cloned().ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		_ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.contains_key(key))
	}

	async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let prefix = format!("{}:", namespace);
		let store = self.store.read().await;
		Ok(store
			.keys()
			.filter_map(|key| key.strip_prefix(&prefix))
			.map(str::to_string)
			.collect())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend.
///
/// Takes no configuration.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		let key = "test:key";
		let value = b"test_value".to_vec();
		storage.set_bytes(key, value.clone(), None).await.unwrap();
		assert_eq!(storage.get_bytes(key).await.unwrap(), value);
		assert!(storage.exists(key).await.unwrap());

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes(key).await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_list_ids_strips_namespace() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("nonce_slots:0xabc:1:0", vec![1], None)
			.await
			.unwrap();
		storage
			.set_bytes("transactions:r1", vec![2], None)
			.await
			.unwrap();

		assert_eq!(
			storage.list_ids("nonce_slots").await.unwrap(),
			vec!["0xabc:1:0".to_string()]
		);
	}

	#[test]
	fn test_rejects_non_table_config() {
		let result = create_storage(&toml::Value::String("memory".into()));
		assert!(matches!(result, Err(StorageError::Configuration(_))));
	}
}
