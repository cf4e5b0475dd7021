//! Storage module for the transaction executor.
//!
//! This module provides the persistence layer behind the transaction
//! repository and the delegation consent store. Backends deal in raw bytes
//! under `namespace:id` keys; [`StorageService`] adds JSON serialization on
//! top.

use async_trait::async_trait;
use executor_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Low-level interface for storage backends.
///
/// Keys have the form `namespace:id`. Backends must support listing the ids
/// of a namespace, which the executor uses during recovery.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key. Missing keys are not
	/// an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists the ids stored under `namespace`, without the namespace prefix.
	/// Expired entries are skipped.
	async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries and returns how many were removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

fn storage_key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

/// Typed storage on top of a [`StorageInterface`] backend.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a serializable value with optional time-to-live, creating or
	/// overwriting it.
	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend
			.set_bytes(&storage_key(namespace, id), bytes, ttl)
			.await
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Retrieves and deserializes a value.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&storage_key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Retrieves every value of a namespace.
	///
	/// Entries that vanish between listing and reading are skipped; entries
	/// that fail to deserialize are logged and skipped.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let ids = self.backend.list_ids(namespace).await?;
		let mut values = Vec::with_capacity(ids.len());
		for id in ids {
			match self.retrieve::<T>(namespace, &id).await {
				Ok(value) => values.push((id, value)),
				Err(StorageError::NotFound) => {},
				Err(StorageError::Serialization(e)) => {
					tracing::warn!(namespace, id = %id, error = %e, "Skipping unreadable entry");
				},
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&storage_key(namespace, id)).await
	}

	/// Overwrites an existing value; fails with `NotFound` when there is none.
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.update_with_ttl(namespace, id, data, None).await
	}

	pub async fn update_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let key = storage_key(namespace, id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}

		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&key, bytes, ttl).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&storage_key(namespace, id)).await
	}

	/// Removes expired entries from storage.
	///
	/// This is a no-op for backends that don't support TTL.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}

#[cfg(test)]
mod tests {
	use super::implementations::memory::MemoryStorage;
	use super::*;
	use serde::Deserialize;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Entry {
		value: u64,
	}

	fn service() -> StorageService {
		StorageService::new(Box::new(MemoryStorage::new()))
	}

	#[tokio::test]
	async fn test_update_requires_existing_entry() {
		let storage = service();
		let result = storage.update("ns", "a", &Entry { value: 1 }).await;
		assert!(matches!(result, Err(StorageError::NotFound)));

		storage.store("ns", "a", &Entry { value: 1 }).await.unwrap();
		storage.update("ns", "a", &Entry { value: 2 }).await.unwrap();
		let entry: Entry = storage.retrieve("ns", "a").await.unwrap();
		assert_eq!(entry.value, 2);
	}

	#[tokio::test]
	async fn test_retrieve_all_is_scoped_to_namespace() {
		let storage = service();
		storage.store("ns", "a", &Entry { value: 1 }).await.unwrap();
		storage.store("ns", "b", &Entry { value: 2 }).await.unwrap();
		storage.store("other", "c", &Entry { value: 3 }).await.unwrap();

		let mut entries: Vec<(String, Entry)> = storage.retrieve_all("ns").await.unwrap();
		entries.sort_by(|a, b| a.0.cmp(&b.0));
		assert_eq!(
			entries,
			vec![
				("a".to_string(), Entry { value: 1 }),
				("b".to_string(), Entry { value: 2 })
			]
		);
	}

	#[tokio::test]
	async fn test_retrieve_all_skips_unreadable_entries() {
		let storage = service();
		storage.store("ns", "a", &Entry { value: 1 }).await.unwrap();
		storage.store("ns", "b", &"not an entry").await.unwrap();

		let entries: Vec<(String, Entry)> = storage.retrieve_all("ns").await.unwrap();
		assert_eq!(entries.len(), 1);
	}
}
