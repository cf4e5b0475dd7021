//! File-based storage backend.
//!
//! Each namespace is a directory under the configured base path and each
//! entry a `.bin` file inside it. Files start with a fixed header carrying
//! the expiry time, and are written through a temporary file and a rename so
//! a crash never leaves a half-written record behind.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use executor_types::{
	current_timestamp, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, StorageKey,
	ValidationError,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Fixed-size file header.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "TXEX"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - [14-63]: Reserved
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileHeader {
	version: u16,
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"TXEX";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			current_timestamp().saturating_add(ttl.as_secs())
		};

		Self {
			version: Self::VERSION,
			expires_at,
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Unrecognized file format".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}

		let mut expires_bytes = [0u8; 8];
		expires_bytes.copy_from_slice(&bytes[6..14]);

		Ok(Self {
			version,
			expires_at: u64::from_le_bytes(expires_bytes),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && current_timestamp() >= self.expires_at
	}
}

/// Default TTLs per namespace, read from `ttl_<namespace>` keys.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	fn from_config(config: &toml::Value) -> Self {
		let ttls = StorageKey::all()
			.filter_map(|storage_key| {
				config
					.get(format!("ttl_{}", storage_key.as_str()))
					.and_then(|v| v.as_integer())
					.map(|secs| (storage_key, Duration::from_secs(secs.max(0) as u64)))
			})
			.collect();

		Self { ttls }
	}

	fn get_ttl(&self, storage_key: StorageKey) -> Duration {
		self.ttls
			.get(&storage_key)
			.copied()
			.unwrap_or(Duration::ZERO)
	}
}

/// Escapes characters that cannot appear in a file name. Reversible.
fn encode_id(id: &str) -> String {
	let mut encoded = String::with_capacity(id.len());
	for c in id.chars() {
		match c {
			'%' => encoded.push_str("%25"),
			'/' => encoded.push_str("%2F"),
			':' => encoded.push_str("%3A"),
			'\\' => encoded.push_str("%5C"),
			other => encoded.push(other),
		}
	}
	encoded
}

fn decode_id(encoded: &str) -> String {
	encoded
		.replace("%2F", "/")
		.replace("%3A", ":")
		.replace("%5C", "\\")
		.replace("%25", "%")
}

/// File-based storage implementation.
pub struct FileStorage {
	base_path: PathBuf,
	ttl_config: TtlConfig,
}

impl FileStorage {
	pub fn new(base_path: PathBuf, ttl_config: TtlConfig) -> Self {
		Self {
			base_path,
			ttl_config,
		}
	}

	fn namespace_dir(&self, namespace: &str) -> PathBuf {
		self.base_path.join(encode_id(namespace))
	}

	/// Maps `namespace:id` to `<base>/<namespace>/<id>.bin`. Keys without a
	/// namespace land directly under the base path.
	fn get_file_path(&self, key: &str) -> PathBuf {
		match key.split_once(':') {
			Some((namespace, id)) => self
				.namespace_dir(namespace)
				.join(format!("{}.bin", encode_id(id))),
			None => self.base_path.join(format!("{}.bin", encode_id(key))),
		}
	}

	fn get_ttl_for_key(&self, key: &str) -> Duration {
		key.split(':')
			.next()
			.and_then(|namespace| namespace.parse::<StorageKey>().ok())
			.map(|storage_key| self.ttl_config.get_ttl(storage_key))
			.unwrap_or(Duration::ZERO)
	}

	/// Reads a file and returns its payload, or `None` when it has expired.
	async fn read_entry(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
		let data = match fs::read(path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound);
			},
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let header = FileHeader::deserialize(&data)?;
		if header.is_expired() {
			return Ok(None);
		}
		Ok(Some(data[FileHeader::SIZE..].to_vec()))
	}

	async fn bin_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
		let mut entries = match fs::read_dir(dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut files = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() == Some(std::ffi::OsStr::new("bin")) {
				files.push(path);
			}
		}
		Ok(files)
	}

	async fn cleanup_expired_files(&self) -> Result<usize, StorageError> {
		let mut removed = 0;
		for storage_key in StorageKey::all() {
			for path in Self::bin_files(&self.namespace_dir(storage_key.as_str())).await? {
				match Self::read_entry(&path).await {
					Ok(None) => match fs::remove_file(&path).await {
						Ok(()) => removed += 1,
						Err(e) => {
							tracing::warn!(path = %path.display(), error = %e, "Failed to remove expired file");
						},
					},
					Ok(Some(_)) | Err(StorageError::NotFound) => {},
					Err(e) => {
						tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable file");
					},
				}
			}
		}
		Ok(removed)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		Self::read_entry(&self.get_file_path(key))
			.await?
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.get_file_path(key);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let ttl = ttl.unwrap_or_else(|| self.get_ttl_for_key(key));
		let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
		file_data.extend_from_slice(&FileHeader::new(ttl).serialize());
		file_data.extend_from_slice(&value);

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, file_data)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.get_file_path(key)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		match Self::read_entry(&self.get_file_path(key)).await {
			Ok(entry) => Ok(entry.is_some()),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let mut ids = Vec::new();
		for path in Self::bin_files(&self.namespace_dir(namespace)).await? {
			if !matches!(Self::read_entry(&path).await, Ok(Some(_))) {
				continue;
			}
			if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
				ids.push(decode_id(stem));
			}
		}
		Ok(ids)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.cleanup_expired_files().await
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let mut optional_fields = vec![Field::new("storage_path", FieldType::String)];
		optional_fields.extend(StorageKey::all().map(|storage_key| {
			Field::new(
				format!("ttl_{}", storage_key.as_str()),
				FieldType::Integer {
					min: Some(0),
					max: None,
				},
			)
		}));

		Schema::new(vec![], optional_fields).validate(config)
	}
}

/// Factory function to create a file storage backend.
///
/// Configuration parameters:
/// - `storage_path`: Base directory (default: "./data/executor")
/// - `ttl_<namespace>`: Default TTL in seconds per namespace (default: 0, never expires)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/executor");

	Ok(Box::new(FileStorage::new(
		PathBuf::from(storage_path),
		TtlConfig::from_config(config),
	)))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
