//! Configuration module for the transaction executor.
//!
//! This module provides structures and utilities for managing executor
//! configuration. It supports loading configuration from TOML files and
//! validates that all required values are set before any component is built.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

#[cfg(any(test, feature = "testing"))]
pub mod builders;
mod loader;

use executor_types::{networks::deserialize_networks, NetworksConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message only; the full error embeds the input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the executor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Executor identity, concurrency and timeouts.
	pub executor: ExecutorConfig,
	/// Per-chain endpoints and delegation contracts.
	#[serde(deserialize_with = "deserialize_networks")]
	pub networks: NetworksConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Configuration for account key material.
	pub account: AccountConfig,
	/// Source of the deep-link allowlist.
	#[serde(default)]
	pub allowlist: AllowlistConfig,
	/// Notification queue settings.
	#[serde(default)]
	pub notifications: NotificationsConfig,
	/// Deep-link webhook delivery settings.
	#[serde(default)]
	pub webhook: WebhookConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to the executor instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
	/// Identifier used in logs.
	pub id: String,
	/// Maximum number of requests handled at once.
	#[serde(default = "default_max_concurrent_requests")]
	pub max_concurrent_requests: usize,
	/// Capacity of the inbound request queue.
	#[serde(default = "default_intake_capacity")]
	pub intake_capacity: usize,
	/// Upper bound on a single submission RPC call.
	#[serde(default = "default_submission_timeout_seconds")]
	pub submission_timeout_seconds: u64,
	/// How long a submitted transaction is watched before giving up.
	#[serde(default = "default_monitoring_timeout_minutes")]
	pub monitoring_timeout_minutes: u64,
	/// How long an approval prompt may stay unanswered before it counts as
	/// a rejection.
	#[serde(default = "default_approval_timeout_seconds")]
	pub approval_timeout_seconds: u64,
	/// Attempts made for the on-chain delegation read.
	#[serde(default = "default_delegation_check_retries")]
	pub delegation_check_retries: u32,
	/// Delay between delegation read attempts.
	#[serde(default = "default_retry_delay_ms")]
	pub retry_delay_ms: u64,
}

/// Returns the default request concurrency limit.
fn default_max_concurrent_requests() -> usize {
	100
}

/// Returns the default intake queue capacity.
fn default_intake_capacity() -> usize {
	256
}

/// Returns the default submission timeout in seconds.
fn default_submission_timeout_seconds() -> u64 {
	30
}

/// Returns the default monitoring timeout in minutes.
fn default_monitoring_timeout_minutes() -> u64 {
	30
}

/// Returns the default approval timeout in seconds.
fn default_approval_timeout_seconds() -> u64 {
	300
}

/// Returns the default number of delegation read attempts.
fn default_delegation_check_retries() -> u32 {
	2
}

/// Returns the default delay between delegation read attempts.
fn default_retry_delay_ms() -> u64 {
	500
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds for cleaning up expired storage entries.
	pub cleanup_interval_seconds: u64,
}

/// Configuration for account key material.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Where the deep-link allowlist is read from.
///
/// Without a path the allowlist is empty and every deep-link transaction is
/// denied.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AllowlistConfig {
	/// JSON document with `contracts` and `tokenRecipients` lists.
	pub path: Option<String>,
}

/// Notification queue settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationsConfig {
	/// Events queued before new ones are dropped.
	#[serde(default = "default_notification_capacity")]
	pub capacity: usize,
}

impl Default for NotificationsConfig {
	fn default() -> Self {
		Self {
			capacity: default_notification_capacity(),
		}
	}
}

/// Returns the default notification queue capacity.
fn default_notification_capacity() -> usize {
	1000
}

/// Webhook delivery settings for deep-link origins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
	#[serde(default = "default_webhook_timeout_seconds")]
	pub timeout_seconds: u64,
}

impl Default for WebhookConfig {
	fn default() -> Self {
		Self {
			timeout_seconds: default_webhook_timeout_seconds(),
		}
	}
}

/// Returns the default webhook timeout in seconds.
fn default_webhook_timeout_seconds() -> u64 {
	10
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Maximum request size in bytes.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
}

/// Returns the default API host.
fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

/// Returns the default API port.
fn default_api_port() -> u16 {
	3000
}

/// Returns the default API timeout in seconds.
///
/// Interactive requests are answered on the same HTTP call, so this also
/// bounds how long a caller waits for approval and submission.
fn default_api_timeout() -> u64 {
	120
}

/// Returns the default maximum request size in bytes.
fn default_max_request_size() -> usize {
	1024 * 1024
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)));
				},
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, resolving includes and environment
	/// variables.
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates the configuration to ensure all required fields are properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.executor.id.is_empty() {
			return Err(ConfigError::Validation("Executor ID cannot be empty".into()));
		}
		if self.executor.max_concurrent_requests == 0 {
			return Err(ConfigError::Validation(
				"max_concurrent_requests must be at least 1".into(),
			));
		}
		if self.executor.intake_capacity == 0 {
			return Err(ConfigError::Validation(
				"intake_capacity must be at least 1".into(),
			));
		}
		if self.executor.submission_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"submission_timeout_seconds must be greater than 0".into(),
			));
		}
		if self.executor.delegation_check_retries == 0 {
			return Err(ConfigError::Validation(
				"delegation_check_retries must be at least 1".into(),
			));
		}
		if self.executor.delegation_check_retries > 10 {
			return Err(ConfigError::Validation(
				"delegation_check_retries cannot exceed 10".into(),
			));
		}

		if self.networks.is_empty() {
			return Err(ConfigError::Validation(
				"Networks configuration cannot be empty".into(),
			));
		}
		for (chain_id, network) in &self.networks {
			if network.rpc_urls.is_empty() {
				return Err(ConfigError::Validation(format!(
					"Network {} must have at least one rpc_url",
					chain_id
				)));
			}
			if let Some(url) = network
				.rpc_urls
				.iter()
				.chain(network.private_rpc_urls.iter())
				.find(|url| !url.starts_with("http://") && !url.starts_with("https://"))
			{
				return Err(ConfigError::Validation(format!(
					"Network {} has a non-HTTP endpoint: {}",
					chain_id, url
				)));
			}
		}

		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}
		if self.storage.cleanup_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds must be greater than 0".into(),
			));
		}
		if self.storage.cleanup_interval_seconds > 86400 {
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds cannot exceed 86400 (24 hours)".into(),
			));
		}

		if !self
			.account
			.implementations
			.contains_key(&self.account.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary account '{}' not found in implementations",
				self.account.primary
			)));
		}

		if self.notifications.capacity == 0 {
			return Err(ConfigError::Validation(
				"notifications.capacity must be at least 1".into(),
			));
		}
		if self.webhook.timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"webhook.timeout_seconds must be greater than 0".into(),
			));
		}

		Ok(())
	}
}

impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
