//! Fluent builder for [`Config`] with defaults suited to tests.

use crate::{
	AccountConfig, AllowlistConfig, ApiConfig, Config, ExecutorConfig, NotificationsConfig,
	StorageConfig, WebhookConfig,
};
use executor_types::{Address, NetworkConfig};
use std::collections::HashMap;

/// Builder for `Config` instances.
///
/// Starts with in-memory storage, no networks, and short timeouts.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	executor_id: String,
	max_concurrent_requests: usize,
	submission_timeout_seconds: u64,
	monitoring_timeout_minutes: u64,
	approval_timeout_seconds: u64,
	delegation_check_retries: u32,
	retry_delay_ms: u64,
	networks: HashMap<u64, NetworkConfig>,
	storage_primary: String,
	account_primary: String,
	notification_capacity: usize,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			executor_id: "test-executor".to_string(),
			max_concurrent_requests: 16,
			submission_timeout_seconds: 5,
			monitoring_timeout_minutes: 1,
			approval_timeout_seconds: 5,
			delegation_check_retries: 2,
			retry_delay_ms: 1,
			networks: HashMap::new(),
			storage_primary: "memory".to_string(),
			account_primary: "local".to_string(),
			notification_capacity: 64,
			api: None,
		}
	}

	pub fn executor_id(mut self, id: impl Into<String>) -> Self {
		self.executor_id = id.into();
		self
	}

	pub fn max_concurrent_requests(mut self, limit: usize) -> Self {
		self.max_concurrent_requests = limit;
		self
	}

	pub fn submission_timeout_seconds(mut self, timeout: u64) -> Self {
		self.submission_timeout_seconds = timeout;
		self
	}

	pub fn monitoring_timeout_minutes(mut self, timeout: u64) -> Self {
		self.monitoring_timeout_minutes = timeout;
		self
	}

	pub fn approval_timeout_seconds(mut self, timeout: u64) -> Self {
		self.approval_timeout_seconds = timeout;
		self
	}

	pub fn delegation_check_retries(mut self, retries: u32) -> Self {
		self.delegation_check_retries = retries;
		self
	}

	/// Adds a chain with one public endpoint and, optionally, a delegation
	/// contract.
	pub fn network(
		mut self,
		chain_id: u64,
		rpc_url: impl Into<String>,
		delegation_contract: Option<Address>,
	) -> Self {
		self.networks.insert(
			chain_id,
			NetworkConfig {
				rpc_urls: vec![rpc_url.into()],
				private_rpc_urls: Vec::new(),
				delegation_contract,
			},
		);
		self
	}

	pub fn storage_primary(mut self, primary: impl Into<String>) -> Self {
		self.storage_primary = primary.into();
		self
	}

	pub fn notification_capacity(mut self, capacity: usize) -> Self {
		self.notification_capacity = capacity;
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	pub fn build(self) -> Config {
		Config {
			executor: ExecutorConfig {
				id: self.executor_id,
				max_concurrent_requests: self.max_concurrent_requests,
				intake_capacity: 64,
				submission_timeout_seconds: self.submission_timeout_seconds,
				monitoring_timeout_minutes: self.monitoring_timeout_minutes,
				approval_timeout_seconds: self.approval_timeout_seconds,
				delegation_check_retries: self.delegation_check_retries,
				retry_delay_ms: self.retry_delay_ms,
			},
			networks: self.networks,
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: HashMap::new(),
				cleanup_interval_seconds: 60,
			},
			account: AccountConfig {
				primary: self.account_primary,
				implementations: HashMap::new(),
			},
			allowlist: AllowlistConfig::default(),
			notifications: NotificationsConfig {
				capacity: self.notification_capacity,
			},
			webhook: WebhookConfig::default(),
			api: self.api,
		}
	}
}
