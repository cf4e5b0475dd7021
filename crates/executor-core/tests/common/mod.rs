//! Shared fixtures for the pipeline tests: an in-process chain endpoint and
//! an engine wired to it.

#![allow(dead_code)]

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{address, keccak256, Address, Bytes};
use alloy_rpc_types::TransactionRequest;
use async_trait::async_trait;
use executor_account::implementations::local::LocalAccount;
use executor_account::AccountInterface;
use executor_config::builders::ConfigBuilder;
use executor_core::{
	Approval, ApprovalGate, ExecutionEngine, ExecutorBuilder, ExecutorFactories, SignerError,
};
use executor_delivery::{DeliveryError, DeliveryInterface, ProviderResolver, ProviderTier};
use executor_storage::implementations::memory::MemoryStorage;
use executor_types::{
	Allowlist, AllowlistEntry, ConfigSchema, FeeEstimate, NotificationEvent, SignRequest,
	StorageKey, TransactionHash, TransactionReceipt, TransactionRecord, ValidationError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const CHAIN_ID: u64 = 1;
/// First anvil development key.
pub const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const ACCOUNT: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
pub const DELEGATION: Address = Address::repeat_byte(0xde);
pub const TOKEN: Address = Address::repeat_byte(0x70);
pub const RECIPIENT: Address = Address::repeat_byte(0xaa);
pub const CONTRACT: Address = Address::repeat_byte(0x11);

struct NoSchema;

impl ConfigSchema for NoSchema {
	fn validate(&self, _config: &toml::Value) -> Result<(), ValidationError> {
		Ok(())
	}
}

/// Chain endpoint that accepts every transaction and mines it at once.
pub struct FakeChain {
	sent: Mutex<Vec<Vec<u8>>>,
	code: Mutex<Bytes>,
	pub code_reads: AtomicUsize,
	send_delay: Mutex<Option<Duration>>,
	reject_sends: AtomicBool,
	hold_receipts: AtomicBool,
}

impl FakeChain {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			sent: Mutex::new(Vec::new()),
			code: Mutex::new(Bytes::new()),
			code_reads: AtomicUsize::new(0),
			send_delay: Mutex::new(None),
			reject_sends: AtomicBool::new(false),
			hold_receipts: AtomicBool::new(false),
		})
	}

	/// Makes every `send_raw` take `delay` before answering.
	pub fn delay_sends(&self, delay: Duration) {
		*self.send_delay.lock().unwrap() = Some(delay);
	}

	pub fn reject_sends(&self) {
		self.reject_sends.store(true, Ordering::SeqCst);
	}

	/// Counts sent transactions as pending on chain but withholds their
	/// receipts, as between two monitor polls.
	pub fn hold_receipts(&self) {
		self.hold_receipts.store(true, Ordering::SeqCst);
	}

	/// Raw transactions accepted so far, in arrival order.
	pub fn sent(&self) -> Vec<TxEnvelope> {
		self.sent
			.lock()
			.unwrap()
			.iter()
			.map(|raw| TxEnvelope::decode_2718(&mut raw.as_slice()).unwrap())
			.collect()
	}

	pub fn sent_nonces(&self) -> Vec<u64> {
		self.sent().iter().map(|tx| tx.nonce()).collect()
	}
}

#[async_trait]
impl DeliveryInterface for FakeChain {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}

	fn endpoint(&self) -> String {
		"test://chain".to_string()
	}

	async fn chain_id(&self) -> Result<u64, DeliveryError> {
		Ok(CHAIN_ID)
	}

	async fn pending_nonce(&self, _address: Address) -> Result<u64, DeliveryError> {
		Ok(self.sent.lock().unwrap().len() as u64)
	}

	async fn get_code(&self, _address: Address) -> Result<Bytes, DeliveryError> {
		self.code_reads.fetch_add(1, Ordering::SeqCst);
		Ok(self.code.lock().unwrap().clone())
	}

	async fn estimate_fees(&self) -> Result<FeeEstimate, DeliveryError> {
		Ok(FeeEstimate {
			max_fee_per_gas: 2_000_000_000,
			max_priority_fee_per_gas: 1_000_000_000,
		})
	}

	async fn estimate_gas(&self, _request: TransactionRequest) -> Result<u64, DeliveryError> {
		Ok(21_000)
	}

	async fn send_raw(&self, raw: &[u8]) -> Result<TransactionHash, DeliveryError> {
		let delay = *self.send_delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if self.reject_sends.load(Ordering::SeqCst) {
			return Err(DeliveryError::Rejected("nonce too low".to_string()));
		}
		self.sent.lock().unwrap().push(raw.to_vec());
		Ok(TransactionHash(keccak256(raw).to_vec()))
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		if self.hold_receipts.load(Ordering::SeqCst) {
			return Ok(None);
		}
		let mined = self
			.sent
			.lock()
			.unwrap()
			.iter()
			.any(|raw| keccak256(raw).as_slice() == hash.0.as_slice());
		Ok(mined.then(|| TransactionReceipt {
			hash: hash.clone(),
			block_number: 100,
			success: true,
		}))
	}

	async fn get_block_number(&self) -> Result<u64, DeliveryError> {
		Ok(100)
	}
}

/// Approval gate that declines everything.
pub struct RejectAll;

#[async_trait]
impl ApprovalGate for RejectAll {
	async fn request_approval(&self, _request: &SignRequest) -> Result<Approval, SignerError> {
		Ok(Approval::Rejected)
	}

	fn resolve(&self, _request_id: &str, _approved: bool) -> bool {
		false
	}
}

/// Contract `CONTRACT` and token recipient `RECIPIENT` on `CHAIN_ID`.
pub fn allowlist() -> Allowlist {
	let entry = |address| AllowlistEntry {
		chain_id: CHAIN_ID,
		address,
		label: "test".to_string(),
		logo: None,
	};
	Allowlist {
		contracts: vec![entry(CONTRACT)],
		token_recipients: vec![entry(RECIPIENT)],
	}
}

/// A running engine wired to a [`FakeChain`].
pub struct Harness {
	pub engine: ExecutionEngine,
	pub chain: Arc<FakeChain>,
	pub notifications: mpsc::Receiver<NotificationEvent>,
	runner: JoinHandle<()>,
}

impl Harness {
	pub async fn start(approvals: Arc<dyn ApprovalGate>) -> Self {
		Self::start_with(FakeChain::new(), approvals, 30).await
	}

	pub async fn start_with(
		chain: Arc<FakeChain>,
		approvals: Arc<dyn ApprovalGate>,
		submission_timeout_seconds: u64,
	) -> Self {
		Self::launch(chain, approvals, submission_timeout_seconds, false).await
	}

	/// Serves `chain` as both the public and the private endpoint.
	pub async fn start_private(chain: Arc<FakeChain>, approvals: Arc<dyn ApprovalGate>) -> Self {
		Self::launch(chain, approvals, 30, true).await
	}

	async fn launch(
		chain: Arc<FakeChain>,
		approvals: Arc<dyn ApprovalGate>,
		submission_timeout_seconds: u64,
		private: bool,
	) -> Self {
		let config = ConfigBuilder::new()
			.network(CHAIN_ID, "http://localhost:8545", Some(DELEGATION))
			.submission_timeout_seconds(submission_timeout_seconds)
			.build();

		let mut providers = ProviderResolver::new(Duration::from_secs(1));
		providers.register(CHAIN_ID, ProviderTier::Public, chain.clone());
		if private {
			providers.register(CHAIN_ID, ProviderTier::Private, chain.clone());
		}
		let account: Box<dyn AccountInterface> = Box::new(LocalAccount::from_key(KEY).unwrap());

		let engine = ExecutorBuilder::new(config)
			.with_storage(Box::new(MemoryStorage::new()))
			.with_accounts(vec![account])
			.with_providers(providers)
			.with_approval_gate(approvals)
			.with_allowlist(allowlist())
			.with_poll_interval(Duration::from_millis(20))
			.build(ExecutorFactories::default())
			.await
			.unwrap();

		let notifications = engine.take_notifications().await.unwrap();
		let runner = {
			let engine = engine.clone();
			tokio::spawn(async move {
				engine.run().await.unwrap();
			})
		};

		Self {
			engine,
			chain,
			notifications,
			runner,
		}
	}

	/// Every transaction record in storage.
	pub async fn records(&self) -> Vec<TransactionRecord> {
		self.engine
			.storage()
			.retrieve_all::<TransactionRecord>(StorageKey::Transactions.as_str())
			.await
			.unwrap()
			.into_iter()
			.map(|(_, record)| record)
			.collect()
	}

	/// Polls the records until `done` holds or five seconds pass.
	pub async fn wait_for_records<F>(&self, done: F) -> Vec<TransactionRecord>
	where
		F: Fn(&[TransactionRecord]) -> bool,
	{
		let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
		loop {
			let records = self.records().await;
			if done(&records) || tokio::time::Instant::now() >= deadline {
				return records;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}

	pub async fn next_notification(&mut self) -> NotificationEvent {
		tokio::time::timeout(Duration::from_secs(5), self.notifications.recv())
			.await
			.unwrap()
			.unwrap()
	}

	/// Notifications still queued after a short settle.
	pub async fn drain_notifications(&mut self) -> Vec<NotificationEvent> {
		tokio::time::sleep(Duration::from_millis(100)).await;
		let mut events = Vec::new();
		while let Ok(event) = self.notifications.try_recv() {
			events.push(event);
		}
		events
	}

	pub async fn stop(self) {
		self.engine.stop();
		self.runner.await.unwrap();
	}
}
