//! Transaction handler: confirmation tracking and record finalization.

use crate::engine::event_bus::EventBus;
use crate::monitoring::TransactionMonitor;
use crate::nonce::NonceManager;
use crate::notifications::NotificationDispatcher;
use crate::state::{RepositoryError, TransactionRepository};
use executor_delivery::ProviderResolver;
use executor_types::{
	truncate_id, NotificationKind, TransactionHash, TransactionReceipt, TransactionRecord,
	TransactionStatus,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur while finalizing a transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
	#[error("Repository error: {0}")]
	Repository(String),
}

/// Finalizes transaction records once the chain has spoken.
pub struct TransactionHandler {
	providers: Arc<ProviderResolver>,
	repository: Arc<TransactionRepository>,
	nonces: Arc<NonceManager>,
	notifications: NotificationDispatcher,
	event_bus: EventBus,
	monitoring_timeout_minutes: u64,
	poll_interval: Duration,
}

impl TransactionHandler {
	pub fn new(
		providers: Arc<ProviderResolver>,
		repository: Arc<TransactionRepository>,
		nonces: Arc<NonceManager>,
		notifications: NotificationDispatcher,
		event_bus: EventBus,
		monitoring_timeout_minutes: u64,
		poll_interval: Duration,
	) -> Self {
		Self {
			providers,
			repository,
			nonces,
			notifications,
			event_bus,
			monitoring_timeout_minutes,
			poll_interval,
		}
	}

	/// Spawns a monitoring task for a pending transaction.
	pub fn monitor_transaction(&self, record_id: String, tx_hash: TransactionHash, chain_id: u64) {
		let monitor = TransactionMonitor::new(
			self.providers.clone(),
			self.event_bus.clone(),
			self.monitoring_timeout_minutes,
			self.poll_interval,
		);

		tokio::spawn(async move {
			monitor.monitor(record_id, tx_hash, chain_id).await;
		});
	}

	/// Marks the record `Success`. A reverted receipt is treated as a failure.
	#[instrument(skip_all, fields(record_id = %truncate_id(&record_id)))]
	pub async fn handle_confirmed(
		&self,
		record_id: String,
		tx_hash: TransactionHash,
		receipt: TransactionReceipt,
	) -> Result<(), TransactionError> {
		if !receipt.success {
			return self
				.handle_failed(record_id, tx_hash, "Transaction reverted".to_string())
				.await;
		}

		if let Some(record) = self
			.finalize(&record_id, TransactionStatus::Success, None)
			.await?
		{
			tracing::info!(block_number = receipt.block_number, "Transaction confirmed");
			self.notifications
				.notify_record(&record, NotificationKind::Success, None);
		}
		Ok(())
	}

	/// Marks the record `Failed` with `error` as its reason and hands its
	/// nonces back.
	///
	/// Failures of a hash the record no longer carries, because a later
	/// attempt superseded it, are ignored.
	#[instrument(skip_all, fields(record_id = %truncate_id(&record_id), tx_hash = %truncate_id(&tx_hash.to_hex())))]
	pub async fn handle_failed(
		&self,
		record_id: String,
		tx_hash: TransactionHash,
		error: String,
	) -> Result<(), TransactionError> {
		let current = self
			.repository
			.get(&record_id)
			.await
			.map_err(|e| TransactionError::Repository(e.to_string()))?;
		if current.submitted_hash.as_ref() != Some(&tx_hash) {
			tracing::debug!("Failure reported for a superseded hash, ignoring");
			return Ok(());
		}

		if let Some(record) = self
			.finalize(&record_id, TransactionStatus::Failed, Some(error.clone()))
			.await?
		{
			tracing::error!("Transaction failed: {}", error);
			self.nonces
				.release(
					record.account,
					record.chain_id,
					record.nonce,
					record.following_nonce(),
				)
				.await;
			self.notifications
				.notify_record(&record, NotificationKind::Failed, Some(error));
		}
		Ok(())
	}

	async fn finalize(
		&self,
		record_id: &str,
		status: TransactionStatus,
		reason: Option<String>,
	) -> Result<Option<TransactionRecord>, TransactionError> {
		match self.repository.update_status(record_id, status, reason).await {
			Ok(record) => Ok(Some(record)),
			Err(RepositoryError::AlreadyFinalized { status, .. }) => {
				tracing::debug!(status = ?status, "Record already finalized, ignoring");
				Ok(None)
			},
			Err(e) => Err(TransactionError::Repository(e.to_string())),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::NewTransaction;
	use alloy_primitives::Address;
	use executor_storage::implementations::memory::MemoryStorage;
	use executor_storage::StorageService;
	use executor_types::TransactionTypeInfo;

	struct Fixture {
		handler: TransactionHandler,
		repository: Arc<TransactionRepository>,
		nonces: Arc<NonceManager>,
		notifications: tokio::sync::mpsc::Receiver<executor_types::NotificationEvent>,
	}

	fn fixture() -> Fixture {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let repository = Arc::new(TransactionRepository::new(storage));
		let (dispatcher, notifications) = NotificationDispatcher::new(8);
		let nonces = Arc::new(NonceManager::new());
		let handler = TransactionHandler::new(
			Arc::new(ProviderResolver::new(Duration::from_secs(1))),
			repository.clone(),
			nonces.clone(),
			dispatcher,
			EventBus::new(8),
			1,
			Duration::from_secs(3),
		);
		Fixture {
			handler,
			repository,
			nonces,
			notifications,
		}
	}

	fn new_transaction(nonce: u64, hash: u8) -> NewTransaction {
		NewTransaction {
			request_id: format!("req-{}", nonce),
			account: Address::repeat_byte(0x01),
			chain_id: 1,
			nonce,
			next_nonce: nonce + 1,
			private: false,
			hash: TransactionHash(vec![hash; 32]),
			type_info: TransactionTypeInfo::ContractInteraction {
				to: Address::repeat_byte(0x02),
			},
			batch_id: None,
			origin_name: "swap".to_string(),
		}
	}

	#[tokio::test]
	async fn test_confirmation_finalizes_once() {
		let mut fixture = fixture();
		let record = fixture.repository.create(new_transaction(0, 0xaa)).await.unwrap();
		let receipt = TransactionReceipt {
			hash: TransactionHash(vec![0xaa; 32]),
			block_number: 10,
			success: true,
		};

		fixture
			.handler
			.handle_confirmed(record.id.clone(), receipt.hash.clone(), receipt.clone())
			.await
			.unwrap();
		fixture
			.handler
			.handle_confirmed(record.id.clone(), receipt.hash.clone(), receipt)
			.await
			.unwrap();

		let stored = fixture.repository.get(&record.id).await.unwrap();
		assert_eq!(stored.status, TransactionStatus::Success);
		assert_eq!(
			fixture.notifications.recv().await.unwrap().kind,
			NotificationKind::Success
		);
		assert!(fixture.notifications.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_reverted_receipt_fails_record() {
		let mut fixture = fixture();
		let record = fixture.repository.create(new_transaction(1, 0xbb)).await.unwrap();
		let hash = TransactionHash(vec![0xbb; 32]);

		fixture
			.handler
			.handle_confirmed(
				record.id.clone(),
				hash.clone(),
				TransactionReceipt {
					hash,
					block_number: 11,
					success: false,
				},
			)
			.await
			.unwrap();

		let stored = fixture.repository.get(&record.id).await.unwrap();
		assert_eq!(stored.status, TransactionStatus::Failed);
		assert_eq!(stored.failure_reason.as_deref(), Some("Transaction reverted"));
		let event = fixture.notifications.recv().await.unwrap();
		assert_eq!(event.kind, NotificationKind::Failed);
		assert_eq!(event.origin_name, "swap");
	}

	#[tokio::test]
	async fn test_failure_of_superseded_hash_is_ignored() {
		let fixture = fixture();
		fixture.repository.create(new_transaction(2, 0x01)).await.unwrap();
		let record = fixture.repository.create(new_transaction(2, 0x02)).await.unwrap();

		fixture
			.handler
			.handle_failed(
				record.id.clone(),
				TransactionHash(vec![0x01; 32]),
				"dropped".to_string(),
			)
			.await
			.unwrap();

		let stored = fixture.repository.get(&record.id).await.unwrap();
		assert_eq!(stored.status, TransactionStatus::Pending);
	}

	#[tokio::test]
	async fn test_dropped_transaction_hands_nonce_back() {
		let fixture = fixture();
		let account = Address::repeat_byte(0x01);
		let mut guard = fixture.nonces.acquire(account, 1).await;
		guard.commit(4);
		drop(guard);
		let record = fixture.repository.create(new_transaction(3, 0xcc)).await.unwrap();

		fixture
			.handler
			.handle_failed(
				record.id.clone(),
				TransactionHash(vec![0xcc; 32]),
				"Transaction not confirmed within 1 minutes".to_string(),
			)
			.await
			.unwrap();

		let guard = fixture.nonces.acquire(account, 1).await;
		assert_eq!(guard.resolve(0, None), 3);
	}
}
