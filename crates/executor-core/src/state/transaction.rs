//! Transaction record repository.
//!
//! The repository is the single writer of [`TransactionRecord`] status.
//! Records are stored by id, and a slot index maps each
//! `(account, chain, nonce)` to the record occupying it, so a second attempt
//! on the same nonce supersedes the pending record instead of duplicating it.

use alloy_primitives::Address;
use executor_storage::{StorageError, StorageService};
use executor_types::{
	current_timestamp, nonce_slot_key, StorageKey, TransactionHash, TransactionRecord,
	TransactionStatus, TransactionTypeInfo,
};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors that can occur during record management.
#[derive(Debug, Error)]
pub enum RepositoryError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Transaction record not found: {0}")]
	NotFound(String),
	#[error("Transaction record {id} is already finalized as {status:?}")]
	AlreadyFinalized {
		id: String,
		status: TransactionStatus,
	},
	#[error("Invalid status transition from {from:?} to {to:?}")]
	InvalidTransition {
		from: TransactionStatus,
		to: TransactionStatus,
	},
}

/// Data of a submission attempt about to be recorded.
#[derive(Debug, Clone)]
pub struct NewTransaction {
	pub request_id: String,
	pub account: Address,
	pub chain_id: u64,
	pub nonce: u64,
	/// First nonce free after this attempt.
	pub next_nonce: u64,
	pub private: bool,
	pub hash: TransactionHash,
	pub type_info: TransactionTypeInfo,
	pub batch_id: Option<String>,
	pub origin_name: String,
}

/// Durable store of transaction records.
pub struct TransactionRepository {
	storage: Arc<StorageService>,
	/// Serializes writers so read-modify-write cycles never interleave.
	write_lock: Mutex<()>,
}

impl TransactionRepository {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			write_lock: Mutex::new(()),
		}
	}

	/// Records a submission attempt in `Pending`.
	///
	/// If the nonce slot already holds a pending record, that record is
	/// superseded in place: it keeps its id, its previous hash moves to
	/// `replaced_hashes`, and it now describes the new attempt.
	pub async fn create(&self, new: NewTransaction) -> Result<TransactionRecord, RepositoryError> {
		let _write = self.write_lock.lock().await;
		let slot = nonce_slot_key(&new.account, new.chain_id, new.nonce);

		if let Some(mut record) = self.slot_record(&slot).await? {
			if record.status == TransactionStatus::Pending {
				if let Some(previous) = record.submitted_hash.take() {
					record.replaced_hashes.push(previous);
				}
				record.submitted_hash = Some(new.hash);
				record.next_nonce = Some(new.next_nonce);
				record.request_id = new.request_id;
				record.private = new.private;
				record.type_info = new.type_info;
				record.batch_id = new.batch_id;
				record.origin_name = new.origin_name;
				self.put(&record).await?;
				tracing::info!(
					record_id = %record.id,
					nonce = record.nonce,
					replaced = record.replaced_hashes.len(),
					"Superseded pending transaction"
				);
				return Ok(record);
			}
		}

		let record = TransactionRecord {
			id: uuid::Uuid::new_v4().to_string(),
			request_id: new.request_id,
			account: new.account,
			chain_id: new.chain_id,
			nonce: new.nonce,
			next_nonce: Some(new.next_nonce),
			status: TransactionStatus::Pending,
			private: new.private,
			submitted_hash: Some(new.hash),
			replaced_hashes: Vec::new(),
			failure_reason: None,
			type_info: new.type_info,
			batch_id: new.batch_id,
			origin_name: new.origin_name,
			created_at: current_timestamp(),
			finalized_at: None,
		};
		self.put(&record).await?;
		self.storage
			.store(StorageKey::NonceSlots.as_str(), &slot, &record.id)
			.await
			.map_err(|e| RepositoryError::Storage(e.to_string()))?;

		Ok(record)
	}

	/// Moves a pending record to a final status.
	///
	/// # Errors
	///
	/// `AlreadyFinalized` if the record left `Pending` before; records are
	/// immutable once final.
	pub async fn update_status(
		&self,
		id: &str,
		status: TransactionStatus,
		failure_reason: Option<String>,
	) -> Result<TransactionRecord, RepositoryError> {
		let _write = self.write_lock.lock().await;
		let mut record = self.get(id).await?;

		if record.status.is_final() {
			return Err(RepositoryError::AlreadyFinalized {
				id: record.id,
				status: record.status,
			});
		}
		if !is_valid_transition(record.status, status) {
			return Err(RepositoryError::InvalidTransition {
				from: record.status,
				to: status,
			});
		}

		record.status = status;
		record.failure_reason = failure_reason;
		record.finalized_at = Some(current_timestamp());
		self.put(&record).await?;
		Ok(record)
	}

	pub async fn get(&self, id: &str) -> Result<TransactionRecord, RepositoryError> {
		self.storage
			.retrieve(StorageKey::Transactions.as_str(), id)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => RepositoryError::NotFound(id.to_string()),
				other => RepositoryError::Storage(other.to_string()),
			})
	}

	/// Pending records of `account` on every chain, oldest nonce first.
	pub async fn list_pending_by_account(
		&self,
		account: &Address,
	) -> Result<Vec<TransactionRecord>, RepositoryError> {
		let mut records = self.list_pending().await?;
		records.retain(|record| record.account == *account);
		Ok(records)
	}

	/// Every pending record.
	pub async fn list_pending(&self) -> Result<Vec<TransactionRecord>, RepositoryError> {
		let mut records: Vec<TransactionRecord> = self
			.storage
			.retrieve_all(StorageKey::Transactions.as_str())
			.await
			.map_err(|e| RepositoryError::Storage(e.to_string()))?
			.into_iter()
			.map(|(_, record)| record)
			.filter(|record: &TransactionRecord| record.status == TransactionStatus::Pending)
			.collect();
		records.sort_by_key(|record| (record.chain_id, record.nonce, record.created_at));
		Ok(records)
	}

	/// First nonce free after the pending private submissions of `account`
	/// on `chain_id`, or `None` when there are none.
	pub async fn next_private_nonce(
		&self,
		account: &Address,
		chain_id: u64,
	) -> Result<Option<u64>, RepositoryError> {
		Ok(self
			.list_pending_by_account(account)
			.await?
			.iter()
			.filter(|record| record.chain_id == chain_id && record.private)
			.map(TransactionRecord::following_nonce)
			.max())
	}

	/// Latest record of `account` a dApp knows as `id`.
	pub async fn find_for_account(
		&self,
		account: &Address,
		id: &str,
	) -> Result<Option<TransactionRecord>, RepositoryError> {
		Ok(self
			.storage
			.retrieve_all(StorageKey::Transactions.as_str())
			.await
			.map_err(|e| RepositoryError::Storage(e.to_string()))?
			.into_iter()
			.map(|(_, record)| record)
			.filter(|record: &TransactionRecord| record.account == *account && record.answers_to(id))
			.max_by_key(|record| record.created_at))
	}

	async fn slot_record(&self, slot: &str) -> Result<Option<TransactionRecord>, RepositoryError> {
		let id = match self
			.storage
			.retrieve::<String>(StorageKey::NonceSlots.as_str(), slot)
			.await
		{
			Ok(id) => id,
			Err(StorageError::NotFound) => return Ok(None),
			Err(e) => return Err(RepositoryError::Storage(e.to_string())),
		};
		match self.get(&id).await {
			Ok(record) => Ok(Some(record)),
			Err(RepositoryError::NotFound(_)) => Ok(None),
			Err(e) => Err(e),
		}
	}

	async fn put(&self, record: &TransactionRecord) -> Result<(), RepositoryError> {
		self.storage
			.store(StorageKey::Transactions.as_str(), &record.id, record)
			.await
			.map_err(|e| RepositoryError::Storage(e.to_string()))
	}
}

fn is_valid_transition(from: TransactionStatus, to: TransactionStatus) -> bool {
	static TRANSITIONS: Lazy<HashMap<TransactionStatus, HashSet<TransactionStatus>>> =
		Lazy::new(|| {
			let mut m = HashMap::new();
			m.insert(
				TransactionStatus::Pending,
				HashSet::from([
					TransactionStatus::Success,
					TransactionStatus::Failed,
					TransactionStatus::Cancelled,
				]),
			);
			m.insert(TransactionStatus::Success, HashSet::new());
			m.insert(TransactionStatus::Failed, HashSet::new());
			m.insert(TransactionStatus::Cancelled, HashSet::new());
			m
		});

	TRANSITIONS
		.get(&from)
		.is_some_and(|allowed| allowed.contains(&to))
}

#[cfg(test)]
mod tests {
	use super::*;
	use executor_storage::implementations::memory::MemoryStorage;

	const ACCOUNT: Address = Address::repeat_byte(0x01);

	fn repository() -> TransactionRepository {
		TransactionRepository::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	fn attempt(nonce: u64, hash: u8, private: bool) -> NewTransaction {
		NewTransaction {
			request_id: format!("req-{}", hash),
			account: ACCOUNT,
			chain_id: 1,
			nonce,
			next_nonce: nonce + 1,
			private,
			hash: TransactionHash(vec![hash; 32]),
			type_info: TransactionTypeInfo::ContractInteraction {
				to: Address::repeat_byte(0x22),
			},
			batch_id: None,
			origin_name: "test".to_string(),
		}
	}

	#[tokio::test]
	async fn test_create_starts_pending() {
		let repository = repository();
		let record = repository.create(attempt(0, 0xaa, false)).await.unwrap();

		assert_eq!(record.status, TransactionStatus::Pending);
		assert_eq!(record.submitted_hash, Some(TransactionHash(vec![0xaa; 32])));
		assert_eq!(repository.get(&record.id).await.unwrap(), record);
	}

	#[tokio::test]
	async fn test_same_nonce_supersedes_pending_record() {
		let repository = repository();
		let first = repository.create(attempt(4, 0xaa, false)).await.unwrap();
		let second = repository.create(attempt(4, 0xbb, false)).await.unwrap();

		assert_eq!(first.id, second.id);
		assert_eq!(second.replaced_hashes, vec![TransactionHash(vec![0xaa; 32])]);
		assert_eq!(second.submitted_hash, Some(TransactionHash(vec![0xbb; 32])));
		assert_eq!(repository.list_pending_by_account(&ACCOUNT).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_finalized_slot_gets_new_record() {
		let repository = repository();
		let first = repository.create(attempt(4, 0xaa, false)).await.unwrap();
		repository
			.update_status(&first.id, TransactionStatus::Failed, Some("dropped".to_string()))
			.await
			.unwrap();

		let second = repository.create(attempt(4, 0xbb, false)).await.unwrap();
		assert_ne!(first.id, second.id);
		assert!(second.replaced_hashes.is_empty());
	}

	#[tokio::test]
	async fn test_finalized_records_are_immutable() {
		let repository = repository();
		let record = repository.create(attempt(0, 0xaa, false)).await.unwrap();

		let done = repository
			.update_status(&record.id, TransactionStatus::Success, None)
			.await
			.unwrap();
		assert!(done.finalized_at.is_some());

		let err = repository
			.update_status(&record.id, TransactionStatus::Failed, Some("late".to_string()))
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			RepositoryError::AlreadyFinalized {
				status: TransactionStatus::Success,
				..
			}
		));
		assert_eq!(
			repository.get(&record.id).await.unwrap().status,
			TransactionStatus::Success
		);
	}

	#[tokio::test]
	async fn test_pending_to_pending_is_invalid() {
		let repository = repository();
		let record = repository.create(attempt(0, 0xaa, false)).await.unwrap();
		let err = repository
			.update_status(&record.id, TransactionStatus::Pending, None)
			.await
			.unwrap_err();
		assert!(matches!(err, RepositoryError::InvalidTransition { .. }));
	}

	#[tokio::test]
	async fn test_pending_queries() {
		let repository = repository();
		repository.create(attempt(0, 0x01, true)).await.unwrap();
		repository.create(attempt(1, 0x02, true)).await.unwrap();
		let public = repository.create(attempt(2, 0x03, false)).await.unwrap();
		let done = repository.create(attempt(3, 0x04, true)).await.unwrap();
		repository
			.update_status(&done.id, TransactionStatus::Success, None)
			.await
			.unwrap();

		let pending = repository.list_pending_by_account(&ACCOUNT).await.unwrap();
		assert_eq!(
			pending.iter().map(|record| record.nonce).collect::<Vec<_>>(),
			vec![0, 1, 2]
		);
		assert_eq!(repository.next_private_nonce(&ACCOUNT, 1).await.unwrap(), Some(2));
		assert_eq!(repository.next_private_nonce(&ACCOUNT, 10).await.unwrap(), None);
		assert!(repository
			.list_pending_by_account(&Address::repeat_byte(0x02))
			.await
			.unwrap()
			.is_empty());
		assert!(pending.iter().any(|record| record.id == public.id));
	}

	#[tokio::test]
	async fn test_bundled_private_attempt_reserves_both_nonces() {
		let repository = repository();
		let mut bundled = attempt(4, 0x01, true);
		bundled.next_nonce = 6;
		repository.create(bundled).await.unwrap();

		assert_eq!(repository.next_private_nonce(&ACCOUNT, 1).await.unwrap(), Some(6));
	}

	#[tokio::test]
	async fn test_find_by_batch_id_or_hash() {
		let repository = repository();
		let mut batch = attempt(0, 0x0b, false);
		batch.batch_id = Some("batch-7".to_string());
		let record = repository.create(batch).await.unwrap();

		let by_batch = repository.find_for_account(&ACCOUNT, "batch-7").await.unwrap();
		assert_eq!(by_batch.map(|found| found.id), Some(record.id.clone()));

		let hash = format!("0x{}", "0B".repeat(32));
		let by_hash = repository.find_for_account(&ACCOUNT, &hash).await.unwrap();
		assert_eq!(by_hash.map(|found| found.id), Some(record.id));

		let stranger = Address::repeat_byte(0x09);
		assert!(repository
			.find_for_account(&stranger, "batch-7")
			.await
			.unwrap()
			.is_none());
		assert!(repository
			.find_for_account(&ACCOUNT, "batch-8")
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_missing_record() {
		let err = repository().get("nope").await.unwrap_err();
		assert!(matches!(err, RepositoryError::NotFound(id) if id == "nope"));
	}
}
