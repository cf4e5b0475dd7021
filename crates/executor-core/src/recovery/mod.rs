//! Recovery of in-flight transactions after a restart.
//!
//! Records still `Pending` in storage belong to a previous process. Those with
//! a submitted hash go back under confirmation monitoring; those without one
//! never reached an endpoint and are failed.

use crate::engine::event_bus::EventBus;
use crate::state::TransactionRepository;
use executor_types::{truncate_id, DeliveryEvent, ExecutorEvent, TransactionStatus};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Reason recorded on records that were never submitted.
pub const NOT_SUBMITTED_REASON: &str = "Not submitted before shutdown";

/// Errors that can occur during recovery operations.
#[derive(Debug, Error)]
pub enum RecoveryError {
	#[error("Repository error: {0}")]
	Repository(String),
}

/// Report of the recovery operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
	/// Pending records found in storage.
	pub total_pending: usize,
	/// Records put back under confirmation monitoring.
	pub resumed: usize,
	/// Records failed because they were never submitted.
	pub failed: usize,
}

/// Restores monitoring of pending transactions from storage.
pub struct RecoveryService {
	repository: Arc<TransactionRepository>,
	event_bus: EventBus,
}

impl RecoveryService {
	pub fn new(repository: Arc<TransactionRepository>, event_bus: EventBus) -> Self {
		Self {
			repository,
			event_bus,
		}
	}

	/// Reconciles every pending record. Resumed records are announced as
	/// `TransactionPending` events, so the caller must already be subscribed.
	#[instrument(skip_all)]
	pub async fn recover_state(&self) -> Result<RecoveryReport, RecoveryError> {
		tracing::info!("Starting state recovery from storage");

		let pending = self
			.repository
			.list_pending()
			.await
			.map_err(|e| RecoveryError::Repository(e.to_string()))?;
		let mut report = RecoveryReport {
			total_pending: pending.len(),
			..Default::default()
		};

		if pending.is_empty() {
			tracing::info!("No pending transactions to recover");
			return Ok(report);
		}

		for record in pending {
			match record.submitted_hash.clone() {
				Some(tx_hash) => {
					tracing::info!(
						record_id = %truncate_id(&record.id),
						chain_id = record.chain_id,
						nonce = record.nonce,
						"Resuming confirmation monitoring"
					);
					self.event_bus
						.publish(ExecutorEvent::Delivery(DeliveryEvent::TransactionPending {
							record_id: record.id.clone(),
							tx_hash,
							chain_id: record.chain_id,
							private: record.private,
						}))
						.ok();
					report.resumed += 1;
				},
				None => {
					match self
						.repository
						.update_status(
							&record.id,
							TransactionStatus::Failed,
							Some(NOT_SUBMITTED_REASON.to_string()),
						)
						.await
					{
						Ok(_) => report.failed += 1,
						Err(e) => {
							tracing::warn!("Failed to reconcile record {}: {}", record.id, e);
						},
					}
				},
			}
		}

		tracing::info!(
			"Recovery complete: {} pending, {} resumed, {} failed",
			report.total_pending,
			report.resumed,
			report.failed
		);

		Ok(report)
	}
}
