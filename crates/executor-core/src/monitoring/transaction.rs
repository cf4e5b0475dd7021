//! Transaction monitoring for pending transactions.
//!
//! Polls the chain's public tier for a receipt until the transaction is mined
//! or the monitoring window closes, publishing the outcome on the event bus.
//! Private submissions are followed through the public tier as well; they
//! become visible there once mined.

use crate::engine::event_bus::EventBus;
use executor_delivery::ProviderResolver;
use executor_types::{truncate_id, DeliveryEvent, ExecutorEvent, TransactionHash};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Default delay between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct TransactionMonitor {
	providers: Arc<ProviderResolver>,
	event_bus: EventBus,
	timeout_minutes: u64,
	poll_interval: Duration,
}

impl TransactionMonitor {
	pub fn new(
		providers: Arc<ProviderResolver>,
		event_bus: EventBus,
		timeout_minutes: u64,
		poll_interval: Duration,
	) -> Self {
		Self {
			providers,
			event_bus,
			timeout_minutes,
			poll_interval,
		}
	}

	/// Follows `tx_hash` until it is mined or the window closes. A transaction
	/// still unmined at the end is reported as failed.
	#[instrument(skip_all, fields(record_id = %truncate_id(&record_id), tx_hash = %truncate_id(&tx_hash.to_hex()), chain_id))]
	pub async fn monitor(&self, record_id: String, tx_hash: TransactionHash, chain_id: u64) {
		let monitoring_timeout = Duration::from_secs(self.timeout_minutes * 60);
		let start_time = tokio::time::Instant::now();

		loop {
			if start_time.elapsed() > monitoring_timeout {
				tracing::warn!(
					"Transaction monitoring timeout reached after {} minutes",
					self.timeout_minutes
				);
				self.event_bus
					.publish(ExecutorEvent::Delivery(DeliveryEvent::TransactionFailed {
						record_id,
						tx_hash,
						error: format!(
							"Transaction not confirmed within {} minutes",
							self.timeout_minutes
						),
					}))
					.ok();
				break;
			}

			let receipt = match self.providers.get_provider(chain_id, false).await {
				Ok(provider) => provider.get_receipt(&tx_hash).await,
				Err(e) => Err(e),
			};

			match receipt {
				Ok(Some(receipt)) if receipt.success => {
					tracing::info!(block_number = receipt.block_number, "Confirmed");
					self.event_bus
						.publish(ExecutorEvent::Delivery(
							DeliveryEvent::TransactionConfirmed {
								record_id,
								tx_hash,
								receipt,
							},
						))
						.ok();
					break;
				},
				Ok(Some(receipt)) => {
					tracing::info!(block_number = receipt.block_number, "Reverted");
					self.event_bus
						.publish(ExecutorEvent::Delivery(DeliveryEvent::TransactionFailed {
							record_id,
							tx_hash,
							error: "Transaction reverted".to_string(),
						}))
						.ok();
					break;
				},
				Ok(None) => {
					tracing::debug!(
						elapsed_secs = start_time.elapsed().as_secs(),
						"Waiting for transaction to be mined"
					);
				},
				Err(e) => {
					tracing::warn!(error = %e, "Checking transaction status failed");
				},
			}

			tokio::time::sleep(self.poll_interval).await;
		}
	}
}
