//! Read-only wallet queries from interactive sessions.
//!
//! `wallet_getCallsStatus` and `wallet_getCapabilities` are answered from
//! the transaction records, consent and network configuration. They never
//! reach the signing pipeline and leave no state behind.

use super::{EngineError, ExecutionEngine};
use crate::normalizer::WalletQuery;
use alloy_primitives::Address;
use executor_types::{
	JsonRpcResponse, TransactionRecord, TransactionStatus, TransactionTypeInfo,
	INVALID_PARAMS_CODE, UNKNOWN_BATCH_CODE,
};
use serde_json::{json, Map, Value};

/// Version of the call-batch status format.
const CALLS_STATUS_VERSION: &str = "2.0.0";

impl ExecutionEngine {
	/// Answers a decoded wallet query for the session request `id`.
	pub(crate) async fn answer_query(
		&self,
		id: u64,
		query: WalletQuery,
	) -> Result<JsonRpcResponse, EngineError> {
		match query {
			WalletQuery::CallsStatus { account, batch_id } => {
				let record = self
					.repository
					.find_for_account(&account, &batch_id)
					.await
					.map_err(|e| EngineError::Service(e.to_string()))?;
				Ok(match record {
					Some(record) => JsonRpcResponse::success(id, calls_status(&batch_id, &record)),
					None => {
						tracing::debug!(batch_id = %batch_id, "Unknown call batch");
						JsonRpcResponse::failure(id, UNKNOWN_BATCH_CODE, "Unknown call batch id")
					},
				})
			},
			WalletQuery::Capabilities { account, chain_ids } => {
				let mut chain_ids =
					chain_ids.unwrap_or_else(|| self.config.networks.keys().copied().collect());
				chain_ids.sort_unstable();
				chain_ids.dedup();
				let consent = self.consent_granted(&account).await?;
				Ok(JsonRpcResponse::success(
					id,
					self.capabilities(&account, &chain_ids, consent),
				))
			},
		}
	}

	/// Failure response for a query whose params could not be decoded.
	pub(crate) fn invalid_query(id: u64, message: &str) -> JsonRpcResponse {
		JsonRpcResponse::failure(id, INVALID_PARAMS_CODE, message)
	}

	fn capabilities(&self, account: &Address, chain_ids: &[u64], consent: bool) -> Value {
		let delegating = |chain_id: &u64| {
			self.config
				.networks
				.get(chain_id)
				.is_some_and(|network| network.delegation_contract.is_some())
		};
		let chains: Map<String, Value> = chain_ids
			.iter()
			.map(|chain_id| {
				let status = atomic_status(delegating(chain_id), consent);
				(format!("{:#x}", chain_id), json!({ "atomic": { "status": status } }))
			})
			.collect();
		tracing::debug!(account = %account, chains = chains.len(), "Reported capabilities");
		Value::Object(chains)
	}
}

/// Atomic batch support on one chain: `supported` once the account owner
/// consented to delegation, `ready` when the chain could support it after
/// consent, `unsupported` without a delegation contract.
fn atomic_status(delegating: bool, consent: bool) -> &'static str {
	match (delegating, consent) {
		(false, _) => "unsupported",
		(true, true) => "supported",
		(true, false) => "ready",
	}
}

/// Status document of the call batch `batch_id`, executed by `record`.
fn calls_status(batch_id: &str, record: &TransactionRecord) -> Value {
	let code = match record.status {
		TransactionStatus::Pending => 100,
		TransactionStatus::Success => 200,
		TransactionStatus::Cancelled => 400,
		TransactionStatus::Failed => 500,
	};
	let receipts: Vec<Value> = match (record.status, &record.submitted_hash) {
		(TransactionStatus::Success | TransactionStatus::Failed, Some(hash)) => vec![json!({
			"transactionHash": hash.to_hex(),
			"status": if record.status == TransactionStatus::Success { "0x1" } else { "0x0" },
		})],
		_ => Vec::new(),
	};
	json!({
		"version": CALLS_STATUS_VERSION,
		"id": batch_id,
		"chainId": format!("{:#x}", record.chain_id),
		"status": code,
		"atomic": matches!(record.type_info, TransactionTypeInfo::Batch { .. }),
		"receipts": receipts,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use executor_types::TransactionHash;

	fn record(status: TransactionStatus) -> TransactionRecord {
		TransactionRecord {
			id: "rec-1".to_string(),
			request_id: "topic:9".to_string(),
			account: Address::repeat_byte(0x01),
			chain_id: 8453,
			nonce: 3,
			next_nonce: Some(5),
			status,
			private: false,
			submitted_hash: Some(TransactionHash(vec![0xcd; 32])),
			replaced_hashes: Vec::new(),
			failure_reason: None,
			type_info: TransactionTypeInfo::Batch { call_count: 2 },
			batch_id: Some("batch-1".to_string()),
			origin_name: "dapp".to_string(),
			created_at: 0,
			finalized_at: None,
		}
	}

	#[test]
	fn test_pending_batch_has_no_receipts() {
		let status = calls_status("batch-1", &record(TransactionStatus::Pending));
		assert_eq!(status["status"], 100);
		assert_eq!(status["chainId"], "0x2105");
		assert_eq!(status["atomic"], true);
		assert_eq!(status["receipts"], json!([]));
	}

	#[test]
	fn test_final_batch_reports_receipt() {
		let confirmed = calls_status("batch-1", &record(TransactionStatus::Success));
		assert_eq!(confirmed["status"], 200);
		assert_eq!(confirmed["receipts"][0]["transactionHash"], format!("0x{}", "cd".repeat(32)));
		assert_eq!(confirmed["receipts"][0]["status"], "0x1");

		let reverted = calls_status("batch-1", &record(TransactionStatus::Failed));
		assert_eq!(reverted["status"], 500);
		assert_eq!(reverted["receipts"][0]["status"], "0x0");

		let cancelled = calls_status("batch-1", &record(TransactionStatus::Cancelled));
		assert_eq!(cancelled["status"], 400);
		assert_eq!(cancelled["receipts"], json!([]));
	}

	#[test]
	fn test_atomic_status_follows_delegation_and_consent() {
		assert_eq!(atomic_status(false, true), "unsupported");
		assert_eq!(atomic_status(true, false), "ready");
		assert_eq!(atomic_status(true, true), "supported");
	}
}
