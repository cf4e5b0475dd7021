//! Transaction hashes, receipts and persisted transaction records.

use crate::request::TransactionTypeInfo;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchain transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub Vec<u8>);

impl TransactionHash {
	/// Hex encoding with 0x prefix.
	pub fn to_hex(&self) -> String {
		format!("0x{}", hex::encode(&self.0))
	}
}

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	pub hash: TransactionHash,
	pub block_number: u64,
	pub success: bool,
}

/// EIP-1559 fee parameters, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
	pub max_fee_per_gas: u128,
	pub max_priority_fee_per_gas: u128,
}

/// Lifecycle status of a persisted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
	Pending,
	Success,
	Failed,
	Cancelled,
}

impl TransactionStatus {
	pub fn is_final(&self) -> bool {
		!matches!(self, TransactionStatus::Pending)
	}
}

/// Durable record of a submission attempt.
///
/// Created in `Pending` when a submission is attempted and finalized exactly
/// once. A later attempt on the same `(account, chain_id, nonce)` slot
/// supersedes the record in place, moving the previous hash into
/// `replaced_hashes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
	pub id: String,
	pub request_id: String,
	pub account: Address,
	pub chain_id: u64,
	pub nonce: u64,
	/// First nonce free after this transaction. A bundled transaction also
	/// consumes the nonce of its authorization.
	#[serde(default)]
	pub next_nonce: Option<u64>,
	pub status: TransactionStatus,
	/// Whether the transaction went through a private relay.
	#[serde(default)]
	pub private: bool,
	pub submitted_hash: Option<TransactionHash>,
	#[serde(default)]
	pub replaced_hashes: Vec<TransactionHash>,
	pub failure_reason: Option<String>,
	pub type_info: TransactionTypeInfo,
	/// Id a dApp gave the call batch this transaction executes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub batch_id: Option<String>,
	/// Name of the dApp or flow that asked, for notifications.
	#[serde(default)]
	pub origin_name: String,
	/// Unix seconds.
	pub created_at: u64,
	pub finalized_at: Option<u64>,
}

impl TransactionRecord {
	/// Key of the nonce slot this record occupies.
	pub fn slot_key(&self) -> String {
		nonce_slot_key(&self.account, self.chain_id, self.nonce)
	}

	/// Whether a dApp can refer to this transaction by `id`: its batch id,
	/// its request id, or any hash it was submitted under.
	pub fn answers_to(&self, id: &str) -> bool {
		self.batch_id.as_deref() == Some(id)
			|| self.request_id == id
			|| self
				.submitted_hash
				.iter()
				.chain(self.replaced_hashes.iter())
				.any(|hash| hash.to_hex().eq_ignore_ascii_case(id))
	}

	/// First nonce free after this transaction.
	pub fn following_nonce(&self) -> u64 {
		self.next_nonce.unwrap_or(self.nonce.saturating_add(1))
	}
}

/// Builds the `(account, chain, nonce)` slot key used by the repository index.
pub fn nonce_slot_key(account: &Address, chain_id: u64, nonce: u64) -> String {
	format!("{:#x}:{}:{}", account, chain_id, nonce)
}
