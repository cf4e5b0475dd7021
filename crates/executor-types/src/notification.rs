//! User-facing notification events.
//!
//! Notifications are ephemeral signals for a single display surface. They are
//! never a source of truth; the transaction repository is.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Kind of status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
	/// Transaction submitted, awaiting confirmation.
	Pending,
	/// Transaction confirmed or message signed.
	Success,
	/// Something went wrong; carries the detail.
	Failed,
	/// Request stopped by policy.
	Blocked,
	/// Neutral dismissal after the user declined or the session left.
	NotSent,
}

/// A single notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
	pub kind: NotificationKind,
	pub request_id: String,
	pub account: Option<Address>,
	pub chain_id: Option<u64>,
	/// Name of the dApp or flow that asked.
	pub origin_name: String,
	pub title: String,
	pub detail: Option<String>,
	pub tx_hash: Option<String>,
	/// Unix seconds.
	pub created_at: u64,
}
