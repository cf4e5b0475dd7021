//! Event types for communication between executor components.
//!
//! The orchestrator publishes submission events on the engine's event bus;
//! the engine reacts by spawning confirmation monitors and finalizing records
//! once the chain has spoken.

use crate::{TransactionHash, TransactionReceipt};
use serde::{Deserialize, Serialize};

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutorEvent {
	/// Events about inbound requests.
	Request(RequestEvent),
	/// Events about submitted transactions.
	Delivery(DeliveryEvent),
}

/// Request lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestEvent {
	/// A request reached a terminal outcome for its origin.
	Completed { request_id: String, outcome: String },
	/// The originating interactive session went away.
	SessionDisconnected { topic: String },
}

/// Transaction delivery events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
	/// A transaction was accepted by an endpoint and awaits confirmation.
	TransactionPending {
		record_id: String,
		tx_hash: TransactionHash,
		chain_id: u64,
		private: bool,
	},
	/// A transaction was mined successfully.
	TransactionConfirmed {
		record_id: String,
		tx_hash: TransactionHash,
		receipt: TransactionReceipt,
	},
	/// A transaction reverted or was dropped.
	TransactionFailed {
		record_id: String,
		tx_hash: TransactionHash,
		error: String,
	},
}
