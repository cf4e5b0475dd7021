//! Payloads delivered back to a request's origin.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error code for signing failures and user rejection.
pub const SIGNING_ERROR_CODE: i64 = 5000;
/// JSON-RPC error code for methods the wallet does not handle.
pub const UNSUPPORTED_METHOD_CODE: i64 = 10001;
/// JSON-RPC error code for malformed query parameters.
pub const INVALID_PARAMS_CODE: i64 = -32602;
/// JSON-RPC error code for a call batch id the wallet never saw.
pub const UNKNOWN_BATCH_CODE: i64 = 5730;
/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
	pub code: i64,
	pub message: String,
}

/// Response sent to an interactive session, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
	pub id: u64,
	pub jsonrpc: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
	pub fn success(id: u64, result: Value) -> Self {
		Self {
			id,
			jsonrpc: JSONRPC_VERSION.to_string(),
			result: Some(result),
			error: None,
		}
	}

	pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
		Self {
			id,
			jsonrpc: JSONRPC_VERSION.to_string(),
			result: None,
			error: Some(JsonRpcError {
				code,
				message: message.into(),
			}),
		}
	}

	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}
}

/// Body POSTed to a deep link's webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
	pub method: String,
	pub response: Value,
	pub chain_id: u64,
}

/// Value resolved on an internal caller's completion handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionResult {
	Transaction {
		#[serde(rename = "transactionHash")]
		transaction_hash: String,
	},
	Signature {
		signature: String,
	},
}
