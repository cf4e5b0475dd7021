//! Sign requests and the raw inbound shapes they are decoded from.
//!
//! Three origins submit work to the executor: interactive dApp sessions,
//! deep links, and the application's own flows. Each arrives in its own raw
//! shape (`InteractiveRequest`, `DeeplinkRequest`, `InternalRequest`) and is
//! normalized into a single closed `SignRequest` before anything else runs.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Protocol a request arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceProtocol {
	Interactive,
	Deeplink,
	Internal,
}

impl SourceProtocol {
	pub fn as_str(&self) -> &'static str {
		match self {
			SourceProtocol::Interactive => "interactive",
			SourceProtocol::Deeplink => "deeplink",
			SourceProtocol::Internal => "internal",
		}
	}
}

/// Origin-specific routing data.
///
/// Carries exactly what the response router needs for each protocol: the
/// session topic and JSON-RPC id for interactive sessions, the optional
/// webhook for deep links, and nothing for internal callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum RequestSource {
	Interactive { topic: String, internal_id: u64 },
	Deeplink { webhook_url: Option<String> },
	Internal,
}

impl RequestSource {
	pub fn protocol(&self) -> SourceProtocol {
		match self {
			RequestSource::Interactive { .. } => SourceProtocol::Interactive,
			RequestSource::Deeplink { .. } => SourceProtocol::Deeplink,
			RequestSource::Internal => SourceProtocol::Internal,
		}
	}
}

/// The party that asked for a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginDapp {
	pub name: String,
	pub url: Option<String>,
	pub icon_url: Option<String>,
	pub source: RequestSource,
}

impl OriginDapp {
	/// Origin used for the application's own flows.
	pub fn internal(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			url: None,
			icon_url: None,
			source: RequestSource::Internal,
		}
	}

	pub fn source_protocol(&self) -> SourceProtocol {
		self.source.protocol()
	}

	/// Session topic for interactive origins.
	pub fn session_topic(&self) -> Option<&str> {
		match &self.source {
			RequestSource::Interactive { topic, .. } => Some(topic),
			_ => None,
		}
	}

	/// Webhook for deep-link origins that configured one.
	pub fn webhook_url(&self) -> Option<&str> {
		match &self.source {
			RequestSource::Deeplink { webhook_url } => webhook_url.as_deref(),
			_ => None,
		}
	}
}

/// A single contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
	pub to: Address,
	pub value: U256,
	pub data: Bytes,
	/// Caller-supplied gas limit; estimated when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gas_limit: Option<u64>,
}

impl Call {
	/// True when the call targets `account` itself and carries calldata.
	pub fn is_self_call_with_data(&self, account: &Address) -> bool {
		self.to == *account && !self.data.is_empty()
	}
}

/// Submission preferences supplied with a transaction request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOptions {
	#[serde(default)]
	pub submit_privately: bool,
}

/// Describes what a transaction does, for records and notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionTypeInfo {
	/// Native or ERC-20 transfer.
	Send {
		recipient: Address,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		token: Option<Address>,
		amount: U256,
	},
	/// Swap initiated by the application's own flows.
	Swap {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		input_token: Option<Address>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		output_token: Option<Address>,
	},
	/// Any other contract call.
	ContractInteraction { to: Address },
	/// Several calls executed together.
	Batch { call_count: usize },
}

/// Payload of a message-signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum MessagePayload {
	/// EIP-191 personal message.
	Personal(Bytes),
	/// EIP-712 typed data as its JSON document.
	TypedData(String),
}

/// Fields shared by every sign request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
	/// Correlation id; unique per originating session.
	pub request_id: String,
	pub account: Address,
	pub chain_id: u64,
	/// Method name as the origin spelled it, echoed back in webhook calls.
	pub method: String,
	pub origin: OriginDapp,
}

/// Canonical representation of a signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignRequest {
	MessageSign {
		meta: RequestMeta,
		message: MessagePayload,
	},
	SendTransaction {
		meta: RequestMeta,
		call: Call,
		type_info: TransactionTypeInfo,
		#[serde(default)]
		options: SubmissionOptions,
	},
	BatchedCalls {
		meta: RequestMeta,
		calls: Vec<Call>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		batch_id: Option<String>,
		#[serde(default)]
		options: SubmissionOptions,
	},
}

impl SignRequest {
	pub fn meta(&self) -> &RequestMeta {
		match self {
			SignRequest::MessageSign { meta, .. }
			| SignRequest::SendTransaction { meta, .. }
			| SignRequest::BatchedCalls { meta, .. } => meta,
		}
	}

	pub fn request_id(&self) -> &str {
		&self.meta().request_id
	}

	pub fn account(&self) -> Address {
		self.meta().account
	}

	pub fn chain_id(&self) -> u64 {
		self.meta().chain_id
	}

	pub fn origin(&self) -> &OriginDapp {
		&self.meta().origin
	}

	pub fn is_message(&self) -> bool {
		matches!(self, SignRequest::MessageSign { .. })
	}

	/// Calls the request would execute; empty for message signing.
	pub fn calls(&self) -> &[Call] {
		match self {
			SignRequest::MessageSign { .. } => &[],
			SignRequest::SendTransaction { call, .. } => std::slice::from_ref(call),
			SignRequest::BatchedCalls { calls, .. } => calls,
		}
	}

	pub fn options(&self) -> SubmissionOptions {
		match self {
			SignRequest::MessageSign { .. } => SubmissionOptions::default(),
			SignRequest::SendTransaction { options, .. }
			| SignRequest::BatchedCalls { options, .. } => *options,
		}
	}

	/// Id the origin gave a call batch.
	pub fn batch_id(&self) -> Option<&str> {
		match self {
			SignRequest::BatchedCalls { batch_id, .. } => batch_id.as_deref(),
			_ => None,
		}
	}

	/// Type information recorded with the resulting transaction.
	pub fn type_info(&self) -> Option<TransactionTypeInfo> {
		match self {
			SignRequest::MessageSign { .. } => None,
			SignRequest::SendTransaction { type_info, .. } => Some(type_info.clone()),
			SignRequest::BatchedCalls { calls, .. } => Some(TransactionTypeInfo::Batch {
				call_count: calls.len(),
			}),
		}
	}
}

/// Call as it appears in JSON-RPC and internal payloads, before parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCall {
	#[serde(default)]
	pub from: Option<String>,
	#[serde(default)]
	pub to: Option<String>,
	#[serde(default)]
	pub value: Option<String>,
	#[serde(default, alias = "input")]
	pub data: Option<String>,
	#[serde(default, alias = "gasLimit")]
	pub gas: Option<String>,
}

/// Metadata an interactive session advertises about its dApp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DappMetadata {
	pub name: String,
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub icons: Vec<String>,
}

/// Decoded request from an interactive dApp session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveRequest {
	pub topic: String,
	/// JSON-RPC id assigned by the session; required for correlation.
	#[serde(default)]
	pub id: Option<u64>,
	/// CAIP-2 chain reference such as `eip155:1`.
	pub chain_id: String,
	pub method: String,
	#[serde(default)]
	pub params: serde_json::Value,
	/// Account the session is connected with; used when params omit it.
	#[serde(default)]
	pub account: Option<String>,
	#[serde(default)]
	pub dapp: DappMetadata,
}

/// Transaction body of a deep-link `eth_sendTransaction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeeplinkTransaction {
	pub to: Option<String>,
	#[serde(default)]
	pub value: Option<String>,
	#[serde(default)]
	pub data: Option<String>,
}

/// Recipient of a deep-link `erc20_send`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeeplinkRecipient {
	pub address: String,
	#[serde(default)]
	pub name: Option<String>,
}

/// dApp presentation data carried by a deep link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeeplinkDapp {
	pub name: String,
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub icon: Option<String>,
}

/// Decoded deep-link request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeeplinkRequest {
	#[serde(default)]
	pub request_id: Option<String>,
	/// Active wallet account the link was opened with.
	pub account: String,
	pub chain_id: u64,
	pub method: String,
	#[serde(default)]
	pub message: Option<String>,
	#[serde(default)]
	pub value: Option<DeeplinkTransaction>,
	#[serde(default)]
	pub recipient: Option<DeeplinkRecipient>,
	#[serde(default)]
	pub token: Option<String>,
	#[serde(default)]
	pub amount: Option<String>,
	#[serde(default)]
	pub webhook: Option<String>,
	#[serde(default)]
	pub dapp: Option<DeeplinkDapp>,
}

/// Body of a request raised by the application's own flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InternalRequestKind {
	Message {
		message: String,
	},
	Transaction {
		call: RawCall,
		#[serde(default)]
		type_info: Option<TransactionTypeInfo>,
	},
	Batch {
		calls: Vec<RawCall>,
		#[serde(default)]
		batch_id: Option<String>,
	},
}

/// Request raised by the application itself (swap, send).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalRequest {
	/// Generated when absent.
	#[serde(default)]
	pub request_id: Option<String>,
	pub account: String,
	pub chain_id: u64,
	#[serde(default)]
	pub submit_privately: bool,
	/// Flow name shown in notifications, e.g. "swap".
	#[serde(default)]
	pub flow: Option<String>,
	#[serde(flatten)]
	pub kind: InternalRequestKind,
}
