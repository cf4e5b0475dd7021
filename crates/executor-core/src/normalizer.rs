//! Decoding of inbound requests into [`SignRequest`].
//!
//! Every origin speaks its own dialect: interactive sessions send JSON-RPC
//! methods with positional params, deep links carry a flat description of
//! the action, and internal flows send already-structured calls. This module
//! maps all three onto the closed `SignRequest` type without performing any
//! I/O. Anything that cannot be mapped fails here, before state is created.

use crate::abi::transferCall;
use alloy_dyn_abi::TypedData;
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use executor_types::{
	Call, DeeplinkRequest, InteractiveRequest, InternalRequest, InternalRequestKind,
	MessagePayload, OriginDapp, RawCall, RequestMeta, RequestSource, SignRequest,
	SubmissionOptions, TransactionTypeInfo,
};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Name shown for internal requests that do not name their flow.
const DEFAULT_INTERNAL_FLOW: &str = "wallet";

/// Errors that can occur while normalizing a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
	/// A required field is missing or unparseable.
	#[error("Malformed request: {0}")]
	Malformed(String),
	/// The origin asked for a method this executor does not handle.
	#[error("Unsupported method: {0}")]
	UnsupportedMethod(String),
	/// A call targets the signing account itself with calldata.
	#[error("Calls to the signing account with data are not allowed")]
	SelfCallWithData,
}

/// Inbound request in any of the supported origin shapes.
#[derive(Debug, Clone)]
pub enum RawRequest {
	Interactive(InteractiveRequest),
	Deeplink(DeeplinkRequest),
	Internal(InternalRequest),
}

/// Read-only question an interactive session asks about the wallet.
///
/// Queries are answered directly and never reach signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletQuery {
	/// Status of a call batch submitted earlier by the session.
	CallsStatus { account: Address, batch_id: String },
	/// What the wallet supports on each chain; every configured chain when
	/// `chain_ids` is absent.
	Capabilities {
		account: Address,
		chain_ids: Option<Vec<u64>>,
	},
}

/// Decodes `raw` as a wallet query. `None` when the method is not a query.
pub fn wallet_query(raw: &InteractiveRequest) -> Option<Result<WalletQuery, NormalizeError>> {
	let params = raw.params.as_array().map(Vec::as_slice).unwrap_or_default();
	match raw.method.as_str() {
		"wallet_getCallsStatus" => Some(calls_status_query(raw, params)),
		"wallet_getCapabilities" => Some(capabilities_query(raw, params)),
		_ => None,
	}
}

fn calls_status_query(
	raw: &InteractiveRequest,
	params: &[Value],
) -> Result<WalletQuery, NormalizeError> {
	let batch_id = match params.first() {
		Some(Value::String(id)) => id.as_str(),
		Some(Value::Object(body)) => body
			.get("id")
			.and_then(Value::as_str)
			.ok_or_else(|| malformed("missing batch id"))?,
		_ => return Err(malformed("missing batch id")),
	};
	if batch_id.is_empty() {
		return Err(malformed("missing batch id"));
	}
	Ok(WalletQuery::CallsStatus {
		account: session_account(None, raw.account.as_deref())?,
		batch_id: batch_id.to_string(),
	})
}

fn capabilities_query(
	raw: &InteractiveRequest,
	params: &[Value],
) -> Result<WalletQuery, NormalizeError> {
	let account = session_account(
		params.first().and_then(Value::as_str),
		raw.account.as_deref(),
	)?;
	let chain_ids = match params.get(1) {
		None | Some(Value::Null) => None,
		Some(Value::Array(ids)) => Some(
			ids.iter()
				.map(|id| {
					let id = id.as_str().ok_or_else(|| malformed("chain ids must be strings"))?;
					let chain_id = parse_quantity(id, "chain id")?;
					u64::try_from(chain_id).map_err(|_| malformed(format!("invalid chain id '{}'", id)))
				})
				.collect::<Result<Vec<_>, _>>()?,
		),
		Some(_) => return Err(malformed("chain ids must be a list")),
	};
	Ok(WalletQuery::Capabilities { account, chain_ids })
}

/// Normalizes a request of any origin.
pub fn normalize(raw: &RawRequest) -> Result<SignRequest, NormalizeError> {
	match raw {
		RawRequest::Interactive(request) => normalize_interactive(request),
		RawRequest::Deeplink(request) => normalize_deeplink(request),
		RawRequest::Internal(request) => normalize_internal(request),
	}
}

/// Normalizes a request decoded from an interactive dApp session.
///
/// The request id becomes `<topic>:<id>` so that ids from different sessions
/// never collide.
pub fn normalize_interactive(raw: &InteractiveRequest) -> Result<SignRequest, NormalizeError> {
	if raw.topic.is_empty() {
		return Err(malformed("missing session topic"));
	}
	let internal_id = raw.id.ok_or_else(|| malformed("missing request id"))?;
	let chain_id = parse_caip2_chain(&raw.chain_id)?;
	let params = raw.params.as_array().map(Vec::as_slice).unwrap_or_default();

	let origin = OriginDapp {
		name: raw.dapp.name.clone(),
		url: raw.dapp.url.clone(),
		icon_url: raw.dapp.icons.first().cloned(),
		source: RequestSource::Interactive {
			topic: raw.topic.clone(),
			internal_id,
		},
	};
	let meta = |account: Address| RequestMeta {
		request_id: format!("{}:{}", raw.topic, internal_id),
		account,
		chain_id,
		method: raw.method.clone(),
		origin: origin.clone(),
	};

	let request = match raw.method.as_str() {
		"personal_sign" => {
			let message = string_param(params, 0, "message")?;
			let account = session_account(
				params.get(1).and_then(Value::as_str),
				raw.account.as_deref(),
			)?;
			SignRequest::MessageSign {
				meta: meta(account),
				message: MessagePayload::Personal(message_bytes(message)),
			}
		},
		"eth_sign" => {
			let account = session_account(
				params.first().and_then(Value::as_str),
				raw.account.as_deref(),
			)?;
			let message = string_param(params, 1, "message")?;
			SignRequest::MessageSign {
				meta: meta(account),
				message: MessagePayload::Personal(message_bytes(message)),
			}
		},
		"eth_signTypedData" | "eth_signTypedData_v4" => {
			let account = session_account(
				params.first().and_then(Value::as_str),
				raw.account.as_deref(),
			)?;
			let document = match params.get(1) {
				Some(Value::String(document)) => document.clone(),
				Some(value @ Value::Object(_)) => value.to_string(),
				_ => return Err(malformed("missing typed data")),
			};
			serde_json::from_str::<TypedData>(&document)
				.map_err(|e| malformed(format!("invalid typed data: {}", e)))?;
			SignRequest::MessageSign {
				meta: meta(account),
				message: MessagePayload::TypedData(document),
			}
		},
		"eth_sendTransaction" => {
			let raw_call: RawCall = serde_json::from_value(
				params
					.first()
					.cloned()
					.ok_or_else(|| malformed("missing transaction"))?,
			)
			.map_err(|e| malformed(format!("invalid transaction: {}", e)))?;
			let account = session_account(raw_call.from.as_deref(), raw.account.as_deref())?;
			let call = parse_call(&raw_call)?;
			reject_self_call(&call, &account)?;
			SignRequest::SendTransaction {
				meta: meta(account),
				type_info: describe_call(&call),
				call,
				options: SubmissionOptions::default(),
			}
		},
		"wallet_sendCalls" => {
			let body = params
				.first()
				.and_then(Value::as_object)
				.ok_or_else(|| malformed("missing calls body"))?;
			let account = session_account(
				body.get("from").and_then(Value::as_str),
				raw.account.as_deref(),
			)?;
			let raw_calls: Vec<RawCall> = serde_json::from_value(
				body.get("calls").cloned().unwrap_or(Value::Array(Vec::new())),
			)
			.map_err(|e| malformed(format!("invalid calls: {}", e)))?;
			let calls = parse_calls(&raw_calls, &account)?;
			SignRequest::BatchedCalls {
				meta: meta(account),
				calls,
				batch_id: body.get("id").and_then(Value::as_str).map(str::to_string),
				options: SubmissionOptions::default(),
			}
		},
		other => return Err(NormalizeError::UnsupportedMethod(other.to_string())),
	};

	Ok(request)
}

/// Normalizes a deep-link request.
///
/// `erc20_send` is rewritten into an ERC-20 `transfer` against the token
/// contract, so later stages only ever see calls.
pub fn normalize_deeplink(raw: &DeeplinkRequest) -> Result<SignRequest, NormalizeError> {
	let request_id = raw
		.request_id
		.clone()
		.filter(|id| !id.is_empty())
		.ok_or_else(|| malformed("missing requestId"))?;
	let account = parse_address(&raw.account, "account")?;
	if raw.chain_id == 0 {
		return Err(malformed("invalid chainId 0"));
	}
	if let Some(webhook) = &raw.webhook {
		if !(webhook.starts_with("http://") || webhook.starts_with("https://")) {
			return Err(malformed(format!("webhook '{}' is not an http(s) URL", webhook)));
		}
	}

	let dapp = raw.dapp.clone().unwrap_or_default();
	let meta = RequestMeta {
		request_id,
		account,
		chain_id: raw.chain_id,
		method: raw.method.clone(),
		origin: OriginDapp {
			name: if dapp.name.is_empty() {
				"Deep link".to_string()
			} else {
				dapp.name
			},
			url: dapp.url,
			icon_url: dapp.icon,
			source: RequestSource::Deeplink {
				webhook_url: raw.webhook.clone(),
			},
		},
	};

	let request = match raw.method.as_str() {
		"personal_sign" => {
			let message = raw
				.message
				.as_deref()
				.ok_or_else(|| malformed("missing message"))?;
			SignRequest::MessageSign {
				meta,
				message: MessagePayload::Personal(message_bytes(message)),
			}
		},
		"eth_sendTransaction" => {
			let tx = raw
				.value
				.as_ref()
				.ok_or_else(|| malformed("missing transaction"))?;
			let call = parse_call(&RawCall {
				from: None,
				to: tx.to.clone(),
				value: tx.value.clone(),
				data: tx.data.clone(),
				gas: None,
			})?;
			reject_self_call(&call, &account)?;
			SignRequest::SendTransaction {
				meta,
				type_info: describe_call(&call),
				call,
				options: SubmissionOptions::default(),
			}
		},
		"erc20_send" => {
			let recipient = raw
				.recipient
				.as_ref()
				.ok_or_else(|| malformed("missing recipient"))?;
			let recipient = parse_address(&recipient.address, "recipient")?;
			let token = parse_address(
				raw.token.as_deref().ok_or_else(|| malformed("missing token"))?,
				"token",
			)?;
			let amount = parse_quantity(
				raw.amount.as_deref().ok_or_else(|| malformed("missing amount"))?,
				"amount",
			)?;
			let data = transferCall {
				to: recipient,
				amount,
			}
			.abi_encode();
			SignRequest::SendTransaction {
				meta,
				call: Call {
					to: token,
					value: U256::ZERO,
					data: data.into(),
					gas_limit: None,
				},
				type_info: TransactionTypeInfo::Send {
					recipient,
					token: Some(token),
					amount,
				},
				options: SubmissionOptions::default(),
			}
		},
		other => return Err(NormalizeError::UnsupportedMethod(other.to_string())),
	};

	Ok(request)
}

/// Normalizes a request raised by the application's own flows. A missing
/// request id is generated.
pub fn normalize_internal(raw: &InternalRequest) -> Result<SignRequest, NormalizeError> {
	let account = parse_address(&raw.account, "account")?;
	if raw.chain_id == 0 {
		return Err(malformed("invalid chainId 0"));
	}
	let request_id = raw
		.request_id
		.clone()
		.filter(|id| !id.is_empty())
		.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
	let options = SubmissionOptions {
		submit_privately: raw.submit_privately,
	};
	let origin = OriginDapp::internal(raw.flow.as_deref().unwrap_or(DEFAULT_INTERNAL_FLOW));
	let meta = |method: &str| RequestMeta {
		request_id: request_id.clone(),
		account,
		chain_id: raw.chain_id,
		method: method.to_string(),
		origin: origin.clone(),
	};

	let request = match &raw.kind {
		InternalRequestKind::Message { message } => SignRequest::MessageSign {
			meta: meta("personal_sign"),
			message: MessagePayload::Personal(message_bytes(message)),
		},
		InternalRequestKind::Transaction { call, type_info } => {
			let call = parse_call(call)?;
			reject_self_call(&call, &account)?;
			SignRequest::SendTransaction {
				meta: meta("eth_sendTransaction"),
				type_info: type_info.clone().unwrap_or_else(|| describe_call(&call)),
				call,
				options,
			}
		},
		InternalRequestKind::Batch { calls, batch_id } => SignRequest::BatchedCalls {
			meta: meta("wallet_sendCalls"),
			calls: parse_calls(calls, &account)?,
			batch_id: batch_id.clone(),
			options,
		},
	};

	Ok(request)
}

/// Origin data of a raw request, when it can be read without normalizing.
///
/// Used to answer requests that fail normalization.
pub fn origin_of(raw: &RawRequest) -> Option<(String, OriginDapp)> {
	match raw {
		RawRequest::Interactive(request) => {
			let internal_id = request.id?;
			Some((
				format!("{}:{}", request.topic, internal_id),
				OriginDapp {
					name: request.dapp.name.clone(),
					url: request.dapp.url.clone(),
					icon_url: request.dapp.icons.first().cloned(),
					source: RequestSource::Interactive {
						topic: request.topic.clone(),
						internal_id,
					},
				},
			))
		},
		RawRequest::Deeplink(request) => {
			let request_id = request.request_id.clone()?;
			let dapp = request.dapp.clone().unwrap_or_default();
			Some((
				request_id,
				OriginDapp {
					name: dapp.name,
					url: dapp.url,
					icon_url: dapp.icon,
					source: RequestSource::Deeplink {
						webhook_url: request.webhook.clone(),
					},
				},
			))
		},
		RawRequest::Internal(request) => Some((
			request.request_id.clone()?,
			OriginDapp::internal(request.flow.as_deref().unwrap_or(DEFAULT_INTERNAL_FLOW)),
		)),
	}
}

/// Decodes the recipient and amount of an ERC-20 `transfer` call.
pub fn decode_token_transfer(data: &[u8]) -> Option<(Address, U256)> {
	if !data.starts_with(&transferCall::SELECTOR) {
		return None;
	}
	transferCall::abi_decode(data)
		.ok()
		.map(|call| (call.to, call.amount))
}

fn describe_call(call: &Call) -> TransactionTypeInfo {
	if call.data.is_empty() {
		return TransactionTypeInfo::Send {
			recipient: call.to,
			token: None,
			amount: call.value,
		};
	}
	match decode_token_transfer(&call.data) {
		Some((recipient, amount)) => TransactionTypeInfo::Send {
			recipient,
			token: Some(call.to),
			amount,
		},
		None => TransactionTypeInfo::ContractInteraction { to: call.to },
	}
}

fn parse_calls(raw_calls: &[RawCall], account: &Address) -> Result<Vec<Call>, NormalizeError> {
	if raw_calls.is_empty() {
		return Err(malformed("batch has no calls"));
	}
	raw_calls
		.iter()
		.map(|raw| {
			let call = parse_call(raw)?;
			reject_self_call(&call, account)?;
			Ok(call)
		})
		.collect()
}

fn parse_call(raw: &RawCall) -> Result<Call, NormalizeError> {
	let to = parse_address(
		raw.to.as_deref().ok_or_else(|| malformed("missing 'to'"))?,
		"to",
	)?;
	let value = match raw.value.as_deref() {
		Some(value) if !value.is_empty() => parse_quantity(value, "value")?,
		_ => U256::ZERO,
	};
	let data = match raw.data.as_deref() {
		Some(data) if !data.is_empty() => Bytes::from_str(data)
			.map_err(|e| malformed(format!("invalid data '{}': {}", data, e)))?,
		_ => Bytes::new(),
	};
	let gas_limit = match raw.gas.as_deref() {
		Some(gas) if !gas.is_empty() => {
			let gas = parse_quantity(gas, "gas")?;
			Some(u64::try_from(gas).map_err(|_| malformed("gas does not fit in u64"))?)
		},
		_ => None,
	};

	Ok(Call {
		to,
		value,
		data,
		gas_limit,
	})
}

fn reject_self_call(call: &Call, account: &Address) -> Result<(), NormalizeError> {
	if call.is_self_call_with_data(account) {
		return Err(NormalizeError::SelfCallWithData);
	}
	Ok(())
}

/// Account a session request signs with.
///
/// A session authorizes exactly one account; an account named in the params
/// must be that one. Without a session account the params decide.
fn session_account(named: Option<&str>, session: Option<&str>) -> Result<Address, NormalizeError> {
	let named = named.map(|account| parse_address(account, "account")).transpose()?;
	let session = session.map(|account| parse_address(account, "session account")).transpose()?;
	match (named, session) {
		(Some(named), Some(session)) if named != session => Err(malformed(format!(
			"account {} is not authorized by the session",
			named
		))),
		(_, Some(session)) => Ok(session),
		(Some(named), None) => Ok(named),
		(None, None) => Err(malformed("missing account")),
	}
}

fn string_param<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a str, NormalizeError> {
	params
		.get(index)
		.and_then(Value::as_str)
		.ok_or_else(|| malformed(format!("missing {}", name)))
}

/// Hex-prefixed messages are taken as bytes, anything else as UTF-8 text.
fn message_bytes(message: &str) -> Bytes {
	if message.starts_with("0x") {
		if let Ok(bytes) = Bytes::from_str(message) {
			return bytes;
		}
	}
	Bytes::copy_from_slice(message.as_bytes())
}

fn parse_caip2_chain(reference: &str) -> Result<u64, NormalizeError> {
	let id = reference.strip_prefix("eip155:").unwrap_or(reference);
	match id.parse::<u64>() {
		Ok(chain_id) if chain_id > 0 => Ok(chain_id),
		_ => Err(malformed(format!("invalid chain '{}'", reference))),
	}
}

fn parse_address(raw: &str, field: &str) -> Result<Address, NormalizeError> {
	raw.parse::<Address>()
		.map_err(|_| malformed(format!("invalid {} address '{}'", field, raw)))
}

/// Parses a `0x` hex or decimal quantity.
fn parse_quantity(raw: &str, field: &str) -> Result<U256, NormalizeError> {
	let parsed = match raw.strip_prefix("0x") {
		Some(hex) if !hex.is_empty() => U256::from_str_radix(hex, 16),
		Some(_) => Ok(U256::ZERO),
		None => U256::from_str_radix(raw, 10),
	};
	parsed.map_err(|_| malformed(format!("invalid {} '{}'", field, raw)))
}

fn malformed(message: impl Into<String>) -> NormalizeError {
	NormalizeError::Malformed(message.into())
}
