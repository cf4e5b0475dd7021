//! Allowlist policy for deep-link requests.
//!
//! Deep links are the lowest-trust origin: anyone can craft one. Before
//! anything else runs, every call of a deep-link request is checked against
//! two independent default-deny lists. Token transfers (no native value)
//! must go to an allowlisted recipient; any other call must target an
//! allowlisted contract and move at most [`MAX_NATIVE_VALUE_WEI`] of native
//! value.

use crate::normalizer::decode_token_transfer;
use alloy_primitives::U256;
use arc_swap::ArcSwap;
use executor_types::{Allowlist, Call, SignRequest, SourceProtocol};
use std::sync::Arc;

/// Largest native value a deep-link contract call may carry: 0.001 ETH.
pub const MAX_NATIVE_VALUE_WEI: u128 = 1_000_000_000_000_000;

pub const RECIPIENT_NOT_ALLOWLISTED: &str = "recipient not allowlisted";
pub const DESTINATION_NOT_ALLOWLISTED: &str = "destination not allowlisted";
pub const VALUE_EXCEEDS_MAXIMUM: &str = "value exceeds maximum";

/// Outcome of an allowlist check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowlistDecision {
	Allowed,
	Denied(String),
}

impl AllowlistDecision {
	pub fn is_allowed(&self) -> bool {
		matches!(self, AllowlistDecision::Allowed)
	}
}

/// Checks `request` against `allowlist`.
///
/// Requests from other origins and message signatures are always allowed. A
/// batch is allowed only when every call is; the first denial is returned.
pub fn validate(request: &SignRequest, allowlist: &Allowlist) -> AllowlistDecision {
	if request.origin().source_protocol() != SourceProtocol::Deeplink || request.is_message() {
		return AllowlistDecision::Allowed;
	}

	let max_value = U256::from(MAX_NATIVE_VALUE_WEI);
	for call in request.calls() {
		if let Some(reason) = check_call(call, request.chain_id(), allowlist, max_value) {
			return AllowlistDecision::Denied(reason.to_string());
		}
	}
	AllowlistDecision::Allowed
}

fn check_call(
	call: &Call,
	chain_id: u64,
	allowlist: &Allowlist,
	max_value: U256,
) -> Option<&'static str> {
	// A token transfer moves no native value. Transfer calldata riding on a
	// value-bearing call gets the contract checks below.
	if call.value.is_zero() {
		if let Some((recipient, _)) = decode_token_transfer(&call.data) {
			if !allowlist.contains_token_recipient(chain_id, &recipient) {
				return Some(RECIPIENT_NOT_ALLOWLISTED);
			}
			return None;
		}
	}

	// Only native value is bounded here; token amounts inside arbitrary
	// calldata are not.
	if !allowlist.contains_contract(chain_id, &call.to) {
		return Some(DESTINATION_NOT_ALLOWLISTED);
	}
	if call.value > max_value {
		return Some(VALUE_EXCEEDS_MAXIMUM);
	}
	None
}

/// Allowlist checks against a document that can be swapped at runtime.
pub struct AllowlistValidator {
	allowlist: ArcSwap<Allowlist>,
}

impl AllowlistValidator {
	pub fn new(allowlist: Allowlist) -> Self {
		Self {
			allowlist: ArcSwap::from_pointee(allowlist),
		}
	}

	/// Loads the allowlist document at `path`.
	///
	/// A missing path, unreadable file or malformed document yields an empty
	/// allowlist, which denies every deep-link transaction.
	pub async fn load(path: Option<&str>) -> Self {
		let Some(path) = path else {
			tracing::info!("No allowlist configured, deep-link transactions will be denied");
			return Self::new(Allowlist::default());
		};

		match tokio::fs::read_to_string(path).await {
			Ok(raw) => {
				let allowlist = Allowlist::from_json_str(&raw);
				tracing::info!(
					path,
					contracts = allowlist.contracts.len(),
					token_recipients = allowlist.token_recipients.len(),
					"Loaded allowlist"
				);
				Self::new(allowlist)
			},
			Err(e) => {
				tracing::warn!(path, error = %e, "Failed to read allowlist, using empty allowlist");
				Self::new(Allowlist::default())
			},
		}
	}

	/// Replaces the active allowlist. Checks already running keep the
	/// document they started with.
	pub fn reload(&self, allowlist: Allowlist) {
		self.allowlist.store(Arc::new(allowlist));
	}

	pub fn current(&self) -> Arc<Allowlist> {
		self.allowlist.load_full()
	}

	pub fn validate(&self, request: &SignRequest) -> AllowlistDecision {
		validate(request, &self.allowlist.load())
	}
}
