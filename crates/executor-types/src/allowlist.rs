//! Allowlist policy data for deep-link requests.
//!
//! The allowlist is supplied by an external collaborator as JSON of the form
//! `{ contracts: [...], tokenRecipients: [...] }`. Parsing is default-deny:
//! an absent or malformed document yields empty lists and a malformed entry
//! is skipped, so a shape mismatch can only ever deny.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// A single allowlisted address on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistEntry {
	pub chain_id: u64,
	pub address: Address,
	#[serde(alias = "name")]
	pub label: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub logo: Option<String>,
}

/// Contract destinations and token-transfer recipients permitted for
/// deep-link requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allowlist {
	pub contracts: Vec<AllowlistEntry>,
	pub token_recipients: Vec<AllowlistEntry>,
}

impl Allowlist {
	/// Parses an allowlist document, never failing.
	pub fn from_json(value: &serde_json::Value) -> Self {
		let Some(object) = value.as_object() else {
			tracing::warn!("Allowlist document is not an object, denying all deep-link requests");
			return Self::default();
		};

		Self {
			contracts: parse_entries(object.get("contracts"), "contracts"),
			token_recipients: parse_entries(object.get("tokenRecipients"), "tokenRecipients"),
		}
	}

	/// Parses an allowlist from raw JSON text, never failing.
	pub fn from_json_str(raw: &str) -> Self {
		match serde_json::from_str::<serde_json::Value>(raw) {
			Ok(value) => Self::from_json(&value),
			Err(e) => {
				tracing::warn!(error = %e, "Allowlist is not valid JSON, using empty allowlist");
				Self::default()
			},
		}
	}

	pub fn is_empty(&self) -> bool {
		self.contracts.is_empty() && self.token_recipients.is_empty()
	}

	pub fn contains_contract(&self, chain_id: u64, address: &Address) -> bool {
		contains(&self.contracts, chain_id, address)
	}

	pub fn contains_token_recipient(&self, chain_id: u64, address: &Address) -> bool {
		contains(&self.token_recipients, chain_id, address)
	}
}

fn contains(entries: &[AllowlistEntry], chain_id: u64, address: &Address) -> bool {
	entries
		.iter()
		.any(|entry| entry.chain_id == chain_id && entry.address == *address)
}

fn parse_entries(value: Option<&serde_json::Value>, list: &str) -> Vec<AllowlistEntry> {
	let Some(items) = value.and_then(|v| v.as_array()) else {
		if value.is_some() {
			tracing::warn!(list, "Allowlist list is not an array, treating as empty");
		}
		return Vec::new();
	};

	items
		.iter()
		.filter_map(|item| match serde_json::from_value::<AllowlistEntry>(item.clone()) {
			Ok(entry) => Some(entry),
			Err(e) => {
				tracing::warn!(list, error = %e, "Skipping malformed allowlist entry");
				None
			},
		})
		.collect()
}
