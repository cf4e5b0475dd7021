//! Storage namespaces used by the executor.

use std::str::FromStr;

/// Namespaces of persisted data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Transaction records by record id.
	Transactions,
	/// Record id by `account:chain:nonce` slot.
	NonceSlots,
	/// Delegation consent flags by account.
	DelegationConsent,
}

impl StorageKey {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Transactions => "transactions",
			StorageKey::NonceSlots => "nonce_slots",
			StorageKey::DelegationConsent => "delegation_consent",
		}
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Transactions,
			Self::NonceSlots,
			Self::DelegationConsent,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all().find(|key| key.as_str() == s).ok_or(())
	}
}
