//! Delegation status types and EIP-7702 designator helpers.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Code prefix of an account delegated under EIP-7702.
pub const EIP7702_DELEGATION_DESIGNATOR: [u8; 3] = [0xef, 0x01, 0x00];

/// Length of a delegation designator: prefix plus a 20-byte address.
pub const EIP7702_DESIGNATOR_LENGTH: usize = EIP7702_DELEGATION_DESIGNATOR.len() + 20;

/// Outcome of resolving whether an account must sign through its delegation
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationCheckResult {
	pub needs_delegation: bool,
	pub delegation_contract_address: Option<Address>,
	pub consent_granted: bool,
}

impl DelegationCheckResult {
	/// Result for accounts that stay on the direct path.
	pub fn direct(consent_granted: bool) -> Self {
		Self {
			needs_delegation: false,
			delegation_contract_address: None,
			consent_granted,
		}
	}
}

/// On-chain delegation state of an account, derived from its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnChainDelegation {
	/// Plain externally owned account.
	None,
	/// Delegated to the given contract.
	Delegated(Address),
	/// Deployed contract code; not an EOA.
	Contract,
}

impl OnChainDelegation {
	/// Classifies account code.
	pub fn from_code(code: &[u8]) -> Self {
		if code.is_empty() {
			return Self::None;
		}
		if code.len() == EIP7702_DESIGNATOR_LENGTH && code.starts_with(&EIP7702_DELEGATION_DESIGNATOR) {
			return Self::Delegated(Address::from_slice(&code[EIP7702_DELEGATION_DESIGNATOR.len()..]));
		}
		Self::Contract
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_classifies_account_code() {
		assert_eq!(OnChainDelegation::from_code(&[]), OnChainDelegation::None);

		let target = Address::repeat_byte(0x42);
		let mut designator = EIP7702_DELEGATION_DESIGNATOR.to_vec();
		designator.extend_from_slice(target.as_slice());
		assert_eq!(
			OnChainDelegation::from_code(&designator),
			OnChainDelegation::Delegated(target)
		);

		assert_eq!(
			OnChainDelegation::from_code(&[0x60, 0x80, 0x60, 0x40]),
			OnChainDelegation::Contract
		);
	}
}
