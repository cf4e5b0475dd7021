//! Delegation consent and on-chain delegation status.
//!
//! An account is routed through its delegation contract only when it opted
//! in. The opt-in is a persisted flag per account ([`ConsentStore`]); without
//! it the resolver answers immediately and never touches the network.

use alloy_primitives::Address;
use backoff::backoff::Constant;
use executor_delivery::ProviderResolver;
use executor_storage::{StorageError, StorageService};
use executor_types::{DelegationCheckResult, OnChainDelegation, StorageKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while resolving delegation status.
#[derive(Debug, Error)]
pub enum DelegationError {
	#[error("Consent lookup failed: {0}")]
	Consent(String),
	#[error("Delegation check failed after {attempts} attempts: {message}")]
	CheckFailed { attempts: u32, message: String },
}

/// Persistent per-account delegation consent.
pub struct ConsentStore {
	storage: Arc<StorageService>,
}

impl ConsentStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	fn key(account: &Address) -> String {
		format!("{:#x}", account)
	}

	/// Whether `account` granted consent. Accounts never asked count as not
	/// granted.
	pub async fn is_granted(&self, account: &Address) -> Result<bool, StorageError> {
		match self
			.storage
			.retrieve::<bool>(StorageKey::DelegationConsent.as_str(), &Self::key(account))
			.await
		{
			Ok(granted) => Ok(granted),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	pub async fn grant(&self, account: &Address) -> Result<(), StorageError> {
		self.set(account, true).await
	}

	pub async fn revoke(&self, account: &Address) -> Result<(), StorageError> {
		self.set(account, false).await
	}

	async fn set(&self, account: &Address, granted: bool) -> Result<(), StorageError> {
		tracing::info!(account = %account, granted, "Delegation consent updated");
		self.storage
			.store(
				StorageKey::DelegationConsent.as_str(),
				&Self::key(account),
				&granted,
			)
			.await
	}
}

/// Decides whether an account must sign through its delegation contract.
pub struct DelegationResolver {
	consent: Arc<ConsentStore>,
	providers: Arc<ProviderResolver>,
	/// Delegation contract per chain.
	contracts: HashMap<u64, Address>,
	attempts: u32,
	retry_delay: Duration,
}

impl DelegationResolver {
	pub fn new(
		consent: Arc<ConsentStore>,
		providers: Arc<ProviderResolver>,
		contracts: HashMap<u64, Address>,
		attempts: u32,
		retry_delay: Duration,
	) -> Self {
		Self {
			consent,
			providers,
			contracts,
			attempts: attempts.max(1),
			retry_delay,
		}
	}

	/// Resolves the delegation status of `account` on `chain_id`.
	///
	/// Without consent the result is `needs_delegation = false` and no
	/// network call is made. With consent, the account code is read; an
	/// account that is undelegated or already delegated to the chain's
	/// contract needs the bundled path, one delegated elsewhere stays direct.
	///
	/// # Errors
	///
	/// Read failures are retried and then surface as `CheckFailed`; they are
	/// never mistaken for "no delegation".
	pub async fn resolve(
		&self,
		account: Address,
		chain_id: u64,
	) -> Result<DelegationCheckResult, DelegationError> {
		let consent_granted = self
			.consent
			.is_granted(&account)
			.await
			.map_err(|e| DelegationError::Consent(e.to_string()))?;
		if !consent_granted {
			return Ok(DelegationCheckResult::direct(false));
		}

		let Some(contract) = self.contracts.get(&chain_id).copied() else {
			tracing::debug!(chain_id, "No delegation contract configured for chain");
			return Ok(DelegationCheckResult::direct(true));
		};

		let code = self.read_code(account, chain_id).await?;
		let result = match OnChainDelegation::from_code(&code) {
			OnChainDelegation::None => DelegationCheckResult {
				needs_delegation: true,
				delegation_contract_address: Some(contract),
				consent_granted,
			},
			OnChainDelegation::Delegated(target) if target == contract => DelegationCheckResult {
				needs_delegation: true,
				delegation_contract_address: Some(contract),
				consent_granted,
			},
			OnChainDelegation::Delegated(target) => {
				tracing::warn!(
					account = %account,
					delegated_to = %target,
					"Account delegated to a foreign contract, signing directly"
				);
				DelegationCheckResult::direct(consent_granted)
			},
			OnChainDelegation::Contract => DelegationCheckResult::direct(consent_granted),
		};

		Ok(result)
	}

	async fn read_code(
		&self,
		account: Address,
		chain_id: u64,
	) -> Result<alloy_primitives::Bytes, DelegationError> {
		let attempts = AtomicU32::new(0);
		let attempts = &attempts;
		let max_attempts = self.attempts;
		let providers = &self.providers;

		backoff::future::retry(Constant::new(self.retry_delay), move || async move {
			let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
			let read = async {
				let provider = providers.get_provider(chain_id, false).await?;
				provider.get_code(account).await
			};
			read.await.map_err(|e| {
				tracing::warn!(chain_id, attempt, error = %e, "Delegation status read failed");
				let error = DelegationError::CheckFailed {
					attempts: attempt,
					message: e.to_string(),
				};
				if attempt >= max_attempts {
					backoff::Error::permanent(error)
				} else {
					backoff::Error::transient(error)
				}
			})
		})
		.await
	}
}
