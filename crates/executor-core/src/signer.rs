//! Approval and signing of sign requests.
//!
//! Signing happens in two halves. [`TransactionSigner::prepare`] picks the
//! strategy and estimates gas and fees; it may wait on slow endpoints, so it
//! runs before the nonce lock is taken. [`TransactionSigner::sign`] only
//! needs the nonce and runs under the lock.
//!
//! Two strategies exist. The direct strategy signs one EIP-1559 transaction
//! carrying the single call. The bundled strategy signs one EIP-7702
//! transaction sent to the account itself: its authorization list installs
//! the delegation contract and its calldata runs every call through
//! `execute`, so setup and calls land atomically.

use crate::abi;
use alloy_consensus::{TxEip1559, TxEip7702, TypedTransaction};
use alloy_dyn_abi::TypedData;
use alloy_eips::eip2718::Encodable2718;
use alloy_eips::eip7702::Authorization;
use alloy_primitives::{Address, Bytes, U256};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use dashmap::DashMap;
use executor_account::{AccountError, AccountInterface, AccountService};
use executor_delivery::DeliveryInterface;
use executor_types::{
	Call, DelegationCheckResult, FeeEstimate, MessagePayload, SignRequest, TransactionHash,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Gas added on top of the inner calls of a bundled transaction: the
/// delegation dispatch plus the authorization itself.
const BUNDLE_GAS_OVERHEAD: u64 = 100_000;

/// Errors that can occur during approval and signing.
#[derive(Debug, Error)]
pub enum SignerError {
	/// The user declined, or the approval step was aborted.
	#[error("User rejected the request")]
	UserRejected,
	/// The key service is temporarily unavailable.
	#[error("Signing infrastructure error: {0}")]
	Infrastructure(String),
	/// The key material refused to sign.
	#[error("Signing failed: {0}")]
	Account(String),
	/// Several calls were requested for an account without delegation.
	#[error("Batched calls require a delegated account")]
	BatchNotSupported,
	/// The bundled strategy was selected without consent.
	#[error("Bundled signing requires delegation consent")]
	ConsentRequired,
	/// Gas or fee estimation failed.
	#[error("Estimation failed: {0}")]
	Estimation(String),
	#[error("Invalid request: {0}")]
	Invalid(String),
}

impl SignerError {
	/// Whether the same signing operation may succeed when retried.
	pub fn is_retryable(&self) -> bool {
		matches!(self, SignerError::Infrastructure(_))
	}
}

impl From<AccountError> for SignerError {
	fn from(err: AccountError) -> Self {
		if err.is_transient() {
			SignerError::Infrastructure(err.to_string())
		} else {
			SignerError::Account(err.to_string())
		}
	}
}

/// Decision of the approval step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
	Approved,
	Rejected,
}

/// The step where the user confirms or declines a request.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
	/// Waits for the user's decision on `request`.
	async fn request_approval(&self, request: &SignRequest) -> Result<Approval, SignerError>;

	/// Delivers a decision for a waiting request. Returns false when nothing
	/// is waiting under `request_id`.
	fn resolve(&self, request_id: &str, approved: bool) -> bool;
}

/// Approves everything. Used for the application's own flows, whose
/// confirmation happened before the request was raised.
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
	async fn request_approval(&self, _request: &SignRequest) -> Result<Approval, SignerError> {
		Ok(Approval::Approved)
	}

	fn resolve(&self, _request_id: &str, _approved: bool) -> bool {
		false
	}
}

/// Approval gate fed by an external surface through [`ApprovalGate::resolve`].
///
/// A request that is not decided within the timeout counts as rejected.
pub struct ChannelApprovalGate {
	waiting: DashMap<String, oneshot::Sender<bool>>,
	timeout: Duration,
}

/// Removes a waiting entry when the approval future ends or is dropped.
struct WaitingEntry<'a> {
	waiting: &'a DashMap<String, oneshot::Sender<bool>>,
	request_id: String,
}

impl Drop for WaitingEntry<'_> {
	fn drop(&mut self) {
		self.waiting.remove(&self.request_id);
	}
}

impl ChannelApprovalGate {
	pub fn new(timeout: Duration) -> Self {
		Self {
			waiting: DashMap::new(),
			timeout,
		}
	}

	/// Ids of requests currently waiting for a decision.
	pub fn waiting(&self) -> Vec<String> {
		self.waiting.iter().map(|entry| entry.key().clone()).collect()
	}
}

#[async_trait]
impl ApprovalGate for ChannelApprovalGate {
	async fn request_approval(&self, request: &SignRequest) -> Result<Approval, SignerError> {
		let (sender, receiver) = oneshot::channel();
		let request_id = request.request_id().to_string();
		if self.waiting.contains_key(&request_id) {
			return Err(SignerError::Invalid(format!(
				"request {} is already awaiting approval",
				request_id
			)));
		}
		self.waiting.insert(request_id.clone(), sender);
		let _entry = WaitingEntry {
			waiting: &self.waiting,
			request_id: request_id.clone(),
		};

		tracing::info!(request_id = %request_id, "Awaiting user approval");
		match tokio::time::timeout(self.timeout, receiver).await {
			Ok(Ok(true)) => Ok(Approval::Approved),
			Ok(Ok(false)) | Ok(Err(_)) => Ok(Approval::Rejected),
			Err(_) => {
				tracing::info!(request_id = %request_id, "Approval timed out");
				Ok(Approval::Rejected)
			},
		}
	}

	fn resolve(&self, request_id: &str, approved: bool) -> bool {
		match self.waiting.remove(request_id) {
			Some((_, sender)) => sender.send(approved).is_ok(),
			None => false,
		}
	}
}

/// How a transaction is signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStrategy {
	/// One EIP-1559 transaction with the single call.
	Direct,
	/// One EIP-7702 transaction to the account installing `delegation_contract`
	/// and executing every call through it.
	Bundled { delegation_contract: Address },
}

/// A transaction ready to be signed once a nonce is known.
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
	pub account: Address,
	pub chain_id: u64,
	pub strategy: SigningStrategy,
	pub to: Address,
	pub value: U256,
	pub input: Bytes,
	pub gas_limit: u64,
	pub fees: FeeEstimate,
}

/// A signed, encoded transaction.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
	pub raw: Bytes,
	pub hash: TransactionHash,
	pub nonce: u64,
	/// Account nonce after this transaction is mined.
	pub next_nonce: u64,
	pub strategy: SigningStrategy,
}

/// Signs requests with the requesting account's key only.
pub struct TransactionSigner {
	accounts: Arc<AccountService>,
	approvals: Arc<dyn ApprovalGate>,
}

impl TransactionSigner {
	pub fn new(accounts: Arc<AccountService>, approvals: Arc<dyn ApprovalGate>) -> Self {
		Self {
			accounts,
			approvals,
		}
	}

	fn account(&self, address: &Address) -> Result<Arc<dyn AccountInterface>, SignerError> {
		Ok(self.accounts.signer(address)?)
	}

	/// Runs the approval step. A decline is `UserRejected`.
	pub async fn request_approval(&self, request: &SignRequest) -> Result<(), SignerError> {
		match self.approvals.request_approval(request).await? {
			Approval::Approved => Ok(()),
			Approval::Rejected => Err(SignerError::UserRejected),
		}
	}

	/// Forwards a decision to the approval gate.
	pub fn resolve_approval(&self, request_id: &str, approved: bool) -> bool {
		self.approvals.resolve(request_id, approved)
	}

	/// Signs a message request, returning the 65-byte signature as hex.
	pub async fn sign_message(&self, request: &SignRequest) -> Result<String, SignerError> {
		let SignRequest::MessageSign { message, .. } = request else {
			return Err(SignerError::Invalid("not a message request".to_string()));
		};
		let account = self.account(&request.account())?;

		let signature = match message {
			MessagePayload::Personal(bytes) => account.sign_message(bytes).await?,
			MessagePayload::TypedData(document) => {
				let typed_data: TypedData = serde_json::from_str(document)
					.map_err(|e| SignerError::Invalid(format!("invalid typed data: {}", e)))?;
				account.sign_typed_data(&typed_data).await?
			},
		};

		Ok(format!("0x{}", hex::encode(signature.as_bytes())))
	}

	/// Chooses the strategy and estimates gas and fees for a transaction
	/// request.
	///
	/// # Errors
	///
	/// `BatchNotSupported` for several calls without delegation,
	/// `ConsentRequired` if delegation is reported without consent, and
	/// `Estimation` when the endpoint cannot estimate.
	pub async fn prepare(
		&self,
		request: &SignRequest,
		delegation: &DelegationCheckResult,
		provider: &dyn DeliveryInterface,
	) -> Result<PreparedTransaction, SignerError> {
		let account = request.account();
		let calls = request.calls();
		if calls.is_empty() {
			return Err(SignerError::Invalid("request has no calls".to_string()));
		}

		let strategy = match (delegation.needs_delegation, delegation.delegation_contract_address) {
			(true, _) if !delegation.consent_granted => return Err(SignerError::ConsentRequired),
			(true, Some(delegation_contract)) => SigningStrategy::Bundled {
				delegation_contract,
			},
			(true, None) => {
				return Err(SignerError::Invalid(
					"delegation needed but no contract resolved".to_string(),
				))
			},
			(false, _) if calls.len() > 1 => return Err(SignerError::BatchNotSupported),
			(false, _) => SigningStrategy::Direct,
		};

		let fees = provider
			.estimate_fees()
			.await
			.map_err(|e| SignerError::Estimation(e.to_string()))?;

		let prepared = match strategy {
			SigningStrategy::Direct => {
				let call = &calls[0];
				PreparedTransaction {
					account,
					chain_id: request.chain_id(),
					strategy,
					to: call.to,
					value: call.value,
					input: call.data.clone(),
					gas_limit: gas_for(call, account, provider).await?,
					fees,
				}
			},
			SigningStrategy::Bundled { .. } => {
				let mut gas_limit = BUNDLE_GAS_OVERHEAD;
				for call in calls {
					gas_limit = gas_limit.saturating_add(gas_for(call, account, provider).await?);
				}
				PreparedTransaction {
					account,
					chain_id: request.chain_id(),
					strategy,
					to: account,
					value: U256::ZERO,
					input: execute_calldata(calls),
					gas_limit,
					fees,
				}
			},
		};

		Ok(prepared)
	}

	/// Signs a prepared transaction with `nonce`.
	///
	/// The bundled strategy signs the authorization with `nonce + 1`, since
	/// the account's nonce is bumped by the transaction before the
	/// authorization is applied.
	pub async fn sign(
		&self,
		prepared: &PreparedTransaction,
		nonce: u64,
	) -> Result<SignedTransaction, SignerError> {
		let account = self.account(&prepared.account)?;

		let (tx, next_nonce) = match prepared.strategy {
			SigningStrategy::Direct => (
				TypedTransaction::Eip1559(TxEip1559 {
					chain_id: prepared.chain_id,
					nonce,
					gas_limit: prepared.gas_limit,
					max_fee_per_gas: prepared.fees.max_fee_per_gas,
					max_priority_fee_per_gas: prepared.fees.max_priority_fee_per_gas,
					to: prepared.to.into(),
					value: prepared.value,
					access_list: Default::default(),
					input: prepared.input.clone(),
				}),
				nonce + 1,
			),
			SigningStrategy::Bundled {
				delegation_contract,
			} => {
				let authorization = Authorization {
					chain_id: U256::from(prepared.chain_id),
					address: delegation_contract,
					nonce: nonce + 1,
				};
				let signature = account.sign_hash(&authorization.signature_hash()).await?;
				(
					TypedTransaction::Eip7702(TxEip7702 {
						chain_id: prepared.chain_id,
						nonce,
						gas_limit: prepared.gas_limit,
						max_fee_per_gas: prepared.fees.max_fee_per_gas,
						max_priority_fee_per_gas: prepared.fees.max_priority_fee_per_gas,
						to: prepared.to,
						value: prepared.value,
						access_list: Default::default(),
						authorization_list: vec![authorization.into_signed(signature)],
						input: prepared.input.clone(),
					}),
					nonce + 2,
				)
			},
		};

		let envelope = account.sign_transaction(tx).await?;
		Ok(SignedTransaction {
			raw: envelope.encoded_2718().into(),
			hash: TransactionHash(envelope.tx_hash().to_vec()),
			nonce,
			next_nonce,
			strategy: prepared.strategy,
		})
	}
}

/// Calldata of `execute(calls)` on the delegation contract.
pub fn execute_calldata(calls: &[Call]) -> Bytes {
	abi::executeCall {
		calls: calls
			.iter()
			.map(|call| abi::Call {
				to: call.to,
				value: call.value,
				data: call.data.clone(),
			})
			.collect(),
	}
	.abi_encode()
	.into()
}

/// The caller's gas limit, or an estimate.
async fn gas_for(
	call: &Call,
	account: Address,
	provider: &dyn DeliveryInterface,
) -> Result<u64, SignerError> {
	if let Some(gas_limit) = call.gas_limit {
		return Ok(gas_limit);
	}
	let request = TransactionRequest::default()
		.from(account)
		.to(call.to)
		.value(call.value)
		.input(call.data.clone().into());
	provider
		.estimate_gas(request)
		.await
		.map_err(|e| SignerError::Estimation(e.to_string()))
}
