//! Execution of one sign request from validation to submission.
//!
//! The orchestrator walks a request through
//! `Validating -> ResolvingSigner -> Signing -> Submitting`. Everything up to
//! and including the wait for the nonce lock races against the request's
//! [`CancellationSignal`]; once the lock is held the submission runs to
//! completion. A [`TransactionRecord`] is written only on entry to
//! `Submitting`, so failures and cancellations before that leave no state.
//! Confirmation is followed elsewhere, fed by the `TransactionPending` event.

use crate::allowlist::{AllowlistDecision, AllowlistValidator};
use crate::delegation::{DelegationError, DelegationResolver};
use crate::engine::event_bus::EventBus;
use crate::nonce::{NonceGuard, NonceManager};
use crate::normalizer::NormalizeError;
use crate::signer::{PreparedTransaction, SignedTransaction, SignerError, TransactionSigner};
use crate::state::{NewTransaction, TransactionRepository};
use executor_delivery::{DeliveryInterface, ProviderResolver};
use executor_types::{
	truncate_id, DeliveryEvent, ExecutorEvent, NotificationKind, SignRequest, SourceProtocol,
	TransactionHash, TransactionRecord, TransactionStatus, TransactionTypeInfo, SIGNING_ERROR_CODE,
	UNSUPPORTED_METHOD_CODE,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;

/// Errors that end a request.
#[derive(Debug, Error)]
pub enum ExecutionError {
	#[error("Malformed request: {0}")]
	Malformed(String),
	#[error("Unsupported method: {0}")]
	UnsupportedMethod(String),
	#[error("Calls to the account itself cannot carry data")]
	SelfCallWithData,
	#[error("Request blocked: {0}")]
	AllowlistDenied(String),
	#[error("Delegation check failed: {0}")]
	DelegationCheckFailed(String),
	#[error("Signing infrastructure error: {0}")]
	SigningInfrastructure(String),
	#[error("Signing failed: {0}")]
	Signing(String),
	#[error("User rejected the request")]
	UserRejected,
	#[error("Batched calls require a delegated account")]
	BatchNotSupported,
	#[error("Provider error: {0}")]
	Provider(String),
	#[error("Submission failed: {0}")]
	Submission(String),
	#[error("Request cancelled")]
	Cancelled,
	#[error("Repository error: {0}")]
	Repository(String),
}

impl ExecutionError {
	/// Whether the failure is transient and the request may be tried again.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			ExecutionError::DelegationCheckFailed(_)
				| ExecutionError::SigningInfrastructure(_)
				| ExecutionError::Provider(_)
		)
	}

	/// Kind of notification shown to the user for this outcome.
	pub fn notification_kind(&self) -> NotificationKind {
		match self {
			ExecutionError::AllowlistDenied(_) => NotificationKind::Blocked,
			ExecutionError::UserRejected | ExecutionError::Cancelled => NotificationKind::NotSent,
			_ => NotificationKind::Failed,
		}
	}

	/// JSON-RPC error code returned to interactive sessions.
	pub fn rpc_code(&self) -> i64 {
		match self {
			ExecutionError::UnsupportedMethod(_) => UNSUPPORTED_METHOD_CODE,
			_ => SIGNING_ERROR_CODE,
		}
	}

	/// Error message returned to origins.
	pub fn rpc_message(&self) -> String {
		format!("Signing error: {}", self)
	}
}

impl From<NormalizeError> for ExecutionError {
	fn from(err: NormalizeError) -> Self {
		match err {
			NormalizeError::Malformed(detail) => ExecutionError::Malformed(detail),
			NormalizeError::UnsupportedMethod(method) => ExecutionError::UnsupportedMethod(method),
			NormalizeError::SelfCallWithData => ExecutionError::SelfCallWithData,
		}
	}
}

impl From<SignerError> for ExecutionError {
	fn from(err: SignerError) -> Self {
		match err {
			SignerError::UserRejected => ExecutionError::UserRejected,
			SignerError::Infrastructure(detail) => ExecutionError::SigningInfrastructure(detail),
			SignerError::BatchNotSupported => ExecutionError::BatchNotSupported,
			other => ExecutionError::Signing(other.to_string()),
		}
	}
}

impl From<DelegationError> for ExecutionError {
	fn from(err: DelegationError) -> Self {
		ExecutionError::DelegationCheckFailed(err.to_string())
	}
}

/// Cancellation flag of one request, raised when its origin goes away.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
	receiver: Option<watch::Receiver<bool>>,
}

impl CancellationSignal {
	/// A signal that never fires.
	pub fn never() -> Self {
		Self::default()
	}

	pub fn new(receiver: watch::Receiver<bool>) -> Self {
		Self {
			receiver: Some(receiver),
		}
	}

	/// Creates a trigger and the signal it raises.
	pub fn channel() -> (watch::Sender<bool>, Self) {
		let (sender, receiver) = watch::channel(false);
		(sender, Self::new(receiver))
	}

	pub fn is_cancelled(&self) -> bool {
		self.receiver
			.as_ref()
			.is_some_and(|receiver| *receiver.borrow())
	}

	/// Completes once cancellation is raised. Pends forever if the trigger is
	/// dropped without firing.
	pub async fn cancelled(&self) {
		if let Some(receiver) = &self.receiver {
			let mut receiver = receiver.clone();
			if receiver.wait_for(|cancelled| *cancelled).await.is_ok() {
				return;
			}
		}
		std::future::pending::<()>().await
	}
}

/// Successful end of a request's execution.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
	/// A message was signed.
	Signed { signature: String },
	/// A transaction was accepted by an endpoint; the record is `Pending`.
	Submitted {
		record: TransactionRecord,
		tx_hash: TransactionHash,
	},
}

/// Everything decided before the nonce lock is taken.
struct ReadyTransaction {
	prepared: PreparedTransaction,
	provider: Arc<dyn DeliveryInterface>,
	private: bool,
	nonce: NonceGuard,
}

/// Drives requests through validation, signing and submission.
pub struct ExecutionOrchestrator {
	allowlist: Arc<AllowlistValidator>,
	delegation: Arc<DelegationResolver>,
	providers: Arc<ProviderResolver>,
	signer: Arc<TransactionSigner>,
	nonces: Arc<NonceManager>,
	repository: Arc<TransactionRepository>,
	event_bus: EventBus,
	submission_timeout: Duration,
}

impl ExecutionOrchestrator {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		allowlist: Arc<AllowlistValidator>,
		delegation: Arc<DelegationResolver>,
		providers: Arc<ProviderResolver>,
		signer: Arc<TransactionSigner>,
		nonces: Arc<NonceManager>,
		repository: Arc<TransactionRepository>,
		event_bus: EventBus,
		submission_timeout: Duration,
	) -> Self {
		Self {
			allowlist,
			delegation,
			providers,
			signer,
			nonces,
			repository,
			event_bus,
			submission_timeout,
		}
	}

	/// Executes `request` until it is signed or submitted.
	///
	/// # Errors
	///
	/// Errors raised before submission leave no record. A failed submission
	/// leaves its record in `Failed` and returns `Submission`.
	#[instrument(skip_all, fields(request_id = %truncate_id(request.request_id()), chain_id = request.chain_id()))]
	pub async fn execute(
		&self,
		request: &SignRequest,
		cancel: &CancellationSignal,
	) -> Result<ExecutionOutcome, ExecutionError> {
		if cancel.is_cancelled() {
			return Err(ExecutionError::Cancelled);
		}

		if request.is_message() {
			let signature = tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(self.cancelled()),
				signature = self.sign_message(request) => signature?,
			};
			tracing::info!("Message signed");
			return Ok(ExecutionOutcome::Signed { signature });
		}

		let ready = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(self.cancelled()),
			ready = self.prepare(request) => ready?,
		};

		let (record, tx_hash) = self.submit(request, ready).await?;
		Ok(ExecutionOutcome::Submitted { record, tx_hash })
	}

	fn cancelled(&self) -> ExecutionError {
		tracing::info!("Request cancelled before submission");
		ExecutionError::Cancelled
	}

	fn needs_approval(request: &SignRequest) -> bool {
		request.origin().source_protocol() != SourceProtocol::Internal
	}

	async fn sign_message(&self, request: &SignRequest) -> Result<String, ExecutionError> {
		if Self::needs_approval(request) {
			self.signer.request_approval(request).await?;
		}
		match self.signer.sign_message(request).await {
			Err(e) if e.is_retryable() => {
				tracing::warn!(error = %e, "Signing failed, retrying once");
				Ok(self.signer.sign_message(request).await?)
			},
			result => Ok(result?),
		}
	}

	/// Validation, signer resolution, estimation and approval, ending with
	/// the nonce lock held.
	async fn prepare(&self, request: &SignRequest) -> Result<ReadyTransaction, ExecutionError> {
		if let AllowlistDecision::Denied(reason) = self.allowlist.validate(request) {
			tracing::warn!(reason = %reason, "Request denied by allowlist");
			return Err(ExecutionError::AllowlistDenied(reason));
		}

		let account = request.account();
		let chain_id = request.chain_id();
		let private = request.options().submit_privately && self.providers.supports_private(chain_id);

		let (delegation, provider) = tokio::try_join!(
			async {
				self.delegation
					.resolve(account, chain_id)
					.await
					.map_err(ExecutionError::from)
			},
			async {
				self.providers
					.get_provider(chain_id, private)
					.await
					.map_err(|e| ExecutionError::Provider(e.to_string()))
			},
		)?;
		tracing::debug!(
			needs_delegation = delegation.needs_delegation,
			consent = delegation.consent_granted,
			private,
			"Signer resolved"
		);

		let prepared = self
			.signer
			.prepare(request, &delegation, provider.as_ref())
			.await?;

		if Self::needs_approval(request) {
			self.signer.request_approval(request).await?;
		}

		let nonce = self.nonces.acquire(account, chain_id).await;
		Ok(ReadyTransaction {
			prepared,
			provider,
			private,
			nonce,
		})
	}

	/// Assigns the nonce, signs, records and broadcasts. Runs under the
	/// nonce lock and is not cancellable.
	async fn submit(
		&self,
		request: &SignRequest,
		ready: ReadyTransaction,
	) -> Result<(TransactionRecord, TransactionHash), ExecutionError> {
		let ReadyTransaction {
			prepared,
			provider,
			private,
			nonce: mut guard,
		} = ready;
		let account = prepared.account;
		let chain_id = prepared.chain_id;

		let public = if private {
			self.providers
				.get_provider(chain_id, false)
				.await
				.map_err(|e| ExecutionError::Provider(e.to_string()))?
		} else {
			provider.clone()
		};
		let chain_pending = public
			.pending_nonce(account)
			.await
			.map_err(|e| ExecutionError::Provider(e.to_string()))?;
		let private_next = self
			.repository
			.next_private_nonce(&account, chain_id)
			.await
			.map_err(|e| ExecutionError::Repository(e.to_string()))?;
		let nonce = guard.resolve(chain_pending, private_next);

		let signed = self.sign_transaction(&prepared, nonce).await?;

		let record = self
			.repository
			.create(NewTransaction {
				request_id: request.request_id().to_string(),
				account,
				chain_id,
				nonce,
				next_nonce: signed.next_nonce,
				private,
				hash: signed.hash.clone(),
				type_info: request
					.type_info()
					.unwrap_or(TransactionTypeInfo::ContractInteraction { to: prepared.to }),
				batch_id: request.batch_id().map(str::to_string),
				origin_name: request.origin().name.clone(),
			})
			.await
			.map_err(|e| ExecutionError::Repository(e.to_string()))?;

		tracing::info!(
			record_id = %truncate_id(&record.id),
			nonce,
			tx_hash = %truncate_id(&signed.hash.to_hex()),
			private,
			"Submitting transaction"
		);

		let error = match tokio::time::timeout(self.submission_timeout, provider.send_raw(&signed.raw))
			.await
		{
			Ok(Ok(hash)) => {
				if hash != signed.hash {
					tracing::warn!(
						expected = %signed.hash,
						reported = %hash,
						"Endpoint reported a different transaction hash"
					);
				}
				guard.commit(signed.next_nonce);
				self.event_bus
					.publish(ExecutorEvent::Delivery(DeliveryEvent::TransactionPending {
						record_id: record.id.clone(),
						tx_hash: signed.hash.clone(),
						chain_id,
						private,
					}))
					.ok();
				return Ok((record, signed.hash));
			},
			Ok(Err(e)) => e.to_string(),
			Err(_) => format!(
				"submission timed out after {}s",
				self.submission_timeout.as_secs()
			),
		};

		tracing::error!(record_id = %truncate_id(&record.id), error = %error, "Submission failed");
		if let Err(e) = self
			.repository
			.update_status(&record.id, TransactionStatus::Failed, Some(error.clone()))
			.await
		{
			tracing::error!(record_id = %truncate_id(&record.id), error = %e, "Failed to mark record as failed");
		}
		Err(ExecutionError::Submission(error))
	}

	async fn sign_transaction(
		&self,
		prepared: &PreparedTransaction,
		nonce: u64,
	) -> Result<SignedTransaction, ExecutionError> {
		match self.signer.sign(prepared, nonce).await {
			Err(e) if e.is_retryable() => {
				tracing::warn!(error = %e, "Signing failed, retrying once");
				Ok(self.signer.sign(prepared, nonce).await?)
			},
			result => Ok(result?),
		}
	}
}
