//! Execution engine coordinating intake, execution and confirmation.
//!
//! Origins hand raw requests to the engine. Each request is normalized,
//! queued on a bounded intake channel and executed in its own task under a
//! concurrency limit. Requests from interactive sessions share a per-topic
//! cancellation trigger fired when the session disconnects. The main loop
//! also reacts to delivery events: submitted transactions get a confirmation
//! monitor, and confirmations or failures finalize their records.

pub mod event_bus;
pub mod lifecycle;
mod queries;

use crate::allowlist::AllowlistValidator;
use crate::delegation::{ConsentStore, DelegationResolver};
use crate::handlers::{RequestHandler, TransactionHandler};
use crate::nonce::NonceManager;
use crate::normalizer::{normalize, origin_of, wallet_query, RawRequest};
use crate::notifications::NotificationDispatcher;
use crate::orchestrator::{CancellationSignal, ExecutionError, ExecutionOrchestrator};
use crate::response::{CompletionHandle, ResponseRouter, RouterError};
use crate::signer::TransactionSigner;
use crate::state::TransactionRepository;
use alloy_primitives::Address;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use executor_config::Config;
use executor_delivery::ProviderResolver;
use executor_storage::StorageService;
use executor_types::{
	truncate_id, DeeplinkRequest, DeliveryEvent, ExecutorEvent, InteractiveRequest,
	InternalRequest, JsonRpcResponse, NotificationEvent, RequestEvent, SignRequest,
	TransactionRecord,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, Notify, Semaphore};

/// Capacity of the internal event bus.
const EVENT_BUS_CAPACITY: usize = 1024;

/// How long delivered request ids are remembered for duplicate detection.
const DELIVERED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
	#[error("Handler error: {0}")]
	Handler(String),
	/// The request could not be normalized.
	#[error("{message}")]
	Rejected { code: i64, message: String },
	#[error("Request {0} is already in flight or answered")]
	Duplicate(String),
	/// The intake queue is full.
	#[error("Executor is busy")]
	Busy,
	/// The request ended without a result for its caller.
	#[error("Request {0} was abandoned")]
	Abandoned(String),
}

impl From<RouterError> for EngineError {
	fn from(err: RouterError) -> Self {
		match err {
			RouterError::Duplicate(id) => EngineError::Duplicate(id),
		}
	}
}

/// A normalized request waiting for a worker.
struct Intake {
	request: SignRequest,
	cancel: CancellationSignal,
}

/// Main engine that runs sign requests end to end.
#[derive(Clone)]
pub struct ExecutionEngine {
	/// Executor configuration.
	pub(crate) config: Config,
	/// Storage service for records and consent.
	pub(crate) storage: Arc<StorageService>,
	pub(crate) repository: Arc<TransactionRepository>,
	pub(crate) router: Arc<ResponseRouter>,
	pub(crate) consent: Arc<ConsentStore>,
	pub(crate) allowlist: Arc<AllowlistValidator>,
	pub(crate) signer: Arc<TransactionSigner>,
	/// Event bus for inter-component communication.
	pub(crate) event_bus: event_bus::EventBus,
	pub(crate) request_handler: Arc<RequestHandler>,
	pub(crate) transaction_handler: Arc<TransactionHandler>,
	/// Cancellation trigger per interactive session topic.
	sessions: Arc<DashMap<String, watch::Sender<bool>>>,
	/// Request ids queued or executing.
	in_flight: Arc<DashMap<String, ()>>,
	intake: mpsc::Sender<Intake>,
	intake_receiver: Arc<Mutex<Option<mpsc::Receiver<Intake>>>>,
	notification_receiver: Arc<Mutex<Option<mpsc::Receiver<NotificationEvent>>>>,
	shutdown: Arc<Notify>,
}

impl ExecutionEngine {
	/// Creates an engine from its external collaborators, wiring the
	/// pipeline components from `config`.
	pub fn new(
		config: Config,
		storage: Arc<StorageService>,
		providers: Arc<ProviderResolver>,
		signer: Arc<TransactionSigner>,
		allowlist: Arc<AllowlistValidator>,
		poll_interval: Duration,
	) -> Self {
		let event_bus = event_bus::EventBus::new(EVENT_BUS_CAPACITY);
		let consent = Arc::new(ConsentStore::new(storage.clone()));
		let repository = Arc::new(TransactionRepository::new(storage.clone()));
		let (notifications, notification_receiver) =
			NotificationDispatcher::new(config.notifications.capacity);
		let router = Arc::new(ResponseRouter::new(Duration::from_secs(
			config.webhook.timeout_seconds,
		)));

		let contracts: HashMap<u64, Address> = config
			.networks
			.iter()
			.filter_map(|(chain_id, network)| {
				network
					.delegation_contract
					.map(|contract| (*chain_id, contract))
			})
			.collect();
		let delegation = Arc::new(DelegationResolver::new(
			consent.clone(),
			providers.clone(),
			contracts,
			config.executor.delegation_check_retries,
			Duration::from_millis(config.executor.retry_delay_ms),
		));

		let nonces = Arc::new(NonceManager::new());
		let orchestrator = Arc::new(ExecutionOrchestrator::new(
			allowlist.clone(),
			delegation,
			providers.clone(),
			signer.clone(),
			nonces.clone(),
			repository.clone(),
			event_bus.clone(),
			Duration::from_secs(config.executor.submission_timeout_seconds),
		));

		let request_handler = Arc::new(RequestHandler::new(
			orchestrator,
			router.clone(),
			notifications.clone(),
			event_bus.clone(),
		));

		let transaction_handler = Arc::new(TransactionHandler::new(
			providers,
			repository.clone(),
			nonces,
			notifications,
			event_bus.clone(),
			config.executor.monitoring_timeout_minutes,
			poll_interval,
		));

		let (intake, intake_receiver) = mpsc::channel(config.executor.intake_capacity.max(1));

		Self {
			config,
			storage,
			repository,
			router,
			consent,
			allowlist,
			signer,
			event_bus,
			request_handler,
			transaction_handler,
			sessions: Arc::new(DashMap::new()),
			in_flight: Arc::new(DashMap::new()),
			intake,
			intake_receiver: Arc::new(Mutex::new(Some(intake_receiver))),
			notification_receiver: Arc::new(Mutex::new(Some(notification_receiver))),
			shutdown: Arc::new(Notify::new()),
		}
	}

	/// Submits a request from an interactive session and waits for its
	/// JSON-RPC response.
	///
	/// # Errors
	///
	/// `Rejected` when the request has no id to correlate a response with,
	/// `Duplicate` for an id already in flight, and `Abandoned` when the
	/// session disconnected before a result was produced.
	pub async fn submit_interactive(
		&self,
		raw: InteractiveRequest,
	) -> Result<JsonRpcResponse, EngineError> {
		if let Some(query) = wallet_query(&raw) {
			let Some(id) = raw.id else {
				let error = ExecutionError::Malformed("missing request id".to_string());
				return Err(EngineError::Rejected {
					code: error.rpc_code(),
					message: error.rpc_message(),
				});
			};
			return match query {
				Ok(query) => self.answer_query(id, query).await,
				Err(e) => Ok(Self::invalid_query(id, &e.to_string())),
			};
		}

		let topic = raw.topic.clone();
		let raw = RawRequest::Interactive(raw);

		let (request_id, request) = match normalize(&raw) {
			Ok(request) => (request.request_id().to_string(), Ok(request)),
			Err(e) => match origin_of(&raw) {
				Some((request_id, _)) => (request_id, Err(e)),
				None => return Err(self.reject(&raw, e.into()).await),
			},
		};
		self.claim(&request_id)?;
		let receiver = match self.router.register_interactive(&request_id) {
			Ok(receiver) => receiver,
			Err(e) => {
				self.in_flight.remove(&request_id);
				return Err(e.into());
			},
		};

		match request {
			Ok(request) => {
				let cancel = self.session_signal(&topic);
				self.enqueue(request, cancel).await?;
			},
			Err(e) => {
				self.reject(&raw, e.into()).await;
				self.in_flight.remove(&request_id);
			},
		}

		receiver
			.await
			.map_err(|_| EngineError::Abandoned(request_id))
	}

	/// Submits a deep-link request. The result goes to its webhook.
	///
	/// Returns the request id once the request is queued.
	pub async fn submit_deeplink(&self, raw: DeeplinkRequest) -> Result<String, EngineError> {
		let raw = RawRequest::Deeplink(raw);
		let request = match normalize(&raw) {
			Ok(request) => request,
			Err(e) => return Err(self.reject(&raw, e.into()).await),
		};
		let request_id = request.request_id().to_string();
		self.claim(&request_id)?;
		if self.router.is_delivered(&request_id) {
			self.in_flight.remove(&request_id);
			return Err(EngineError::Duplicate(request_id));
		}

		self.enqueue(request, CancellationSignal::never()).await?;
		Ok(request_id)
	}

	/// Submits a request from the application's own flows and returns the
	/// handle its result resolves.
	pub async fn submit_internal(&self, raw: InternalRequest) -> Result<CompletionHandle, EngineError> {
		let raw = RawRequest::Internal(raw);
		let request = match normalize(&raw) {
			Ok(request) => request,
			Err(e) => return Err(self.reject(&raw, e.into()).await),
		};
		let request_id = request.request_id().to_string();
		self.claim(&request_id)?;
		let handle = match self.router.register_internal(&request_id) {
			Ok(handle) => handle,
			Err(e) => {
				self.in_flight.remove(&request_id);
				return Err(e.into());
			},
		};

		self.enqueue(request, CancellationSignal::never()).await?;
		Ok(handle)
	}

	/// Reports a request that failed normalization to its origin, when the
	/// origin can be identified.
	async fn reject(&self, raw: &RawRequest, error: ExecutionError) -> EngineError {
		if let Some((request_id, origin)) = origin_of(raw) {
			let (method, chain_id) = routing_of(raw);
			self.request_handler
				.handle_rejected(&request_id, &origin, method, chain_id, &error)
				.await;
		}
		EngineError::Rejected {
			code: error.rpc_code(),
			message: error.rpc_message(),
		}
	}

	/// Marks `request_id` in flight, failing if another submission holds it.
	/// The id is released when its handler finishes or the submission is
	/// refused.
	fn claim(&self, request_id: &str) -> Result<(), EngineError> {
		match self.in_flight.entry(request_id.to_string()) {
			Entry::Occupied(_) => Err(EngineError::Duplicate(request_id.to_string())),
			Entry::Vacant(slot) => {
				slot.insert(());
				Ok(())
			},
		}
	}

	fn session_signal(&self, topic: &str) -> CancellationSignal {
		let trigger = self
			.sessions
			.entry(topic.to_string())
			.or_insert_with(|| watch::channel(false).0);
		CancellationSignal::new(trigger.subscribe())
	}

	async fn enqueue(&self, request: SignRequest, cancel: CancellationSignal) -> Result<(), EngineError> {
		let request_id = request.request_id().to_string();

		match self.intake.try_send(Intake { request, cancel }) {
			Ok(()) => {
				tracing::debug!(request_id = %truncate_id(&request_id), "Request queued");
				Ok(())
			},
			Err(TrySendError::Full(intake)) | Err(TrySendError::Closed(intake)) => {
				self.in_flight.remove(&request_id);
				tracing::warn!(request_id = %truncate_id(&request_id), "Intake queue full, refusing request");
				let busy = ExecutionError::Provider("executor busy".to_string());
				self.request_handler
					.handle_rejected(
						&request_id,
						intake.request.origin(),
						&intake.request.meta().method,
						intake.request.chain_id(),
						&busy,
					)
					.await;
				Err(EngineError::Busy)
			},
		}
	}

	/// Fires the cancellation trigger of an interactive session. Requests of
	/// the session that have not reached submission stop without a record.
	/// Returns whether the session had a trigger.
	pub fn disconnect_session(&self, topic: &str) -> bool {
		let Some((_, trigger)) = self.sessions.remove(topic) else {
			return false;
		};
		trigger.send_replace(true);
		tracing::info!(topic = %truncate_id(topic), "Session disconnected");
		self.event_bus
			.publish(ExecutorEvent::Request(RequestEvent::SessionDisconnected {
				topic: topic.to_string(),
			}))
			.ok();
		true
	}

	/// Delivers the user's decision on a request waiting for approval.
	pub fn resolve_approval(&self, request_id: &str, approved: bool) -> bool {
		self.signer.resolve_approval(request_id, approved)
	}

	pub async fn consent_granted(&self, account: &Address) -> Result<bool, EngineError> {
		self.consent
			.is_granted(account)
			.await
			.map_err(|e| EngineError::Service(e.to_string()))
	}

	pub async fn grant_consent(&self, account: &Address) -> Result<(), EngineError> {
		self.consent
			.grant(account)
			.await
			.map_err(|e| EngineError::Service(e.to_string()))
	}

	pub async fn revoke_consent(&self, account: &Address) -> Result<(), EngineError> {
		self.consent
			.revoke(account)
			.await
			.map_err(|e| EngineError::Service(e.to_string()))
	}

	/// Pending transactions of `account`.
	pub async fn pending_for(&self, account: &Address) -> Result<Vec<TransactionRecord>, EngineError> {
		self.repository
			.list_pending_by_account(account)
			.await
			.map_err(|e| EngineError::Service(e.to_string()))
	}

	/// Takes the receiver of user-facing notifications. Only the first call
	/// gets it.
	pub async fn take_notifications(&self) -> Option<mpsc::Receiver<NotificationEvent>> {
		self.notification_receiver.lock().await.take()
	}

	/// Asks a running [`run`](Self::run) loop to return.
	pub fn stop(&self) {
		self.shutdown.notify_one();
	}

	/// Main execution loop.
	pub async fn run(&self) -> Result<(), EngineError> {
		let mut intake = self
			.intake_receiver
			.lock()
			.await
			.take()
			.ok_or_else(|| EngineError::Config("engine is already running".to_string()))?;

		// Subscribe before recovery so resumed transactions are seen.
		let mut event_receiver = self.event_bus.subscribe();
		self.recover().await?;

		let storage = self.storage.clone();
		let router = self.router.clone();
		let sessions = self.sessions.clone();
		let cleanup_interval = tokio::time::interval(Duration::from_secs(
			self.config.storage.cleanup_interval_seconds.max(1),
		));
		let cleanup_handle = tokio::spawn(async move {
			let mut interval = cleanup_interval;
			loop {
				interval.tick().await;
				match storage.cleanup_expired().await {
					Ok(count) if count > 0 => {
						tracing::debug!("Storage cleanup: removed {} expired entries", count);
					},
					Err(e) => {
						tracing::warn!("Storage cleanup failed: {}", e);
					},
					_ => {},
				}
				let pruned = router.prune_delivered(DELIVERED_RETENTION);
				if pruned > 0 {
					tracing::debug!("Forgot {} delivered request ids", pruned);
				}
				let idle = prune_idle_sessions(&sessions);
				if idle > 0 {
					tracing::debug!("Forgot {} idle sessions", idle);
				}
			}
		});

		let semaphore = Arc::new(Semaphore::new(
			self.config.executor.max_concurrent_requests.max(1),
		));

		loop {
			tokio::select! {
				Some(Intake { request, cancel }) = intake.recv() => {
					self.spawn_handler(&semaphore, move |engine| async move {
						let request_id = request.request_id().to_string();
						engine.request_handler.handle(request, cancel).await;
						engine.in_flight.remove(&request_id);
						Ok(())
					})
					.await;
				}

				Ok(event) = event_receiver.recv() => {
					match event {
						ExecutorEvent::Delivery(DeliveryEvent::TransactionPending { record_id, tx_hash, chain_id, .. }) => {
							self.transaction_handler.monitor_transaction(record_id, tx_hash, chain_id);
						}

						ExecutorEvent::Delivery(DeliveryEvent::TransactionConfirmed { record_id, tx_hash, receipt }) => {
							self.spawn_handler(&semaphore, move |engine| async move {
								if let Err(e) = engine.transaction_handler.handle_confirmed(record_id, tx_hash, receipt).await {
									return Err(EngineError::Handler(format!("Failed to handle transaction confirmation: {}", e)));
								}
								Ok(())
							})
							.await;
						}

						ExecutorEvent::Delivery(DeliveryEvent::TransactionFailed { record_id, tx_hash, error }) => {
							self.spawn_handler(&semaphore, move |engine| async move {
								if let Err(e) = engine.transaction_handler.handle_failed(record_id, tx_hash, error).await {
									return Err(EngineError::Handler(format!("Failed to handle transaction failure: {}", e)));
								}
								Ok(())
							})
							.await;
						}

						_ => {}
					}
				}

				_ = self.shutdown.notified() => {
					break;
				}

				_ = tokio::signal::ctrl_c() => {
					break;
				}
			}
		}

		cleanup_handle.abort();
		*self.intake_receiver.lock().await = Some(intake);
		Ok(())
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the storage service.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn allowlist(&self) -> &Arc<AllowlistValidator> {
		&self.allowlist
	}

	/// Spawns a handler task once a concurrency permit is available.
	async fn spawn_handler<F, Fut>(&self, semaphore: &Arc<Semaphore>, handler: F)
	where
		F: FnOnce(ExecutionEngine) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), EngineError>> + Send,
	{
		let engine = self.clone();
		match semaphore.clone().acquire_owned().await {
			Ok(permit) => {
				tokio::spawn(async move {
					let _permit = permit;
					if let Err(e) = handler(engine).await {
						tracing::error!("Handler error: {}", e);
					}
				});
			},
			Err(e) => {
				tracing::error!("Failed to acquire semaphore permit: {}", e);
			},
		}
	}
}

/// Method and chain of a raw request, for answering it without normalizing.
fn routing_of(raw: &RawRequest) -> (&str, u64) {
	match raw {
		RawRequest::Interactive(request) => (
			request.method.as_str(),
			request
				.chain_id
				.rsplit(':')
				.next()
				.and_then(|reference| reference.parse().ok())
				.unwrap_or_default(),
		),
		RawRequest::Deeplink(request) => (request.method.as_str(), request.chain_id),
		RawRequest::Internal(request) => ("internal", request.chain_id),
	}
}

/// Drops cancellation triggers of sessions with no request left listening.
/// Returns how many were removed.
fn prune_idle_sessions(sessions: &DashMap<String, watch::Sender<bool>>) -> usize {
	let before = sessions.len();
	sessions.retain(|_, trigger| trigger.receiver_count() > 0);
	before - sessions.len()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_idle_sessions_are_pruned() {
		let sessions = DashMap::new();
		let (busy, listener) = watch::channel(false);
		let (idle, _) = watch::channel(false);
		sessions.insert("busy".to_string(), busy);
		sessions.insert("idle".to_string(), idle);

		assert_eq!(prune_idle_sessions(&sessions), 1);
		assert!(sessions.contains_key("busy"));
		assert!(!sessions.contains_key("idle"));

		drop(listener);
		assert_eq!(prune_idle_sessions(&sessions), 1);
		assert!(sessions.is_empty());
	}
}
