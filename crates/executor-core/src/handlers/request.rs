//! Request handler: one sign request from execution to its routed result.

use crate::engine::event_bus::EventBus;
use crate::orchestrator::{CancellationSignal, ExecutionError, ExecutionOrchestrator, ExecutionOutcome};
use crate::notifications::NotificationDispatcher;
use crate::response::{ResponseRouter, RouteOutcome, TerminalResult};
use executor_types::{
	truncate_id, ExecutorEvent, NotificationKind, OriginDapp, RequestEvent, SignRequest,
};
use std::sync::Arc;
use tracing::instrument;

/// Runs requests and reports their outcome.
pub struct RequestHandler {
	orchestrator: Arc<ExecutionOrchestrator>,
	router: Arc<ResponseRouter>,
	notifications: NotificationDispatcher,
	event_bus: EventBus,
}

impl RequestHandler {
	pub fn new(
		orchestrator: Arc<ExecutionOrchestrator>,
		router: Arc<ResponseRouter>,
		notifications: NotificationDispatcher,
		event_bus: EventBus,
	) -> Self {
		Self {
			orchestrator,
			router,
			notifications,
			event_bus,
		}
	}

	/// Executes `request` and delivers exactly one terminal result for it.
	#[instrument(skip_all, fields(request_id = %truncate_id(request.request_id()), method = %request.meta().method))]
	pub async fn handle(&self, request: SignRequest, cancel: CancellationSignal) -> RouteOutcome {
		let result = self.orchestrator.execute(&request, &cancel).await;

		let (terminal, outcome) = match result {
			Ok(ExecutionOutcome::Signed { signature }) => {
				self.notifications
					.notify_request(&request, NotificationKind::Success, None, None);
				(TerminalResult::Signature(signature), "signed")
			},
			Ok(ExecutionOutcome::Submitted { record, tx_hash }) => {
				tracing::info!(record_id = %truncate_id(&record.id), nonce = record.nonce, "Transaction submitted");
				self.notifications.notify_request(
					&request,
					NotificationKind::Pending,
					None,
					Some(tx_hash.to_hex()),
				);
				(TerminalResult::Transaction(tx_hash), "submitted")
			},
			Err(ExecutionError::Cancelled) => {
				self.notifications
					.notify_request(&request, NotificationKind::NotSent, None, None);
				(TerminalResult::Abandoned, "cancelled")
			},
			Err(e) => {
				let kind = e.notification_kind();
				let detail = match kind {
					NotificationKind::NotSent => None,
					_ => Some(e.to_string()),
				};
				if kind == NotificationKind::Failed {
					tracing::warn!(error = %e, retryable = e.is_retryable(), "Request failed");
				} else {
					tracing::info!(outcome = ?kind, "Request not executed");
				}
				self.notifications.notify_request(&request, kind, detail, None);
				(
					TerminalResult::Failure {
						code: e.rpc_code(),
						message: e.rpc_message(),
					},
					"failed",
				)
			},
		};

		let routed = self.router.deliver(&request, terminal).await;
		self.event_bus
			.publish(ExecutorEvent::Request(RequestEvent::Completed {
				request_id: request.request_id().to_string(),
				outcome: outcome.to_string(),
			}))
			.ok();
		routed
	}

	/// Reports a request that never became a [`SignRequest`].
	pub async fn handle_rejected(
		&self,
		request_id: &str,
		origin: &OriginDapp,
		method: &str,
		chain_id: u64,
		error: &ExecutionError,
	) -> RouteOutcome {
		tracing::warn!(request_id = %truncate_id(request_id), error = %error, "Request rejected");
		self.notifications
			.notify_unparsed(request_id, &origin.name, error.to_string());
		self.router
			.deliver_to(
				request_id,
				origin,
				method,
				chain_id,
				TerminalResult::Failure {
					code: error.rpc_code(),
					message: error.rpc_message(),
				},
			)
			.await
	}
}
