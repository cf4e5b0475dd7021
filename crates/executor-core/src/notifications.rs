//! User-facing notifications.
//!
//! Dispatch is fire-and-forget onto a bounded queue drained by a single
//! display surface. A full queue drops the event; the transaction record
//! stays the source of truth.

use executor_types::{
	current_timestamp, NotificationEvent, NotificationKind, SignRequest, TransactionRecord,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Producer side of the notification queue.
#[derive(Clone)]
pub struct NotificationDispatcher {
	sender: mpsc::Sender<NotificationEvent>,
}

impl NotificationDispatcher {
	/// Creates a dispatcher and the receiver the display surface drains.
	pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
		let (sender, receiver) = mpsc::channel(capacity.max(1));
		(Self { sender }, receiver)
	}

	/// Queues `event` without waiting. Returns whether it was queued.
	pub fn dispatch(&self, event: NotificationEvent) -> bool {
		match self.sender.try_send(event) {
			Ok(()) => true,
			Err(TrySendError::Full(event)) => {
				tracing::warn!(
					request_id = %event.request_id,
					kind = ?event.kind,
					"Notification queue full, dropping event"
				);
				false
			},
			Err(TrySendError::Closed(_)) => {
				tracing::debug!("Notification queue closed");
				false
			},
		}
	}

	/// Notification about a request that has no transaction record.
	pub fn notify_request(
		&self,
		request: &SignRequest,
		kind: NotificationKind,
		detail: Option<String>,
		tx_hash: Option<String>,
	) -> bool {
		self.dispatch(NotificationEvent {
			kind,
			request_id: request.request_id().to_string(),
			account: Some(request.account()),
			chain_id: Some(request.chain_id()),
			origin_name: request.origin().name.clone(),
			title: title_for(kind, request.is_message()).to_string(),
			detail,
			tx_hash,
			created_at: current_timestamp(),
		})
	}

	/// Notification about a recorded transaction.
	pub fn notify_record(
		&self,
		record: &TransactionRecord,
		kind: NotificationKind,
		detail: Option<String>,
	) -> bool {
		self.dispatch(NotificationEvent {
			kind,
			request_id: record.request_id.clone(),
			account: Some(record.account),
			chain_id: Some(record.chain_id),
			origin_name: record.origin_name.clone(),
			title: title_for(kind, false).to_string(),
			detail,
			tx_hash: record.submitted_hash.as_ref().map(|hash| hash.to_hex()),
			created_at: current_timestamp(),
		})
	}

	/// Notification for a request that could not be normalized.
	pub fn notify_unparsed(&self, request_id: &str, origin_name: &str, detail: String) -> bool {
		self.dispatch(NotificationEvent {
			kind: NotificationKind::Failed,
			request_id: request_id.to_string(),
			account: None,
			chain_id: None,
			origin_name: origin_name.to_string(),
			title: title_for(NotificationKind::Failed, false).to_string(),
			detail: Some(detail),
			tx_hash: None,
			created_at: current_timestamp(),
		})
	}
}

fn title_for(kind: NotificationKind, message: bool) -> &'static str {
	match (kind, message) {
		(NotificationKind::Pending, _) => "Transaction pending",
		(NotificationKind::Success, true) => "Message signed",
		(NotificationKind::Success, false) => "Transaction confirmed",
		(NotificationKind::Failed, true) => "Signing failed",
		(NotificationKind::Failed, false) => "Transaction failed",
		(NotificationKind::Blocked, _) => "This request was blocked",
		(NotificationKind::NotSent, _) => "Request not sent",
	}
}
