//! Delivery of terminal results back to the requesting origin.
//!
//! Interactive sessions get a JSON-RPC response correlated by the session's
//! numeric id, deep links with a webhook get a best-effort POST, and internal
//! callers have their completion handle resolved. Every request id is
//! delivered at most once; later deliveries report [`RouteOutcome::Duplicate`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use executor_types::{
	current_timestamp, CompletionResult, JsonRpcResponse, OriginDapp, RequestSource, SignRequest,
	TransactionHash, WebhookPayload,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur while registering a response listener.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
	#[error("Request {0} is already in flight or answered")]
	Duplicate(String),
}

/// What the origin should be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalResult {
	Signature(String),
	Transaction(TransactionHash),
	Failure { code: i64, message: String },
	/// The origin went away; nothing is sent.
	Abandoned,
}

/// How a delivery went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
	Delivered,
	/// The request id was already answered; nothing was sent.
	Duplicate,
	/// Nothing was sent because the origin has no channel or left.
	Skipped,
	/// The webhook POST failed. Logged only.
	WebhookFailed(String),
}

/// Result an internal caller receives.
pub type Completion = Result<CompletionResult, String>;

/// Single-fire handle resolved when an internal request finishes.
pub struct CompletionHandle {
	pub request_id: String,
	receiver: oneshot::Receiver<Completion>,
}

impl CompletionHandle {
	pub async fn wait(self) -> Completion {
		self.receiver
			.await
			.unwrap_or_else(|_| Err("request abandoned".to_string()))
	}
}

/// Routes terminal results to origins.
pub struct ResponseRouter {
	client: reqwest::Client,
	webhook_timeout: Duration,
	/// Delivered request ids with the time they were delivered.
	delivered: DashMap<String, u64>,
	interactive: DashMap<String, oneshot::Sender<JsonRpcResponse>>,
	internal: DashMap<String, oneshot::Sender<Completion>>,
}

impl ResponseRouter {
	pub fn new(webhook_timeout: Duration) -> Self {
		Self {
			client: reqwest::Client::new(),
			webhook_timeout,
			delivered: DashMap::new(),
			interactive: DashMap::new(),
			internal: DashMap::new(),
		}
	}

	/// Registers the listener for an interactive request's JSON-RPC response.
	pub fn register_interactive(
		&self,
		request_id: &str,
	) -> Result<oneshot::Receiver<JsonRpcResponse>, RouterError> {
		self.ensure_fresh(request_id)?;
		match self.interactive.entry(request_id.to_string()) {
			Entry::Occupied(_) => Err(RouterError::Duplicate(request_id.to_string())),
			Entry::Vacant(slot) => {
				let (sender, receiver) = oneshot::channel();
				slot.insert(sender);
				Ok(receiver)
			},
		}
	}

	/// Registers the completion handle of an internal request.
	pub fn register_internal(&self, request_id: &str) -> Result<CompletionHandle, RouterError> {
		self.ensure_fresh(request_id)?;
		match self.internal.entry(request_id.to_string()) {
			Entry::Occupied(_) => Err(RouterError::Duplicate(request_id.to_string())),
			Entry::Vacant(slot) => {
				let (sender, receiver) = oneshot::channel();
				slot.insert(sender);
				Ok(CompletionHandle {
					request_id: request_id.to_string(),
					receiver,
				})
			},
		}
	}

	/// Whether `request_id` was already answered.
	pub fn is_delivered(&self, request_id: &str) -> bool {
		self.delivered.contains_key(request_id)
	}

	fn ensure_fresh(&self, request_id: &str) -> Result<(), RouterError> {
		if self.is_delivered(request_id) {
			return Err(RouterError::Duplicate(request_id.to_string()));
		}
		Ok(())
	}

	/// Delivers the terminal result of `request`.
	pub async fn deliver(&self, request: &SignRequest, result: TerminalResult) -> RouteOutcome {
		let meta = request.meta();
		self.deliver_to(
			&meta.request_id,
			&meta.origin,
			&meta.method,
			meta.chain_id,
			result,
		)
		.await
	}

	/// Delivers a terminal result given the origin's routing data directly.
	/// Used for requests that never became a [`SignRequest`].
	pub async fn deliver_to(
		&self,
		request_id: &str,
		origin: &OriginDapp,
		method: &str,
		chain_id: u64,
		result: TerminalResult,
	) -> RouteOutcome {
		if self
			.delivered
			.insert(request_id.to_string(), current_timestamp())
			.is_some()
		{
			tracing::debug!(request_id, "Result already delivered, ignoring");
			return RouteOutcome::Duplicate;
		}

		match &origin.source {
			RequestSource::Interactive { internal_id, .. } => {
				self.respond_interactive(request_id, *internal_id, result)
			},
			RequestSource::Deeplink { webhook_url } => match webhook_url {
				Some(url) => self.post_webhook(url, method, chain_id, result).await,
				None => RouteOutcome::Skipped,
			},
			RequestSource::Internal => self.complete_internal(request_id, result),
		}
	}

	fn respond_interactive(
		&self,
		request_id: &str,
		internal_id: u64,
		result: TerminalResult,
	) -> RouteOutcome {
		let listener = self.interactive.remove(request_id).map(|(_, sender)| sender);
		let response = match result {
			TerminalResult::Signature(signature) => JsonRpcResponse::success(internal_id, json!(signature)),
			TerminalResult::Transaction(hash) => JsonRpcResponse::success(internal_id, json!(hash.to_hex())),
			TerminalResult::Failure { code, message } => {
				JsonRpcResponse::failure(internal_id, code, message)
			},
			TerminalResult::Abandoned => return RouteOutcome::Skipped,
		};

		let delivered = match listener {
			Some(sender) => sender.send(response).is_ok(),
			None => false,
		};
		if !delivered {
			tracing::warn!(request_id, "Session listener is gone, response dropped");
			return RouteOutcome::Skipped;
		}
		RouteOutcome::Delivered
	}

	fn complete_internal(&self, request_id: &str, result: TerminalResult) -> RouteOutcome {
		let listener = self.internal.remove(request_id).map(|(_, sender)| sender);
		let completion = match result {
			TerminalResult::Signature(signature) => Ok(CompletionResult::Signature { signature }),
			TerminalResult::Transaction(hash) => Ok(CompletionResult::Transaction {
				transaction_hash: hash.to_hex(),
			}),
			TerminalResult::Failure { message, .. } => Err(message),
			TerminalResult::Abandoned => return RouteOutcome::Skipped,
		};

		let delivered = match listener {
			Some(sender) => sender.send(completion).is_ok(),
			None => false,
		};
		if !delivered {
			tracing::debug!(request_id, "Completion handle dropped by caller");
			return RouteOutcome::Skipped;
		}
		RouteOutcome::Delivered
	}

	async fn post_webhook(
		&self,
		url: &str,
		method: &str,
		chain_id: u64,
		result: TerminalResult,
	) -> RouteOutcome {
		let response = match result {
			TerminalResult::Signature(signature) => json!(signature),
			TerminalResult::Transaction(hash) => json!(hash.to_hex()),
			TerminalResult::Failure { message, .. } => json!({ "error": message }),
			TerminalResult::Abandoned => return RouteOutcome::Skipped,
		};
		let payload = WebhookPayload {
			method: method.to_string(),
			response,
			chain_id,
		};

		let sent = self
			.client
			.post(url)
			.timeout(self.webhook_timeout)
			.header(ACCEPT, "application/json")
			.header(CONTENT_TYPE, "application/json")
			.json(&payload)
			.send()
			.await
			.and_then(|response| response.error_for_status());

		match sent {
			Ok(_) => {
				tracing::info!(url, method, "Webhook delivered");
				RouteOutcome::Delivered
			},
			Err(e) => {
				tracing::warn!(url, method, error = %e, "Webhook delivery failed");
				RouteOutcome::WebhookFailed(e.to_string())
			},
		}
	}

	/// Forgets delivered ids older than `max_age`. Returns how many were
	/// removed.
	pub fn prune_delivered(&self, max_age: Duration) -> usize {
		let cutoff = current_timestamp().saturating_sub(max_age.as_secs());
		let before = self.delivered.len();
		self.delivered.retain(|_, delivered_at| *delivered_at >= cutoff);
		before - self.delivered.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use executor_types::SIGNING_ERROR_CODE;
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	fn interactive_origin() -> OriginDapp {
		OriginDapp {
			name: "dapp".to_string(),
			url: None,
			icon_url: None,
			source: RequestSource::Interactive {
				topic: "topic".to_string(),
				internal_id: 9,
			},
		}
	}

	fn deeplink_origin(webhook_url: Option<String>) -> OriginDapp {
		OriginDapp {
			name: "shop".to_string(),
			url: None,
			icon_url: None,
			source: RequestSource::Deeplink { webhook_url },
		}
	}

	/// Accepts one HTTP request, answers 200, and returns its body.
	async fn one_shot_server() -> (String, tokio::task::JoinHandle<(String, String)>) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let url = format!("http://{}/hook", listener.local_addr().unwrap());
		let handle = tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await.unwrap();
			let mut buffer = Vec::new();
			let mut chunk = [0u8; 1024];
			loop {
				let read = socket.read(&mut chunk).await.unwrap();
				buffer.extend_from_slice(&chunk[..read]);
				let text = String::from_utf8_lossy(&buffer).to_string();
				if let Some(split) = text.find("\r\n\r\n") {
					let headers = text[..split].to_lowercase();
					let length = headers
						.lines()
						.find_map(|line| line.strip_prefix("content-length:"))
						.and_then(|value| value.trim().parse::<usize>().ok())
						.unwrap_or(0);
					if buffer.len() >= split + 4 + length {
						let body = text[split + 4..split + 4 + length].to_string();
						socket
							.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
							.await
							.unwrap();
						return (headers, body);
					}
				}
				if read == 0 {
					panic!("connection closed early");
				}
			}
		});
		(url, handle)
	}

	#[tokio::test]
	async fn test_interactive_failure_is_correlated() {
		let router = ResponseRouter::new(Duration::from_secs(1));
		let receiver = router.register_interactive("topic:9").unwrap();

		let outcome = router
			.deliver_to(
				"topic:9",
				&interactive_origin(),
				"personal_sign",
				1,
				TerminalResult::Failure {
					code: SIGNING_ERROR_CODE,
					message: "Signing error: User rejected the request".to_string(),
				},
			)
			.await;

		assert_eq!(outcome, RouteOutcome::Delivered);
		let response = receiver.await.unwrap();
		assert_eq!(response.id, 9);
		assert_eq!(response.error.unwrap().code, 5000);
	}

	#[tokio::test]
	async fn test_departed_listeners_are_skipped() {
		let router = ResponseRouter::new(Duration::from_secs(1));
		drop(router.register_interactive("topic:9").unwrap());
		drop(router.register_internal("req-2").unwrap());

		let session = router
			.deliver_to(
				"topic:9",
				&interactive_origin(),
				"personal_sign",
				1,
				TerminalResult::Signature("0xsig".to_string()),
			)
			.await;
		let internal = router
			.deliver_to(
				"req-2",
				&OriginDapp::internal("swap"),
				"eth_sendTransaction",
				1,
				TerminalResult::Transaction(TransactionHash(vec![0xab; 32])),
			)
			.await;

		assert_eq!(session, RouteOutcome::Skipped);
		assert_eq!(internal, RouteOutcome::Skipped);
	}

	#[tokio::test]
	async fn test_second_delivery_is_duplicate() {
		let router = ResponseRouter::new(Duration::from_secs(1));
		let handle = router.register_internal("req-1").unwrap();
		let origin = OriginDapp::internal("swap");

		let first = router
			.deliver_to(
				"req-1",
				&origin,
				"eth_sendTransaction",
				1,
				TerminalResult::Transaction(TransactionHash(vec![0xab; 32])),
			)
			.await;
		let second = router
			.deliver_to(
				"req-1",
				&origin,
				"eth_sendTransaction",
				1,
				TerminalResult::Failure {
					code: 5000,
					message: "late".to_string(),
				},
			)
			.await;

		assert_eq!(first, RouteOutcome::Delivered);
		assert_eq!(second, RouteOutcome::Duplicate);
		assert!(matches!(
			handle.wait().await,
			Ok(CompletionResult::Transaction { transaction_hash }) if transaction_hash.starts_with("0xabab")
		));
		assert_eq!(
			router.register_internal("req-1").err(),
			Some(RouterError::Duplicate("req-1".to_string()))
		);
	}

	#[tokio::test]
	async fn test_abandoned_interactive_sends_nothing() {
		let router = ResponseRouter::new(Duration::from_secs(1));
		let receiver = router.register_interactive("topic:9").unwrap();

		let outcome = router
			.deliver_to(
				"topic:9",
				&interactive_origin(),
				"eth_sendTransaction",
				1,
				TerminalResult::Abandoned,
			)
			.await;

		assert_eq!(outcome, RouteOutcome::Skipped);
		assert!(receiver.await.is_err());
	}

	#[tokio::test]
	async fn test_webhook_post_shape() {
		let (url, server) = one_shot_server().await;
		let router = ResponseRouter::new(Duration::from_secs(5));

		let outcome = router
			.deliver_to(
				"dl-1",
				&deeplink_origin(Some(url)),
				"eth_sendTransaction",
				10,
				TerminalResult::Transaction(TransactionHash(vec![0x01, 0x02])),
			)
			.await;

		assert_eq!(outcome, RouteOutcome::Delivered);
		let (headers, body) = server.await.unwrap();
		assert!(headers.starts_with("post /hook"));
		assert!(headers.contains("accept: application/json"));
		assert!(headers.contains("content-type: application/json"));
		let body: serde_json::Value = serde_json::from_str(&body).unwrap();
		assert_eq!(
			body,
			json!({ "method": "eth_sendTransaction", "response": "0x0102", "chainId": 10 })
		);
	}

	#[tokio::test]
	async fn test_webhook_failure_is_reported_not_retried() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let url = format!("http://{}/hook", listener.local_addr().unwrap());
		drop(listener);
		let router = ResponseRouter::new(Duration::from_secs(1));

		let outcome = router
			.deliver_to(
				"dl-2",
				&deeplink_origin(Some(url)),
				"personal_sign",
				1,
				TerminalResult::Signature("0x00".to_string()),
			)
			.await;

		assert!(matches!(outcome, RouteOutcome::WebhookFailed(_)));
		assert!(router.is_delivered("dl-2"));
	}

	#[tokio::test]
	async fn test_deeplink_without_webhook_is_skipped() {
		let router = ResponseRouter::new(Duration::from_secs(1));
		let outcome = router
			.deliver_to(
				"dl-3",
				&deeplink_origin(None),
				"personal_sign",
				1,
				TerminalResult::Signature("0x00".to_string()),
			)
			.await;
		assert_eq!(outcome, RouteOutcome::Skipped);
	}

	#[test]
	fn test_prune_forgets_old_ids() {
		let router = ResponseRouter::new(Duration::from_secs(1));
		router.delivered.insert("old".to_string(), 0);
		router.delivered.insert("new".to_string(), current_timestamp());

		assert_eq!(router.prune_delivered(Duration::from_secs(3600)), 1);
		assert!(router.is_delivered("new"));
		assert!(!router.is_delivered("old"));
	}
}
