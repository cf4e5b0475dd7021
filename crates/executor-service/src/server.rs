//! HTTP server for the executor API.
//!
//! Origins submit requests here; interactive requests are answered on the
//! same call, deep-link and internal ones as described on their handlers.

use crate::apis::{accounts, requests, sessions};
use axum::{
	extract::DefaultBodyLimit,
	routing::{delete, get, post},
	Router,
};
use executor_config::ApiConfig;
use executor_core::ExecutionEngine;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Engine every request is handed to.
	pub engine: Arc<ExecutionEngine>,
}

/// Builds the API router under `/api`.
pub fn router(engine: Arc<ExecutionEngine>, max_request_size: usize) -> Router {
	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/requests/interactive", post(requests::submit_interactive))
				.route("/requests/deeplink", post(requests::submit_deeplink))
				.route("/requests/internal", post(requests::submit_internal))
				.route("/approvals/{request_id}", post(requests::resolve_approval))
				.route("/sessions/{topic}", delete(sessions::disconnect))
				.route("/accounts/{account}/pending", get(accounts::pending))
				.route(
					"/accounts/{account}/consent",
					get(accounts::get_consent)
						.put(accounts::grant_consent)
						.delete(accounts::revoke_consent),
				),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive())
				.layer(DefaultBodyLimit::max(max_request_size)),
		)
		.with_state(AppState { engine })
}

/// Starts the HTTP server and serves until it fails.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<ExecutionEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(engine, api_config.max_request_size);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Executor API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}
