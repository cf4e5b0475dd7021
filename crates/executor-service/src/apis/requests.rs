//! Request submission and approval endpoints.

use super::engine_error;
use crate::server::AppState;
use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::Json,
};
use executor_types::{
	APIError, AcceptedResponse, ApprovalDecision, CompletionResult, DeeplinkRequest,
	InteractiveRequest, InternalRequest, JsonRpcResponse,
};

/// Handles POST /api/requests/interactive.
///
/// Answers with the JSON-RPC response for the session once the request
/// reaches a terminal result.
pub async fn submit_interactive(
	State(state): State<AppState>,
	Json(request): Json<InteractiveRequest>,
) -> Result<Json<JsonRpcResponse>, APIError> {
	state
		.engine
		.submit_interactive(request)
		.await
		.map(Json)
		.map_err(engine_error)
}

/// Handles POST /api/requests/deeplink. The result goes to the webhook.
pub async fn submit_deeplink(
	State(state): State<AppState>,
	Json(request): Json<DeeplinkRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), APIError> {
	let request_id = state
		.engine
		.submit_deeplink(request)
		.await
		.map_err(engine_error)?;
	Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { request_id })))
}

/// Handles POST /api/requests/internal and waits for the completion.
pub async fn submit_internal(
	State(state): State<AppState>,
	Json(request): Json<InternalRequest>,
) -> Result<Json<CompletionResult>, APIError> {
	let handle = state
		.engine
		.submit_internal(request)
		.await
		.map_err(engine_error)?;
	let request_id = handle.request_id.clone();

	handle.wait().await.map(Json).map_err(|message| {
		tracing::warn!(request_id = %request_id, error = %message, "Internal request failed");
		APIError::bad_request("EXECUTION_FAILED", message)
	})
}

/// Handles POST /api/approvals/{request_id}.
pub async fn resolve_approval(
	Path(request_id): Path<String>,
	State(state): State<AppState>,
	Json(decision): Json<ApprovalDecision>,
) -> Result<StatusCode, APIError> {
	if state.engine.resolve_approval(&request_id, decision.approved) {
		Ok(StatusCode::NO_CONTENT)
	} else {
		Err(APIError::not_found(
			"UNKNOWN_REQUEST",
			format!("no pending approval for {}", request_id),
		))
	}
}
