//! Interactive session endpoints.

use crate::server::AppState;
use axum::{
	extract::{Path, State},
	http::StatusCode,
};
use executor_types::APIError;

/// Handles DELETE /api/sessions/{topic}: the session disconnected, so its
/// requests that have not been submitted are cancelled.
pub async fn disconnect(
	Path(topic): Path<String>,
	State(state): State<AppState>,
) -> Result<StatusCode, APIError> {
	if state.engine.disconnect_session(&topic) {
		Ok(StatusCode::NO_CONTENT)
	} else {
		Err(APIError::not_found(
			"UNKNOWN_SESSION",
			format!("no active session {}", topic),
		))
	}
}
