//! Per-account endpoints: pending transactions and delegation consent.

use super::{engine_error, parse_account};
use crate::server::AppState;
use axum::{
	extract::{Path, State},
	response::Json,
};
use executor_types::{APIError, ConsentResponse, PendingTransactionsResponse};

/// Handles GET /api/accounts/{account}/pending.
pub async fn pending(
	Path(account): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<PendingTransactionsResponse>, APIError> {
	let address = parse_account(&account)?;
	let transactions = state
		.engine
		.pending_for(&address)
		.await
		.map_err(engine_error)?;
	Ok(Json(PendingTransactionsResponse {
		account: address.to_string(),
		transactions,
	}))
}

/// Handles GET /api/accounts/{account}/consent.
pub async fn get_consent(
	Path(account): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<ConsentResponse>, APIError> {
	let address = parse_account(&account)?;
	let granted = state
		.engine
		.consent_granted(&address)
		.await
		.map_err(engine_error)?;
	Ok(Json(ConsentResponse {
		account: address.to_string(),
		granted,
	}))
}

/// Handles PUT /api/accounts/{account}/consent.
pub async fn grant_consent(
	Path(account): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<ConsentResponse>, APIError> {
	let address = parse_account(&account)?;
	state
		.engine
		.grant_consent(&address)
		.await
		.map_err(engine_error)?;
	tracing::info!(account = %address, "Delegation consent granted");
	Ok(Json(ConsentResponse {
		account: address.to_string(),
		granted: true,
	}))
}

/// Handles DELETE /api/accounts/{account}/consent.
pub async fn revoke_consent(
	Path(account): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<ConsentResponse>, APIError> {
	let address = parse_account(&account)?;
	state
		.engine
		.revoke_consent(&address)
		.await
		.map_err(engine_error)?;
	tracing::info!(account = %address, "Delegation consent revoked");
	Ok(Json(ConsentResponse {
		account: address.to_string(),
		granted: false,
	}))
}
