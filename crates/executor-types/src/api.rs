//! HTTP API payloads and error mapping.
//!
//! Request bodies reuse the raw inbound shapes from [`crate::request`]; this
//! module holds the remaining response bodies and the error type every
//! handler returns.

use crate::TransactionRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body returned when a deep-link or internal request has been queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
	pub request_id: String,
}

/// Pending transactions of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransactionsResponse {
	pub account: String,
	pub transactions: Vec<TransactionRecord>,
}

/// User decision on a request waiting for approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ApprovalDecision {
	pub approved: bool,
}

/// Delegation consent state of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentResponse {
	pub account: String,
	pub granted: bool,
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Additional error context
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds
	#[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
	pub retry_after: Option<u64>,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed body or parameters (400)
	BadRequest { error_type: String, message: String },
	/// Unknown request, session or account (404)
	NotFound { error_type: String, message: String },
	/// Request id already in flight (409)
	Conflict { error_type: String, message: String },
	/// Intake queue full or executor shutting down (503)
	ServiceUnavailable {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	pub fn bad_request(error_type: &str, message: impl Into<String>) -> Self {
		APIError::BadRequest {
			error_type: error_type.to_string(),
			message: message.into(),
		}
	}

	pub fn not_found(error_type: &str, message: impl Into<String>) -> Self {
		APIError::NotFound {
			error_type: error_type.to_string(),
			message: message.into(),
		}
	}

	pub fn internal(message: impl Into<String>) -> Self {
		APIError::InternalServerError {
			error_type: "INTERNAL_ERROR".to_string(),
			message: message.into(),
		}
	}

	/// HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::ServiceUnavailable { .. } => 503,
			APIError::InternalServerError { .. } => 500,
		}
	}

	pub fn to_error_response(&self) -> ErrorResponse {
		let (error, message, retry_after) = match self {
			APIError::BadRequest {
				error_type,
				message,
			}
			| APIError::NotFound {
				error_type,
				message,
			}
			| APIError::Conflict {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => (error_type, message, None),
			APIError::ServiceUnavailable {
				error_type,
				message,
				retry_after,
			} => (error_type, message, *retry_after),
		};
		ErrorResponse {
			error: error.clone(),
			message: message.clone(),
			details: None,
			retry_after,
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			APIError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			APIError::NotFound { message, .. } => write!(f, "Not Found: {}", message),
			APIError::Conflict { message, .. } => write!(f, "Conflict: {}", message),
			APIError::ServiceUnavailable { message, .. } => {
				write!(f, "Service Unavailable: {}", message)
			},
			APIError::InternalServerError { message, .. } => {
				write!(f, "Internal Server Error: {}", message)
			},
		}
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}
