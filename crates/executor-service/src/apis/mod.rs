//! Handlers of the executor HTTP API.

pub mod accounts;
pub mod requests;
pub mod sessions;

use alloy_primitives::Address;
use executor_core::EngineError;
use executor_types::APIError;
use std::str::FromStr;

/// Maps an engine error to the API error returned to the caller.
pub fn engine_error(err: EngineError) -> APIError {
	match err {
		EngineError::Rejected { message, .. } => APIError::bad_request("INVALID_REQUEST", message),
		EngineError::Duplicate(request_id) => APIError::Conflict {
			error_type: "DUPLICATE_REQUEST".to_string(),
			message: format!("Request {} is already in flight or answered", request_id),
		},
		EngineError::Busy => APIError::ServiceUnavailable {
			error_type: "EXECUTOR_BUSY".to_string(),
			message: "Intake queue is full".to_string(),
			retry_after: Some(1),
		},
		EngineError::Abandoned(request_id) => APIError::ServiceUnavailable {
			error_type: "REQUEST_ABANDONED".to_string(),
			message: format!("Request {} ended without a result", request_id),
			retry_after: None,
		},
		other => APIError::internal(other.to_string()),
	}
}

/// Parses an account path segment.
pub fn parse_account(raw: &str) -> Result<Address, APIError> {
	Address::from_str(raw)
		.map_err(|_| APIError::bad_request("INVALID_ACCOUNT", format!("'{}' is not an address", raw)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_engine_error_status_codes() {
		assert_eq!(engine_error(EngineError::Busy).status_code(), 503);
		assert_eq!(
			engine_error(EngineError::Duplicate("a".to_string())).status_code(),
			409
		);
		assert_eq!(
			engine_error(EngineError::Rejected {
				code: 5000,
				message: "bad".to_string(),
			})
			.status_code(),
			400
		);
		assert_eq!(
			engine_error(EngineError::Service("down".to_string())).status_code(),
			500
		);
	}

	#[test]
	fn test_parse_account() {
		assert!(parse_account("0x1111111111111111111111111111111111111111").is_ok());
		assert_eq!(parse_account("alice").unwrap_err().status_code(), 400);
	}
}
