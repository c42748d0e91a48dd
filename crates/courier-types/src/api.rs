//! API types for the courier HTTP API.
//!
//! This module defines the request and response bodies of the `/deliveries/`
//! endpoints together with the structured error type returned to clients.

use crate::delivery::{Delivery, DeliveryId, DeliveryStatus, DeliveryValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body of `POST /deliveries/`.
///
/// Fields are kept as raw strings so that malformed values surface as a
/// validation error with a precise message instead of a generic parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
	/// Requested delivery id
	pub id: String,
	/// Requested status
	pub status: String,
}

impl TryFrom<DeliveryRequest> for Delivery {
	type Error = DeliveryValidationError;

	fn try_from(request: DeliveryRequest) -> Result<Self, Self::Error> {
		let id = DeliveryId::parse(request.id)?;
		let status: DeliveryStatus = request.status.parse()?;
		Ok(Delivery::new(id, status))
	}
}

/// API error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Human-readable description
	pub error_message: String,
	/// Error type/code
	pub error: String,
}

/// Structured API error type with appropriate HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Bad request for malformed input or refused transitions (400)
	BadRequest { error_type: String, message: String },
	/// Requested resource does not exist (404)
	NotFound { error_type: String, message: String },
	/// Concurrent writers kept winning the race (409)
	Conflict { error_type: String, message: String },
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error_type, message) = match self {
			APIError::BadRequest { error_type, message }
			| APIError::NotFound { error_type, message }
			| APIError::Conflict { error_type, message }
			| APIError::InternalServerError { error_type, message } => (error_type, message),
		};
		ErrorResponse {
			error_message: message.clone(),
			error: error_type.clone(),
		}
	}
}

impl From<DeliveryValidationError> for APIError {
	fn from(err: DeliveryValidationError) -> Self {
		APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message: err.to_string(),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			APIError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			APIError::NotFound { message, .. } => write!(f, "Not Found: {}", message),
			APIError::Conflict { message, .. } => write!(f, "Conflict: {}", message),
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

		let error_response = self.to_error_response();
		(status, Json(error_response)).into_response()
	}
}
