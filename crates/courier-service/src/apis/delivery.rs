//! Delivery API implementation.
//!
//! Translates HTTP payloads into calls on the delivery state machine and maps
//! its outcomes onto API errors. Malformed input and rejected transitions are
//! client errors; storage failures are server errors the caller may retry.

use courier_core::{CourierEngine, DeliveryStateError};
use courier_types::{APIError, Delivery, DeliveryId, DeliveryRequest, DeliveryValidationError};
use thiserror::Error;

/// Errors that can occur while serving delivery requests.
#[derive(Debug, Error)]
pub enum DeliveryApiError {
	#[error("{0}")]
	Validation(String),
	#[error("Delivery not found: {0}")]
	NotFound(DeliveryId),
	#[error(transparent)]
	State(#[from] DeliveryStateError),
}

impl From<DeliveryValidationError> for DeliveryApiError {
	fn from(err: DeliveryValidationError) -> Self {
		DeliveryApiError::Validation(err.to_string())
	}
}

impl From<DeliveryApiError> for APIError {
	fn from(err: DeliveryApiError) -> Self {
		let message = err.to_string();
		match err {
			DeliveryApiError::Validation(_) => APIError::BadRequest {
				error_type: "VALIDATION_ERROR".to_string(),
				message,
			},
			DeliveryApiError::NotFound(_) => APIError::NotFound {
				error_type: "NOT_FOUND".to_string(),
				message,
			},
			DeliveryApiError::State(DeliveryStateError::InvalidTransition { .. }) => {
				APIError::BadRequest {
					error_type: "INVALID_TRANSITION".to_string(),
					message,
				}
			}
			DeliveryApiError::State(DeliveryStateError::Conflict(_)) => APIError::Conflict {
				error_type: "CONFLICT".to_string(),
				message,
			},
			DeliveryApiError::State(DeliveryStateError::Storage(_)) => {
				APIError::InternalServerError {
					error_type: "STORAGE_ERROR".to_string(),
					message,
				}
			}
		}
	}
}

/// Lists every stored delivery ordered by id.
pub async fn list_deliveries(engine: &CourierEngine) -> Result<Vec<Delivery>, DeliveryApiError> {
	Ok(engine.deliveries().list_deliveries().await?)
}

/// Looks up a single delivery.
pub async fn get_delivery(engine: &CourierEngine, id: &str) -> Result<Delivery, DeliveryApiError> {
	let id = DeliveryId::parse(id)?;
	engine
		.deliveries()
		.get_delivery(&id)
		.await?
		.ok_or(DeliveryApiError::NotFound(id))
}

/// Creates a delivery or advances it to the requested status.
pub async fn submit_delivery(
	engine: &CourierEngine,
	request: DeliveryRequest,
) -> Result<Delivery, DeliveryApiError> {
	let requested = Delivery::try_from(request)?;
	Ok(engine
		.deliveries()
		.create_or_advance(&requested.id, requested.status)
		.await?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use courier_types::DeliveryStatus;

	#[test]
	fn test_error_mapping() {
		let cases = [
			(
				DeliveryApiError::Validation("bad id".into()),
				400,
				"VALIDATION_ERROR",
			),
			(
				DeliveryApiError::NotFound(DeliveryId::parse("ab1").unwrap()),
				404,
				"NOT_FOUND",
			),
			(
				DeliveryApiError::State(DeliveryStateError::InvalidTransition {
					from: DeliveryStatus::InProgress,
					to: DeliveryStatus::ToDo,
				}),
				400,
				"INVALID_TRANSITION",
			),
			(
				DeliveryApiError::State(DeliveryStateError::Conflict(
					DeliveryId::parse("ab1").unwrap(),
				)),
				409,
				"CONFLICT",
			),
			(
				DeliveryApiError::State(DeliveryStateError::Storage("down".into())),
				500,
				"STORAGE_ERROR",
			),
		];

		for (err, status, code) in cases {
			let api_error = APIError::from(err);
			assert_eq!(api_error.status_code(), status);
			assert_eq!(api_error.to_error_response().error, code);
		}
	}

	#[test]
	fn test_transition_message_names_both_statuses() {
		let api_error = APIError::from(DeliveryApiError::State(
			DeliveryStateError::InvalidTransition {
				from: DeliveryStatus::InProgress,
				to: DeliveryStatus::ToDo,
			},
		));
		let message = api_error.to_error_response().error_message;
		assert!(message.contains("in_progress"));
		assert!(message.contains("to_do"));
	}
}
