//! HTTP server for the courier API.
//!
//! Serves the delivery collection under `/deliveries`, with and without the
//! trailing slash, plus single-record lookup under `/deliveries/{id}`.

use axum::{
	error_handling::HandleErrorLayer,
	extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
	http::HeaderValue,
	response::Json,
	routing::get,
	BoxError, Router,
};
use courier_config::ApiConfig;
use courier_core::CourierEngine;
use courier_types::{APIError, Delivery, DeliveryRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::timeout::{error::Elapsed, TimeoutLayer};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::apis::delivery::{self, DeliveryApiError};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the courier engine for processing requests.
	pub engine: Arc<CourierEngine>,
}

/// Builds the API router with all routes and middleware.
pub fn router(engine: Arc<CourierEngine>, api_config: &ApiConfig) -> Router {
	let app_state = AppState { engine };

	Router::new()
		.route(
			"/deliveries",
			get(handle_list_deliveries).post(handle_submit_delivery),
		)
		.route(
			"/deliveries/",
			get(handle_list_deliveries).post(handle_submit_delivery),
		)
		.route("/deliveries/{id}", get(handle_get_delivery))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(HandleErrorLayer::new(handle_middleware_error))
				.layer(TimeoutLayer::new(Duration::from_secs(
					api_config.timeout_seconds,
				)))
				.layer(cors_layer(api_config))
				.layer(DefaultBodyLimit::max(api_config.max_request_size)),
		)
		.with_state(app_state)
}

/// Turns middleware failures into structured API errors.
///
/// A request that outlives `timeout_seconds` is almost always waiting on the
/// store, so it is reported as a server error the caller may retry.
async fn handle_middleware_error(err: BoxError) -> APIError {
	if err.is::<Elapsed>() {
		tracing::warn!("Request timed out");
		APIError::InternalServerError {
			error_type: "TIMEOUT".to_string(),
			message: "Request did not complete within the configured timeout".to_string(),
		}
	} else {
		tracing::error!(error = %err, "Unhandled middleware error");
		APIError::InternalServerError {
			error_type: "INTERNAL_ERROR".to_string(),
			message: err.to_string(),
		}
	}
}

/// Builds the CORS layer from configuration.
///
/// A `"*"` entry allows any origin. Without a `[api.cors]` section no CORS
/// headers are emitted.
fn cors_layer(api_config: &ApiConfig) -> CorsLayer {
	let Some(cors) = &api_config.cors else {
		return CorsLayer::new();
	};

	let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
	if cors.allowed_origins.iter().any(|origin| origin == "*") {
		return layer.allow_origin(Any);
	}

	let origins: Vec<HeaderValue> = cors
		.allowed_origins
		.iter()
		.filter_map(|origin| match HeaderValue::from_str(origin) {
			Ok(value) => Some(value),
			Err(_) => {
				tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
				None
			}
		})
		.collect();
	layer.allow_origin(origins)
}

/// Starts the HTTP server and runs it until `shutdown` resolves.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<CourierEngine>,
	shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(engine, &api_config);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Courier API server starting on {}", bind_address);

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown)
		.await?;

	Ok(())
}

/// Handles GET /deliveries requests.
async fn handle_list_deliveries(
	State(state): State<AppState>,
) -> Result<Json<Vec<Delivery>>, APIError> {
	match delivery::list_deliveries(&state.engine).await {
		Ok(deliveries) => Ok(Json(deliveries)),
		Err(e) => {
			tracing::warn!("Delivery listing failed: {}", e);
			Err(APIError::from(e))
		}
	}
}

/// Handles GET /deliveries/{id} requests.
async fn handle_get_delivery(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<Delivery>, APIError> {
	match delivery::get_delivery(&state.engine, &id).await {
		Ok(delivery) => Ok(Json(delivery)),
		Err(e) => {
			tracing::debug!(delivery_id = %id, "Delivery lookup failed: {}", e);
			Err(APIError::from(e))
		}
	}
}

/// Handles POST /deliveries requests.
///
/// Creates the delivery on first sight, otherwise advances it to the requested
/// status if that status is the successor of the stored one.
async fn handle_submit_delivery(
	State(state): State<AppState>,
	payload: Result<Json<DeliveryRequest>, JsonRejection>,
) -> Result<Json<Delivery>, APIError> {
	let Json(request) = payload.map_err(|rejection| {
		tracing::debug!("Rejected delivery payload: {}", rejection.body_text());
		APIError::from(DeliveryApiError::Validation(rejection.body_text()))
	})?;

	match delivery::submit_delivery(&state.engine, request).await {
		Ok(delivery) => Ok(Json(delivery)),
		Err(e) => {
			tracing::warn!("Delivery submission failed: {}", e);
			Err(APIError::from(e))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use axum::body::{to_bytes, Body};
	use axum::http::{Request, StatusCode};
	use courier_config::Config;
	use courier_storage::implementations::memory::MemoryStorage;
	use courier_storage::{StorageError, StorageInterface, StorageService};
	use courier_types::{ConfigSchema, DeliveryId, DeliveryStatus};
	use mockall::mock;
	use serde_json::{json, Value};
	use std::str::FromStr;
	use tower::ServiceExt;

	mock! {
		pub Storage {}

		#[async_trait]
		impl StorageInterface for Storage {
			async fn initialize(&self) -> Result<(), StorageError>;
			async fn list(&self) -> Result<Vec<Delivery>, StorageError>;
			async fn get(&self, id: &DeliveryId) -> Result<Option<Delivery>, StorageError>;
			async fn insert(&self, delivery: &Delivery) -> Result<bool, StorageError>;
			async fn compare_and_set(
				&self,
				id: &DeliveryId,
				expected: DeliveryStatus,
				new: DeliveryStatus,
			) -> Result<bool, StorageError>;
			async fn close(&self);
			fn config_schema(&self) -> Box<dyn ConfigSchema>;
		}
	}

	fn test_config() -> Config {
		Config::from_str(
			r#"
[service]
id = "courier-test"

[storage]
primary = "memory"

[storage.implementations.memory]
"#,
		)
		.unwrap()
	}

	fn app_with(backend: Box<dyn StorageInterface>) -> Router {
		let config = test_config();
		let storage = Arc::new(StorageService::new(backend));
		let engine = Arc::new(CourierEngine::new(config.clone(), storage));
		router(engine, &config.api)
	}

	fn app() -> Router {
		app_with(Box::new(MemoryStorage::new()))
	}

	async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
		let response = app.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let body = if bytes.is_empty() {
			Value::Null
		} else {
			serde_json::from_slice(&bytes).unwrap()
		};
		(status, body)
	}

	async fn post(app: &Router, body: Value) -> (StatusCode, Value) {
		let request = Request::builder()
			.method("POST")
			.uri("/deliveries/")
			.header("content-type", "application/json")
			.body(Body::from(body.to_string()))
			.unwrap();
		send(app, request).await
	}

	async fn get_path(app: &Router, uri: &str) -> (StatusCode, Value) {
		let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
		send(app, request).await
	}

	fn assert_error_body(body: &Value, code: &str) {
		assert_eq!(body["error"], code);
		assert!(body["error_message"].is_string());
	}

	#[tokio::test]
	async fn test_status_cycle_over_http() {
		let app = app();

		let (status, body) = post(&app, json!({"id": "ab1", "status": "to_do"})).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body, json!({"id": "ab1", "status": "to_do"}));

		let (status, body) = post(&app, json!({"id": "ab1", "status": "in_progress"})).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["status"], "in_progress");

		let (status, body) = post(&app, json!({"id": "ab1", "status": "to_do"})).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_error_body(&body, "INVALID_TRANSITION");

		let (status, _) = post(&app, json!({"id": "ab1", "status": "done"})).await;
		assert_eq!(status, StatusCode::OK);

		let (status, body) = post(&app, json!({"id": "ab1", "status": "to_do"})).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["status"], "to_do");
	}

	#[tokio::test]
	async fn test_listing_ordered_by_id() {
		let app = app();

		let (status, body) = get_path(&app, "/deliveries/").await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body, json!([]));

		post(&app, json!({"id": "x2", "status": "to_do"})).await;
		post(&app, json!({"id": "x1", "status": "done"})).await;

		let (status, body) = get_path(&app, "/deliveries/").await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(
			body,
			json!([
				{"id": "x1", "status": "done"},
				{"id": "x2", "status": "to_do"}
			])
		);

		// Same collection without the trailing slash
		let (status, without_slash) = get_path(&app, "/deliveries").await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(without_slash, body);
	}

	#[tokio::test]
	async fn test_malformed_input_rejected() {
		let app = app();

		let (status, body) = post(&app, json!({"id": "A!", "status": "to_do"})).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_error_body(&body, "VALIDATION_ERROR");

		let (status, body) = post(&app, json!({"id": "ab1", "status": "shipped"})).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_error_body(&body, "VALIDATION_ERROR");

		let (status, body) = post(&app, json!({"id": "ab1"})).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_error_body(&body, "VALIDATION_ERROR");

		let request = Request::builder()
			.method("POST")
			.uri("/deliveries")
			.header("content-type", "application/json")
			.body(Body::from("{not json"))
			.unwrap();
		let (status, body) = send(&app, request).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_error_body(&body, "VALIDATION_ERROR");

		// Nothing was created by the rejected requests
		let (_, body) = get_path(&app, "/deliveries").await;
		assert_eq!(body, json!([]));
	}

	#[tokio::test]
	async fn test_get_single_delivery() {
		let app = app();
		post(&app, json!({"id": "ab1", "status": "done"})).await;

		let (status, body) = get_path(&app, "/deliveries/ab1").await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body, json!({"id": "ab1", "status": "done"}));

		let (status, body) = get_path(&app, "/deliveries/zz9").await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_error_body(&body, "NOT_FOUND");

		let (status, body) = get_path(&app, "/deliveries/TOOLONG").await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_error_body(&body, "VALIDATION_ERROR");
	}

	#[tokio::test]
	async fn test_storage_failure_is_server_error() {
		let mut storage = MockStorage::new();
		storage
			.expect_get()
			.returning(|_| Err(StorageError::Backend("connection refused".into())));
		storage
			.expect_list()
			.returning(|| Err(StorageError::Backend("connection refused".into())));
		storage.expect_insert().never();
		storage.expect_compare_and_set().never();
		let app = app_with(Box::new(storage));

		let (status, body) = post(&app, json!({"id": "ab1", "status": "to_do"})).await;
		assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
		assert_error_body(&body, "STORAGE_ERROR");

		let (status, body) = get_path(&app, "/deliveries/").await;
		assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
		assert_error_body(&body, "STORAGE_ERROR");
	}

	#[tokio::test]
	async fn test_persistent_contention_is_conflict() {
		let mut storage = MockStorage::new();
		storage.expect_get().returning(|id| {
			Ok(Some(Delivery::new(id.clone(), DeliveryStatus::ToDo)))
		});
		storage.expect_compare_and_set().times(3).returning(|_, _, _| Ok(false));
		let app = app_with(Box::new(storage));

		let (status, body) = post(&app, json!({"id": "ab1", "status": "in_progress"})).await;
		assert_eq!(status, StatusCode::CONFLICT);
		assert_error_body(&body, "CONFLICT");
	}

	/// Backend whose reads never complete in time.
	struct StalledStorage;

	#[async_trait]
	impl StorageInterface for StalledStorage {
		async fn list(&self) -> Result<Vec<Delivery>, StorageError> {
			tokio::time::sleep(Duration::from_secs(3600)).await;
			Ok(Vec::new())
		}

		async fn get(&self, _id: &DeliveryId) -> Result<Option<Delivery>, StorageError> {
			tokio::time::sleep(Duration::from_secs(3600)).await;
			Ok(None)
		}

		async fn insert(&self, _delivery: &Delivery) -> Result<bool, StorageError> {
			Ok(true)
		}

		async fn compare_and_set(
			&self,
			_id: &DeliveryId,
			_expected: DeliveryStatus,
			_new: DeliveryStatus,
		) -> Result<bool, StorageError> {
			Ok(true)
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			MemoryStorage::new().config_schema()
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_stalled_store_times_out_with_error_body() {
		let mut config = test_config();
		config.api.timeout_seconds = 1;
		let storage = Arc::new(StorageService::new(Box::new(StalledStorage)));
		let engine = Arc::new(CourierEngine::new(config.clone(), storage));
		let app = router(engine, &config.api);

		let (status, body) = post(&app, json!({"id": "ab1", "status": "to_do"})).await;
		assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
		assert_error_body(&body, "TIMEOUT");

		let (status, body) = get_path(&app, "/deliveries").await;
		assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
		assert_error_body(&body, "TIMEOUT");
	}

	#[tokio::test]
	async fn test_oversized_body_rejected() {
		let mut config = test_config();
		config.api.max_request_size = 16;
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let engine = Arc::new(CourierEngine::new(config.clone(), storage));
		let app = router(engine, &config.api);

		let (status, body) = post(&app, json!({"id": "ab1", "status": "in_progress"})).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_error_body(&body, "VALIDATION_ERROR");

		let (_, body) = get_path(&app, "/deliveries").await;
		assert_eq!(body, json!([]));
	}
}
