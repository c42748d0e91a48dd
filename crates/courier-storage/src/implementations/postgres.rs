//! PostgreSQL storage backend for the courier service.
//!
//! Deliveries live in a single `deliveries` table keyed by id. Conditional
//! writes are expressed directly in SQL and judged by the number of affected
//! rows:
//!
//! - insert: `INSERT ... ON CONFLICT (id) DO NOTHING`
//! - compare-and-set: `UPDATE ... WHERE id = $2 AND status = $3`
//!
//! Row-level locking inside PostgreSQL makes both statements atomic per id,
//! and writers on different ids never block each other.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use courier_types::{
	ConfigSchema, Delivery, DeliveryId, DeliveryStatus, Field, FieldType, ImplementationRegistry,
	Schema, ValidationError,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// PostgreSQL-backed delivery store.
pub struct PostgresStorage {
	pool: PgPool,
	/// Whether `initialize` applies the embedded migrations.
	run_migrations: bool,
}

impl PostgresStorage {
	pub fn new(pool: PgPool, run_migrations: bool) -> Self {
		Self {
			pool,
			run_migrations,
		}
	}
}

fn backend_error(e: sqlx::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

fn row_to_delivery(row: &PgRow) -> Result<Delivery, StorageError> {
	let id: String = row
		.try_get("id")
		.map_err(|e| StorageError::Serialization(e.to_string()))?;
	let status: String = row
		.try_get("status")
		.map_err(|e| StorageError::Serialization(e.to_string()))?;

	let id = DeliveryId::parse(id).map_err(|e| StorageError::Serialization(e.to_string()))?;
	let status = status
		.parse::<DeliveryStatus>()
		.map_err(|e| StorageError::Serialization(e.to_string()))?;
	Ok(Delivery::new(id, status))
}

#[async_trait]
impl StorageInterface for PostgresStorage {
	async fn initialize(&self) -> Result<(), StorageError> {
		if self.run_migrations {
			sqlx::migrate!("./migrations")
				.run(&self.pool)
				.await
				.map_err(|e| StorageError::Backend(format!("Migration failed: {}", e)))?;
			tracing::info!(component = "storage", implementation = "postgres", "Migrations applied");
		} else {
			sqlx::query("SELECT 1")
				.execute(&self.pool)
				.await
				.map_err(backend_error)?;
		}
		Ok(())
	}

	async fn list(&self) -> Result<Vec<Delivery>, StorageError> {
		let rows = sqlx::query("SELECT id, status FROM deliveries ORDER BY id")
			.fetch_all(&self.pool)
			.await
			.map_err(backend_error)?;

		rows.iter().map(row_to_delivery).collect()
	}

	async fn get(&self, id: &DeliveryId) -> Result<Option<Delivery>, StorageError> {
		let row = sqlx::query("SELECT id, status FROM deliveries WHERE id = $1")
			.bind(id.as_str())
			.fetch_optional(&self.pool)
			.await
			.map_err(backend_error)?;

		row.as_ref().map(row_to_delivery).transpose()
	}

	async fn insert(&self, delivery: &Delivery) -> Result<bool, StorageError> {
		let result = sqlx::query(
			r"
			INSERT INTO deliveries (id, status)
			VALUES ($1, $2)
			ON CONFLICT (id) DO NOTHING
			",
		)
		.bind(delivery.id.as_str())
		.bind(delivery.status.as_str())
		.execute(&self.pool)
		.await
		.map_err(backend_error)?;

		Ok(result.rows_affected() == 1)
	}

	async fn compare_and_set(
		&self,
		id: &DeliveryId,
		expected: DeliveryStatus,
		new: DeliveryStatus,
	) -> Result<bool, StorageError> {
		let result = sqlx::query("UPDATE deliveries SET status = $1 WHERE id = $2 AND status = $3")
			.bind(new.as_str())
			.bind(id.as_str())
			.bind(expected.as_str())
			.execute(&self.pool)
			.await
			.map_err(backend_error)?;

		Ok(result.rows_affected() == 1)
	}

	async fn close(&self) {
		self.pool.close().await;
		tracing::info!(component = "storage", implementation = "postgres", "Connection pool closed");
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(PostgresStorageSchema)
	}
}

/// Configuration schema for PostgresStorage.
pub struct PostgresStorageSchema;

impl ConfigSchema for PostgresStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("database_url", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
							Ok(())
						},
						_ => Err("database_url must start with postgres:// or postgresql://".to_string()),
					}
				}),
			],
			vec![
				Field::new(
					"max_connections",
					FieldType::Integer {
						min: Some(1),
						max: Some(1000),
					},
				),
				Field::new(
					"acquire_timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
				Field::new("run_migrations", FieldType::Boolean),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a PostgreSQL storage backend from configuration.
///
/// The pool connects lazily, so an unreachable database is reported by
/// `initialize` rather than here. Must be called from within a Tokio runtime.
///
/// Configuration parameters:
/// - `database_url`: Connection string (required)
/// - `max_connections`: Pool size (default: 5)
/// - `acquire_timeout_seconds`: Time to wait for a pooled connection (default: 5)
/// - `run_migrations`: Create the schema on startup (default: true)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	PostgresStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let database_url = config
		.get("database_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| StorageError::Configuration("database_url is required".into()))?;

	let max_connections = config
		.get("max_connections")
		.and_then(|v| v.as_integer())
		.map(|v| v as u32)
		.unwrap_or(DEFAULT_MAX_CONNECTIONS);

	let acquire_timeout = config
		.get("acquire_timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);

	let run_migrations = config
		.get("run_migrations")
		.and_then(|v| v.as_bool())
		.unwrap_or(true);

	let pool = PgPoolOptions::new()
		.max_connections(max_connections)
		.acquire_timeout(Duration::from_secs(acquire_timeout))
		.connect_lazy(database_url)
		.map_err(|e| StorageError::Configuration(format!("Invalid database_url: {}", e)))?;

	Ok(Box::new(PostgresStorage::new(pool, run_migrations)))
}

/// Registry for the PostgreSQL storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "postgres";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}
