//! Storage module for the courier service.
//!
//! This module provides the abstraction over the delivery store together with
//! its backends: in-memory, file-based and PostgreSQL. Every backend offers
//! conditional writes (insert-if-absent and compare-and-set on the status) so
//! that the read-check-write sequence of a status transition can be made
//! atomic per delivery id without a global lock.

use async_trait::async_trait;
use courier_types::{ConfigSchema, Delivery, DeliveryId, DeliveryStatus, ImplementationRegistry};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
	pub mod postgres;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface for delivery store backends.
///
/// Writes are conditional: `insert` only creates a record that does not exist
/// yet and `compare_and_set` only changes a status that still holds the value
/// the caller observed. Both report whether they applied, which lets callers
/// detect a concurrent writer instead of overwriting its result.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Prepares the backend before first use (e.g. runs schema migrations).
	async fn initialize(&self) -> Result<(), StorageError> {
		Ok(())
	}

	/// Returns every stored delivery ordered by id.
	async fn list(&self) -> Result<Vec<Delivery>, StorageError>;

	/// Looks up a delivery by id.
	async fn get(&self, id: &DeliveryId) -> Result<Option<Delivery>, StorageError>;

	/// Inserts a delivery if no record exists for its id.
	///
	/// Returns `false` without writing when the id is already taken.
	async fn insert(&self, delivery: &Delivery) -> Result<bool, StorageError>;

	/// Sets the status of `id` to `new` only if it currently equals `expected`.
	///
	/// Returns `false` without writing when the record is missing or holds a
	/// different status.
	async fn compare_and_set(
		&self,
		id: &DeliveryId,
		expected: DeliveryStatus,
		new: DeliveryStatus,
	) -> Result<bool, StorageError>;

	/// Releases backend resources. Called once on shutdown.
	async fn close(&self) {}

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage
/// implementations, keyed by the name used under `[storage.implementations]`.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory, postgres};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
		(postgres::Registry::NAME, postgres::Registry::factory()),
	]
}

/// High-level storage service shared by the engine and request handlers.
///
/// Wraps the selected backend and adds tracing around every operation.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	pub async fn initialize(&self) -> Result<(), StorageError> {
		self.backend.initialize().await
	}

	pub async fn list_deliveries(&self) -> Result<Vec<Delivery>, StorageError> {
		let deliveries = self.backend.list().await?;
		tracing::debug!(count = deliveries.len(), "Listed deliveries");
		Ok(deliveries)
	}

	pub async fn get_delivery(&self, id: &DeliveryId) -> Result<Option<Delivery>, StorageError> {
		self.backend.get(id).await
	}

	/// Inserts a new delivery; `Ok(false)` means the id already exists.
	pub async fn insert_delivery(&self, delivery: &Delivery) -> Result<bool, StorageError> {
		let inserted = self.backend.insert(delivery).await?;
		if inserted {
			tracing::debug!(delivery_id = %delivery.id, status = %delivery.status, "Inserted delivery");
		} else {
			tracing::debug!(delivery_id = %delivery.id, "Insert skipped, delivery already exists");
		}
		Ok(inserted)
	}

	/// Conditionally moves a delivery from `expected` to `new`.
	pub async fn compare_and_set_status(
		&self,
		id: &DeliveryId,
		expected: DeliveryStatus,
		new: DeliveryStatus,
	) -> Result<bool, StorageError> {
		let applied = self.backend.compare_and_set(id, expected, new).await?;
		if !applied {
			tracing::debug!(
				delivery_id = %id,
				expected = %expected,
				new = %new,
				"Status changed concurrently, compare-and-set not applied"
			);
		}
		Ok(applied)
	}

	pub async fn close(&self) {
		self.backend.close().await
	}
}
