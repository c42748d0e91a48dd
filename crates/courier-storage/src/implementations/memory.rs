//! In-memory storage backend implementation for the courier service.
//!
//! This module provides a memory-based implementation of the StorageInterface
//! trait, useful for testing and development scenarios where persistence is
//! not required.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use courier_types::{
	ConfigSchema, Delivery, DeliveryId, DeliveryStatus, ImplementationRegistry, Schema,
	ValidationError,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// In-memory storage implementation.
///
/// Records live in a sharded concurrent map, so conditional writes on one id
/// only lock the shard holding that id.
pub struct MemoryStorage {
	store: DashMap<DeliveryId, DeliveryStatus>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			store: DashMap::new(),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn list(&self) -> Result<Vec<Delivery>, StorageError> {
		let mut deliveries: Vec<Delivery> = self
			.store
			.iter()
			.map(|entry| Delivery::new(entry.key().clone(), *entry.value()))
			.collect();
		deliveries.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(deliveries)
	}

	async fn get(&self, id: &DeliveryId) -> Result<Option<Delivery>, StorageError> {
		Ok(self
			.store
			.get(id)
			.map(|status| Delivery::new(id.clone(), *status)))
	}

	async fn insert(&self, delivery: &Delivery) -> Result<bool, StorageError> {
		match self.store.entry(delivery.id.clone()) {
			Entry::Occupied(_) => Ok(false),
			Entry::Vacant(slot) => {
				slot.insert(delivery.status);
				Ok(true)
			},
		}
	}

	async fn compare_and_set(
		&self,
		id: &DeliveryId,
		expected: DeliveryStatus,
		new: DeliveryStatus,
	) -> Result<bool, StorageError> {
		match self.store.get_mut(id) {
			Some(mut status) if *status == expected => {
				*status = new;
				Ok(true)
			},
			_ => Ok(false),
		}
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// Memory storage has no configuration, but the table must still be a table
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
///
/// Configuration parameters:
/// - None required for memory storage
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}
