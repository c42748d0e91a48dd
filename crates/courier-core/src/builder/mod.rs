//! Builder pattern for constructing courier engines.
//!
//! Composes a CourierEngine from the configured storage implementations using
//! factory functions keyed by implementation name.

use crate::engine::CourierEngine;
use courier_config::Config;
use courier_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Container for the factory functions needed to build a CourierEngine.
pub struct CourierFactories<SF> {
	pub storage_factories: HashMap<String, SF>,
}

/// Builder for constructing a CourierEngine with a pluggable storage backend.
pub struct CourierBuilder {
	config: Config,
}

impl CourierBuilder {
	/// Creates a new CourierBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the CourierEngine using the given storage factories.
	///
	/// Every configured implementation with a matching factory is created so
	/// that invalid configuration is reported at startup, then the primary one
	/// is kept.
	pub async fn build<SF>(self, factories: CourierFactories<SF>) -> Result<CourierEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			let Some(factory) = factories.storage_factories.get(name) else {
				tracing::warn!(
					component = "storage",
					implementation = %name,
					"Unknown storage implementation, skipping"
				);
				continue;
			};

			match factory(config) {
				Ok(implementation) => {
					// Validation already happened in the factory
					storage_impls.insert(name.clone(), implementation);
					let is_primary = &self.config.storage.primary == name;
					tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
				}
				Err(e) => {
					tracing::error!(
						component = "storage",
						implementation = %name,
						error = %e,
						"Failed to create storage implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create storage implementation '{}': {}",
						name, e
					)));
				}
			}
		}

		if storage_impls.is_empty() {
			return Err(BuilderError::MissingComponent(
				"No valid storage implementations available".into(),
			));
		}

		let primary_storage = &self.config.storage.primary;
		let storage_backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary storage '{}' failed to load or has invalid configuration",
				primary_storage
			))
		})?;

		let storage = Arc::new(StorageService::new(storage_backend));

		Ok(CourierEngine::new(self.config, storage))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use courier_types::{DeliveryId, DeliveryStatus};
	use std::str::FromStr;

	fn memory_factories() -> CourierFactories<courier_storage::StorageFactory> {
		let mut storage_factories = HashMap::new();
		for (name, factory) in courier_storage::get_all_implementations() {
			storage_factories.insert(name.to_string(), factory);
		}
		CourierFactories { storage_factories }
	}

	fn config(toml_str: &str) -> Config {
		Config::from_str(toml_str).unwrap()
	}

	#[tokio::test]
	async fn test_build_with_memory_primary() {
		let config = config(
			r#"
[service]
id = "courier-test"

[storage]
primary = "memory"

[storage.implementations.memory]
"#,
		);

		let engine = CourierBuilder::new(config)
			.build(memory_factories())
			.await
			.unwrap();
		engine.initialize().await.unwrap();

		let id = DeliveryId::parse("ab1").unwrap();
		engine
			.deliveries()
			.create_or_advance(&id, DeliveryStatus::ToDo)
			.await
			.unwrap();
		assert_eq!(engine.deliveries().list_deliveries().await.unwrap().len(), 1);
		assert_eq!(engine.config().service.id, "courier-test");

		engine.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_unknown_implementations_are_skipped() {
		let config = config(
			r#"
[service]
id = "courier-test"

[storage]
primary = "memory"

[storage.implementations.memory]

[storage.implementations.redis]
url = "redis://localhost"
"#,
		);

		assert!(CourierBuilder::new(config)
			.build(memory_factories())
			.await
			.is_ok());
	}

	#[tokio::test]
	async fn test_invalid_backend_config_fails_build() {
		let config = config(
			r#"
[service]
id = "courier-test"

[storage]
primary = "file"

[storage.implementations.file]
storage_path = ""
"#,
		);

		let result = CourierBuilder::new(config).build(memory_factories()).await;
		assert!(matches!(result, Err(BuilderError::Config(msg)) if msg.contains("'file'")));
	}

	#[tokio::test]
	async fn test_no_known_implementation_is_missing_component() {
		let config = config(
			r#"
[service]
id = "courier-test"

[storage]
primary = "redis"

[storage.implementations.redis]
url = "redis://localhost"
"#,
		);

		let result = CourierBuilder::new(config).build(memory_factories()).await;
		assert!(matches!(result, Err(BuilderError::MissingComponent(_))));
	}
}
