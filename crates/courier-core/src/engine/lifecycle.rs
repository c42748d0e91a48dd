//! Lifecycle management for the courier engine.
//!
//! Handles initialization and shutdown of the storage backend.

use super::CourierEngine;

impl CourierEngine {
	/// Prepares the storage backend before the engine serves requests
	pub async fn initialize(&self) -> Result<(), super::EngineError> {
		tracing::info!(service_id = %self.config.service.id, "Initializing courier engine");

		self.storage
			.initialize()
			.await
			.map_err(|e| super::EngineError::Service(e.to_string()))?;

		Ok(())
	}

	/// Performs cleanup operations
	pub async fn shutdown(&self) -> Result<(), super::EngineError> {
		tracing::info!("Shutting down courier engine");
		self.storage.close().await;
		Ok(())
	}
}
