//! Courier engine holding the storage service and delivery state machine.

pub mod lifecycle;

use crate::state::DeliveryStateMachine;
use courier_config::Config;
use courier_storage::StorageService;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Service error: {0}")]
	Service(String),
}

/// Main courier engine shared by all request handlers.
#[derive(Clone)]
pub struct CourierEngine {
	/// Service configuration.
	pub(crate) config: Config,
	/// Storage service for persisting deliveries.
	pub(crate) storage: Arc<StorageService>,
	/// Delivery state machine
	pub(crate) deliveries: Arc<DeliveryStateMachine>,
}

impl CourierEngine {
	/// Creates a new engine on top of the given storage service
	pub fn new(config: Config, storage: Arc<StorageService>) -> Self {
		let deliveries = Arc::new(DeliveryStateMachine::new(storage.clone()));

		Self {
			config,
			storage,
			deliveries,
		}
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the delivery state machine.
	pub fn deliveries(&self) -> &Arc<DeliveryStateMachine> {
		&self.deliveries
	}
}
