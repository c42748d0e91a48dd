//! Delivery state machine implementation.
//!
//! Applies the status cycle `to_do -> in_progress -> done -> to_do` to stored
//! deliveries. The first write for an id creates the record with whatever
//! status it carries; every later write must request the successor of the
//! stored status or it is rejected without touching storage.
//!
//! The read-check-write sequence is closed with conditional writes: the store
//! only applies an insert if the id is still free and only applies an update if
//! the status is still the one that was checked. When a concurrent writer gets
//! there first the sequence is re-run against the fresh record, so the loser
//! either succeeds against the new state or is rejected by the rule. Updates
//! are never lost.

use courier_storage::{StorageError, StorageService};
use courier_types::{Delivery, DeliveryId, DeliveryStatus};
use std::sync::Arc;
use thiserror::Error;

/// Number of read-check-write rounds before giving up with a conflict.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Errors that can occur during delivery state management.
#[derive(Debug, Error)]
pub enum DeliveryStateError {
	/// The store failed; the write may be retried.
	#[error("Storage error: {0}")]
	Storage(String),
	/// The requested status is not the successor of the stored one.
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition {
		from: DeliveryStatus,
		to: DeliveryStatus,
	},
	/// Concurrent writers changed the record on every attempt.
	#[error("Delivery {0} was modified concurrently, retry the request")]
	Conflict(DeliveryId),
}

impl From<StorageError> for DeliveryStateError {
	fn from(err: StorageError) -> Self {
		DeliveryStateError::Storage(err.to_string())
	}
}

/// Manages delivery status transitions and persistence.
pub struct DeliveryStateMachine {
	storage: Arc<StorageService>,
}

impl DeliveryStateMachine {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Creates the delivery or advances it to `requested`.
	///
	/// Returns the stored delivery on success. Exactly one write reaches the
	/// store per successful call and none on rejection.
	pub async fn create_or_advance(
		&self,
		id: &DeliveryId,
		requested: DeliveryStatus,
	) -> Result<Delivery, DeliveryStateError> {
		for attempt in 1..=MAX_WRITE_ATTEMPTS {
			match self.storage.get_delivery(id).await? {
				None => {
					let delivery = Delivery::new(id.clone(), requested);
					if self.storage.insert_delivery(&delivery).await? {
						tracing::info!(delivery_id = %id, status = %requested, "Created delivery");
						return Ok(delivery);
					}
				},
				Some(current) => {
					if !current.status.can_transition_to(requested) {
						tracing::warn!(
							delivery_id = %id,
							from = %current.status,
							to = %requested,
							"Rejected status transition"
						);
						return Err(DeliveryStateError::InvalidTransition {
							from: current.status,
							to: requested,
						});
					}

					if self
						.storage
						.compare_and_set_status(id, current.status, requested)
						.await?
					{
						tracing::info!(
							delivery_id = %id,
							from = %current.status,
							to = %requested,
							"Advanced delivery"
						);
						return Ok(Delivery::new(id.clone(), requested));
					}
				},
			}

			tracing::debug!(delivery_id = %id, attempt, "Lost write race, re-reading delivery");
		}

		tracing::warn!(delivery_id = %id, "Giving up after repeated write conflicts");
		Err(DeliveryStateError::Conflict(id.clone()))
	}

	/// Gets a delivery by ID
	pub async fn get_delivery(
		&self,
		id: &DeliveryId,
	) -> Result<Option<Delivery>, DeliveryStateError> {
		Ok(self.storage.get_delivery(id).await?)
	}

	/// Lists all deliveries ordered by id
	pub async fn list_deliveries(&self) -> Result<Vec<Delivery>, DeliveryStateError> {
		Ok(self.storage.list_deliveries().await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use courier_storage::implementations::memory::MemoryStorage;
	use courier_storage::StorageInterface;
	use courier_types::{ConfigSchema, ValidationError};
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn id(s: &str) -> DeliveryId {
		DeliveryId::parse(s).unwrap()
	}

	fn memory_machine() -> DeliveryStateMachine {
		DeliveryStateMachine::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, _config: &toml::Value) -> Result<(), ValidationError> {
			Ok(())
		}
	}

	/// Backend whose every operation fails.
	struct UnavailableStorage;

	#[async_trait]
	impl StorageInterface for UnavailableStorage {
		async fn list(&self) -> Result<Vec<Delivery>, StorageError> {
			Err(StorageError::Backend("connection refused".into()))
		}

		async fn get(&self, _id: &DeliveryId) -> Result<Option<Delivery>, StorageError> {
			Err(StorageError::Backend("connection refused".into()))
		}

		async fn insert(&self, _delivery: &Delivery) -> Result<bool, StorageError> {
			Err(StorageError::Backend("connection refused".into()))
		}

		async fn compare_and_set(
			&self,
			_id: &DeliveryId,
			_expected: DeliveryStatus,
			_new: DeliveryStatus,
		) -> Result<bool, StorageError> {
			Err(StorageError::Backend("connection refused".into()))
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}
	}

	/// Backend where another writer always changes the record first.
	struct ContendedStorage {
		cas_calls: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl StorageInterface for ContendedStorage {
		async fn list(&self) -> Result<Vec<Delivery>, StorageError> {
			Ok(Vec::new())
		}

		async fn get(&self, id: &DeliveryId) -> Result<Option<Delivery>, StorageError> {
			Ok(Some(Delivery::new(id.clone(), DeliveryStatus::ToDo)))
		}

		async fn insert(&self, _delivery: &Delivery) -> Result<bool, StorageError> {
			Ok(false)
		}

		async fn compare_and_set(
			&self,
			_id: &DeliveryId,
			_expected: DeliveryStatus,
			_new: DeliveryStatus,
		) -> Result<bool, StorageError> {
			self.cas_calls.fetch_add(1, Ordering::SeqCst);
			Ok(false)
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}
	}

	#[tokio::test]
	async fn test_first_write_creates_with_any_status() {
		let machine = memory_machine();

		for (key, status) in [
			("aa", DeliveryStatus::ToDo),
			("bb", DeliveryStatus::InProgress),
			("cc", DeliveryStatus::Done),
		] {
			let created = machine.create_or_advance(&id(key), status).await.unwrap();
			assert_eq!(created.status, status);
			assert_eq!(
				machine.get_delivery(&id(key)).await.unwrap(),
				Some(created)
			);
		}
	}

	#[tokio::test]
	async fn test_legal_transition_advances() {
		for start in DeliveryStatus::all() {
			let machine = memory_machine();
			let delivery_id = id("ab1");
			machine.create_or_advance(&delivery_id, start).await.unwrap();

			let advanced = machine
				.create_or_advance(&delivery_id, start.next())
				.await
				.unwrap();
			assert_eq!(advanced.status, start.next());
		}
	}

	#[tokio::test]
	async fn test_illegal_transition_rejected_and_state_kept() {
		for start in DeliveryStatus::all() {
			for requested in DeliveryStatus::all().filter(|s| *s != start.next()) {
				let machine = memory_machine();
				let delivery_id = id("ab1");
				machine.create_or_advance(&delivery_id, start).await.unwrap();

				let result = machine.create_or_advance(&delivery_id, requested).await;
				assert!(matches!(
					result,
					Err(DeliveryStateError::InvalidTransition { from, to }) if from == start && to == requested
				));
				assert_eq!(
					machine.get_delivery(&delivery_id).await.unwrap().unwrap().status,
					start
				);
			}
		}
	}

	#[tokio::test]
	async fn test_full_cycle_scenario() {
		let machine = memory_machine();
		let delivery_id = id("ab1");

		machine
			.create_or_advance(&delivery_id, DeliveryStatus::ToDo)
			.await
			.unwrap();
		machine
			.create_or_advance(&delivery_id, DeliveryStatus::InProgress)
			.await
			.unwrap();
		assert!(machine
			.create_or_advance(&delivery_id, DeliveryStatus::ToDo)
			.await
			.is_err());
		machine
			.create_or_advance(&delivery_id, DeliveryStatus::Done)
			.await
			.unwrap();
		let last = machine
			.create_or_advance(&delivery_id, DeliveryStatus::ToDo)
			.await
			.unwrap();
		assert_eq!(last.status, DeliveryStatus::ToDo);

		let all = machine.list_deliveries().await.unwrap();
		assert_eq!(all, vec![Delivery::new(delivery_id, DeliveryStatus::ToDo)]);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_racing_advancers_single_winner() {
		for round in 0..20 {
			let machine = Arc::new(memory_machine());
			let delivery_id = id(&format!("r{}", round));
			machine
				.create_or_advance(&delivery_id, DeliveryStatus::ToDo)
				.await
				.unwrap();

			let barrier = Arc::new(tokio::sync::Barrier::new(2));
			let mut handles = Vec::new();
			for _ in 0..2 {
				let machine = Arc::clone(&machine);
				let barrier = Arc::clone(&barrier);
				let delivery_id = delivery_id.clone();
				handles.push(tokio::spawn(async move {
					barrier.wait().await;
					machine
						.create_or_advance(&delivery_id, DeliveryStatus::InProgress)
						.await
				}));
			}

			let mut successes = 0;
			for handle in handles {
				match handle.await.unwrap() {
					Ok(delivery) => {
						assert_eq!(delivery.status, DeliveryStatus::InProgress);
						successes += 1;
					},
					Err(DeliveryStateError::InvalidTransition { from, .. }) => {
						assert_eq!(from, DeliveryStatus::InProgress);
					},
					Err(other) => panic!("unexpected error: {other}"),
				}
			}
			assert_eq!(successes, 1, "round {round}");
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_racing_creators_serialize() {
		let machine = Arc::new(memory_machine());
		let delivery_id = id("new");

		let first = {
			let machine = Arc::clone(&machine);
			let delivery_id = delivery_id.clone();
			tokio::spawn(async move {
				machine
					.create_or_advance(&delivery_id, DeliveryStatus::ToDo)
					.await
			})
		};
		let second = {
			let machine = Arc::clone(&machine);
			let delivery_id = delivery_id.clone();
			tokio::spawn(async move {
				machine
					.create_or_advance(&delivery_id, DeliveryStatus::ToDo)
					.await
			})
		};

		let results = [first.await.unwrap(), second.await.unwrap()];
		// One creates, the other then sees to_do and requests to_do again: a no-op, rejected
		assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
		assert_eq!(
			machine.get_delivery(&delivery_id).await.unwrap().unwrap().status,
			DeliveryStatus::ToDo
		);
	}

	#[tokio::test]
	async fn test_storage_failure_is_distinct_from_rejection() {
		let machine =
			DeliveryStateMachine::new(Arc::new(StorageService::new(Box::new(UnavailableStorage))));

		let result = machine
			.create_or_advance(&id("ab1"), DeliveryStatus::ToDo)
			.await;
		assert!(matches!(result, Err(DeliveryStateError::Storage(msg)) if msg.contains("connection refused")));

		assert!(matches!(
			machine.list_deliveries().await,
			Err(DeliveryStateError::Storage(_))
		));
	}

	#[tokio::test]
	async fn test_persistent_contention_reports_conflict() {
		let cas_calls = Arc::new(AtomicUsize::new(0));
		let machine = DeliveryStateMachine::new(Arc::new(StorageService::new(Box::new(
			ContendedStorage {
				cas_calls: Arc::clone(&cas_calls),
			},
		))));

		let result = machine
			.create_or_advance(&id("ab1"), DeliveryStatus::InProgress)
			.await;
		assert!(matches!(result, Err(DeliveryStateError::Conflict(d)) if d.as_str() == "ab1"));
		assert_eq!(cas_calls.load(Ordering::SeqCst), MAX_WRITE_ATTEMPTS);
	}
}
