//! File-based storage backend for the courier service.
//!
//! Each delivery is stored as a small JSON document named after its id.
//! Documents are replaced atomically through a temporary file and a rename,
//! so readers never see a partially written record. Conditional writes take
//! an exclusive advisory lock on a per-id lock file, which serializes writers
//! on the same id across tasks and across processes sharing the directory.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use courier_types::{
	ConfigSchema, Delivery, DeliveryId, DeliveryStatus, Field, FieldType, ImplementationRegistry,
	Schema, ValidationError,
};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::fs;

const RECORD_EXTENSION: &str = "json";
const LOCK_EXTENSION: &str = "lock";

/// File-based storage implementation.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Ids are restricted to `[a-z0-9]`, so they are always safe file names.
	fn record_path(&self, id: &DeliveryId) -> PathBuf {
		self.base_path
			.join(format!("{}.{}", id.as_str(), RECORD_EXTENSION))
	}

	fn lock_path(&self, id: &DeliveryId) -> PathBuf {
		self.base_path
			.join(format!("{}.{}", id.as_str(), LOCK_EXTENSION))
	}

	/// Runs `op` on the record path while holding the id's exclusive lock.
	async fn with_record_lock<T, F>(&self, id: &DeliveryId, op: F) -> Result<T, StorageError>
	where
		T: Send + 'static,
		F: FnOnce(&Path) -> Result<T, StorageError> + Send + 'static,
	{
		let base_path = self.base_path.clone();
		let lock_path = self.lock_path(id);
		let record_path = self.record_path(id);

		tokio::task::spawn_blocking(move || {
			std::fs::create_dir_all(&base_path).map_err(backend_error)?;
			let lock_file = OpenOptions::new()
				.create(true)
				.truncate(false)
				.read(true)
				.write(true)
				.open(&lock_path)
				.map_err(backend_error)?;
			FileExt::lock_exclusive(&lock_file).map_err(backend_error)?;

			let result = op(&record_path);

			if let Err(e) = FileExt::unlock(&lock_file) {
				tracing::warn!("Failed to release lock {:?}: {}", lock_path, e);
			}
			result
		})
		.await
		.map_err(|e| StorageError::Backend(format!("Storage task failed: {}", e)))?
	}
}

fn backend_error(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

fn decode_record(data: &[u8]) -> Result<Delivery, StorageError> {
	serde_json::from_slice(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Reads a record synchronously; used while holding the record lock.
fn read_record(path: &Path) -> Result<Option<Delivery>, StorageError> {
	match std::fs::read(path) {
		Ok(data) => decode_record(&data).map(Some),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(backend_error(e)),
	}
}

/// Writes a record by writing a temp file and renaming it over the target.
fn write_record(path: &Path, delivery: &Delivery) -> Result<(), StorageError> {
	let bytes =
		serde_json::to_vec(delivery).map_err(|e| StorageError::Serialization(e.to_string()))?;
	let temp_path = path.with_extension("tmp");
	std::fs::write(&temp_path, bytes).map_err(backend_error)?;
	std::fs::rename(&temp_path, path).map_err(backend_error)
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn initialize(&self) -> Result<(), StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(backend_error)?;
		tracing::debug!("File storage ready at {:?}", self.base_path);
		Ok(())
	}

	async fn list(&self) -> Result<Vec<Delivery>, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(backend_error(e)),
		};

		let mut deliveries = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(backend_error)? {
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new(RECORD_EXTENSION)) {
				continue;
			}
			match fs::read(&path).await {
				Ok(data) => {
					let delivery = decode_record(&data)?;
					let stem = path.file_stem().and_then(|s| s.to_str());
					if stem != Some(delivery.id.as_str()) {
						tracing::warn!(
							delivery_id = %delivery.id,
							"Skipping file {:?}: record id does not match file name",
							path
						);
						continue;
					}
					deliveries.push(delivery);
				},
				// Nothing deletes records, but tolerate a file vanishing mid-scan
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
					tracing::debug!("Skipping file {:?}: removed during listing", path);
				},
				Err(e) => return Err(backend_error(e)),
			}
		}

		deliveries.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(deliveries)
	}

	async fn get(&self, id: &DeliveryId) -> Result<Option<Delivery>, StorageError> {
		match fs::read(self.record_path(id)).await {
			Ok(data) => {
				let delivery = decode_record(&data)?;
				if delivery.id != *id {
					return Err(StorageError::Serialization(format!(
						"Record for {} holds id {}",
						id, delivery.id
					)));
				}
				Ok(Some(delivery))
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(backend_error(e)),
		}
	}

	async fn insert(&self, delivery: &Delivery) -> Result<bool, StorageError> {
		let id = delivery.id.clone();
		let delivery = delivery.clone();
		self.with_record_lock(&id, move |path| {
			if read_record(path)?.is_some() {
				return Ok(false);
			}
			write_record(path, &delivery)?;
			Ok(true)
		})
		.await
	}

	async fn compare_and_set(
		&self,
		id: &DeliveryId,
		expected: DeliveryStatus,
		new: DeliveryStatus,
	) -> Result<bool, StorageError> {
		self.with_record_lock(id, move |path| match read_record(path)? {
			Some(mut delivery) if delivery.status == expected => {
				delivery.status = new;
				write_record(path, &delivery)?;
				Ok(true)
			},
			_ => Ok(false),
		})
		.await
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("storage_path", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(path) if !path.trim().is_empty() => Ok(()),
						_ => Err("storage_path cannot be empty".to_string()),
					}
				}),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for delivery files (default: "./data/deliveries")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/deliveries");

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}
