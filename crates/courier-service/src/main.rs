//! Main entry point for the courier service.
//!
//! This binary tracks delivery statuses over HTTP. Deliveries move through the
//! cycle `to_do -> in_progress -> done -> to_do` and are persisted through a
//! pluggable storage backend selected in the configuration file.

use clap::Parser;
use courier_config::Config;
use courier_core::{CourierBuilder, CourierEngine, CourierFactories};
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod server;

use courier_storage::implementations::file::create_storage as create_file_storage;
use courier_storage::implementations::memory::create_storage as create_memory_storage;
use courier_storage::implementations::postgres::create_storage as create_postgres_storage;

/// Command-line arguments for the courier service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, env = "COURIER_CONFIG", default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the courier service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the engine with the configured storage backend
/// 5. Serves the HTTP API until interrupted, then closes the store
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	// Create env filter with default from args
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started courier");

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let engine = Arc::new(build_engine(config.clone()).await?);
	engine.initialize().await?;

	let served = server::start_server(config.api.clone(), Arc::clone(&engine), shutdown_signal()).await;

	// The store is closed even when the server failed
	engine.shutdown().await?;
	served?;

	tracing::info!("Stopped courier");
	Ok(())
}

/// Resolves when the process receives Ctrl+C.
async fn shutdown_signal() {
	match tokio::signal::ctrl_c().await {
		Ok(()) => tracing::info!("Shutdown signal received"),
		Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
	}
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the courier engine with every known storage backend available.
async fn build_engine(config: Config) -> Result<CourierEngine, Box<dyn std::error::Error>> {
	let builder = CourierBuilder::new(config);

	let storage_factories = create_factory_map!(
		courier_storage::StorageInterface,
		courier_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
		"postgres" => create_postgres_storage,
	);

	Ok(builder.build(CourierFactories { storage_factories }).await?)
}
