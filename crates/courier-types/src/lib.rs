//! Common types module for the courier service.
//!
//! This module defines the core data types shared by every courier crate:
//! the delivery entity and its status cycle, the HTTP API payloads, and the
//! configuration validation primitives used by pluggable backends.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Delivery entity, identifier and status cycle.
pub mod delivery;
/// Registry trait for named implementations.
pub mod registry;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

// Re-export all types for convenient access
pub use api::*;
pub use delivery::*;
pub use registry::ImplementationRegistry;
pub use validation::*;
