//! Core engine for the courier service.
//!
//! This crate wires the configured storage backend to the delivery state
//! machine and exposes the result as a [`CourierEngine`] that the HTTP layer
//! drives. Engines are assembled through [`CourierBuilder`] from a set of
//! named storage factories.

pub mod builder;
pub mod engine;
pub mod state;

pub use builder::{BuilderError, CourierBuilder, CourierFactories};
pub use engine::{CourierEngine, EngineError};
pub use state::{DeliveryStateError, DeliveryStateMachine};
