//! State management for deliveries.
//!
//! This module provides the state machine that validates status transitions
//! and persists them through the storage service.

pub mod delivery;

pub use delivery::{DeliveryStateError, DeliveryStateMachine};
