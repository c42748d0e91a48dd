//! API handlers for the courier service.

pub mod delivery;
