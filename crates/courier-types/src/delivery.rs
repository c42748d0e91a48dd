//! Delivery types and the status cycle.
//!
//! A delivery is identified by a short lowercase alphanumeric id and carries a
//! single status. Statuses move through the closed cycle
//! `to_do -> in_progress -> done -> to_do`; the only legal transition from any
//! status is to its successor.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Pattern every delivery id must match.
pub const DELIVERY_ID_PATTERN: &str = "^[a-z0-9]{2,5}$";

static DELIVERY_ID_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(DELIVERY_ID_PATTERN).expect("delivery id pattern is valid"));

/// Errors raised when building delivery values from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryValidationError {
	/// The id does not match [`DELIVERY_ID_PATTERN`].
	#[error("Invalid delivery id '{0}': must be 2 to 5 characters of [a-z0-9]")]
	InvalidId(String),
	/// The status is not one of the known statuses.
	#[error("Invalid status '{0}': expected one of to_do, in_progress, done")]
	InvalidStatus(String),
}

/// Validated delivery identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeliveryId(String);

impl DeliveryId {
	/// Parses and validates a delivery id.
	pub fn parse(id: impl Into<String>) -> Result<Self, DeliveryValidationError> {
		let id = id.into();
		if DELIVERY_ID_RE.is_match(&id) {
			Ok(Self(id))
		} else {
			Err(DeliveryValidationError::InvalidId(id))
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl TryFrom<String> for DeliveryId {
	type Error = DeliveryValidationError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}

impl From<DeliveryId> for String {
	fn from(id: DeliveryId) -> Self {
		id.0
	}
}

impl FromStr for DeliveryId {
	type Err = DeliveryValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for DeliveryId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for DeliveryId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

/// Status of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
	/// Delivery has been registered but not started.
	ToDo,
	/// Delivery is underway.
	InProgress,
	/// Delivery has been completed.
	Done,
}

impl DeliveryStatus {
	/// Returns the successor of this status in the cycle.
	pub const fn next(self) -> Self {
		match self {
			DeliveryStatus::ToDo => DeliveryStatus::InProgress,
			DeliveryStatus::InProgress => DeliveryStatus::Done,
			DeliveryStatus::Done => DeliveryStatus::ToDo,
		}
	}

	/// Returns true if moving from this status to `requested` is legal.
	///
	/// Only the immediate successor is accepted; skips, reversals and
	/// no-op transitions are all refused.
	pub fn can_transition_to(self, requested: DeliveryStatus) -> bool {
		self.next() == requested
	}

	/// Returns the wire/database representation of the status.
	pub const fn as_str(self) -> &'static str {
		match self {
			DeliveryStatus::ToDo => "to_do",
			DeliveryStatus::InProgress => "in_progress",
			DeliveryStatus::Done => "done",
		}
	}

	/// Returns an iterator over all statuses in cycle order.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::ToDo, Self::InProgress, Self::Done].into_iter()
	}
}

impl FromStr for DeliveryStatus {
	type Err = DeliveryValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"to_do" => Ok(Self::ToDo),
			"in_progress" => Ok(Self::InProgress),
			"done" => Ok(Self::Done),
			other => Err(DeliveryValidationError::InvalidStatus(other.to_string())),
		}
	}
}

impl fmt::Display for DeliveryStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A tracked delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
	/// Primary key, immutable after creation.
	pub id: DeliveryId,
	/// Current status.
	pub status: DeliveryStatus,
}

impl Delivery {
	pub fn new(id: DeliveryId, status: DeliveryStatus) -> Self {
		Self { id, status }
	}
}
