//! Shared primitive types used across the storefront core.

use chrono::{DateTime, Utc};

/// Row id of a customer account.
pub type UserId = i64;

/// Row id of a catalog product.
pub type ProductId = i64;

pub type CartId = i64;

pub type OrderId = i64;

/// Row id of a recorded checkout attempt.
pub type TransactionId = i64;

/// Every timestamp in the core is UTC. Local-time rules convert explicitly.
pub type Timestamp = DateTime<Utc>;
