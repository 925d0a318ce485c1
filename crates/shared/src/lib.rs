#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Skillet Shared Library
//!
//! Types and helpers used by every crate in the workspace: the subscription
//! tier enum, plan intervals, and database pool construction.

pub mod db;
pub mod types;

pub use db::{create_migration_pool, create_pool};
pub use types::{PlanType, SubscriptionTier};
