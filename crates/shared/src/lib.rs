#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Learnwell Shared
//!
//! Types and database plumbing used by every Learnwell crate.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{ParseEnumError, SubscriptionStatus, SubscriptionTier, TIER_MONTHLY_CREDITS};
