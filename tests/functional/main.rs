// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the Pooler and PgAdmin reconcilers.
//!
//! These tests drive full reconcile passes against an in-memory object store
//! WITHOUT requiring a live Kubernetes cluster.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_second_pass_writes_nothing
//! ```
//!
//! ## Test Categories
//!
//! - **Reconcile tests**: create, no-op and update passes, status handling
//! - **Race tests**: concurrent creates, write conflicts, outages, cancellation

#[allow(dead_code)]
#[path = "../common/fixtures.rs"]
mod fixtures;
mod race_tests;

pub use fixtures::*;
pub use mock_store::*;
