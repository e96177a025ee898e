//! Controller module for pg-companion-operator.
//!
//! Contains the reconciliation loop, the object store seam, error handling,
//! status management and validation logic. One generic reconcile path serves
//! every [`component::ManagedComponent`] kind.

pub mod component;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod status;
pub mod store;
pub mod validation;
