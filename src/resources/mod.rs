//! Resource generation module.
//!
//! Turns a parent resource into the child objects the operator owns.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Deployment | Runs the component's pods (PgBouncer or pgAdmin) |
//! | Service | ClusterIP endpoint selecting the component's pods |
//!
//! Every child carries a content fingerprint under `cnpg.io/specHash`, used by
//! the reconciler to skip writes when nothing meaningful changed.

pub mod children;
pub mod common;
pub mod defaults;
pub mod deployment;
pub mod fingerprint;
pub mod service;

pub use children::{ChildObject, ChildObjects, UpdateOptions, build_children};
pub use common::{owner_reference, standard_labels};
pub use defaults::{DefaultPolicy, pgadmin_policy, pgbouncer_policy};
pub use fingerprint::{SPEC_HASH_ANNOTATION, SpecFingerprint, fingerprint};
