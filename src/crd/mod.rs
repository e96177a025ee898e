//! Custom Resource Definitions (CRDs) for pg-companion-operator.
//!
//! - `Pooler`: PgBouncer connection pooling tier in front of a database cluster
//! - `PgAdmin`: pgAdmin web console

mod common;
mod pgadmin;
mod pooler;

pub use common::*;
pub use pgadmin::*;
pub use pooler::*;
