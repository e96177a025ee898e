//! Composable pod template construction.
//!
//! Operator defaults are expressed as merge operations layered on top of a
//! user-supplied partial template, so user customisations survive.

mod builder;

pub use builder::{ContainerKind, ContainerTarget, MergeOp, PodTemplateBuilder};
