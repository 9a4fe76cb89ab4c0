//! Stowage operator - Kubernetes backup and restore
//!
//! The same binary runs the controllers and, inside worker Jobs, a single
//! backup or restore.

pub mod controller_runner;
pub mod crds;
