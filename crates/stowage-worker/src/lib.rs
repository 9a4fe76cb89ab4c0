//! Stowage worker: the code that runs inside backup and restore Jobs
//!
//! A backup exports cluster resources and volume snapshots into a gzipped
//! tar archive stored on S3 or NFS. A restore reads that archive back and
//! applies it to the local or a remote cluster.

#![deny(missing_docs)]

pub mod apply;
pub mod archive;
pub mod backup;
pub mod document;
pub mod export;
pub mod requests;
pub mod restore;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;

pub use worker::{run_worker, WorkerArgs, WorkerMode};
