//! Core domain types shared by the campusvault backup crates.

pub mod error;
pub mod snapshot;

pub use error::{CoreError, CoreResult};
pub use snapshot::{Snapshot, SnapshotName};
