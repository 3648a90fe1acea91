//! On-disk layout for prerequisite sources, builds, and installs.
//!
//! `PrereqLayout` names every directory the build orchestration touches: the
//! external build root where sources are retrieved, out-of-tree build
//! directories, the shared prerequisite install root, and the per-component
//! retrieval marker files written by `RetrievalMarker`.

pub mod layout;
pub mod marker;

pub use layout::{ensure_dir, recreate_dir, PrereqLayout, DEFAULT_TARGET_TYPE};
pub use marker::RetrievalMarker;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("refusing to remove '{0}': outside the build root")]
    OutsideRoot(String),
}
