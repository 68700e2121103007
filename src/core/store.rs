//! Store handle for sortpipe state.
//!
//! A `Store` bundles the locations every stage needs: the pipeline database,
//! the artifact storage root where per-run directories live, and the audit
//! event log. Stage functions take the handle as an explicit argument; there
//! is no process-global connection.

use std::path::{Path, PathBuf};

pub const PIPELINE_DB_NAME: &str = "pipeline.db";
pub const EVENTS_LOG_NAME: &str = "stage.events.jsonl";
pub const STORAGE_DIR_NAME: &str = "storage";

/// Handle to a sortpipe state workspace.
///
/// All tables live in a single SQLite database under `root`; all file-backed
/// artifacts (cached recordings, sorting outputs) live in per-run directories
/// under the storage root.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory.
    pub root: PathBuf,
    /// Artifact storage root; defaults to `<root>/storage`.
    pub storage_root: PathBuf,
}

impl Store {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            storage_root: root.join(STORAGE_DIR_NAME),
        }
    }

    pub fn with_storage_root(root: &Path, storage_root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            storage_root: storage_root.to_path_buf(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(PIPELINE_DB_NAME)
    }

    pub fn events_log_path(&self) -> PathBuf {
        self.root.join(EVENTS_LOG_NAME)
    }
}
