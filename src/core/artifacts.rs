//! Artifact store: per-run directories under the storage root.
//!
//! Every pipeline run that produces a file-backed artifact (a cached
//! recording or a sorting output) gets one directory under the storage
//! root, named by its run identifier. The database is the authority on
//! which run ids are live; `reconcile` restores the invariant that on-disk
//! directories are a subset of live run ids after partial failures or
//! abandoned runs.

use crate::core::broker::DbBroker;
use crate::core::error::SortpipeError;
use crate::core::store::Store;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub fn run_dir(store: &Store, run_id: &str) -> PathBuf {
    store.storage_root.join(run_id)
}

pub fn create_run_dir(store: &Store, run_id: &str) -> Result<PathBuf, SortpipeError> {
    let dir = run_dir(store, run_id);
    fs::create_dir_all(&dir).map_err(SortpipeError::IoError)?;
    Ok(dir)
}

/// Names of the run directories currently on disk.
pub fn list_run_dirs(storage_root: &Path) -> Result<Vec<String>, SortpipeError> {
    let mut names = Vec::new();
    if !storage_root.exists() {
        return Ok(names);
    }
    for entry in fs::read_dir(storage_root).map_err(SortpipeError::IoError)? {
        let entry = entry.map_err(SortpipeError::IoError)?;
        if entry.file_type().map_err(SortpipeError::IoError)?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Delete every run directory whose name is not in `live_run_ids`. Returns
/// the removed paths. Destructive and irreversible.
pub fn reconcile(
    storage_root: &Path,
    live_run_ids: &FxHashSet<String>,
) -> Result<Vec<PathBuf>, SortpipeError> {
    let mut removed = Vec::new();
    for name in list_run_dirs(storage_root)? {
        if !live_run_ids.contains(&name) {
            let path = storage_root.join(&name);
            fs::remove_dir_all(&path).map_err(SortpipeError::IoError)?;
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Run ids the database still references: recording cache directories plus
/// sorting output directories.
pub fn live_run_ids(store: &Store) -> Result<FxHashSet<String>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "artifacts.live", |conn| {
        let mut live = FxHashSet::default();
        // Stored paths point at files inside their run directory; the run id
        // is the directory name.
        let mut stmt = conn.prepare("SELECT recording_path FROM recordings")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for path in rows {
            if let Some(name) = Path::new(&path?).parent().and_then(Path::file_name) {
                live.insert(name.to_string_lossy().to_string());
            }
        }
        let mut stmt = conn.prepare("SELECT sorting_path FROM sortings")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for path in rows {
            if let Some(name) = Path::new(&path?).parent().and_then(Path::file_name) {
                live.insert(name.to_string_lossy().to_string());
            }
        }
        Ok(live)
    })
}

/// Automated cleanup: delete orphan run directories without asking. Run
/// after the table store's own retention pass so "live" reflects current
/// truth.
pub fn nightly_cleanup(store: &Store) -> Result<Vec<PathBuf>, SortpipeError> {
    let live = live_run_ids(store)?;
    let removed = reconcile(&store.storage_root, &live)?;
    for path in &removed {
        println!("removed {}", path.display());
    }
    Ok(removed)
}

/// Interactive cleanup: list the orphans, then ask `confirm` before
/// deleting anything. `confirm` receives the orphan names.
pub fn interactive_cleanup<F>(store: &Store, confirm: F) -> Result<Vec<PathBuf>, SortpipeError>
where
    F: FnOnce(&[String]) -> bool,
{
    let live = live_run_ids(store)?;
    let orphans: Vec<String> = list_run_dirs(&store.storage_root)?
        .into_iter()
        .filter(|name| !live.contains(name))
        .collect();
    if orphans.is_empty() {
        println!("No orphaned run directories found");
        return Ok(Vec::new());
    }
    if !confirm(&orphans) {
        println!("No files deleted");
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    for name in orphans {
        let path = store.storage_root.join(&name);
        fs::remove_dir_all(&path).map_err(SortpipeError::IoError)?;
        removed.push(path);
    }
    Ok(removed)
}
