//! Store configuration loaded from `sortpipe.toml` at the store root.
//!
//! The only tunable today is the artifact storage root; it may also be
//! overridden with the `SORTPIPE_STORAGE_DIR` environment variable, which
//! takes precedence over the file.

use crate::core::error;
use crate::core::store::Store;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "sortpipe.toml";
pub const STORAGE_DIR_ENV: &str = "SORTPIPE_STORAGE_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Artifact storage root; relative paths resolve against the store root.
    pub storage_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(root: &Path) -> Result<Self, error::SortpipeError> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path).map_err(error::SortpipeError::IoError)?;
        toml::from_str(&raw).map_err(|e| {
            error::SortpipeError::ValidationError(format!(
                "invalid config {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn write(&self, root: &Path) -> Result<PathBuf, error::SortpipeError> {
        fs::create_dir_all(root).map_err(error::SortpipeError::IoError)?;
        let path = root.join(CONFIG_FILE_NAME);
        let raw = toml::to_string_pretty(self).map_err(|e| {
            error::SortpipeError::ValidationError(format!("failed to serialize config: {e}"))
        })?;
        fs::write(&path, raw).map_err(error::SortpipeError::IoError)?;
        Ok(path)
    }
}

/// Open a store at `root`, resolving the storage root from (in order of
/// precedence) the environment, the config file, then the default layout.
pub fn open_store(root: &Path) -> Result<Store, error::SortpipeError> {
    if let Ok(env_dir) = std::env::var(STORAGE_DIR_ENV) {
        return Ok(Store::with_storage_root(root, Path::new(&env_dir)));
    }
    let config = Config::load(root)?;
    match config.storage_dir {
        Some(dir) => {
            let resolved = if dir.is_absolute() {
                dir
            } else {
                root.join(dir)
            };
            Ok(Store::with_storage_root(root, &resolved))
        }
        None => Ok(Store::new(root)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_storage_dir_resolves_against_the_root() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let config = Config {
            storage_dir: Some(PathBuf::from("blobs")),
        };
        let path = config.write(tmp.path()).expect("write");
        assert_eq!(path, tmp.path().join(CONFIG_FILE_NAME));

        let store = open_store(tmp.path()).expect("open");
        assert_eq!(store.storage_root, tmp.path().join("blobs"));
    }

    #[test]
    fn missing_config_falls_back_to_the_default_layout() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let loaded = Config::load(tmp.path()).expect("load");
        assert!(loaded.storage_dir.is_none());
    }
}
