//! Remote curation workspace client.
//!
//! The workspace service is external, eventually consistent, and never
//! rolled back; this module only defines the client seam and the wire
//! types. `LocalWorkspace` is a file-backed implementation of the same
//! contract for tests and offline runs, storing one JSON document per
//! workspace.

use crate::core::engine::MetricTable;
use crate::core::error::SortpipeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// Curation state fetched from a workspace: per-unit label sets and ordered
/// merge groups (first member of each group is the primary).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SortingCuration {
    #[serde(rename = "labelsByUnit")]
    pub labels_by_unit: BTreeMap<i64, Vec<String>>,
    #[serde(rename = "mergeGroups")]
    pub merge_groups: Vec<Vec<i64>>,
}

pub trait WorkspaceClient {
    /// Create a new workspace and return its uri.
    fn create_workspace(&self, label: &str) -> Result<String, SortpipeError>;

    /// Register a recording artifact; returns the workspace-side handle.
    fn add_recording(
        &self,
        uri: &str,
        label: &str,
        recording_path: &Path,
    ) -> Result<String, SortpipeError>;

    /// Register a sorting artifact against a recording handle.
    fn add_sorting(
        &self,
        uri: &str,
        recording_handle: &str,
        label: &str,
        sorting_path: &Path,
    ) -> Result<String, SortpipeError>;

    fn get_sorting_curation(
        &self,
        uri: &str,
        sorting_handle: &str,
    ) -> Result<SortingCuration, SortpipeError>;

    fn set_unit_metrics(
        &self,
        uri: &str,
        sorting_handle: &str,
        metrics: &MetricTable,
    ) -> Result<(), SortpipeError>;

    fn set_user_permissions(
        &self,
        uri: &str,
        user: &str,
        edit: bool,
    ) -> Result<(), SortpipeError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct WorkspaceDoc {
    label: String,
    recordings: BTreeMap<String, RegisteredArtifact>,
    sortings: BTreeMap<String, RegisteredArtifact>,
    curation: SortingCuration,
    unit_metrics: MetricTable,
    permissions: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RegisteredArtifact {
    label: String,
    path: String,
    recording_handle: Option<String>,
}

/// File-backed workspace store rooted at a local directory. Uris look like
/// `local://<id>`; the backing document lives at `<root>/<id>.json`.
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: &Path) -> Result<Self, SortpipeError> {
        fs::create_dir_all(root).map_err(SortpipeError::IoError)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn doc_path(&self, uri: &str) -> Result<PathBuf, SortpipeError> {
        let id = uri.strip_prefix("local://").ok_or_else(|| {
            SortpipeError::ValidationError(format!("not a local workspace uri: {uri}"))
        })?;
        Ok(self.root.join(format!("{id}.json")))
    }

    fn read_doc(&self, uri: &str) -> Result<WorkspaceDoc, SortpipeError> {
        let path = self.doc_path(uri)?;
        if !path.exists() {
            return Err(SortpipeError::NotFound(format!(
                "workspace {uri} not found at {}",
                path.display()
            )));
        }
        let raw = fs::read_to_string(&path).map_err(SortpipeError::IoError)?;
        serde_json::from_str(&raw).map_err(SortpipeError::SerdeError)
    }

    fn write_doc(&self, uri: &str, doc: &WorkspaceDoc) -> Result<(), SortpipeError> {
        let path = self.doc_path(uri)?;
        let raw = serde_json::to_vec_pretty(doc)?;
        fs::write(&path, raw).map_err(SortpipeError::IoError)
    }

    /// Record human curation edits. Stands in for the remote UI in tests
    /// and offline runs.
    pub fn set_sorting_curation(
        &self,
        uri: &str,
        curation: &SortingCuration,
    ) -> Result<(), SortpipeError> {
        let mut doc = self.read_doc(uri)?;
        doc.curation = curation.clone();
        self.write_doc(uri, &doc)
    }

    pub fn user_can_edit(&self, uri: &str, user: &str) -> Result<bool, SortpipeError> {
        let doc = self.read_doc(uri)?;
        Ok(doc.permissions.get(user).copied().unwrap_or(false))
    }
}

impl WorkspaceClient for LocalWorkspace {
    fn create_workspace(&self, label: &str) -> Result<String, SortpipeError> {
        let uri = format!("local://{}", Ulid::new());
        let doc = WorkspaceDoc {
            label: label.to_string(),
            ..Default::default()
        };
        self.write_doc(&uri, &doc)?;
        Ok(uri)
    }

    fn add_recording(
        &self,
        uri: &str,
        label: &str,
        recording_path: &Path,
    ) -> Result<String, SortpipeError> {
        let mut doc = self.read_doc(uri)?;
        let handle = format!("R-{}", Ulid::new());
        doc.recordings.insert(
            handle.clone(),
            RegisteredArtifact {
                label: label.to_string(),
                path: recording_path.to_string_lossy().to_string(),
                recording_handle: None,
            },
        );
        self.write_doc(uri, &doc)?;
        Ok(handle)
    }

    fn add_sorting(
        &self,
        uri: &str,
        recording_handle: &str,
        label: &str,
        sorting_path: &Path,
    ) -> Result<String, SortpipeError> {
        let mut doc = self.read_doc(uri)?;
        if !doc.recordings.contains_key(recording_handle) {
            return Err(SortpipeError::NotFound(format!(
                "recording handle {recording_handle} not in workspace {uri}"
            )));
        }
        let handle = format!("S-{}", Ulid::new());
        doc.sortings.insert(
            handle.clone(),
            RegisteredArtifact {
                label: label.to_string(),
                path: sorting_path.to_string_lossy().to_string(),
                recording_handle: Some(recording_handle.to_string()),
            },
        );
        self.write_doc(uri, &doc)?;
        Ok(handle)
    }

    fn get_sorting_curation(
        &self,
        uri: &str,
        sorting_handle: &str,
    ) -> Result<SortingCuration, SortpipeError> {
        let doc = self.read_doc(uri)?;
        if !doc.sortings.contains_key(sorting_handle) {
            return Err(SortpipeError::NotFound(format!(
                "sorting handle {sorting_handle} not in workspace {uri}"
            )));
        }
        Ok(doc.curation)
    }

    fn set_unit_metrics(
        &self,
        uri: &str,
        sorting_handle: &str,
        metrics: &MetricTable,
    ) -> Result<(), SortpipeError> {
        let mut doc = self.read_doc(uri)?;
        if !doc.sortings.contains_key(sorting_handle) {
            return Err(SortpipeError::NotFound(format!(
                "sorting handle {sorting_handle} not in workspace {uri}"
            )));
        }
        doc.unit_metrics = metrics.clone();
        self.write_doc(uri, &doc)
    }

    fn set_user_permissions(
        &self,
        uri: &str,
        user: &str,
        edit: bool,
    ) -> Result<(), SortpipeError> {
        let mut doc = self.read_doc(uri)?;
        doc.permissions.insert(user.to_string(), edit);
        self.write_doc(uri, &doc)
    }
}
