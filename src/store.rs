use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::{GroupKey, ItemId};
use crate::error::HarvestError;

pub const ARTIFACT_EXTENSION: &str = "tsv";

/// Output tree laid out as `<root>/<group>/<id>.tsv`. An artifact file only
/// ever appears under its final name once fully written.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: Utf8PathBuf,
}

impl DirectoryStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn group_dir(&self, group: &GroupKey) -> Utf8PathBuf {
        self.root.join(group.as_str())
    }

    pub fn artifact_path(&self, group: &GroupKey, id: &ItemId) -> Utf8PathBuf {
        self.group_dir(group)
            .join(format!("{id}.{ARTIFACT_EXTENSION}"))
    }

    pub fn exists(&self, group: &GroupKey, id: &ItemId) -> bool {
        self.artifact_path(group, id).as_std_path().is_file()
    }

    pub fn ensure_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("create {}: {err}", self.root)))
    }

    pub fn ensure_group_dir(&self, group: &GroupKey) -> Result<Utf8PathBuf, HarvestError> {
        let dir = self.group_dir(group);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(dir)
    }

    /// Writes through a hidden temp file in the group directory and renames
    /// it into place.
    pub fn write(
        &self,
        group: &GroupKey,
        id: &ItemId,
        content: &[u8],
    ) -> Result<Utf8PathBuf, HarvestError> {
        let dir = self.ensure_group_dir(group)?;
        let path = self.artifact_path(group, id);
        let mut temp = Builder::new()
            .prefix(&format!(".{id}."))
            .suffix(".tmp")
            .tempfile_in(dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|err| HarvestError::Filesystem(format!("write {path}: {err}")))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("persist {path}: {}", err.error)))?;
        Ok(path)
    }
}
