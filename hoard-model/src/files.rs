use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::chrono::{DateTime, Utc};
use crate::error::{ModelError, Result};

/// One member of a [`FileGroup`]. `path` is the bare file name; the group's
/// `directory` supplies the parent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileGroupFile {
    pub path: String,
    pub mimetype: String,
}

impl FileGroupFile {
    pub fn new(path: impl Into<String>, mimetype: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mimetype: mimetype.into(),
        }
    }
}

/// The catalog's unit of work: every file in one directory sharing a stem.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileGroup {
    pub id: i64,
    pub primary_path: PathBuf,
    pub directory: PathBuf,
    pub files: Vec<FileGroupFile>,
    pub mimetype: Option<String>,
    pub model: Option<String>,
    pub size: i64,
    pub modification_datetime: Option<DateTime<Utc>>,
    pub indexed: bool,
    pub deep_indexed: bool,
    pub idempotency: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
}

impl FileGroup {
    /// File names currently recorded for this group.
    pub fn file_names(&self) -> BTreeSet<String> {
        self.files.iter().map(|file| file.path.clone()).collect()
    }

    /// Absolute paths of every recorded member.
    pub fn member_paths(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .map(|file| self.directory.join(&file.path))
            .collect()
    }

    /// File name of the primary file.
    pub fn primary_name(&self) -> Option<&str> {
        self.primary_path.file_name().and_then(|name| name.to_str())
    }
}

impl fmt::Debug for FileGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileGroup")
            .field("id", &self.id)
            .field("primary_path", &self.primary_path)
            .field("files", &self.files.len())
            .field("mimetype", &self.mimetype)
            .field("model", &self.model)
            .field("indexed", &self.indexed)
            .finish()
    }
}

/// A known directory under the media root.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Directory {
    pub path: PathBuf,
    pub name: String,
}

impl Directory {
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ModelError::InvalidPath(path.display().to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            name: name.to_string(),
        })
    }
}
