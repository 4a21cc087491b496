//! Read-only access to the local template root
//!
//! The `TemplateStore` trait is the I/O seam between the template catalog /
//! provisioner and the local storage holding template folders. Calls are
//! blocking; async callers should run them on a blocking-capable thread.

use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::Result;
use crate::template::TEMPLATE_MANIFEST_FILE;

/// Handle to one immediate subfolder of the template root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFolder {
    /// Folder name (the template id for regular templates)
    pub name: String,
    /// Location of the folder, used in diagnostics
    pub location: PathBuf,
}

impl TemplateFolder {
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }
}

/// One file or subfolder inside a template folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
    /// Slash-separated path relative to the template folder
    pub relative_path: String,
    /// File content; `None` for folders
    pub content: Option<Bytes>,
}

impl TemplateEntry {
    pub fn folder(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: None,
        }
    }

    pub fn file(relative_path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: Some(content.into()),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.content.is_none()
    }
}

/// Template storage trait
///
/// Implementations:
/// - `FileTemplateStore`: template folders on the local filesystem
pub trait TemplateStore: Send + Sync {
    /// Root the folders live under, used in diagnostics
    fn root(&self) -> &Path;

    /// List the immediate subfolders of the template root
    fn list_template_folders(&self) -> Result<Vec<TemplateFolder>>;

    /// Open a folder by name, `Ok(None)` if it does not exist
    fn open_folder(&self, name: &str) -> Result<Option<TemplateFolder>>;

    /// Where the folder's manifest lives, used in diagnostics
    fn manifest_path(&self, folder: &TemplateFolder) -> PathBuf {
        folder.location.join(TEMPLATE_MANIFEST_FILE)
    }

    /// Read the folder's manifest, `Ok(None)` if it has none
    fn read_manifest(&self, folder: &TemplateFolder) -> Result<Option<Bytes>>;

    /// Every file and subfolder beneath `folder`, parents before children
    fn list_entries_recursive(&self, folder: &TemplateFolder) -> Result<Vec<TemplateEntry>>;
}
