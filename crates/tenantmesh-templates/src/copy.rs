//! Recursive copy of template content into the coordination store

use serde::Serialize;
use tracing::trace;

use tenantmesh_core::{CoordinationStore, NodePath, Result, TemplateEntry};

/// Nodes touched by one copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyStats {
    pub folders: usize,
    pub files: usize,
}

impl CopyStats {
    pub fn total(&self) -> usize {
        self.folders + self.files
    }
}

/// Copy `entries` beneath `destination`, preserving relative paths.
///
/// Folders become data-less nodes (existing nodes keep their data); files
/// overwrite whatever node shares their path. Entries are applied in order,
/// so a later entry for the same path wins. The destination node is created
/// if it does not exist.
pub async fn copy_tree(
    entries: &[TemplateEntry],
    destination: &NodePath,
    store: &dyn CoordinationStore,
) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    store.ensure_node(destination).await?;

    for entry in entries {
        let node = destination.join(&entry.relative_path)?;
        match &entry.content {
            None => {
                store.ensure_node(&node).await?;
                stats.folders += 1;
            }
            Some(content) => {
                store.write_node(&node, content.clone()).await?;
                stats.files += 1;
            }
        }
        trace!("Copied '{}' to {}", entry.relative_path, node);
    }

    Ok(stats)
}
