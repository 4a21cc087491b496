//! Coordination store trait
//!
//! The `CoordinationStore` trait abstracts the hierarchical, watchable store
//! shared across service instances. It holds provisioned tenant
//! configuration and the registrations of live service hosts.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::{NodePath, Result};

/// Type alias for child-set change streams
pub type ChildrenChangeStream<'a> = BoxStream<'a, Result<ChildrenChange>>;

/// Notification that the set of children under a watched node changed
#[derive(Debug, Clone)]
pub struct ChildrenChange {
    /// Watched node
    pub path: NodePath,

    /// Child names after the change, sorted
    pub children: Vec<String>,

    /// Timestamp of the change
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Coordination store trait
///
/// Implementations:
/// - `MemoryCoordinationStore`: in-process store for tests and dry runs
///
/// # Example
/// ```no_run
/// # use tenantmesh_core::{CoordinationStore, NodePath};
/// # async fn example(store: &dyn CoordinationStore) -> tenantmesh_core::Result<()> {
/// let path = NodePath::parse("/tenantmesh/tenants/acme/config.json")?;
/// store.write_node(&path, b"{}".to_vec().into()).await?;
/// let hosts = store.list_children(&NodePath::parse("/tenantmesh/services/tenant-management")?).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create or overwrite a node's data, creating missing parents
    async fn write_node(&self, path: &NodePath, data: Bytes) -> Result<()>;

    /// Create a node (and missing parents) with no data if it does not exist.
    ///
    /// Existing nodes keep their data.
    async fn ensure_node(&self, path: &NodePath) -> Result<()>;

    /// Read a node's data, `Ok(None)` if the node does not exist
    async fn read_node(&self, path: &NodePath) -> Result<Option<Bytes>>;

    /// Names of the immediate children of a node, sorted.
    ///
    /// Returns an empty list for a node that does not exist.
    async fn list_children(&self, path: &NodePath) -> Result<Vec<String>>;

    /// Watch the child set of a node
    ///
    /// The stream emits whenever a direct child is created or deleted. The
    /// node itself does not need to exist yet.
    async fn watch_children(&self, path: &NodePath) -> Result<ChildrenChangeStream<'static>>;

    /// Delete a node and everything beneath it
    async fn delete_node(&self, path: &NodePath) -> Result<()>;
}
