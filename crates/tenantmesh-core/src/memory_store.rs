//! In-memory CoordinationStore implementation
//!
//! Nodes are kept in a path-sorted map. Child-set changes are fanned out to
//! watchers through a broadcast channel carrying the parent path that
//! changed; each watch stream re-lists its node when notified.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    ChildrenChange, ChildrenChangeStream, CoordinationStore, NodePath, Result,
};

/// Capacity of the change notification channel
const EVENT_CAPACITY: usize = 256;

#[derive(Debug)]
struct Inner {
    nodes: RwLock<BTreeMap<NodePath, Bytes>>,
    events: broadcast::Sender<NodePath>,
    writes: AtomicU64,
}

impl Inner {
    fn children_of(&self, path: &NodePath) -> Vec<String> {
        let nodes = self
            .nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut children: Vec<String> = nodes
            .keys()
            .filter(|candidate| candidate.parent().as_ref() == Some(path))
            .filter_map(|candidate| candidate.name().map(str::to_string))
            .collect();
        children.sort();
        children
    }

    fn notify(&self, changed_parents: Vec<NodePath>) {
        for parent in changed_parents {
            // No receivers is fine
            let _ = self.events.send(parent);
        }
    }
}

/// Coordination store held entirely in process memory
///
/// Cloning is cheap and clones share the same nodes.
#[derive(Debug, Clone)]
pub struct MemoryCoordinationStore {
    inner: Arc<Inner>,
}

impl Default for MemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                nodes: RwLock::new(BTreeMap::new()),
                events,
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Number of mutating operations performed so far
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Acquire)
    }

    /// All nodes at or beneath `prefix`, in path order
    pub fn dump(&self, prefix: &NodePath) -> Vec<(NodePath, Bytes)> {
        let nodes = self
            .inner
            .nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        nodes
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, data)| (path.clone(), data.clone()))
            .collect()
    }

    /// Insert missing ancestors of `path` (inclusive), returning the parents
    /// whose child set changed.
    fn create_missing(nodes: &mut BTreeMap<NodePath, Bytes>, path: &NodePath) -> Vec<NodePath> {
        let mut changed = Vec::new();
        for node in path.ancestors_inclusive() {
            if !nodes.contains_key(&node) {
                if let Some(parent) = node.parent() {
                    changed.push(parent);
                }
                nodes.insert(node, Bytes::new());
            }
        }
        changed
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn write_node(&self, path: &NodePath, data: Bytes) -> Result<()> {
        let changed = {
            let mut nodes = self
                .inner
                .nodes
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let changed = Self::create_missing(&mut nodes, path);
            nodes.insert(path.clone(), data);
            changed
        };
        self.inner.writes.fetch_add(1, Ordering::AcqRel);
        debug!("Wrote node {}", path);
        self.inner.notify(changed);
        Ok(())
    }

    async fn ensure_node(&self, path: &NodePath) -> Result<()> {
        let changed = {
            let mut nodes = self
                .inner
                .nodes
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Self::create_missing(&mut nodes, path)
        };
        if !changed.is_empty() {
            self.inner.writes.fetch_add(1, Ordering::AcqRel);
            debug!("Created node {}", path);
        }
        self.inner.notify(changed);
        Ok(())
    }

    async fn read_node(&self, path: &NodePath) -> Result<Option<Bytes>> {
        let nodes = self
            .inner
            .nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(nodes.get(path).cloned())
    }

    async fn list_children(&self, path: &NodePath) -> Result<Vec<String>> {
        Ok(self.inner.children_of(path))
    }

    async fn watch_children(&self, path: &NodePath) -> Result<ChildrenChangeStream<'static>> {
        let rx = self.inner.events.subscribe();
        let inner = self.inner.clone();
        let watched = path.clone();

        let stream = stream::unfold((rx, inner, watched), |(mut rx, inner, watched)| async move {
            loop {
                match rx.recv().await {
                    Ok(changed) if changed == watched => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Re-list so the consumer resynchronizes
                        warn!("Watch on {} lagged by {} events", watched, skipped);
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
            let change = ChildrenChange {
                path: watched.clone(),
                children: inner.children_of(&watched),
                timestamp: chrono::Utc::now(),
            };
            Some((Ok(change), (rx, inner, watched)))
        });

        Ok(Box::pin(stream))
    }

    async fn delete_node(&self, path: &NodePath) -> Result<()> {
        let removed = {
            let mut nodes = self
                .inner
                .nodes
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let doomed: Vec<NodePath> = nodes
                .keys()
                .filter(|candidate| candidate.starts_with(path))
                .cloned()
                .collect();
            for node in &doomed {
                nodes.remove(node);
            }
            !doomed.is_empty()
        };
        if removed {
            self.inner.writes.fetch_add(1, Ordering::AcqRel);
            debug!("Deleted node {}", path);
            if let Some(parent) = path.parent() {
                self.inner.notify(vec![parent]);
            }
        }
        Ok(())
    }
}
