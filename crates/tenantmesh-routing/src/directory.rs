//! Service Directory
//!
//! Reports which hosts are running a given service. Hosts register as
//! children of `<registration_root>/<target>` in the coordination store;
//! the directory turns child-set changes into added/removed host events.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use tenantmesh_core::{ChildrenChangeStream, CoordinationStore, NodePath, Result};

/// Type alias for host change streams
pub type HostChangeStream = BoxStream<'static, Result<HostChange>>;

/// A change in the set of hosts registered for a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostChange {
    Added(String),
    Removed(String),
}

impl HostChange {
    pub fn host(&self) -> &str {
        match self {
            HostChange::Added(host) | HostChange::Removed(host) => host,
        }
    }
}

/// Directory of live service hosts
#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    /// Hosts currently registered for `target`, sorted
    async fn hosts(&self, target: &str) -> Result<Vec<String>>;

    /// Watch the hosts registered for `target`
    ///
    /// The stream reports changes relative to the host set at the time of
    /// the call.
    async fn watch(&self, target: &str) -> Result<HostChangeStream>;
}

/// Service directory reading registrations from the coordination store
pub struct StoreServiceDirectory {
    store: Arc<dyn CoordinationStore>,
    registration_root: NodePath,
}

impl StoreServiceDirectory {
    pub fn new(store: Arc<dyn CoordinationStore>, registration_root: NodePath) -> Self {
        Self {
            store,
            registration_root,
        }
    }

    pub fn registration_root(&self) -> &NodePath {
        &self.registration_root
    }

    /// Node whose children are the hosts of `target`
    pub fn target_path(&self, target: &str) -> Result<NodePath> {
        self.registration_root.join(target)
    }

    /// Register `host` as running `target`
    pub async fn register_host(&self, target: &str, host: &str) -> Result<()> {
        let path = self.target_path(target)?.join(host)?;
        self.store.ensure_node(&path).await?;
        info!("Registered host '{}' for '{}'", host, target);
        Ok(())
    }

    /// Remove the registration of `host` for `target`
    pub async fn deregister_host(&self, target: &str, host: &str) -> Result<()> {
        let path = self.target_path(target)?.join(host)?;
        self.store.delete_node(&path).await?;
        info!("Deregistered host '{}' for '{}'", host, target);
        Ok(())
    }
}

struct DiffState {
    changes: ChildrenChangeStream<'static>,
    known: BTreeSet<String>,
    pending: VecDeque<HostChange>,
}

/// Turn child-set snapshots into added/removed events relative to `known`
fn diff_hosts(changes: ChildrenChangeStream<'static>, known: BTreeSet<String>) -> HostChangeStream {
    let state = DiffState {
        changes,
        known,
        pending: VecDeque::new(),
    };

    let stream = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(change) = state.pending.pop_front() {
                return Some((Ok(change), state));
            }
            match state.changes.next().await? {
                Ok(change) => {
                    let current: BTreeSet<String> = change.children.into_iter().collect();
                    for removed in state.known.difference(&current) {
                        state.pending.push_back(HostChange::Removed(removed.clone()));
                    }
                    for added in current.difference(&state.known) {
                        state.pending.push_back(HostChange::Added(added.clone()));
                    }
                    state.known = current;
                }
                Err(e) => return Some((Err(e), state)),
            }
        }
    });

    Box::pin(stream)
}

#[async_trait]
impl ServiceDirectory for StoreServiceDirectory {
    async fn hosts(&self, target: &str) -> Result<Vec<String>> {
        self.store.list_children(&self.target_path(target)?).await
    }

    async fn watch(&self, target: &str) -> Result<HostChangeStream> {
        let path = self.target_path(target)?;
        // Subscribe before listing so no change falls between the two
        let changes = self.store.watch_children(&path).await?;
        let known: BTreeSet<String> = self.store.list_children(&path).await?.into_iter().collect();
        debug!("Watching {} with {} known hosts", path, known.len());
        Ok(diff_hosts(changes, known))
    }
}
