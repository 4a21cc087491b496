//! Tenant template catalog and provisioning
//!
//! This crate loads tenant templates from a local template root and copies
//! their content into tenant subtrees of the coordination store.
//!
//! # Features
//! - File-based template storage with root watching via `notify`
//! - Atomically swapped catalog snapshots, safe to rescan at any time
//! - Default-then-template overlay provisioning
//!
//! # Example
//! ```no_run
//! # use std::sync::Arc;
//! # use tenantmesh_core::{MemoryCoordinationStore, NodePath};
//! # use tenantmesh_templates::{FileTemplateStore, TemplateCatalog, TemplateProvisioner};
//! # async fn example() -> tenantmesh_core::Result<()> {
//! let templates = Arc::new(FileTemplateStore::new("/srv/tenantmesh/templates")?);
//! let catalog = Arc::new(TemplateCatalog::new(templates.clone()));
//! catalog.scan();
//!
//! let store = Arc::new(MemoryCoordinationStore::new());
//! let provisioner = TemplateProvisioner::new(catalog, templates, store);
//! provisioner
//!     .provision("iot", &NodePath::parse("/tenantmesh/tenants/acme")?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod catalog;
mod copy;
mod file_store;
mod provisioner;

pub use catalog::{CatalogSnapshot, ScanSummary, TemplateCatalog};
pub use copy::{CopyStats, copy_tree};
pub use file_store::{FileTemplateStore, RootChange, RootChangeStream};
pub use provisioner::{ProvisionReport, TemplateProvisioner};
