//! Shared fixtures for TenantMesh integration tests
//!
//! The tests under `tests/` wire the template, provisioning and routing
//! crates together against a temporary template root and an in-memory
//! coordination store.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use tenantmesh_core::{MemoryCoordinationStore, TemplateStore};
use tenantmesh_templates::{FileTemplateStore, TemplateCatalog, TemplateProvisioner};

/// Builder for a template root on disk
pub struct TemplateRoot {
    dir: TempDir,
}

impl TemplateRoot {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file below the root, creating parent folders
    pub fn file(self, relative: &str, content: &str) -> std::io::Result<Self> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(self)
    }

    /// Create an empty folder below the root
    pub fn folder(self, relative: &str) -> std::io::Result<Self> {
        fs::create_dir_all(self.dir.path().join(relative))?;
        Ok(self)
    }

    /// Add a template folder with its manifest
    pub fn template(self, folder: &str, id: &str, name: &str) -> std::io::Result<Self> {
        let manifest = serde_json::json!({ "id": id, "name": name }).to_string();
        self.file(&format!("{}/template.json", folder), &manifest)
    }
}

/// Catalog, provisioner and store over one template root
pub struct ProvisioningFixture {
    pub root: TemplateRoot,
    pub catalog: Arc<TemplateCatalog>,
    pub provisioner: TemplateProvisioner,
    pub store: Arc<MemoryCoordinationStore>,
}

impl ProvisioningFixture {
    /// Open `root`, scan it once and wire a provisioner to a fresh store
    pub fn new(root: TemplateRoot) -> tenantmesh_core::Result<Self> {
        let templates: Arc<dyn TemplateStore> = Arc::new(FileTemplateStore::new(root.path())?);
        let catalog = Arc::new(TemplateCatalog::new(templates.clone()));
        catalog.scan();

        let store = Arc::new(MemoryCoordinationStore::new());
        let provisioner = TemplateProvisioner::new(catalog.clone(), templates, store.clone());

        Ok(Self {
            root,
            catalog,
            provisioner,
            store,
        })
    }
}
