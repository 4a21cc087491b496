//! Tenant provisioning from templates
//!
//! Provisioning copies the shared `default` content into the tenant's
//! subtree, then copies the selected template's content over it. Template
//! files win over default files with the same relative path.
//!
//! Provisioning is not transactional. A failure in the template phase
//! leaves the default content in place; callers retry with the same
//! arguments, which converges because every copy overwrites.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use tenantmesh_core::{
    CoordinationStore, DEFAULT_CONTENT_FOLDER, Error, NodePath, Result, TemplateEntry,
    TemplateFolder, TemplateStore,
};

use crate::catalog::TemplateCatalog;
use crate::copy::{CopyStats, copy_tree};

/// Result of a successful provisioning run
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub template_id: String,
    pub tenant_path: NodePath,
    /// Nodes copied from the default content
    pub default_content: CopyStats,
    /// Nodes copied from the template content
    pub template_content: CopyStats,
}

/// Copies template content into tenant subtrees of the coordination store
pub struct TemplateProvisioner {
    catalog: Arc<TemplateCatalog>,
    templates: Arc<dyn TemplateStore>,
    store: Arc<dyn CoordinationStore>,
    default_folder: String,
}

impl TemplateProvisioner {
    pub fn new(
        catalog: Arc<TemplateCatalog>,
        templates: Arc<dyn TemplateStore>,
        store: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            catalog,
            templates,
            store,
            default_folder: DEFAULT_CONTENT_FOLDER.to_string(),
        }
    }

    /// Use a different folder for the content shared by all tenants
    pub fn with_default_folder(mut self, default_folder: impl Into<String>) -> Self {
        self.default_folder = default_folder.into();
        self
    }

    pub fn catalog(&self) -> &Arc<TemplateCatalog> {
        &self.catalog
    }

    /// Provision `tenant_path` from the template `template_id`.
    ///
    /// # Errors
    /// - `Error::TemplateNotFound` if the catalog has no such template
    /// - `Error::DefaultContentMissing` if the default folder is absent
    /// - `Error::TemplateContentMissing` if the template's folder is absent
    ///
    /// None of these write anything for the failing phase. Store errors
    /// propagate as-is, possibly after part of a phase was written.
    #[instrument(skip(self, tenant_path), fields(tenant_path = %tenant_path))]
    pub async fn provision(
        &self,
        template_id: &str,
        tenant_path: &NodePath,
    ) -> Result<ProvisionReport> {
        let template = self
            .catalog
            .lookup(template_id)
            .ok_or_else(|| Error::TemplateNotFound(template_id.to_string()))?;

        // Copy default content shared by all tenants.
        let default_folder = self
            .open(&self.default_folder)
            .await?
            .ok_or_else(|| {
                Error::DefaultContentMissing(self.templates.root().join(&self.default_folder))
            })?;
        let default_entries = self.entries(default_folder).await?;
        let default_content = copy_tree(&default_entries, tenant_path, self.store.as_ref()).await?;

        // Copy template contents on top of default.
        let template_folder = self.open(template_id).await?.ok_or_else(|| {
            Error::TemplateContentMissing(self.templates.root().join(template_id))
        })?;
        let template_entries = self.entries(template_folder).await?;
        let template_content =
            copy_tree(&template_entries, tenant_path, self.store.as_ref()).await?;

        info!(
            "Provisioned {} from template '{}' ({} default nodes, {} template nodes)",
            tenant_path,
            template.name,
            default_content.total(),
            template_content.total()
        );

        Ok(ProvisionReport {
            template_id: template.id.clone(),
            tenant_path: tenant_path.clone(),
            default_content,
            template_content,
        })
    }

    async fn open(&self, name: &str) -> Result<Option<TemplateFolder>> {
        let templates = self.templates.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || templates.open_folder(&name))
            .await
            .map_err(|e| Error::Internal(format!("Template folder lookup failed: {}", e)))?
    }

    async fn entries(&self, folder: TemplateFolder) -> Result<Vec<TemplateEntry>> {
        let templates = self.templates.clone();
        tokio::task::spawn_blocking(move || templates.list_entries_recursive(&folder))
            .await
            .map_err(|e| Error::Internal(format!("Template folder listing failed: {}", e)))?
    }
}
