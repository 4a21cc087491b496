//! Runtime wiring
//!
//! Builds the template catalog, provisioner, service directory and
//! tenant-management demux from a `ServerConfig`, and keeps the catalog in
//! step with the template root while running.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tenantmesh_core::{CoordinationStore, TemplateStore, TenantId, TenantLayout};
use tenantmesh_routing::{StoreServiceDirectory, TenantManagementApiDemux, tenant_management_demux};
use tenantmesh_templates::{
    FileTemplateStore, ProvisionReport, RootChangeStream, ScanSummary, TemplateCatalog,
    TemplateProvisioner,
};

use crate::config::ServerConfig;

/// Running server components
pub struct Runtime {
    config: ServerConfig,
    templates: Arc<FileTemplateStore>,
    catalog: Arc<TemplateCatalog>,
    provisioner: TemplateProvisioner,
    layout: TenantLayout,
    directory: Arc<StoreServiceDirectory>,
    tenant_management: Arc<TenantManagementApiDemux>,
    rescan_task: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    /// Build all components and run the initial catalog scan
    pub async fn build(config: ServerConfig, store: Arc<dyn CoordinationStore>) -> Result<Self> {
        config.validate()?;

        let root = config.templates.root_path()?;
        let templates = Arc::new(
            FileTemplateStore::new(&root)
                .context("Failed to open template root")?
                .with_manifest_file(config.templates.manifest_file.clone()),
        );
        let template_store: Arc<dyn TemplateStore> = templates.clone();

        let catalog = Arc::new(TemplateCatalog::new(template_store.clone()));
        let summary = scan(&catalog).await?;
        info!(
            "Loaded {} tenant templates from {} ({} skipped)",
            summary.loaded,
            root.display(),
            summary.skipped.len()
        );

        let provisioner =
            TemplateProvisioner::new(catalog.clone(), template_store, store.clone())
                .with_default_folder(config.templates.default_folder.clone());

        let layout = config.coordination.tenant_layout()?;
        let directory = Arc::new(StoreServiceDirectory::new(
            store,
            config.coordination.registration_root()?,
        ));
        let tenant_management =
            tenant_management_demux(directory.clone(), &config.tenant_management)?;

        Ok(Self {
            config,
            templates,
            catalog,
            provisioner,
            layout,
            directory,
            tenant_management,
            rescan_task: Mutex::new(None),
        })
    }

    /// Start watching the service directory and, if enabled, the template root
    pub async fn start(&self) -> Result<()> {
        self.tenant_management.start().await?;

        if self.config.templates.watch {
            let changes = self.templates.watch_root().await?;
            let debounce = Duration::from_millis(self.config.templates.debounce_ms);
            let handle = tokio::spawn(follow_template_root(
                changes,
                self.catalog.clone(),
                debounce,
            ));
            let previous = self
                .rescan_task
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .replace(handle);
            if let Some(previous) = previous {
                previous.abort();
            }
            info!("Watching template root for changes");
        }

        Ok(())
    }

    pub fn catalog(&self) -> &Arc<TemplateCatalog> {
        &self.catalog
    }

    pub fn layout(&self) -> &TenantLayout {
        &self.layout
    }

    pub fn directory(&self) -> &Arc<StoreServiceDirectory> {
        &self.directory
    }

    pub fn tenant_management(&self) -> &Arc<TenantManagementApiDemux> {
        &self.tenant_management
    }

    /// Provision a tenant's configuration subtree from a template
    pub async fn provision_tenant(
        &self,
        template_id: &str,
        tenant_id: &TenantId,
    ) -> tenantmesh_core::Result<ProvisionReport> {
        let tenant_path = self.layout.tenant_path(tenant_id);
        self.provisioner.provision(template_id, &tenant_path).await
    }

    /// Stop background tasks and close all channels
    pub fn shutdown(&self) {
        let handle = self
            .rescan_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.tenant_management.shutdown();
        info!("Runtime stopped");
    }
}

async fn scan(catalog: &Arc<TemplateCatalog>) -> Result<ScanSummary> {
    let catalog = catalog.clone();
    tokio::task::spawn_blocking(move || catalog.scan())
        .await
        .context("Template scan task failed")
}

/// Rescan the catalog after each burst of changes under the template root
async fn follow_template_root(
    mut changes: RootChangeStream,
    catalog: Arc<TemplateCatalog>,
    debounce: Duration,
) {
    while let Some(change) = changes.next().await {
        match change {
            Ok(change) => debug!("Template root changed: {:?}", change.paths),
            Err(e) => {
                warn!("Template root watch error: {}", e);
                continue;
            }
        }

        // Wait for the burst to settle
        let mut ended = false;
        loop {
            match tokio::time::timeout(debounce, changes.next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    ended = true;
                    break;
                }
                Err(_) => break,
            }
        }

        match scan(&catalog).await {
            Ok(summary) if summary.published => info!(
                "Template catalog rescanned: {} templates (generation {})",
                summary.loaded, summary.generation
            ),
            Ok(summary) => debug!(
                "Template rescan {} not published",
                summary.generation
            ),
            Err(e) => error!("Template rescan failed: {:#}", e),
        }

        if ended {
            break;
        }
    }
    debug!("Template root watch ended");
}
