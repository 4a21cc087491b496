//! Tenant-management channels
//!
//! Channels to tenant-management instances speak JSON over HTTP. Every
//! instance listens on the same port, so the factory only needs the host
//! to build a channel.

use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, instrument};

use tenantmesh_core::{Error, Result, TenantId, TenantTemplate};

use crate::channel::{ApiChannel, ChannelFactory};
use crate::client::{HttpClientConfig, create_client};
use crate::demux::ApiChannelDemux;
use crate::directory::ServiceDirectory;

/// Service identifier tenant-management instances register under
pub const TENANT_MANAGEMENT_IDENTIFIER: &str = "tenant-management";

/// Demux routing to tenant-management instances
pub type TenantManagementApiDemux = ApiChannelDemux<TenantManagementApiChannel>;

/// Settings for reaching tenant-management instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantManagementConfig {
    /// Port shared by all tenant-management instances
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub client: HttpClientConfig,
}

impl Default for TenantManagementConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            client: HttpClientConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    9000
}

/// Channel to one tenant-management instance
#[derive(Debug)]
pub struct TenantManagementApiChannel {
    host: String,
    base_url: Url,
    client: Client,
    closed: AtomicBool,
}

impl TenantManagementApiChannel {
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        if self.is_closed() {
            return Err(Error::Channel(format!("Channel to {} is closed", self.host)));
        }
        self.base_url
            .join(path)
            .map_err(|e| Error::Channel(format!("Invalid endpoint '{}': {}", path, e)))
    }

    /// Fetch a tenant by id, `Ok(None)` if the instance doesn't know it
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn get_tenant(&self, tenant_id: &TenantId) -> Result<Option<serde_json::Value>> {
        let url = self.endpoint(&format!("api/tenants/{}", tenant_id))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Request to {} failed: {}", self.host, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let tenant = response
                    .json()
                    .await
                    .map_err(|e| Error::Channel(format!("Invalid tenant response: {}", e)))?;
                Ok(Some(tenant))
            }
            status => Err(Error::Channel(format!(
                "Tenant lookup on {} returned {}",
                self.host, status
            ))),
        }
    }

    /// Templates offered by the instance, in the order it returns them
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn list_templates(&self) -> Result<Vec<TenantTemplate>> {
        let url = self.endpoint("api/tenants/templates")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Request to {} failed: {}", self.host, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Channel(format!(
                "Template listing on {} returned {}",
                self.host, status
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Invalid template response: {}", e)))
    }
}

impl ApiChannel for TenantManagementApiChannel {
    fn host(&self) -> &str {
        &self.host
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        debug!("Closed tenant-management channel to {}", self.host);
    }
}

/// Builds tenant-management channels bound to the shared port
///
/// Channels share one pooled HTTP client.
#[derive(Debug, Clone)]
pub struct TenantManagementChannelFactory {
    port: u16,
    client: Client,
}

impl TenantManagementChannelFactory {
    pub fn new(config: &TenantManagementConfig) -> Result<Self> {
        Ok(Self {
            port: config.port,
            client: create_client(&config.client)?,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl ChannelFactory<TenantManagementApiChannel> for TenantManagementChannelFactory {
    fn create_channel(&self, host: &str) -> Result<TenantManagementApiChannel> {
        // IPv6 literals need brackets in a URL authority
        let authority = match host.parse::<Ipv6Addr>() {
            Ok(_) => format!("[{}]:{}", host, self.port),
            Err(_) => format!("{}:{}", host, self.port),
        };
        let base_url = Url::parse(&format!("http://{}/", authority)).map_err(|e| {
            Error::ChannelCreation {
                host: host.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(TenantManagementApiChannel {
            host: host.to_string(),
            base_url,
            client: self.client.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

/// Demux for tenant-management instances found in `directory`
pub fn tenant_management_demux(
    directory: Arc<dyn ServiceDirectory>,
    config: &TenantManagementConfig,
) -> Result<Arc<TenantManagementApiDemux>> {
    let factory: Arc<dyn ChannelFactory<TenantManagementApiChannel>> =
        Arc::new(TenantManagementChannelFactory::new(config)?);
    Ok(Arc::new(ApiChannelDemux::new(
        TENANT_MANAGEMENT_IDENTIFIER,
        factory,
        directory,
    )))
}
