//! TenantMesh Channel Routing
//!
//! This crate routes calls for a logical service to its live instances:
//! - Service directory backed by coordination store registrations
//! - Channel demultiplexer with one cached channel per host
//! - Tenant-management HTTP channel and factory

pub mod channel;
pub mod client;
pub mod demux;
pub mod directory;
pub mod tenant_management;

// Re-export commonly used types
pub use channel::{ApiChannel, ChannelFactory};
pub use client::{HttpClientConfig, create_client};
pub use demux::ApiChannelDemux;
pub use directory::{HostChange, HostChangeStream, ServiceDirectory, StoreServiceDirectory};
pub use tenant_management::{
    TENANT_MANAGEMENT_IDENTIFIER, TenantManagementApiChannel, TenantManagementApiDemux,
    TenantManagementChannelFactory, TenantManagementConfig, tenant_management_demux,
};
