//! Error types for TenantMesh Core

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    // Tenant errors
    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    #[error("Invalid node path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    // Template errors
    #[error("Tenant template not found: {0}")]
    TemplateNotFound(String),

    #[error("Default folder not found at '{}'", .0.display())]
    DefaultContentMissing(PathBuf),

    #[error("Tenant template folder not found at '{}'", .0.display())]
    TemplateContentMissing(PathBuf),

    #[error("Unable to parse template manifest '{}': {reason}", path.display())]
    TemplateParse { path: PathBuf, reason: String },

    // Routing errors
    #[error("Unable to create channel for host '{host}': {reason}")]
    ChannelCreation { host: String, reason: String },

    #[error("No hosts available for target '{0}'")]
    NoAvailableHosts(String),

    #[error("Channel error: {0}")]
    Channel(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is one of the provisioning failures a caller can
    /// correct and retry (unknown template or missing content folders).
    pub fn is_provisioning_failure(&self) -> bool {
        matches!(
            self,
            Error::TemplateNotFound(_)
                | Error::DefaultContentMissing(_)
                | Error::TemplateContentMissing(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
