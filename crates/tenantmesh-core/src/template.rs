//! Tenant template records
//!
//! A template is a folder under the template root holding a JSON manifest
//! (`template.json`) and the configuration content copied into a tenant's
//! subtree when the tenant is created.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Relative path of the manifest inside a template folder
pub const TEMPLATE_MANIFEST_FILE: &str = "template.json";

/// Folder holding content shared by all tenants
pub const DEFAULT_CONTENT_FOLDER: &str = "default";

/// A named template that can be used to create new tenants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantTemplate {
    /// Unique id, matching the template's folder name
    pub id: String,

    /// Display name, used for ordering
    pub name: String,

    #[serde(default)]
    pub description: String,
}

impl TenantTemplate {
    /// Parse a template manifest
    pub fn from_manifest(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
