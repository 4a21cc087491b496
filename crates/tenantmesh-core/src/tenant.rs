//! Tenant identifiers and their location in the coordination store

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, NodePath, Result};

/// Maximum accepted length of a tenant identifier
const MAX_TENANT_ID_LEN: usize = 64;

/// Unique identifier for a tenant.
///
/// Tenant ids become a single segment of a coordination store path, so they
/// are restricted to ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse a tenant ID from a string
    pub fn from_string(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidTenant("Tenant ID must not be empty".to_string()));
        }
        if s.len() > MAX_TENANT_ID_LEN {
            return Err(Error::InvalidTenant(format!(
                "Tenant ID exceeds {} characters",
                MAX_TENANT_ID_LEN
            )));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::InvalidTenant(format!(
                "Invalid character '{}' in tenant ID '{}'",
                c, s
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_string(&s)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Layout of tenant configuration subtrees for one instance.
///
/// Tenant configuration lives at `<tenants_root>/<tenant_id>`, for example
/// `/tenantmesh/tenants/acme`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantLayout {
    tenants_root: NodePath,
}

impl TenantLayout {
    pub fn new(tenants_root: NodePath) -> Self {
        Self { tenants_root }
    }

    /// Layout rooted at `/<instance_id>/tenants`
    pub fn for_instance(instance_id: &str) -> Result<Self> {
        let root = NodePath::root().join(instance_id)?.join("tenants")?;
        Ok(Self::new(root))
    }

    pub fn tenants_root(&self) -> &NodePath {
        &self.tenants_root
    }

    /// Path of the configuration subtree for a tenant
    pub fn tenant_path(&self, tenant_id: &TenantId) -> NodePath {
        // Tenant ids are validated single segments, so the join cannot fail.
        self.tenants_root
            .join(tenant_id.as_str())
            .unwrap_or_else(|_| self.tenants_root.clone())
    }
}
