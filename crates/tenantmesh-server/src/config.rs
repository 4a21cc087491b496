//! Server configuration

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tenantmesh_core::{DEFAULT_CONTENT_FOLDER, NodePath, TEMPLATE_MANIFEST_FILE, TenantLayout};
use tenantmesh_routing::TenantManagementConfig;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub templates: TemplatesConfig,

    #[serde(default)]
    pub coordination: CoordinationConfig,

    #[serde(default)]
    pub tenant_management: TenantManagementConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where tenant templates are read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Template root directory (`~` and `$VARS` are expanded)
    #[serde(default = "default_templates_root")]
    pub root: String,

    /// Manifest file name inside each template folder
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Folder holding content every tenant receives
    #[serde(default = "default_content_folder")]
    pub default_folder: String,

    /// Rescan the catalog when the template root changes
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Quiet period before a rescan, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            root: default_templates_root(),
            manifest_file: default_manifest_file(),
            default_folder: default_content_folder(),
            watch: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl TemplatesConfig {
    /// Template root with `~` and environment variables expanded
    pub fn root_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.root)
            .with_context(|| format!("Failed to expand template root '{}'", self.root))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

/// Coordination store layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Instance id, the first segment of tenant paths
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Overrides `/<instance_id>/tenants` when set
    #[serde(default)]
    pub tenants_path: Option<String>,

    /// Root under which services register their hosts
    #[serde(default = "default_registration_path")]
    pub registration_path: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            tenants_path: None,
            registration_path: default_registration_path(),
        }
    }
}

impl CoordinationConfig {
    pub fn tenant_layout(&self) -> Result<TenantLayout> {
        let layout = match &self.tenants_path {
            Some(path) => TenantLayout::new(NodePath::parse(path)?),
            None => TenantLayout::for_instance(&self.instance_id)?,
        };
        Ok(layout)
    }

    pub fn registration_root(&self) -> Result<NodePath> {
        Ok(NodePath::parse(&self.registration_path)?)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `tenantmesh_templates=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default = "default_false")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML or TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid YAML in {}", path.display()))?
        };

        Ok(config)
    }

    /// Merge with environment variables
    pub fn merge_env(&mut self) {
        // Template settings
        if let Ok(val) = std::env::var("TENANTMESH_TEMPLATES_ROOT") {
            self.templates.root = val;
        }

        if let Ok(val) = std::env::var("TENANTMESH_MANIFEST_FILE") {
            self.templates.manifest_file = val;
        }

        if let Ok(val) = std::env::var("TENANTMESH_DEFAULT_FOLDER") {
            self.templates.default_folder = val;
        }

        if let Ok(val) = std::env::var("TENANTMESH_WATCH_TEMPLATES") {
            match val.parse::<bool>() {
                Ok(watch) => self.templates.watch = watch,
                Err(_) => eprintln!(
                    "Warning: Invalid TENANTMESH_WATCH_TEMPLATES '{}', using default",
                    val
                ),
            }
        }

        // Coordination settings
        if let Ok(val) = std::env::var("TENANTMESH_INSTANCE_ID") {
            self.coordination.instance_id = val;
        }

        if let Ok(val) = std::env::var("TENANTMESH_TENANTS_PATH") {
            self.coordination.tenants_path = Some(val);
        }

        if let Ok(val) = std::env::var("TENANTMESH_REGISTRATION_PATH") {
            self.coordination.registration_path = val;
        }

        // Tenant management
        if let Ok(val) = std::env::var("TENANTMESH_TENANT_MANAGEMENT_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.tenant_management.port = port,
                Err(_) => eprintln!(
                    "Warning: Invalid TENANTMESH_TENANT_MANAGEMENT_PORT '{}', using default",
                    val
                ),
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("TENANTMESH_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("TENANTMESH_LOG_JSON")
            && let Ok(json) = val.parse::<bool>()
        {
            self.logging.json = json;
        }
    }

    /// Reject settings the runtime can't start with
    pub fn validate(&self) -> Result<()> {
        if self.templates.manifest_file.trim().is_empty() {
            bail!("templates.manifest_file must not be empty");
        }
        if self.templates.default_folder.trim().is_empty()
            || self.templates.default_folder.contains(['/', '\\'])
        {
            bail!(
                "templates.default_folder must be a single folder name, got '{}'",
                self.templates.default_folder
            );
        }
        self.coordination
            .tenant_layout()
            .context("Invalid tenants path")?;
        self.coordination
            .registration_root()
            .context("Invalid registration path")?;
        Ok(())
    }
}

fn default_templates_root() -> String {
    "~/.tenantmesh/templates".to_string()
}

fn default_manifest_file() -> String {
    TEMPLATE_MANIFEST_FILE.to_string()
}

fn default_content_folder() -> String {
    DEFAULT_CONTENT_FOLDER.to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_instance_id() -> String {
    "tenantmesh".to_string()
}

fn default_registration_path() -> String {
    "/tenantmesh/services".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}
