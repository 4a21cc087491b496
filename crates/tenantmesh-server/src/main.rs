//! TenantMesh Server
//!
//! Keeps a catalog of tenant templates, provisions tenant configuration
//! subtrees from them, and routes calls to tenant-management instances
//! discovered through the service directory.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration
//! tenantmesh-server
//!
//! # Run with a config file
//! tenantmesh-server --config tenantmesh.yaml
//!
//! # Show the template catalog
//! tenantmesh-server templates --templates-root ./templates
//!
//! # Dry-run provisioning into an in-memory store
//! tenantmesh-server provision --template standard --tenant acme
//! ```

mod config;
mod runtime;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tenantmesh_core::{MemoryCoordinationStore, TenantId};

use crate::config::{LoggingConfig, ServerConfig};
use crate::runtime::Runtime;

const VERSION: &str = env!("VERSION");
const SHA: &str = env!("SHA");

const LONG_VERSION: &str = concat!(env!("VERSION"), " (", env!("SHA"), ")");

/// TenantMesh Server - tenant template provisioning and routing
#[derive(Parser)]
#[command(name = "tenantmesh-server")]
#[command(about = "Provisions tenant configuration from templates", long_about = None)]
#[command(version = LONG_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (YAML or TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "TENANTMESH_CONFIG",
        global = true
    )]
    config: Option<String>,

    /// Template root directory, overrides the configuration
    #[arg(long, value_name = "DIR", global = true)]
    templates_root: Option<String>,

    /// Log filter, overrides the configuration
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default)
    Serve,

    /// Print the template catalog sorted by name
    Templates {
        /// Print JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Provision a tenant into an in-memory store and print the result
    Provision {
        /// Template id
        #[arg(long)]
        template: String,

        /// Tenant id
        #[arg(long)]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    // Environment overrides the config file, CLI flags override both
    config.merge_env();
    if let Some(root) = cli.templates_root {
        config.templates.root = root;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging)?;
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }

    match cli.command {
        Some(Commands::Templates { json }) => print_templates(config, json).await,
        Some(Commands::Provision { template, tenant }) => {
            dry_run_provision(config, &template, &tenant).await
        }
        Some(Commands::Serve) | None => serve(config).await,
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level when set
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!("Starting TenantMesh server {} ({})", VERSION, SHA);
    info!("   Template root: {}", config.templates.root);
    info!("   Instance: {}", config.coordination.instance_id);
    info!(
        "   Tenant management port: {}",
        config.tenant_management.port
    );

    let store = Arc::new(MemoryCoordinationStore::new());
    let runtime = Runtime::build(config, store).await?;
    runtime.start().await?;

    info!(
        "Tenants under {}, '{}' hosts registered under {}",
        runtime.layout().tenants_root(),
        runtime.tenant_management().target_identifier(),
        runtime.directory().registration_root()
    );
    info!("Server ready, press Ctrl+C to stop");

    shutdown_signal().await;
    runtime.shutdown();
    Ok(())
}

async fn print_templates(mut config: ServerConfig, json: bool) -> Result<()> {
    config.templates.watch = false;
    let runtime = Runtime::build(config, Arc::new(MemoryCoordinationStore::new())).await?;
    let templates = runtime.catalog().list();

    if json {
        let templates: Vec<_> = templates.iter().map(|t| t.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&templates)?);
        return Ok(());
    }

    if templates.is_empty() {
        println!("No templates found");
        return Ok(());
    }
    for template in templates {
        if template.description.is_empty() {
            println!("{:<24} {}", template.id, template.name);
        } else {
            println!(
                "{:<24} {} - {}",
                template.id, template.name, template.description
            );
        }
    }
    Ok(())
}

async fn dry_run_provision(mut config: ServerConfig, template: &str, tenant: &str) -> Result<()> {
    config.templates.watch = false;
    let tenant = TenantId::from_string(tenant)?;
    let store = Arc::new(MemoryCoordinationStore::new());
    let runtime = Runtime::build(config, store.clone()).await?;

    let report = runtime.provision_tenant(template, &tenant).await?;
    println!(
        "Provisioned {} from '{}': {} default nodes, {} template nodes",
        report.tenant_path,
        report.template_id,
        report.default_content.total(),
        report.template_content.total()
    );

    for (path, content) in store.dump(&report.tenant_path) {
        if content.is_empty() {
            println!("  {}", path);
        } else {
            println!("  {} ({} bytes)", path, content.len());
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
