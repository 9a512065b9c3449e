//! modulectl - operate the module engine from the command line
//!
//! Usage:
//!   modulectl --config engine.toml import catalog.toml
//!   modulectl resolve acme alerts --overrides '{"channel":"sms"}'
//!   modulectl sweep --interval-secs 3600
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use tenant_module_engine::config::{DatabaseBackendConfig, EngineConfig};
use tenant_module_engine::module::registry::CatalogManifest;
use tenant_module_engine::module::types::{ActorContext, ActorRole};
use tenant_module_engine::module::OperationalStatus;
use tenant_module_engine::utils::{
    create_shutdown_receiver, env_bool, env_int, env_opt, init_logging_from_config, log_error_async,
};
use tenant_module_engine::ModuleEngine;

const ENV_CONFIG: &str = "MODULE_ENGINE_CONFIG";
const ENV_JSON_LOGS: &str = "MODULE_ENGINE_JSON_LOGS";
const ENV_SWEEP_INTERVAL: &str = "MODULE_ENGINE_SWEEP_INTERVAL_SECS";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Parser, Debug)]
#[command(name = "modulectl", version, about = "Module lifecycle and resolution engine")]
struct Cli {
    /// Engine configuration file (TOML, or JSON by extension)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override storage.data_dir
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Override storage.database_backend (redb, sled, memory, auto)
    #[arg(long, global = true)]
    backend: Option<DatabaseBackendConfig>,

    /// Actor recorded in audit events
    #[arg(long, global = true, default_value = "modulectl")]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import modules and variants from a catalog manifest
    Import { manifest: PathBuf },
    /// List modules open for assignment
    List,
    /// List a module's variants
    Variants { slug: String },
    /// Resolve the variant and config a tenant receives
    Resolve {
        tenant: String,
        slug: String,
        /// JSON object merged over the tenant's config
        #[arg(long)]
        overrides: Option<String>,
    },
    /// List a tenant's assigned modules
    Assigned { tenant: String },
    /// Request a module for a tenant
    Assign {
        tenant: String,
        slug: String,
        /// Pin a specific variant id
        #[arg(long)]
        implementation: Option<String>,
    },
    /// Move an assignment to another status
    SetStatus {
        tenant: String,
        slug: String,
        status: String,
    },
    /// Replace an assignment's custom config
    SetConfig {
        tenant: String,
        slug: String,
        /// JSON object
        config: String,
    },
    /// Archive a module and its variants
    Archive { slug: String },
    /// Restore an archived module
    Restore { slug: String },
    /// Delete expired and orphaned backups once
    Cleanup,
    /// Run the backup cleanup periodically until interrupted
    Sweep {
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let path = cli.config.clone().or_else(|| env_opt(ENV_CONFIG).map(PathBuf::from));
    let mut config = match path {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides()?;

    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    if let Some(backend) = cli.backend {
        config.storage.database_backend = backend;
    }
    if env_bool(ENV_JSON_LOGS) {
        config.logging.get_or_insert_with(Default::default).json_format = true;
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_json(raw: &str, what: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON for {}", what))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging_from_config(config.logging.as_ref());

    let engine = Arc::new(ModuleEngine::open(config)?);
    let actor = ActorContext::new("platform", cli.actor.clone(), ActorRole::PlatformAdmin);

    match cli.command {
        Command::Import { manifest } => {
            let manifest = CatalogManifest::from_file(&manifest)?;
            print_json(&engine.import_manifest(&manifest, &actor).await?)?;
        }
        Command::List => print_json(&engine.list_modules()?)?,
        Command::Variants { slug } => {
            let module = engine.get_module_by_slug(&slug)?;
            print_json(&engine.list_variants(&module.id)?)?;
        }
        Command::Resolve {
            tenant,
            slug,
            overrides,
        } => {
            let overrides = overrides
                .as_deref()
                .map(|raw| parse_json(raw, "--overrides"))
                .transpose()?;
            print_json(&engine.resolve(&tenant, &slug, overrides.as_ref())?)?;
        }
        Command::Assigned { tenant } => print_json(&engine.list_assigned_modules(&tenant)?)?,
        Command::Assign {
            tenant,
            slug,
            implementation,
        } => {
            print_json(
                &engine
                    .request_assignment(&tenant, &slug, implementation, &actor)
                    .await?,
            )?;
        }
        Command::SetStatus {
            tenant,
            slug,
            status,
        } => {
            let next: OperationalStatus = status.parse()?;
            let module = engine.get_module_by_slug(&slug)?;
            print_json(
                &engine
                    .update_assignment_status(&tenant, &module.id, next, &actor)
                    .await?,
            )?;
        }
        Command::SetConfig {
            tenant,
            slug,
            config,
        } => {
            let config = parse_json(&config, "config")?;
            let module = engine.get_module_by_slug(&slug)?;
            print_json(
                &engine
                    .update_assignment_config(&tenant, &module.id, config, &actor)
                    .await?,
            )?;
        }
        Command::Archive { slug } => {
            let module = engine.get_module_by_slug(&slug)?;
            print_json(&engine.archive_module(&module.id, &actor).await?)?;
        }
        Command::Restore { slug } => {
            let module = engine.get_module_by_slug(&slug)?;
            print_json(&engine.restore_module(&module.id, &actor).await?)?;
        }
        Command::Cleanup => print_json(&engine.cleanup_expired_backups().await?)?,
        Command::Sweep { interval_secs } => {
            let interval_secs = interval_secs
                .or_else(|| env_int(ENV_SWEEP_INTERVAL))
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                .max(1);
            run_sweep(Arc::clone(&engine), Duration::from_secs(interval_secs)).await;
            print_json(&engine.sweep_stats())?;
        }
    }

    engine.flush()?;
    Ok(())
}

/// Run cleanup every `interval` until SIGINT/SIGTERM
async fn run_sweep(engine: Arc<ModuleEngine>, interval: Duration) {
    let mut shutdown = create_shutdown_receiver();
    let mut ticker = tokio::time::interval(interval);
    info!("Backup sweep running every {:?}", interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                log_error_async(|| engine.cleanup_expired_backups(), "Backup sweep failed").await;
            }
            _ = shutdown.changed() => {
                let received = (*shutdown.borrow()).unwrap_or("shutdown signal");
                info!("{} received, stopping backup sweep", received);
                break;
            }
        }
    }
}
