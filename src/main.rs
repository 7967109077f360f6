//! Shepherd - distributed llama.cpp orchestration node
//!
//! Runs as standalone, client, master, or hybrid (spec §4.4). A standalone
//! or client node hosts local models through the catalog/process manager; a
//! master or hybrid node additionally coordinates a fleet of worker nodes
//! through the registry and scheduler.

mod catalog;
mod cli;
mod config;
mod error;
#[cfg(feature = "gpu")]
mod gpu;
mod logging;
mod node;
mod process;
mod registry;
mod scheduler;
mod store;
mod subnet;
mod system;
mod types;
mod version;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::cli::{Cli, Commands};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::logging::LogGuards;
use crate::node::Node;
use crate::process::{PortAllocator, ProcessManager};
use crate::types::node::Capabilities;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        _ => {}
    }

    let config_path = match &cli.command {
        Commands::Run { config } => config.clone(),
        Commands::Scan { config, .. } => config.clone(),
        _ => None,
    };

    let config = match NodeConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    let _log_guards = init_logging_from_config(&config, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(version = %build.full_version(), role = ?config.node.role, "Starting shepherd node");

    match cli.command {
        Commands::Run { .. } => run_node(config)?,
        Commands::Scan { path, .. } => run_scan(config, path)?,
        Commands::Version | Commands::Config { .. } => unreachable!(),
    }

    Ok(())
}

fn init_logging_from_config(config: &NodeConfig, verbose: u8, quiet: bool) -> Result<LogGuards> {
    logging::init_logging(&config.logging, verbose, quiet)
}

/// Run the node: wires the catalog and a `Node` from configuration, starts
/// the subsystems the configured role activates, and blocks until Ctrl+C.
fn run_node(config: NodeConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(if config.node.resources.max_threads > 0 { config.node.resources.max_threads as usize } else { num_cpus::get().min(8) })
        .thread_name("shepherd")
        .build()
        .map_err(|e| Error::Internal(format!("failed to create async runtime: {e}")))?;

    runtime.block_on(async_node_main(config))
}

async fn async_node_main(config: NodeConfig) -> Result<()> {
    std::fs::create_dir_all(&config.node.executor.bin_dir).map_err(|e| Error::IoWrite { path: config.bin_dir(), source: e })?;

    let gpu_capabilities = detect_gpu_capabilities(&config);

    let port_allocator = Arc::new(PortAllocator::new(config.ports.base, config.ports.max));
    let process_manager = Arc::new(ProcessManager::new(config.bin_dir(), port_allocator));
    let readiness_deadline = Duration::from_millis(config.node.executor.readiness_timeout_ms);
    let catalog = Arc::new(Catalog::new(process_manager, readiness_deadline));

    if !config.models.paths.is_empty() {
        let paths = config.model_paths();
        match catalog.scan(&paths).await {
            Ok(result) => info!(models = result.models.len(), errors = result.errors.len(), "initial catalog scan complete"),
            Err(e) => warn!(error = %e, "initial catalog scan failed"),
        }
    }

    let node = Arc::new(Node::new(config.clone(), catalog.clone(), gpu_capabilities));
    info!(node_id = %node.id, role = ?node.role, "node identity established");

    let handles = node.start().await?;

    if config.models.auto_scan && !config.models.paths.is_empty() {
        let catalog = catalog.clone();
        let paths = config.model_paths();
        let interval = Duration::from_millis(config.models.scan_interval_ms);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                if let Err(e) = catalog.scan(&paths).await {
                    warn!(error = %e, "periodic catalog scan failed");
                }
            }
        });
    }

    tokio::signal::ctrl_c().await.map_err(|e| Error::Internal(format!("failed to listen for ctrl-c: {e}")))?;
    info!("shutdown signal received");

    node.shutdown().await;
    for handle in handles {
        handle.abort();
    }

    Ok(())
}

/// Reads detected (or config-overridden) GPU facts into the `Capabilities`
/// shape `Node`/`HealthMonitor` advertise. Feature-gated: without the `gpu`
/// feature, no GPU capability is ever claimed.
fn detect_gpu_capabilities(config: &NodeConfig) -> Capabilities {
    if let Some(override_gpu) = config.node.capabilities.gpu_override {
        return Capabilities { gpu: override_gpu, ..Capabilities::default() };
    }

    #[cfg(feature = "gpu")]
    {
        if !config.node.resources.enable_gpu {
            return Capabilities::default();
        }
        match gpu::detect_gpus() {
            Ok(gpus) => gpu::gpu_capabilities(&gpus),
            Err(e) => {
                warn!(error = %e, "GPU detection failed, continuing without GPU capabilities");
                Capabilities::default()
            }
        }
    }

    #[cfg(not(feature = "gpu"))]
    {
        Capabilities::default()
    }
}

/// Scan configured (or overridden) model paths and print the resulting
/// catalog without starting any subsystem.
fn run_scan(config: NodeConfig, path_override: Option<String>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("failed to create async runtime: {e}")))?;

    runtime.block_on(async move {
        let port_allocator = Arc::new(PortAllocator::new(config.ports.base, config.ports.max));
        let process_manager = Arc::new(ProcessManager::new(config.bin_dir(), port_allocator));
        let readiness_deadline = Duration::from_millis(config.node.executor.readiness_timeout_ms);
        let catalog = Catalog::new(process_manager, readiness_deadline);

        let paths = match path_override {
            Some(p) => vec![std::path::PathBuf::from(p)],
            None => config.model_paths(),
        };

        let result = catalog.scan(&paths).await?;
        println!("Scanned {} path(s), found {} model(s):", paths.len(), result.models.len());
        for model in &result.models {
            println!("  {} ({})", model.id, model.path.display());
        }
        if !result.errors.is_empty() {
            println!("Errors:");
            for err in &result.errors {
                println!("  {err}");
            }
        }
        Ok(())
    })
}

fn handle_config_command(subcommand: cli::ConfigSubcommand) -> Result<()> {
    use cli::ConfigSubcommand;

    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = NodeConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg).map_err(|e| Error::Config(e.to_string()))?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => match NodeConfig::load(config.as_deref()) {
            Ok(_) => println!("Configuration is valid."),
            Err(e) => {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
        },
    }

    Ok(())
}
