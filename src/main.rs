//! Installer Console - standalone entry point
//!
//! Runs a console session outside the installer UI, using the crossterm
//! alternate screen as host and an external client for module runs.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::stdout;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use inst_console::cli::{Cli, Commands};
use inst_console::{
    ConfigMenu, ConsoleConfig, ConsoleError, Dispatcher, ExecModuleRunner, PluginRegistry,
    StandaloneHost, process_guard,
};

/// Initialize tracing; RUST_LOG overrides the default level
fn init_logger(log_file: Option<&Path>) -> Result<()> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        // The terminal belongs to the user; only warnings go there by default
        None => tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ConsoleConfig> {
    match &cli.config {
        Some(path) => ConsoleConfig::load_from_file(path),
        None => Ok(ConsoleConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    let config = load_config(&cli)?;
    init_logger(config.log_file.as_deref())?;
    info!("Installer console starting up");
    debug!("CLI arguments: {:?}", cli);

    let registry = PluginRegistry::with_builtin_kinds();

    match cli.command.clone().unwrap_or(Commands::Open) {
        Commands::Open => {
            config.validate()?;
            if let Err(e) = process_guard::init_signal_handlers() {
                warn!("Failed to initialize signal handlers: {}", e);
            }

            let host = StandaloneHost::new();
            let runner = ExecModuleRunner::new(config.module_command.clone());
            let kind = cli.mode.unwrap_or_else(inst_console::detect_kind);

            // The host owns the screen around the session, as the installer UI would
            let result = host.hold_screen().and_then(|_screen| {
                inst_console::start(&host, &runner, &config, &registry, kind)
            });
            match result {
                Ok(unknown) => info!("Console closed ({} unknown command(s))", unknown),
                Err(ConsoleError::Precondition(reason)) => {
                    error!("Console not opened: {}", reason);
                    std::process::exit(1);
                }
                Err(e) => return Err(e).context("Console session failed"),
            }
        }
        Commands::Commands => {
            let dispatcher = Dispatcher::load(&config, &registry)?;
            dispatcher.list_commands(&mut stdout())?;
        }
        Commands::Menu => {
            let menu = ConfigMenu::discover(&config.plugin_roots, &registry)?;
            menu.render(&mut stdout())?;
        }
        Commands::Validate { file } => {
            info!("Validating configuration file: {:?}", file);
            let result = ConsoleConfig::load_from_file(&file)
                .and_then(|c| c.validate().map_err(anyhow::Error::from));
            match result {
                Ok(()) => println!("✓ Configuration file is valid: {}", file.display()),
                Err(e) => {
                    error!("Configuration validation failed: {:#}", e);
                    eprintln!("✗ Configuration validation failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&ConsoleConfig::default())?);
        }
    }

    Ok(())
}
