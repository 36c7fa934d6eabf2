use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::host::MultiplexerKind;

/// Installer Console - interactive console sessions for the installer
#[derive(Parser, Debug)]
#[command(name = "inst-console")]
#[command(about = "Interactive console for the installer: shell access, module runs and plugin commands")]
#[command(version)]
pub struct Cli {
    /// Configuration file (JSON); built-in defaults are used when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Terminal multiplexer to use: "gui" opens a terminal window, "text"
    /// borrows the current terminal. Defaults to gui when DISPLAY is set.
    #[arg(long, global = true)]
    pub mode: Option<MultiplexerKind>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Open a console session (default)
    Open,
    /// List the console commands, including plugin commands
    Commands,
    /// Show the configuration menu entries contributed by plugins
    Menu,
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        file: PathBuf,
    },
    /// Print the built-in default configuration as JSON
    DefaultConfig,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
