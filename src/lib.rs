//! Installer Console Library
//!
//! Interactive console sessions for a Linux installer: terminal multiplexing
//! (separate window or the installer's own terminal), a command dispatcher
//! with plugin-provided commands, and plugin discovery.

pub mod cli;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod gui;
pub mod host;
pub mod module_runner;
pub mod plugins;
pub mod process_guard;
pub mod session;
pub mod textmode;

// Re-export main types for convenience
pub use config::ConsoleConfig;
pub use console::{detect_kind, start};
pub use dispatcher::{BuiltinCommand, CommandOutcome, Dispatcher};
pub use error::{ConsoleError, Result};
pub use gui::{GuiMultiplexer, Handshake, TerminalLauncher, XtermLauncher};
pub use host::{
    HostUi, ModuleResult, ModuleRunner, Multiplexer, MultiplexerKind, ScreenHold, StandaloneHost,
};
pub use module_runner::ExecModuleRunner;
pub use plugins::{ConfigMenu, Plugin, PluginDefinition, PluginRegistry};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use session::SessionLock;
pub use textmode::{Stty, TerminalSettings, TextModeMultiplexer};
