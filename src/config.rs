//! Console configuration
//!
//! All external programs and search locations used by a console session are
//! configurable so the same binary works on installation media and in a
//! developer checkout. Configuration is stored as JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConsoleError;

/// Default plugin search roots, highest priority first
pub const DEFAULT_PLUGIN_ROOTS: &[&str] = &[
    "/etc/inst-console/plugins",
    "/usr/share/inst-console/plugins",
];

/// Settings for opening and running console sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Terminal emulator used by the GUI multiplexer
    pub terminal_program: PathBuf,
    /// Extra arguments placed before `-e` (geometry, title, ...)
    pub terminal_args: Vec<String>,
    /// Program run by the `shell` console command
    pub shell: PathBuf,
    /// Helper reporting and switching the active window
    pub window_switcher: PathBuf,
    /// Delay used instead of focus switching when the helper is missing
    pub switch_fallback_delay_secs: u64,
    /// Upper bound for the terminal handshake; `None` waits forever
    pub handshake_timeout_secs: Option<u64>,
    /// Plugin search roots in priority order
    pub plugin_roots: Vec<PathBuf>,
    /// Command used to run installer modules; module name and args are appended
    pub module_command: Vec<String>,
    /// Terminal line discipline tool
    pub stty_program: PathBuf,
    /// Log destination; stderr when unset
    pub log_file: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            terminal_program: PathBuf::from("/usr/bin/xterm"),
            terminal_args: vec!["-title".into(), "Installer Console".into()],
            shell: PathBuf::from("/bin/bash"),
            window_switcher: PathBuf::from("/usr/lib/inst-console/bin/active_window"),
            switch_fallback_delay_secs: 3,
            handshake_timeout_secs: None,
            plugin_roots: DEFAULT_PLUGIN_ROOTS.iter().map(PathBuf::from).collect(),
            module_command: vec!["/usr/lib/inst-console/bin/run-module".into()],
            stty_program: PathBuf::from("stty"),
            log_file: None,
        }
    }
}

impl ConsoleConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize console configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file; missing keys take their defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.terminal_program.as_os_str().is_empty() {
            return Err(ConsoleError::config("terminal_program must be set"));
        }
        if self.shell.as_os_str().is_empty() {
            return Err(ConsoleError::config("shell must be set"));
        }
        if self.module_command.first().is_none_or(|c| c.trim().is_empty()) {
            return Err(ConsoleError::config("module_command must name a program"));
        }
        if self.plugin_roots.iter().any(|r| r.as_os_str().is_empty()) {
            return Err(ConsoleError::config("plugin_roots must not contain empty paths"));
        }
        if self.handshake_timeout_secs == Some(0) {
            return Err(ConsoleError::config(
                "handshake_timeout_secs must be positive (omit it to wait forever)",
            ));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }

    pub fn switch_fallback_delay(&self) -> Duration {
        Duration::from_secs(self.switch_fallback_delay_secs)
    }
}
