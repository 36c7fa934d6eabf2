//! Console on the installer's own terminal.
//!
//! In a character-cell installer there is no second window, so the session
//! borrows the terminal the installer UI is drawing on. The UI is told to let
//! go of the screen, the line discipline is reset to something a human can
//! type into, and everything is put back exactly as it was afterwards.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::error::{ConsoleError, Result};
use crate::host::{HostUi, ModuleResult, ModuleRunner, Multiplexer, MultiplexerKind};
use crate::session::SessionLock;

/// Flags forced while the console owns the terminal: local echo, NL -> CRNL on output
pub const BASELINE_FLAGS: &[&str] = &["echo", "onlcr"];

/// Snapshot and reapply terminal line discipline
pub trait TerminalSettings {
    /// Capture current settings as an opaque token
    fn save(&self) -> Result<String>;

    /// Reapply a token returned by `save`
    fn restore(&self, token: &str) -> Result<()>;

    /// Force [`BASELINE_FLAGS`]
    fn force_baseline(&self) -> Result<()>;

    /// Make sure the baseline is forced once more when the process exits
    fn register_exit_fallback(&self) {}
}

/// [`TerminalSettings`] backed by `stty` on the inherited stdin
#[derive(Debug, Clone)]
pub struct Stty {
    program: PathBuf,
}

impl Stty {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::inherit())
            .output()
            .map_err(|e| ConsoleError::terminal(format!("Failed to run {}: {}", self.program.display(), e)))?;
        if !output.status.success() {
            return Err(ConsoleError::terminal(format!(
                "{} {} failed: {}",
                self.program.display(),
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl TerminalSettings for Stty {
    fn save(&self) -> Result<String> {
        let token = self.run(&["-g"])?;
        if token.is_empty() {
            return Err(ConsoleError::terminal("stty -g returned no settings"));
        }
        debug!("Saved terminal settings {}", token);
        Ok(token)
    }

    fn restore(&self, token: &str) -> Result<()> {
        debug!("Restoring terminal settings {}", token);
        self.run(&[token]).map(|_| ())
    }

    fn force_baseline(&self) -> Result<()> {
        self.run(BASELINE_FLAGS).map(|_| ())
    }

    fn register_exit_fallback(&self) {
        register_stty_at_exit(&self.program);
    }
}

static EXIT_FALLBACK_STTY: OnceLock<PathBuf> = OnceLock::new();

extern "C" fn stty_baseline_at_exit() {
    if let Some(program) = EXIT_FALLBACK_STTY.get() {
        let _ = Command::new(program)
            .args(BASELINE_FLAGS)
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// Register the exit-time baseline once per process
fn register_stty_at_exit(program: &Path) {
    let mut registered = false;
    EXIT_FALLBACK_STTY.get_or_init(|| {
        registered = true;
        program.to_path_buf()
    });
    if registered {
        // SAFETY: the handler is a plain extern "C" fn without captured state
        if unsafe { nix::libc::atexit(stty_baseline_at_exit) } != 0 {
            warn!("Failed to register exit-time terminal fallback");
        }
    }
}

/// Restores the captured settings and hands the screen back to the host
struct TerminalRestore<'a> {
    settings: &'a dyn TerminalSettings,
    host: &'a dyn HostUi,
    token: String,
}

impl Drop for TerminalRestore<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.settings.restore(&self.token) {
            warn!("Failed to restore terminal settings: {}", e);
        }
        if let Err(e) = self.host.acquire_screen() {
            warn!("Failed to give the screen back to the installer: {}", e);
        }
        info!("Console session closed");
    }
}

/// Releases the screen again after a module ran on it
struct ScreenRelease<'a>(&'a dyn HostUi);

impl Drop for ScreenRelease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.release_screen() {
            warn!("Failed to release the screen after a module: {}", e);
        }
    }
}

/// Console on the installer's own terminal
pub struct TextModeMultiplexer<'a> {
    host: &'a dyn HostUi,
    runner: &'a dyn ModuleRunner,
    settings: Box<dyn TerminalSettings + 'a>,
}

impl<'a> TextModeMultiplexer<'a> {
    pub fn new(
        host: &'a dyn HostUi,
        runner: &'a dyn ModuleRunner,
        settings: Box<dyn TerminalSettings + 'a>,
    ) -> Self {
        Self {
            host,
            runner,
            settings,
        }
    }

    /// Borrow the terminal from the host UI for the duration of `body`.
    ///
    /// The exact settings captured on entry are reapplied on every exit path
    /// before the host reacquires the screen.
    pub fn open<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&dyn Multiplexer) -> Result<T>,
    {
        let _lock = SessionLock::acquire()?;
        let token = self.settings.save()?;
        let _restore = TerminalRestore {
            settings: &*self.settings,
            host: self.host,
            token,
        };

        self.host.release_screen()?;
        self.settings.force_baseline()?;
        self.settings.register_exit_fallback();
        info!("Console session opened on the installer terminal");

        body(self)
    }
}

impl Multiplexer for TextModeMultiplexer<'_> {
    fn kind(&self) -> MultiplexerKind {
        MultiplexerKind::Text
    }

    fn run_module(&self, name: &str, args: &[String]) -> Result<ModuleResult> {
        self.host.acquire_screen()?;
        let _release = ScreenRelease(self.host);
        self.runner.run_module(name, args)
    }
}
