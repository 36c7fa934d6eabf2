//! Console in a separate terminal window.
//!
//! Used when the installer runs under X. A terminal emulator is started with a
//! tiny bash script that reports `"<pid> <signal_fd> <tty>"` back through a
//! private pipe and then sleeps on a read from `<signal_fd>`. The installer
//! process points its own stdin/stdout/stderr at that tty for the duration of
//! the session, so the console runs in-process while the user types into the
//! new window. Writing a newline to the signal fd lets the script finish and
//! the window close.

use nix::fcntl::OFlag;
use nix::unistd::{dup, dup2, pipe2};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::host::{HostUi, ModuleResult, ModuleRunner, Multiplexer, MultiplexerKind};
use crate::process_guard::{self, CommandProcessGroup};
use crate::session::SessionLock;

/// Shown when a popup prevents opening the console window
pub const POPUP_BLOCKS_CONSOLE: &str = "The console cannot be opened while a popup window is displayed.\n\
     Close the popup and try again.";

/// fd number the handshake script allocates for its wake-up pipe
const SIGNAL_FD: u32 = 4;

/// What the spawned terminal reports once it is ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub pid: u32,
    pub signal_fd: u32,
    pub tty: PathBuf,
}

impl Handshake {
    /// Path through which the waiting shell can be woken up
    pub fn signal_path(&self) -> PathBuf {
        PathBuf::from(format!("/proc/{}/fd/{}", self.pid, self.signal_fd))
    }
}

impl FromStr for Handshake {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [pid, signal_fd, tty] = fields.as_slice() else {
            return Err(ConsoleError::handshake(format!(
                "expected \"<pid> <fd> <tty>\", got {:?}",
                line.trim_end()
            )));
        };
        let pid = pid
            .parse()
            .map_err(|_| ConsoleError::handshake(format!("invalid pid {:?}", pid)))?;
        let signal_fd = signal_fd
            .parse()
            .map_err(|_| ConsoleError::handshake(format!("invalid fd {:?}", signal_fd)))?;
        if !tty.starts_with('/') {
            return Err(ConsoleError::handshake(format!("invalid tty path {:?}", tty)));
        }
        Ok(Self {
            pid,
            signal_fd,
            tty: PathBuf::from(*tty),
        })
    }
}

/// Bash script run inside the terminal window
pub fn handshake_script(report_path: &Path) -> String {
    format!(
        "exec {fd}<> <(:); echo \"$$ {fd} $(tty)\" > '{report}'; read -u {fd}",
        fd = SIGNAL_FD,
        report = report_path.display()
    )
}

/// Starts the terminal window that reports back through `report_path`
pub trait TerminalLauncher {
    fn launch(&self, report_path: &Path) -> Result<Child>;
}

/// Launches an xterm-compatible emulator: `<program> <args...> -e bash -c <script>`
#[derive(Debug, Clone)]
pub struct XtermLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl XtermLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl TerminalLauncher for XtermLauncher {
    fn launch(&self, report_path: &Path) -> Result<Child> {
        info!("Launching terminal {}", self.program.display());
        let child = Command::new(&self.program)
            .args(&self.args)
            .args(["-e", "bash", "-c"])
            .arg(handshake_script(report_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .in_new_process_group()
            .spawn()?;
        Ok(child)
    }
}

/// Saved stdio descriptors; dropping it points fds 0-2 back at them.
struct StdioRedirect {
    saved: Vec<(RawFd, OwnedFd)>,
}

impl StdioRedirect {
    fn to_tty(tty: &Path) -> Result<Self> {
        let device = OpenOptions::new().read(true).write(true).open(tty)?;
        flush_std_streams();

        let mut redirect = Self { saved: Vec::with_capacity(3) };
        for fd in 0..3 {
            let copy = dup(fd)?;
            // SAFETY: dup returned a fresh descriptor that nothing else owns
            redirect.saved.push((fd, unsafe { OwnedFd::from_raw_fd(copy) }));
        }
        for fd in 0..3 {
            dup2(device.as_raw_fd(), fd)?;
        }
        debug!("Standard streams redirected to {}", tty.display());
        Ok(redirect)
    }
}

impl Drop for StdioRedirect {
    fn drop(&mut self) {
        flush_std_streams();
        for (fd, saved) in &self.saved {
            if let Err(e) = dup2(saved.as_raw_fd(), *fd) {
                error!("Failed to restore fd {}: {}", fd, e);
            }
        }
        debug!("Standard streams restored");
    }
}

fn flush_std_streams() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

/// The spawned terminal emulator process
struct TerminalWindow {
    child: Option<Child>,
}

impl TerminalWindow {
    fn new(child: Child) -> Self {
        process_guard::track(child.id());
        Self { child: Some(child) }
    }

    /// Kill the window's process group (used when the handshake failed)
    fn terminate(&mut self) {
        if let Some(child) = &self.child {
            let pid = child.id();
            process_guard::untrack(pid);
            let mut registry = process_guard::ChildRegistry::default();
            registry.register(pid);
            registry.terminate_all(Duration::from_secs(1));
        }
    }
}

impl Drop for TerminalWindow {
    fn drop(&mut self) {
        // Reap in the background; the window closes on its own once woken
        if let Some(mut child) = self.child.take() {
            std::thread::spawn(move || {
                let pid = child.id();
                match child.wait() {
                    Ok(status) => debug!("Terminal {} exited with {}", pid, status),
                    Err(e) => warn!("Failed to reap terminal {}: {}", pid, e),
                }
                process_guard::untrack(pid);
            });
        }
    }
}

/// Everything an open GUI session holds; dropping it closes the session.
///
/// Field order matters: streams are restored before the window is woken, and
/// the private channel and session lock go last.
struct ActiveSession {
    redirect: Option<StdioRedirect>,
    handshake: Handshake,
    _window: TerminalWindow,
    _channel: OwnedFd,
    _lock: SessionLock,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        drop(self.redirect.take());
        let path = self.handshake.signal_path();
        if let Err(e) = std::fs::write(&path, "\n") {
            warn!("Failed to wake terminal shell via {}: {}", path.display(), e);
        }
        info!("Console session closed");
    }
}

/// Console in a separate terminal window
pub struct GuiMultiplexer<'a> {
    host: &'a dyn HostUi,
    runner: &'a dyn ModuleRunner,
    launcher: Box<dyn TerminalLauncher + 'a>,
    window_switcher: PathBuf,
    fallback_delay: Duration,
    handshake_timeout: Option<Duration>,
}

impl<'a> GuiMultiplexer<'a> {
    pub fn new(host: &'a dyn HostUi, runner: &'a dyn ModuleRunner, config: &ConsoleConfig) -> Self {
        Self {
            host,
            runner,
            launcher: Box::new(XtermLauncher::new(
                &config.terminal_program,
                config.terminal_args.clone(),
            )),
            window_switcher: config.window_switcher.clone(),
            fallback_delay: config.switch_fallback_delay(),
            handshake_timeout: config.handshake_timeout(),
        }
    }

    pub fn with_launcher(mut self, launcher: Box<dyn TerminalLauncher + 'a>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Open a terminal window, run `body` with stdio attached to it, close it.
    ///
    /// `body` only runs after the handshake succeeded and the streams point at
    /// the new tty. The original streams are back in place before this returns,
    /// whether `body` succeeded, failed or panicked.
    pub fn open<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&dyn Multiplexer) -> Result<T>,
    {
        if !self.host.is_wizard_dialog() {
            warn!("Console requested while a popup is open");
            self.host.show_message(POPUP_BLOCKS_CONSOLE);
            return Err(ConsoleError::precondition("a popup dialog is open"));
        }

        let lock = SessionLock::acquire()?;
        let (reader, writer) = pipe2(OFlag::O_CLOEXEC)?;
        let report_path = PathBuf::from(format!(
            "/proc/{}/fd/{}",
            std::process::id(),
            writer.as_raw_fd()
        ));

        let mut window = TerminalWindow::new(self.launcher.launch(&report_path)?);
        let handshake = match self.read_handshake(reader) {
            Ok(handshake) => handshake,
            Err(e) => {
                error!("Terminal handshake failed: {}", e);
                window.terminate();
                return Err(e);
            }
        };
        info!(
            "Terminal ready: shell pid {} on {}",
            handshake.pid,
            handshake.tty.display()
        );

        let mut session = ActiveSession {
            redirect: None,
            handshake,
            _window: window,
            _channel: writer,
            _lock: lock,
        };
        session.redirect = Some(StdioRedirect::to_tty(&session.handshake.tty)?);

        let result = body(self);
        drop(session);
        result
    }

    fn read_handshake(&self, reader: OwnedFd) -> Result<Handshake> {
        let reader = BufReader::new(File::from(reader));
        match self.handshake_timeout {
            None => read_handshake_line(reader),
            Some(timeout) => {
                let (tx, rx) = mpsc::channel();
                std::thread::spawn(move || {
                    let _ = tx.send(read_handshake_line(reader));
                });
                rx.recv_timeout(timeout).map_err(|_| {
                    ConsoleError::handshake(format!("no answer from terminal within {:?}", timeout))
                })?
            }
        }
    }

    fn capture_active_window(&self) -> Option<String> {
        let output = Command::new(&self.window_switcher)
            .stdin(Stdio::null())
            .output();
        match output {
            Ok(output) if output.status.success() => {
                let handle = String::from_utf8_lossy(&output.stdout).trim().to_string();
                (!handle.is_empty()).then_some(handle)
            }
            Ok(output) => {
                warn!("{} exited with {}", self.window_switcher.display(), output.status);
                None
            }
            Err(e) => {
                warn!("Failed to run {}: {}", self.window_switcher.display(), e);
                None
            }
        }
    }

    fn switch_to_window(&self, handle: &str) {
        debug!("Switching focus back to window {}", handle);
        match Command::new(&self.window_switcher)
            .arg(handle)
            .stdin(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("Window switch to {} failed: {}", handle, status),
            Err(e) => warn!("Failed to run {}: {}", self.window_switcher.display(), e),
        }
    }
}

fn read_handshake_line(mut reader: impl BufRead) -> Result<Handshake> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(ConsoleError::handshake("terminal closed the channel"));
    }
    debug!("Handshake line: {:?}", line);
    line.parse()
}

impl Multiplexer for GuiMultiplexer<'_> {
    fn kind(&self) -> MultiplexerKind {
        MultiplexerKind::Gui
    }

    fn run_module(&self, name: &str, args: &[String]) -> Result<ModuleResult> {
        let handle = if self.window_switcher.exists() {
            self.capture_active_window()
        } else {
            warn!("Window switch helper {} is missing", self.window_switcher.display());
            let mut out = std::io::stdout();
            let _ = writeln!(
                out,
                "The installer window will not be raised automatically ({} is missing).\n\
                 Switch to the installer window manually.",
                self.window_switcher.display()
            );
            let _ = out.flush();
            std::thread::sleep(self.fallback_delay);
            None
        };

        let result = self.runner.run_module(name, args);

        if let Some(handle) = handle {
            self.switch_to_window(&handle);
        }
        result
    }
}
