//! Seams between the console and the installer that hosts it.
//!
//! The console never draws installer dialogs or knows what a module does. It
//! only needs to ask the host a few questions and to sequence module runs
//! around terminal ownership. Everything else stays behind these traits.

use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use nix::sys::termios::{self, SetArg, Termios};
use std::cell::{Cell, RefCell};
use std::io::{IsTerminal, stdin, stdout};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::error::{ConsoleError, Result};

/// Result map returned by an installer module
pub type ModuleResult = serde_json::Map<String, serde_json::Value>;

/// What the console needs from the installer UI
pub trait HostUi {
    /// True when the top-level surface is a wizard dialog and no popup is open
    fn is_wizard_dialog(&self) -> bool;

    /// Show a message dialog to the user
    fn show_message(&self, message: &str);

    /// Stop drawing on the shared terminal
    fn release_screen(&self) -> Result<()>;

    /// Take the shared terminal back and redraw
    fn acquire_screen(&self) -> Result<()>;
}

/// Synchronous entry point for running a named installer module
pub trait ModuleRunner {
    fn run_module(&self, name: &str, args: &[String]) -> Result<ModuleResult>;
}

/// Which flavour of terminal multiplexing a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MultiplexerKind {
    Gui,
    Text,
}

/// An open console session as seen by the code running inside it
///
/// Commands only get this view, so a running command can call back into the
/// installer without caring how the terminal was obtained.
pub trait Multiplexer {
    fn kind(&self) -> MultiplexerKind;

    /// Run an installer module, handling screen or window focus around it
    fn run_module(&self, name: &str, args: &[String]) -> Result<ModuleResult>;
}

/// Host used by the standalone binary.
///
/// There is no installer UI behind it: the "rendering layer" is just the
/// alternate screen of the controlling terminal, driven through crossterm,
/// with the line discipline in raw mode while the host owns it. Releasing
/// reapplies the cooked settings captured on the first acquire, whatever a
/// console session did to the terminal in between.
#[derive(Debug, Default)]
pub struct StandaloneHost {
    on_alternate_screen: Cell<bool>,
    cooked: RefCell<Option<Termios>>,
}

impl StandaloneHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Own the screen until the returned guard is dropped
    pub fn hold_screen(&self) -> Result<ScreenHold<'_>> {
        self.acquire_screen()?;
        Ok(ScreenHold(self))
    }

    fn enter_raw_mode(&self) -> Result<()> {
        let stdin = stdin();
        if !stdin.is_terminal() {
            debug!("stdin is not a terminal, leaving line discipline alone");
            return Ok(());
        }
        let mut cooked = self.cooked.borrow_mut();
        let base = match cooked.as_ref() {
            Some(termios) => termios.clone(),
            None => cooked.insert(termios::tcgetattr(&stdin)?).clone(),
        };
        let mut raw = base;
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&stdin, SetArg::TCSADRAIN, &raw)?;
        Ok(())
    }

    fn leave_raw_mode(&self) -> Result<()> {
        if let Some(cooked) = self.cooked.borrow().as_ref() {
            termios::tcsetattr(stdin(), SetArg::TCSADRAIN, cooked)?;
        }
        Ok(())
    }
}

impl HostUi for StandaloneHost {
    fn is_wizard_dialog(&self) -> bool {
        true
    }

    fn show_message(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn release_screen(&self) -> Result<()> {
        if self.on_alternate_screen.replace(false) {
            debug!("Leaving alternate screen");
            crossterm::execute!(stdout(), LeaveAlternateScreen)
                .map_err(|e| ConsoleError::terminal(format!("Failed to leave alternate screen: {}", e)))?;
            self.leave_raw_mode()?;
        }
        Ok(())
    }

    fn acquire_screen(&self) -> Result<()> {
        if !self.on_alternate_screen.replace(true) {
            debug!("Entering alternate screen");
            self.enter_raw_mode()?;
            crossterm::execute!(stdout(), EnterAlternateScreen)
                .map_err(|e| ConsoleError::terminal(format!("Failed to enter alternate screen: {}", e)))?;
        }
        Ok(())
    }
}

/// Screen ownership of a [`StandaloneHost`]; dropping it releases the screen
pub struct ScreenHold<'a>(&'a StandaloneHost);

impl Drop for ScreenHold<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.release_screen() {
            warn!("Failed to release the screen: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplexer_kind_strings() {
        assert_eq!(MultiplexerKind::Gui.to_string(), "gui");
        assert_eq!("text".parse::<MultiplexerKind>().unwrap(), MultiplexerKind::Text);
        assert!("tty".parse::<MultiplexerKind>().is_err());
    }

    #[test]
    fn test_standalone_release_without_acquire_is_noop() {
        let host = StandaloneHost::new();
        assert!(host.is_wizard_dialog());
        assert!(host.release_screen().is_ok());
    }
}
