//! Session bookkeeping and the interactive read loop.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::dispatcher::{CommandOutcome, Dispatcher};
use crate::error::{ConsoleError, Result};
use crate::host::Multiplexer;

static SESSION_OPEN: AtomicBool = AtomicBool::new(false);

/// Prompt printed before every command
pub const PROMPT: &str = "console> ";

/// Marks the process as having an open console session.
///
/// Only one session may be open at a time; the flag is cleared on drop.
#[derive(Debug)]
pub struct SessionLock {
    _private: (),
}

impl SessionLock {
    pub fn acquire() -> Result<Self> {
        SESSION_OPEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ConsoleError::SessionActive)?;
        debug!("Console session lock acquired");
        Ok(Self { _private: () })
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        SESSION_OPEN.store(false, Ordering::Release);
        debug!("Console session lock released");
    }
}

pub fn is_session_open() -> bool {
    SESSION_OPEN.load(Ordering::Acquire)
}

/// True for input that closes the console; arguments after the word are ignored
pub fn is_exit_sentinel(line: &str) -> bool {
    matches!(line.split_whitespace().next(), Some("quit" | "exit"))
}

/// Read commands until the exit sentinel or end of input.
///
/// Returns the number of commands that were not recognized.
pub fn run_loop<R: BufRead>(
    dispatcher: &Dispatcher,
    mux: &dyn Multiplexer,
    mut input: R,
    out: &mut dyn Write,
) -> Result<usize> {
    dispatcher.welcome(out)?;
    let mut unknown = 0;
    let mut line = String::new();

    loop {
        write!(out, "{}", PROMPT)?;
        out.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            break;
        }
        if is_exit_sentinel(&line) {
            break;
        }
        if dispatcher.execute(&line, mux, out)? == CommandOutcome::Unknown {
            unknown += 1;
        }
    }

    info!("Console loop finished ({} unknown command(s))", unknown);
    Ok(unknown)
}

/// Run the loop on the process's (possibly redirected) fd 0 and stdout
pub fn run_stdio(dispatcher: &Dispatcher, mux: &dyn Multiplexer) -> Result<usize> {
    run_on_fd(dispatcher, mux, std::io::stdin().as_fd(), &mut std::io::stdout())
}

/// Run the loop reading from a duplicate of `input`.
///
/// The read buffer belongs to this session and is dropped with it, so input
/// typed after the exit sentinel never reaches later readers of the fd.
pub fn run_on_fd(
    dispatcher: &Dispatcher,
    mux: &dyn Multiplexer,
    input: BorrowedFd<'_>,
    out: &mut dyn Write,
) -> Result<usize> {
    let reader = BufReader::new(File::from(input.try_clone_to_owned()?));
    run_loop(dispatcher, mux, reader, out)
}
