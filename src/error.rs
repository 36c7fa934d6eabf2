//! Error handling module for the installer console
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Library code returns these types; the binary wraps them with anyhow context.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for console sessions
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// IO errors (pipes, tty devices, spawning helpers)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// OS-level errors from fd and signal calls
    #[error("System error: {0}")]
    Errno(#[from] nix::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The host UI is not in a state that allows opening a console
    #[error("Precondition not met: {0}")]
    Precondition(String),

    /// A console session is already open in this process
    #[error("A console session is already active")]
    SessionActive,

    /// The spawned terminal did not complete the handshake
    #[error("Terminal handshake failed: {0}")]
    Handshake(String),

    /// Terminal settings could not be saved or reapplied
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// An installer module could not be run
    #[error("Module error: {0}")]
    Module(String),

    /// A plugin definition could not be loaded
    #[error("Failed to load plugin {}: {reason}", path.display())]
    Plugin { path: PathBuf, reason: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for console operations
pub type Result<T> = std::result::Result<T, ConsoleError>;

// Convenient error constructors
impl ConsoleError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a handshake error
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Create a terminal error
    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    /// Create a module error
    pub fn module(msg: impl Into<String>) -> Self {
        Self::Module(msg.into())
    }

    /// Create a plugin load error
    pub fn plugin(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Plugin {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConsoleError::precondition("a popup is open");
        assert_eq!(err.to_string(), "Precondition not met: a popup is open");

        let err = ConsoleError::plugin("/usr/share/console/ssh.json", "unknown kind 'x'");
        assert_eq!(
            err.to_string(),
            "Failed to load plugin /usr/share/console/ssh.json: unknown kind 'x'"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such tty");
        let err: ConsoleError = io_err.into();
        assert!(matches!(err, ConsoleError::Io(_)));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(
            ConsoleError::handshake("eof"),
            ConsoleError::Handshake(_)
        ));
        assert!(matches!(
            ConsoleError::module("inst_lan failed"),
            ConsoleError::Module(_)
        ));
    }
}
