//! Entry point used by the installer UI to open a console.

use tracing::info;

use crate::config::ConsoleConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::gui::GuiMultiplexer;
use crate::host::{HostUi, ModuleRunner, MultiplexerKind};
use crate::plugins::PluginRegistry;
use crate::session;
use crate::textmode::{Stty, TextModeMultiplexer};

/// Pick the multiplexer for the current environment: a window under X, the
/// installer terminal otherwise
pub fn detect_kind() -> MultiplexerKind {
    match std::env::var_os("DISPLAY") {
        Some(display) if !display.is_empty() => MultiplexerKind::Gui,
        _ => MultiplexerKind::Text,
    }
}

/// Load plugins, open a console session and run the command loop in it.
///
/// Returns the number of unrecognized commands entered during the session.
pub fn start(
    host: &dyn HostUi,
    runner: &dyn ModuleRunner,
    config: &ConsoleConfig,
    registry: &PluginRegistry,
    kind: MultiplexerKind,
) -> Result<usize> {
    let dispatcher = Dispatcher::load(config, registry)?;
    info!("Starting {} console", kind);

    match kind {
        MultiplexerKind::Gui => {
            GuiMultiplexer::new(host, runner, config).open(|mux| session::run_stdio(&dispatcher, mux))
        }
        MultiplexerKind::Text => {
            let settings = Box::new(Stty::new(&config.stty_program));
            TextModeMultiplexer::new(host, runner, settings)
                .open(|mux| session::run_stdio(&dispatcher, mux))
        }
    }
}
