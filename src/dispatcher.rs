//! Console command dispatcher.
//!
//! The command set is closed: built-in commands plus the commands contributed
//! by plugins loaded when the dispatcher is built. Anything else ends in
//! [`CommandOutcome::Unknown`], which is reported to the user and never
//! propagated as an error.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, error, info, warn};

use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::host::Multiplexer;
use crate::plugins::{self, ConfigMenu, Plugin, PluginCommand, PluginRegistry};

/// Commands available in every session, listed in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinCommand {
    Commands,
    Menu,
    Shell,
    Quit,
}

impl BuiltinCommand {
    pub fn name(&self) -> &'static str {
        (*self).into()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Commands => "Print the available commands",
            Self::Menu => "Show the configuration entries contributed by plugins",
            Self::Shell => {
                "Start an interactive system shell on this terminal\n\
                 (exit the shell to get back to the console)"
            }
            Self::Quit => "Close the console and return to the installer (alias: exit)",
        }
    }

    fn lookup(name: &str) -> Option<Self> {
        match name {
            "exit" => Some(Self::Quit),
            _ => Self::iter().find(|c| c.name() == name),
        }
    }
}

/// How a single input line was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Blank input
    Empty,
    Executed,
    /// The command ran and failed; the failure was reported inline
    Failed,
    Unknown,
}

/// Resolves console input to built-in or plugin commands
#[derive(Debug)]
pub struct Dispatcher {
    commands: BTreeMap<String, PluginCommand>,
    menu: ConfigMenu,
    shell: PathBuf,
}

impl Dispatcher {
    /// Load all plugins from the configured roots and build the command set
    pub fn load(config: &ConsoleConfig, registry: &PluginRegistry) -> Result<Self> {
        let plugins = plugins::load_plugins(&config.plugin_roots, registry)?;
        Self::from_plugins(plugins, config.shell.clone())
    }

    pub fn from_plugins(plugins: Vec<Plugin>, shell: PathBuf) -> Result<Self> {
        let menu = ConfigMenu::from_plugins(&plugins);
        let mut commands = BTreeMap::new();

        for plugin in plugins {
            let Some(command) = plugin.command else {
                continue;
            };
            if BuiltinCommand::lookup(&command.name).is_some() {
                return Err(ConsoleError::plugin(
                    format!("{}.json", plugin.id),
                    format!("command '{}' shadows a built-in command", command.name),
                ));
            }
            if commands.contains_key(&command.name) {
                warn!(
                    "Plugin {} redefines command '{}', keeping the earlier definition",
                    plugin.id, command.name
                );
                continue;
            }
            commands.insert(command.name.clone(), command);
        }

        debug!("Dispatcher ready with {} plugin command(s)", commands.len());
        Ok(Self {
            commands,
            menu,
            shell,
        })
    }

    /// Names of all commands in listing order
    pub fn command_names(&self) -> Vec<&str> {
        BuiltinCommand::iter()
            .map(|c| c.name())
            .chain(self.commands.keys().map(String::as_str))
            .collect()
    }

    pub fn menu(&self) -> &ConfigMenu {
        &self.menu
    }

    pub fn welcome(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "---- Installer Console ----")?;
        writeln!(out)?;
        writeln!(out, "Type \"commands\" to list the available commands.")?;
        writeln!(out, "Type \"shell\" to start a system shell, \"quit\" to close the console.")?;
        writeln!(out)
    }

    /// Print `<name> - <description>` for every command
    pub fn list_commands(&self, out: &mut dyn Write) -> std::io::Result<()> {
        for builtin in BuiltinCommand::iter() {
            write_command_line(out, builtin.name(), builtin.description())?;
        }
        for command in self.commands.values() {
            write_command_line(out, &command.name, &command.description)?;
        }
        Ok(())
    }

    /// Handle one line of input
    pub fn execute(&self, line: &str, mux: &dyn Multiplexer, out: &mut dyn Write) -> Result<CommandOutcome> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(CommandOutcome::Empty);
        };
        let args: Vec<String> = words.map(str::to_string).collect();

        let result = if let Some(builtin) = BuiltinCommand::lookup(name) {
            debug!("Running built-in command {}", name);
            self.run_builtin(builtin, out)
        } else if let Some(command) = self.commands.get(name) {
            info!("Running plugin command {} {:?}", name, args);
            command.run(mux, &args, out)
        } else {
            warn!("Unknown console command: {}", name);
            writeln!(out, "Unknown command: {}", name)?;
            writeln!(out)?;
            self.list_commands(out)?;
            return Ok(CommandOutcome::Unknown);
        };

        match result {
            Ok(()) => Ok(CommandOutcome::Executed),
            Err(e) => {
                error!("Command {} failed: {}", name, e);
                writeln!(out, "Command {} failed: {}", name, e)?;
                Ok(CommandOutcome::Failed)
            }
        }
    }

    fn run_builtin(&self, builtin: BuiltinCommand, out: &mut dyn Write) -> Result<()> {
        match builtin {
            BuiltinCommand::Commands => self.list_commands(out)?,
            BuiltinCommand::Menu => self.menu.render(out)?,
            BuiltinCommand::Shell => self.shell(out)?,
            // The session loop consumes the exit sentinel before dispatching
            BuiltinCommand::Quit => {}
        }
        Ok(())
    }

    /// Hand the terminal to an interactive shell until it exits
    pub fn shell(&self, out: &mut dyn Write) -> Result<()> {
        out.flush()?;
        info!("Starting shell {}", self.shell.display());
        let status = Command::new(&self.shell).status()?;
        info!("Shell exited with {}", status);
        Ok(())
    }
}

fn write_command_line(out: &mut dyn Write, name: &str, description: &str) -> std::io::Result<()> {
    let mut lines = description.lines();
    writeln!(out, "{} - {}", name, lines.next().unwrap_or_default())?;
    let indent = " ".repeat(name.len() + 3);
    for line in lines {
        writeln!(out, "{}{}", indent, line.trim_start())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ModuleResult, MultiplexerKind};
    use crate::plugins::{CommandSpec, MenuWidget, PluginDefinition};
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingMux {
        calls: RefCell<Vec<(String, Vec<String>)>>,
    }

    impl Multiplexer for RecordingMux {
        fn kind(&self) -> MultiplexerKind {
            MultiplexerKind::Text
        }

        fn run_module(&self, name: &str, args: &[String]) -> Result<ModuleResult> {
            self.calls.borrow_mut().push((name.to_string(), args.to_vec()));
            if name == "broken" {
                return Err(ConsoleError::module("broken module"));
            }
            Ok(ModuleResult::new())
        }
    }

    fn module_plugin(id: &str, command: &str, module: &str) -> Plugin {
        let def = PluginDefinition {
            kind: "module".into(),
            order: 10,
            widget: Some(MenuWidget {
                label: format!("{} settings", id),
                help: String::new(),
            }),
            command: Some(CommandSpec {
                name: command.into(),
                description: format!("Run {}", module),
            }),
            target: module.into(),
            args: vec!["--from-console".into()],
        };
        PluginRegistry::with_builtin_kinds().instantiate(id, def).unwrap()
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::from_plugins(
            vec![
                module_plugin("network", "network", "inst_lan"),
                module_plugin("disks", "disks", "inst_disk"),
                module_plugin("bad", "broken", "broken"),
            ],
            PathBuf::from("/bin/true"),
        )
        .unwrap()
    }

    fn output_of(f: impl FnOnce(&mut Vec<u8>)) -> String {
        let mut out = Vec::new();
        f(&mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_builtins_first_then_plugins_alphabetically() {
        let d = dispatcher();
        assert_eq!(
            d.command_names(),
            vec!["commands", "menu", "shell", "quit", "broken", "disks", "network"]
        );
    }

    #[test]
    fn test_multiline_descriptions_are_indented() {
        let text = output_of(|out| dispatcher().list_commands(out).unwrap());
        assert!(text.contains("shell - Start an interactive system shell on this terminal\n"));
        assert!(text.contains("\n        (exit the shell to get back to the console)\n"));
        assert!(text.contains("network - Run inst_lan\n"));
    }

    #[test]
    fn test_plugin_command_runs_module_with_args() {
        let d = dispatcher();
        let mux = RecordingMux::default();
        let mut out = Vec::new();

        let outcome = d.execute("network --verbose", &mux, &mut out).unwrap();
        assert_eq!(outcome, CommandOutcome::Executed);
        assert_eq!(
            mux.calls.borrow().as_slice(),
            &[(
                "inst_lan".to_string(),
                vec!["--from-console".to_string(), "--verbose".to_string()]
            )]
        );
    }

    #[test]
    fn test_failed_command_is_reported_inline() {
        let d = dispatcher();
        let mux = RecordingMux::default();
        let text = output_of(|out| {
            assert_eq!(d.execute("broken", &mux, out).unwrap(), CommandOutcome::Failed);
        });
        assert!(text.contains("Command broken failed"));
    }

    #[test]
    fn test_blank_input_and_quit_do_nothing() {
        let d = dispatcher();
        let mux = RecordingMux::default();
        let mut out = Vec::new();
        assert_eq!(d.execute("   ", &mux, &mut out).unwrap(), CommandOutcome::Empty);
        assert_eq!(d.execute("exit", &mux, &mut out).unwrap(), CommandOutcome::Executed);
        assert!(out.is_empty());
    }

    #[test]
    fn test_plugin_may_not_shadow_builtin() {
        let result = Dispatcher::from_plugins(
            vec![module_plugin("evil", "shell", "inst_lan")],
            PathBuf::from("/bin/true"),
        );
        assert!(matches!(result, Err(ConsoleError::Plugin { .. })));
    }

    #[test]
    fn test_duplicate_plugin_command_keeps_first() {
        let d = Dispatcher::from_plugins(
            vec![
                module_plugin("a", "network", "inst_lan"),
                module_plugin("b", "network", "inst_other"),
            ],
            PathBuf::from("/bin/true"),
        )
        .unwrap();
        let mux = RecordingMux::default();
        d.execute("network", &mux, &mut Vec::new()).unwrap();
        assert_eq!(mux.calls.borrow()[0].0, "inst_lan");
        assert_eq!(d.menu().entries().len(), 2);
    }

    #[test]
    fn test_shell_builtin_runs_configured_shell() {
        let d = Dispatcher::from_plugins(vec![], PathBuf::from("/bin/true")).unwrap();
        let mux = RecordingMux::default();
        let outcome = d.execute("shell", &mux, &mut Vec::new()).unwrap();
        assert_eq!(outcome, CommandOutcome::Executed);
    }
}
