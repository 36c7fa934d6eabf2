//! Plugin discovery and instantiation.
//!
//! Plugins are JSON definition files found under a list of search roots. Roots
//! are searched in priority order and a file name seen once shadows the same
//! name in every later root, so `/etc` can override what the installation
//! media ships under `/usr/share`.
//!
//! A definition names a `kind`. Kinds are mapped to factories in an explicit
//! [`PluginRegistry`] that is filled at startup; there is no self-registration.
//!
//! ```json
//! {
//!   "kind": "module",
//!   "order": 200,
//!   "widget": { "label": "Network Settings", "help": "Configure network cards" },
//!   "command": { "name": "configure_network", "description": "Run the network setup" },
//!   "target": "inst_lan",
//!   "args": []
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ConsoleError, Result};
use crate::host::Multiplexer;

/// File name pattern for plugin definitions inside a search root
pub const PLUGIN_PATTERN: &str = "*.json";

/// Order used when a definition does not specify one
pub const DEFAULT_ORDER: i32 = 1000;

/// A configuration menu entry contributed by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuWidget {
    pub label: String,
    #[serde(default)]
    pub help: String,
}

/// Console command metadata contributed by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
}

/// On-disk plugin definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDefinition {
    pub kind: String,
    #[serde(default = "default_order")]
    pub order: i32,
    #[serde(default)]
    pub widget: Option<MenuWidget>,
    #[serde(default)]
    pub command: Option<CommandSpec>,
    /// Module name or program path, depending on `kind`
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_order() -> i32 {
    DEFAULT_ORDER
}

/// What a plugin command does when invoked from the console
pub trait PluginAction {
    fn run(&self, mux: &dyn Multiplexer, args: &[String], out: &mut dyn Write) -> Result<()>;
}

/// Builds the action for a definition; `Err` carries the reason it was rejected
pub type PluginFactory = fn(&PluginDefinition) -> std::result::Result<Box<dyn PluginAction>, String>;

/// A console command provided by a plugin
pub struct PluginCommand {
    pub name: String,
    pub description: String,
    action: Box<dyn PluginAction>,
}

impl PluginCommand {
    pub fn new(spec: CommandSpec, action: Box<dyn PluginAction>) -> Self {
        Self {
            name: spec.name,
            description: spec.description,
            action,
        }
    }

    pub fn run(&self, mux: &dyn Multiplexer, args: &[String], out: &mut dyn Write) -> Result<()> {
        self.action.run(mux, args, out)
    }
}

impl std::fmt::Debug for PluginCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCommand")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A loaded plugin
#[derive(Debug)]
pub struct Plugin {
    /// File stem of the definition; stable secondary sort key
    pub id: String,
    pub order: i32,
    pub widget: Option<MenuWidget>,
    pub command: Option<PluginCommand>,
}

/// Runs an installer module through the open session
#[derive(Debug)]
struct ModuleAction {
    module: String,
    args: Vec<String>,
}

impl PluginAction for ModuleAction {
    fn run(&self, mux: &dyn Multiplexer, args: &[String], out: &mut dyn Write) -> Result<()> {
        let mut all_args = self.args.clone();
        all_args.extend_from_slice(args);
        let result = mux.run_module(&self.module, &all_args)?;
        if !result.is_empty() {
            writeln!(
                out,
                "{} returned {}",
                self.module,
                serde_json::Value::Object(result)
            )?;
        }
        Ok(())
    }
}

fn module_factory(def: &PluginDefinition) -> std::result::Result<Box<dyn PluginAction>, String> {
    if def.target.trim().is_empty() {
        return Err("module plugins need a target module name".to_string());
    }
    Ok(Box::new(ModuleAction {
        module: def.target.clone(),
        args: def.args.clone(),
    }))
}

/// Runs an external program on the console terminal
#[derive(Debug)]
struct ExecAction {
    program: PathBuf,
    args: Vec<String>,
}

impl PluginAction for ExecAction {
    fn run(&self, _mux: &dyn Multiplexer, args: &[String], _out: &mut dyn Write) -> Result<()> {
        info!("Running {:?} {:?} {:?}", self.program, self.args, args);
        let status = Command::new(&self.program)
            .args(&self.args)
            .args(args)
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(ConsoleError::module(format!(
                "{} exited with code {}",
                self.program.display(),
                status.code().unwrap_or(-1)
            )))
        }
    }
}

fn exec_factory(def: &PluginDefinition) -> std::result::Result<Box<dyn PluginAction>, String> {
    if def.target.trim().is_empty() {
        return Err("exec plugins need a target program".to_string());
    }
    Ok(Box::new(ExecAction {
        program: PathBuf::from(&def.target),
        args: def.args.clone(),
    }))
}

/// Mapping from plugin kind to the factory building its action
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// An empty registry; nothing can be loaded until kinds are registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the kinds shipped with the console: `module` and `exec`
    pub fn with_builtin_kinds() -> Self {
        let mut registry = Self::new();
        registry.register("module", module_factory);
        registry.register("exec", exec_factory);
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, factory: PluginFactory) {
        let kind = kind.into();
        debug!("Registered plugin kind '{}'", kind);
        self.factories.insert(kind, factory);
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Turn a parsed definition into a plugin
    pub fn instantiate(&self, id: &str, def: PluginDefinition) -> std::result::Result<Plugin, String> {
        let factory = self
            .factories
            .get(&def.kind)
            .ok_or_else(|| format!("unknown plugin kind '{}'", def.kind))?;

        if def.widget.is_none() && def.command.is_none() {
            return Err("plugin contributes neither a widget nor a command".to_string());
        }

        let command = match def.command.clone() {
            Some(spec) => {
                if spec.name.trim().is_empty() || spec.name.contains(char::is_whitespace) {
                    return Err(format!("invalid command name '{}'", spec.name));
                }
                Some(PluginCommand::new(spec, factory(&def)?))
            }
            None => None,
        };

        Ok(Plugin {
            id: id.to_string(),
            order: def.order,
            widget: def.widget,
            command,
        })
    }

    /// Read, parse and instantiate one definition file
    pub fn load_file(&self, path: &Path) -> Result<Plugin> {
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| ConsoleError::plugin(path, "no file name"))?;

        let content = fs::read_to_string(path)
            .map_err(|e| ConsoleError::plugin(path, e.to_string()))?;
        let def: PluginDefinition = serde_json::from_str(&content)
            .map_err(|e| ConsoleError::plugin(path, e.to_string()))?;

        self.instantiate(&id, def)
            .map_err(|reason| ConsoleError::plugin(path, reason))
    }
}

/// List definition files under `roots`, honoring root precedence.
///
/// Files are listed per root (sorted by glob), concatenated in root order and
/// de-duplicated by file name, first occurrence wins.
pub fn discover_plugin_files(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for root in roots {
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&root.to_string_lossy()),
            PLUGIN_PATTERN
        );
        let entries = glob::glob(&pattern)
            .map_err(|e| ConsoleError::config(format!("bad plugin root {:?}: {}", root, e)))?;
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => found.push(path),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable plugin path: {}", e),
            }
        }
    }
    debug!("Discovered plugin files: {:?}", found);

    let mut seen = HashSet::new();
    found.retain(|path| match path.file_name() {
        Some(name) => seen.insert(name.to_os_string()),
        None => false,
    });
    Ok(found)
}

/// Discover plugin files and load each survivor exactly once with `load`.
/// The first load failure aborts discovery.
pub fn load_plugins_with<F>(roots: &[PathBuf], mut load: F) -> Result<Vec<Plugin>>
where
    F: FnMut(&Path) -> Result<Plugin>,
{
    let files = discover_plugin_files(roots)?;
    let mut plugins = Vec::with_capacity(files.len());
    for path in &files {
        info!("Loading plugin {}", path.display());
        plugins.push(load(path)?);
    }
    Ok(plugins)
}

/// Discover and load plugins using the registry's factories
pub fn load_plugins(roots: &[PathBuf], registry: &PluginRegistry) -> Result<Vec<Plugin>> {
    load_plugins_with(roots, |path| registry.load_file(path))
}

/// One row of the configuration menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub plugin_id: String,
    pub order: i32,
    pub widget: MenuWidget,
}

/// Widgets contributed by plugins, in presentation order
#[derive(Debug, Clone, Default)]
pub struct ConfigMenu {
    entries: Vec<MenuEntry>,
}

impl ConfigMenu {
    /// Collect widgets sorted by order, then plugin id
    pub fn from_plugins(plugins: &[Plugin]) -> Self {
        let mut entries: Vec<MenuEntry> = plugins
            .iter()
            .filter_map(|p| {
                p.widget.as_ref().map(|w| MenuEntry {
                    plugin_id: p.id.clone(),
                    order: p.order,
                    widget: w.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.plugin_id.cmp(&b.plugin_id)));
        Self { entries }
    }

    /// Discover plugins afresh and build the menu from them
    pub fn discover(roots: &[PathBuf], registry: &PluginRegistry) -> Result<Self> {
        Ok(Self::from_plugins(&load_plugins(roots, registry)?))
    }

    pub fn entries(&self) -> &[MenuEntry] {
        &self.entries
    }

    pub fn render(&self, out: &mut dyn Write) -> std::io::Result<()> {
        if self.entries.is_empty() {
            return writeln!(out, "No configuration plugins installed.");
        }
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(out, "{:>2}. {}", i + 1, entry.widget.label)?;
            if !entry.widget.help.is_empty() {
                writeln!(out, "    {}", entry.widget.help)?;
            }
        }
        Ok(())
    }
}
