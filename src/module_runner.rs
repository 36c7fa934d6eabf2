//! Installer module execution through an external client program.
//!
//! The standalone binary has no in-process installer framework, so modules are
//! run through a client command: `<module_command...> <name> <args...>`.
//! The client inherits the terminal (stdin/stderr) so interactive modules work
//! and reports its result map as a JSON object on stdout.

use std::process::{Command, Stdio};
use tracing::{info, warn};

use crate::error::{ConsoleError, Result};
use crate::host::{ModuleResult, ModuleRunner};

/// Runs installer modules by spawning the configured client command
#[derive(Debug, Clone)]
pub struct ExecModuleRunner {
    command: Vec<String>,
}

impl ExecModuleRunner {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl ModuleRunner for ExecModuleRunner {
    fn run_module(&self, name: &str, args: &[String]) -> Result<ModuleResult> {
        let (program, prefix) = self
            .command
            .split_first()
            .ok_or_else(|| ConsoleError::module("no module command configured"))?;

        info!("run_module: {} {:?} via {} {:?}", name, args, program, prefix);

        let output = Command::new(program)
            .args(prefix)
            .arg(name)
            .args(args)
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .stdout(Stdio::piped())
            .output()
            .map_err(|e| ConsoleError::module(format!("Failed to spawn {}: {}", program, e)))?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!("Module {} failed with exit code {}", name, code);
            return Err(ConsoleError::module(format!(
                "{} failed (exit code {})",
                name, code
            )));
        }

        let result = parse_module_result(&output.stdout)?;
        info!("Module {} finished with {} result key(s)", name, result.len());
        Ok(result)
    }
}

/// Parse the client's stdout; silence means an empty result map
fn parse_module_result(stdout: &[u8]) -> Result<ModuleResult> {
    let text = String::from_utf8_lossy(stdout);
    if text.trim().is_empty() {
        return Ok(ModuleResult::new());
    }
    match serde_json::from_str::<serde_json::Value>(&text)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(ConsoleError::module(format!(
            "module result is not a JSON object: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_module_result(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_object_output() {
        let result = parse_module_result(br#"{"result": "next", "changed": true}"#).unwrap();
        assert_eq!(result["result"], "next");
        assert_eq!(result["changed"], true);
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            parse_module_result(b"[1, 2]"),
            Err(ConsoleError::Module(_))
        ));
        assert!(matches!(
            parse_module_result(b"not json"),
            Err(ConsoleError::Json(_))
        ));
    }

    #[test]
    fn test_runner_passes_name_and_args() {
        let runner = ExecModuleRunner::new(vec![
            "bash".into(),
            "-c".into(),
            r#"printf '{"module": "%s", "arg": "%s"}' "$0" "$1""#.into(),
        ]);
        let result = runner.run_module("inst_lan", &["--dry".into()]).unwrap();
        assert_eq!(result["module"], "inst_lan");
        assert_eq!(result["arg"], "--dry");
    }

    #[test]
    fn test_runner_reports_failure() {
        let runner = ExecModuleRunner::new(vec!["bash".into(), "-c".into(), "exit 3".into()]);
        let err = runner.run_module("inst_disk", &[]).unwrap_err();
        assert!(err.to_string().contains("exit code 3"));
    }

    #[test]
    fn test_runner_without_command() {
        let runner = ExecModuleRunner::new(vec![]);
        assert!(runner.run_module("inst_lan", &[]).is_err());
    }
}
