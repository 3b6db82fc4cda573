use anyhow::{Context, Result, bail};
use std::process::Command;
use tracing::debug;

/// Settings reported by the calculator.
#[derive(Debug, Clone)]
pub struct Settings {
    pub settings: String,
    pub diagnostics: Option<String>,
}

/// Runs a calculator invocation through a POSIX shell so `$MEMORY_LIMIT` and
/// friends are expanded at run time.
#[derive(Debug, Clone)]
pub struct Calculator {
    shell: String,
    envs: Vec<(String, String)>,
}

pub const SHELL_ENV: &str = "MEMORY_CALCULATOR_SHELL";

impl Default for Calculator {
    /// `$MEMORY_CALCULATOR_SHELL`, or `sh`.
    fn default() -> Self {
        Self::with_shell(std::env::var(SHELL_ENV).unwrap_or_else(|_| "sh".to_string()))
    }
}

impl Calculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            envs: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn show_settings(&self, invocation: &str) -> Result<Settings> {
        debug!(shell = %self.shell, invocation, "running memory calculator");
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(invocation)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .with_context(|| format!("Failed to execute {} for memory calculator", self.shell))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            bail!(
                "Memory calculator failed ({}): {}",
                output.status,
                stderr
            );
        }

        Ok(Settings {
            settings: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            diagnostics: Some(stderr).filter(|s| !s.is_empty()),
        })
    }
}
