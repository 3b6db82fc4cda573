use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml::Value;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cli::CalculatorArgs;
use crate::invocation::calculator_file_name;

pub const DEFAULT_STACK_THREADS: u32 = 250;

/// Inline YAML merged over the config file.
pub const CONFIG_OVERRIDE_ENV: &str = "MEMORY_CALCULATOR_CONFIG";
pub const CONFIG_FILE_ENV: &str = "MEMORY_CALCULATOR_CONFIG_FILE";
pub const CALCULATOR_ENV: &str = "MEMORY_CALCULATOR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config from {origin}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Sizing parameters handed to the memory calculator alongside the class count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculatorConfig {
    /// Used instead of counting the application when set, including `0`.
    pub class_count: Option<u64>,
    pub stack_threads: u32,
    pub vm_options: IndexMap<String, String>,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            class_count: None,
            stack_threads: DEFAULT_STACK_THREADS,
            vm_options: IndexMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigLayer {
    class_count: Option<u64>,
    stack_threads: Option<u32>,
    vm_options: Option<IndexMap<String, Value>>,
}

fn parse_layer(origin: &str, text: &str) -> Result<ConfigLayer, ConfigError> {
    if text.trim().is_empty() {
        return Ok(ConfigLayer::default());
    }
    serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })
}

/// Floats keep a fractional digit (`1.0` stays `1.0`); a bare key renders empty.
fn render_option(name: &str, value: Value) -> Result<String, ConfigError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(v) => Ok(v.to_string()),
        Value::Number(v) => Ok(v.to_string()),
        Value::String(v) => Ok(v),
        _ => Err(ConfigError::Invalid(format!(
            "vm_options value for {name:?} must be a scalar"
        ))),
    }
}

impl CalculatorConfig {
    /// Defaults overlaid with one YAML (or JSON) document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Self::default().with_overrides("config", text)
    }

    /// Merge a YAML document over this config. Only the keys it names change;
    /// `vm_options` entries are merged one by one, keeping existing positions.
    pub fn with_overrides(mut self, origin: &str, text: &str) -> Result<Self, ConfigError> {
        self.apply(parse_layer(origin, text)?)?;
        self.validate()?;
        Ok(self)
    }

    /// Defaults, then the config file (if any), then [`CONFIG_OVERRIDE_ENV`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, env::var(CONFIG_OVERRIDE_ENV).ok().as_deref())
    }

    pub fn load_from(path: Option<&Path>, overrides: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            config.apply(parse_layer(&path.display().to_string(), &text)?)?;
        }

        if let Some(text) = overrides {
            config.apply(parse_layer(CONFIG_OVERRIDE_ENV, text)?)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_threads == 0 {
            return Err(ConfigError::Invalid(
                "stack_threads must be greater than zero".to_string(),
            ));
        }
        for name in self.vm_options.keys() {
            if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '"') {
                return Err(ConfigError::Invalid(format!(
                    "vm_options name {name:?} must be non-empty without whitespace or quotes"
                )));
            }
        }
        Ok(())
    }

    fn apply(&mut self, layer: ConfigLayer) -> Result<(), ConfigError> {
        if let Some(class_count) = layer.class_count {
            self.class_count = Some(class_count);
        }
        if let Some(stack_threads) = layer.stack_threads {
            self.stack_threads = stack_threads;
        }
        for (name, value) in layer.vm_options.into_iter().flatten() {
            let value = render_option(&name, value)?;
            self.vm_options.insert(name, value);
        }
        Ok(())
    }
}

/// `--config`, then [`CONFIG_FILE_ENV`], then `<config dir>/memory-calculator/config.yml`
/// when it exists.
pub fn resolve_config_path(flag: Option<&Path>) -> Option<PathBuf> {
    resolve_config_path_from(
        flag,
        env::var_os(CONFIG_FILE_ENV).map(PathBuf::from),
        default_config_path(),
    )
}

fn resolve_config_path_from(
    flag: Option<&Path>,
    from_env: Option<PathBuf>,
    default: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(p) = flag {
        return Some(p.to_path_buf());
    }

    if let Some(p) = from_env {
        return Some(p);
    }

    default.filter(|p| p.exists())
}

pub fn resolve_calculator_path(args: &CalculatorArgs) -> Result<PathBuf> {
    resolve_calculator_path_from(args, env::var_os(CALCULATOR_ENV).map(PathBuf::from))
}

fn resolve_calculator_path_from(args: &CalculatorArgs, from_env: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(p) = args.calculator.clone() {
        return Ok(p);
    }

    if let Some(p) = from_env {
        return Ok(p);
    }

    let sandbox = args.sandbox.as_deref().with_context(|| {
        format!("No memory calculator given (use --calculator, --sandbox or {CALCULATOR_ENV})")
    })?;
    let version = args
        .calculator_version
        .as_deref()
        .context("--sandbox requires --calculator-version")?;
    Ok(sandbox.join("bin").join(calculator_file_name(version)))
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("memory-calculator").join("config.yml"))
}
