/*
 * Tether - Minimal Sandboxed Tool Agent
 * File Path: src/config.rs
 * Responsibility: YAML configuration structure, loading and environment overrides
 */
use crate::files::DEFAULT_MAX_FILE_CHARS;
use crate::runner::{
    DEFAULT_INTERPRETER, DEFAULT_RUN_TIMEOUT_SECS, DEFAULT_SCRIPT_EXTENSION, RunnerSettings,
};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_ITERATIONS: usize = 20;
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-001";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub gemini: GeminiConfig,
    pub sandbox: SandboxConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub root: PathBuf,
    pub max_file_chars: usize,
    pub run_timeout_secs: u64,
    pub script_extension: String,
    pub interpreter: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            max_file_chars: DEFAULT_MAX_FILE_CHARS,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            script_extension: DEFAULT_SCRIPT_EXTENSION.to_string(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            extension: self.script_extension.trim_start_matches('.').to_string(),
            interpreter: self.interpreter.clone(),
            timeout: Duration::from_secs(self.run_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_iterations: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// `~/.tether/tether.yml`, used when no `--config` is given.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tether").join("tether.yml"))
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file at {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .context("Failed to parse config file")?;
        Ok(config)
    }

    /// Explicit path if given, else the default file if present, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Apply `GEMINI_API_KEY` and the `TETHER_*` variables on top of the file values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|v| !v.is_empty()) {
            self.gemini.api_key = key;
        }
        if let Some(root) = lookup("TETHER_ROOT").filter(|v| !v.is_empty()) {
            self.sandbox.root = PathBuf::from(root);
        }
        if let Some(value) = lookup("TETHER_MAX_FILE_CHARS") {
            self.sandbox.max_file_chars = parse_env("TETHER_MAX_FILE_CHARS", &value)?;
        }
        if let Some(value) = lookup("TETHER_RUN_TIMEOUT_SECS") {
            self.sandbox.run_timeout_secs = parse_env("TETHER_RUN_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("TETHER_MAX_ITERATIONS") {
            self.runtime.max_iterations = parse_env("TETHER_MAX_ITERATIONS", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.gemini.api_key.trim().is_empty() {
            bail!("No Gemini API key configured. Set GEMINI_API_KEY or gemini.api_key in the config file.");
        }
        if self.sandbox.max_file_chars == 0 {
            bail!("sandbox.max_file_chars must be greater than zero");
        }
        if self.sandbox.run_timeout_secs == 0 {
            bail!("sandbox.run_timeout_secs must be greater than zero");
        }
        if self.sandbox.script_extension.trim_start_matches('.').is_empty() {
            bail!("sandbox.script_extension must not be empty");
        }
        Ok(())
    }
}

/// Load `.env` from the working directory or its parents.
///
/// A missing file is normal and yields `Ok(None)`; a file that exists but
/// cannot be read or parsed is an error the caller should surface.
pub fn load_dotenv() -> Result<Option<PathBuf>> {
    dotenv_outcome(dotenvy::dotenv())
}

pub(crate) fn dotenv_outcome(result: dotenvy::Result<PathBuf>) -> Result<Option<PathBuf>> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context("Failed to load .env"),
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", key, value))
}
