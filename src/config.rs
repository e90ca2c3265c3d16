// src/config.rs
//
// Run configuration. Built once through `ConfigBuilder`, which only accepts
// keys from `ALLOWED_KEYS`, then passed around by reference.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::{PatchLevel, TestMode};

pub const ALLOWED_KEYS: &[&str] = &[
    "tests",
    "patch_granularity",
    "max_suggestions",
    "temperature",
    "max_tokens",
    "top_p",
    "model",
    "retries",
    "tmp_dir",
    "output_dir",
    "defects4j",
    "command_timeout_secs",
    "bug_budget_secs",
    "task_timeout_secs",
    "workers",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown configuration key '{0}' (allowed: {allowed})", allowed = ALLOWED_KEYS.join(", "))]
    UnknownKey(String),

    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("malformed override '{0}', expected key=value")]
    MalformedOverride(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /* validation */
    pub tests: TestMode,
    pub patch_granularity: PatchLevel,

    /* generation settings, carried so a run records what produced its input */
    pub max_suggestions: usize,
    pub temperature: f64,
    pub max_tokens: usize,
    pub top_p: f64,
    pub model: String,
    pub retries: usize,

    /* filesystem */
    pub tmp_dir: PathBuf,
    pub output_dir: PathBuf,

    /* harness */
    pub defects4j: String,
    pub command_timeout_secs: u64,
    pub bug_budget_secs: u64,
    pub task_timeout_secs: u64,
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tests: TestMode::Trigger,
            patch_granularity: PatchLevel::Line,
            max_suggestions: 10,
            temperature: 0.8,
            max_tokens: 300,
            top_p: 0.95,
            model: "code-davinci-edit-001".to_string(),
            retries: 100,
            tmp_dir: PathBuf::from("tmp"),
            output_dir: PathBuf::from("validation-output"),
            defects4j: "defects4j".to_string(),
            command_timeout_secs: 300,
            bug_budget_secs: 3600,
            task_timeout_secs: 4 * 3600,
            workers: 0,
        }
    }
}

impl Config {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn bug_budget(&self) -> Duration {
        Duration::from_secs(self.bug_budget_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Pool size; `0` means one worker per available core.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn log_summary(&self) {
        info!(
            tests = %self.tests,
            level = %self.patch_granularity,
            workers = self.worker_count(),
            command_timeout_secs = self.command_timeout_secs,
            bug_budget_secs = self.bug_budget_secs,
            task_timeout_secs = self.task_timeout_secs,
            tmp_dir = %self.tmp_dir.display(),
            output_dir = %self.output_dir.display(),
            defects4j = %self.defects4j,
            "configuration"
        );
        info!(
            model = %self.model,
            temperature = self.temperature,
            top_p = self.top_p,
            max_tokens = self.max_tokens,
            max_suggestions = self.max_suggestions,
            retries = self.retries,
            "generation settings"
        );
    }
}

/// `<config_dir>/patchbench/config.toml`
pub fn default_config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("patchbench");
    dir.push("config.toml");
    dir
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    cfg: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<&mut Self, ConfigError> {
        let key = key.trim().to_ascii_lowercase();
        let raw = value.trim();
        let cfg = &mut self.cfg;

        match key.as_str() {
            "tests" => cfg.tests = parse_with(&key, raw, str::parse::<TestMode>)?,
            "patch_granularity" => {
                cfg.patch_granularity = parse_with(&key, raw, str::parse::<PatchLevel>)?
            }
            "max_suggestions" => cfg.max_suggestions = parse_num(&key, raw)?,
            "temperature" => cfg.temperature = parse_num(&key, raw)?,
            "max_tokens" => cfg.max_tokens = parse_num(&key, raw)?,
            "top_p" => cfg.top_p = parse_num(&key, raw)?,
            "model" => cfg.model = raw.to_string(),
            "retries" => cfg.retries = parse_num(&key, raw)?,
            "tmp_dir" => cfg.tmp_dir = PathBuf::from(raw),
            "output_dir" => cfg.output_dir = PathBuf::from(raw),
            "defects4j" => cfg.defects4j = raw.to_string(),
            "command_timeout_secs" => cfg.command_timeout_secs = parse_num(&key, raw)?,
            "bug_budget_secs" => cfg.bug_budget_secs = parse_num(&key, raw)?,
            "task_timeout_secs" => cfg.task_timeout_secs = parse_num(&key, raw)?,
            "workers" => cfg.workers = parse_num(&key, raw)?,
            _ => return Err(ConfigError::UnknownKey(key)),
        }

        Ok(self)
    }

    /// Applies a `key=value` override as given on the command line.
    pub fn set_override(&mut self, pair: &str) -> Result<&mut Self, ConfigError> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedOverride(pair.to_string()))?;
        self.set(key, value)
    }

    /// Applies every key of a TOML file through `set`.
    pub fn load_file(&mut self, path: &Path) -> Result<&mut Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table: toml::Table = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        for (key, value) in &table {
            let text = match value {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.set(key, &text)?;
        }

        Ok(self)
    }

    pub fn build(&self) -> Result<Config, ConfigError> {
        let cfg = self.cfg.clone();

        for (key, secs) in [
            ("command_timeout_secs", cfg.command_timeout_secs),
            ("task_timeout_secs", cfg.task_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(cfg)
    }
}

fn parse_with<T>(
    key: &str,
    raw: &str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    parse(raw).map_err(|reason| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason,
    })
}

fn parse_num<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_with(key, raw, |s| s.parse::<T>().map_err(|e| e.to_string()))
}
