//! File and environment configuration for the harness binary.
//!
//! The JSON file named by `AGENT_BENCH_CONFIG_PATH` is read first; the
//! `AGENT_BENCH_*` variables below then override individual fields.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_backend_http::HttpBackendConfig;
use conversation::LoopConfig;
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "AGENT_BENCH_CONFIG_PATH";
const API_KEY_ENV: &str = "AGENT_BENCH_API_KEY";
const BASE_URL_ENV: &str = "AGENT_BENCH_BASE_URL";
const MODEL_ENV: &str = "AGENT_BENCH_MODEL";
const TIMEOUT_ENV: &str = "AGENT_BENCH_TIMEOUT_SEC";
const STREAM_ENABLED_ENV: &str = "AGENT_BENCH_STREAM_ENABLED";
const STREAM_FALLBACK_ENV: &str = "AGENT_BENCH_STREAM_FALLBACK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{CONFIG_PATH_ENV} is not set")]
    MissingPath,
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("environment variable {key} has invalid value '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error("config field '{field}' must not be empty")]
    EmptyField { field: &'static str },
    #[error("config field '{field}' must be greater than zero")]
    NotPositive { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSection {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "default_connect_timeout_sec")]
    pub connect_timeout_sec: u64,
    #[serde(default = "default_chunk_timeout_sec")]
    pub chunk_timeout_sec: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_true")]
    pub stream_enabled: bool,
    #[serde(default = "default_true")]
    pub stream_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TasksSection {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_command_timeout_sec")]
    pub command_timeout_sec: u64,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            workers: default_workers(),
            command_timeout_sec: default_command_timeout_sec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub venv_dir: Option<PathBuf>,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            venv_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    pub api: ApiSection,
    #[serde(default)]
    pub tasks: TasksSection,
    #[serde(default)]
    pub paths: PathsSection,
}

impl BenchConfig {
    /// Load from `AGENT_BENCH_CONFIG_PATH`, apply overrides, validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = env_string_opt(CONFIG_PATH_ENV).ok_or(ConfigError::MissingPath)?;
        Self::load(Path::new(&path))
    }

    /// Load `path`, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(path, &text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(api_key) = env_string_opt(API_KEY_ENV) {
            self.api.api_key = api_key;
        }
        if let Some(base_url) = env_string_opt(BASE_URL_ENV) {
            self.api.base_url = base_url;
        }
        if let Some(model) = env_string_opt(MODEL_ENV) {
            self.api.model = model;
        }
        if let Some(value) = env_string_opt(TIMEOUT_ENV) {
            self.api.timeout_sec = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: TIMEOUT_ENV,
                value: value.clone(),
            })?;
        }
        if let Some(enabled) = env_bool_opt(STREAM_ENABLED_ENV) {
            self.api.stream_enabled = enabled;
        }
        if let Some(fallback) = env_bool_opt(STREAM_FALLBACK_ENV) {
            self.api.stream_fallback = fallback;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_empty = [
            ("api.api_key", &self.api.api_key),
            ("api.base_url", &self.api.base_url),
            ("api.model", &self.api.model),
        ];
        for (field, value) in non_empty {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField { field });
            }
        }

        let positive = [
            ("api.timeout_sec", self.api.timeout_sec),
            ("api.connect_timeout_sec", self.api.connect_timeout_sec),
            ("api.chunk_timeout_sec", self.api.chunk_timeout_sec),
            ("api.max_attempts", u64::from(self.api.max_attempts)),
            ("tasks.max_rounds", u64::from(self.tasks.max_rounds)),
            ("tasks.workers", self.tasks.workers as u64),
            ("tasks.command_timeout_sec", self.tasks.command_timeout_sec),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive { field });
            }
        }
        Ok(())
    }

    pub fn backend_config(&self) -> HttpBackendConfig {
        HttpBackendConfig::new(&self.api.api_key, &self.api.base_url, &self.api.model)
            .with_temperature(self.api.temperature)
            .with_timeout(Duration::from_secs(self.api.timeout_sec))
            .with_connect_timeout(Duration::from_secs(self.api.connect_timeout_sec))
            .with_chunk_timeout(Duration::from_secs(self.api.chunk_timeout_sec))
            .with_max_attempts(self.api.max_attempts)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig::default()
            .with_max_rounds(self.tasks.max_rounds)
            .with_stream(self.api.stream_enabled)
            .with_stream_fallback(self.api.stream_fallback)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.tasks.command_timeout_sec)
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_sec() -> u64 {
    600
}

fn default_connect_timeout_sec() -> u64 {
    30
}

fn default_chunk_timeout_sec() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_max_rounds() -> u32 {
    conversation::DEFAULT_MAX_ROUNDS
}

fn default_workers() -> usize {
    1
}

fn default_command_timeout_sec() -> u64 {
    120
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("runs")
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

fn env_bool_opt(key: &str) -> Option<bool> {
    env_string_opt(key).map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        )
    })
}
