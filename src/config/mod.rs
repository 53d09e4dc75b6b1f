//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The completions API key is wrapped in `SecretString` so it
//! never shows up in logs.

use crate::cache::DEFAULT_IDLE_TIMEOUT;
use crate::dispatch::DispatchConfig;
use crate::error::{Error, Result};
use crate::handler::completion::DEFAULT_COMPLETIONS_URL;
use crate::handler::synthesis::DEFAULT_KEEP_LAST;
use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    /// Program that performs voice conversion for one request.
    pub voice_command: PathBuf,
    pub models_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Previous renders kept in `output_dir`; 0 keeps all.
    pub output_keep: usize,
    pub max_concurrent: usize,
    pub result_retention: Duration,
    pub cache_idle_timeout: Duration,
    pub completions_url: String,
    pub completions_api_key: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = DispatchConfig::default();
        Ok(Self {
            voice_command: PathBuf::from(required_var("VOXQ_VOICE_COMMAND")?),
            models_dir: optional_var("VOXQ_MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/root/models")),
            output_dir: optional_var("VOXQ_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/root/output")),
            output_keep: parsed_var("VOXQ_OUTPUT_KEEP")?.unwrap_or(DEFAULT_KEEP_LAST),
            max_concurrent: parsed_var("VOXQ_MAX_CONCURRENT")?.unwrap_or(defaults.max_concurrent),
            result_retention: parsed_var("VOXQ_RESULT_RETENTION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.result_retention),
            cache_idle_timeout: parsed_var("VOXQ_CACHE_IDLE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_IDLE_TIMEOUT),
            completions_url: optional_var("VOXQ_COMPLETIONS_URL")
                .unwrap_or_else(|| DEFAULT_COMPLETIONS_URL.to_string()),
            completions_api_key: optional_var("VOXQ_COMPLETIONS_API_KEY").map(SecretString::from),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Dispatcher settings derived from this config.
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            max_concurrent: self.max_concurrent,
            result_retention: self.result_retention,
            ..DispatchConfig::default()
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and empty are treated the same.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_var(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}")))
        })
        .transpose()
}
