// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the tool backplane.
//!
//! This crate provides [`BackplaneConfig`] — the top-level runtime
//! settings — together with helpers for loading from TOML files, merging
//! overlays, and producing advisory [`ConfigWarning`]s. Every knob named by
//! spec.md §6 "Environment inputs" is a typed field with the documented
//! default.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// A timeout is unusually large relative to its typical use.
    LargeTimeout {
        /// Which knob this is.
        field: String,
        /// Value in milliseconds.
        ms: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeTimeout { field, ms } => {
                write!(f, "'{field}' has a large timeout ({ms}ms)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the tool backplane (spec.md §6
/// "Environment inputs"). No secrets ever live here — only operational
/// knobs — so this struct can be logged and echoed back freely.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct BackplaneConfig {
    /// Path to the Registry catalog file (JSON or YAML, per `tb-registry`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_path: Option<String>,

    /// Delay between Executor Worker polls when the queue is non-empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of jobs a single Executor Worker runs concurrently.
    #[serde(default = "default_worker_max_concurrent")]
    pub worker_max_concurrent: usize,

    /// How long a worker's graceful `stop()` waits for in-flight jobs.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Deadline for the Planner's `enqueue_and_wait` mode.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// `"text"` (human-readable) or `"json"` (structured), matching
    /// `tracing_subscriber::fmt`'s two output modes.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_worker_max_concurrent() -> usize {
    1
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

fn default_wait_timeout_ms() -> u64 {
    30_000
}

fn default_log_format() -> String {
    "text".into()
}

impl Default for BackplaneConfig {
    fn default() -> Self {
        Self {
            registry_path: None,
            poll_interval_ms: default_poll_interval_ms(),
            worker_max_concurrent: default_worker_max_concurrent(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
            log_level: Some("info".into()),
            log_format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Above this, a timeout is flagged as advisory-large rather than rejected.
const LARGE_TIMEOUT_THRESHOLD_MS: u64 = 600_000;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Recognised log formats.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`BackplaneConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`BackplaneConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<BackplaneConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => BackplaneConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`BackplaneConfig`].
pub fn parse_toml(content: &str) -> Result<BackplaneConfig, ConfigError> {
    toml::from_str::<BackplaneConfig>(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides (spec.md §6 "Environment inputs").
///
/// Recognised variables: `TB_REGISTRY_PATH`, `TB_POLL_INTERVAL_MS`,
/// `TB_WORKER_MAX_CONCURRENT`, `TB_SHUTDOWN_TIMEOUT_MS`,
/// `TB_WAIT_TIMEOUT_MS`, `TB_LOG_LEVEL`, `TB_LOG_FORMAT`. A variable set to
/// a value that does not parse is ignored rather than treated as fatal,
/// since the file/default value underneath it is still usable; call
/// [`validate_config`] afterwards to catch the resulting inconsistency.
pub fn apply_env_overrides(config: &mut BackplaneConfig) {
    if let Ok(val) = std::env::var("TB_REGISTRY_PATH") {
        config.registry_path = Some(val);
    }
    if let Ok(val) = std::env::var("TB_POLL_INTERVAL_MS").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
        config.poll_interval_ms = val;
    }
    if let Ok(val) = std::env::var("TB_WORKER_MAX_CONCURRENT").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
        config.worker_max_concurrent = val;
    }
    if let Ok(val) = std::env::var("TB_SHUTDOWN_TIMEOUT_MS").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
        config.shutdown_timeout_ms = val;
    }
    if let Ok(val) = std::env::var("TB_WAIT_TIMEOUT_MS").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
        config.wait_timeout_ms = val;
    }
    if let Ok(val) = std::env::var("TB_LOG_LEVEL") {
        config.log_level = Some(val);
    }
    if let Ok(val) = std::env::var("TB_LOG_FORMAT") {
        config.log_format = val;
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (unrecognised log level/format, zero-valued timeouts or
/// concurrency) are returned as a [`ConfigError::ValidationError`]; soft
/// issues (a missing registry path, an unusually large timeout) come back
/// as warnings since the caller may still be able to proceed (e.g. a
/// `--registry` CLI flag supplied separately).
pub fn validate_config(config: &BackplaneConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }
    if !VALID_LOG_FORMATS.contains(&config.log_format.as_str()) {
        errors.push(format!("invalid log_format '{}'", config.log_format));
    }
    if config.worker_max_concurrent == 0 {
        errors.push("worker_max_concurrent must be at least 1".into());
    }
    if config.poll_interval_ms == 0 {
        errors.push("poll_interval_ms must be greater than 0".into());
    }
    if config.shutdown_timeout_ms == 0 {
        errors.push("shutdown_timeout_ms must be greater than 0".into());
    }
    if config.wait_timeout_ms == 0 {
        errors.push("wait_timeout_ms must be greater than 0".into());
    }

    for (field, ms) in [
        ("shutdown_timeout_ms", config.shutdown_timeout_ms),
        ("wait_timeout_ms", config.wait_timeout_ms),
    ] {
        if ms > LARGE_TIMEOUT_THRESHOLD_MS {
            warnings.push(ConfigWarning::LargeTimeout { field: field.into(), ms });
        }
    }

    if config.registry_path.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "registry_path".into(),
            hint: "a registry path must be supplied via --registry or TB_REGISTRY_PATH instead".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over
/// `base`; numeric knobs always come from `overlay` since it carries its
/// own defaults, so `base`'s numeric fields only matter for the `Option`
/// fields (`registry_path`, `log_level`).
pub fn merge_configs(base: BackplaneConfig, overlay: BackplaneConfig) -> BackplaneConfig {
    BackplaneConfig {
        registry_path: overlay.registry_path.or(base.registry_path),
        poll_interval_ms: overlay.poll_interval_ms,
        worker_max_concurrent: overlay.worker_max_concurrent,
        shutdown_timeout_ms: overlay.shutdown_timeout_ms,
        wait_timeout_ms: overlay.wait_timeout_ms,
        log_level: overlay.log_level.or(base.log_level),
        log_format: overlay.log_format,
    }
}

#[cfg(test)]
mod tests;
