//! Session configuration.
//!
//! [`SessionConfig`] is the immutable record [`crate::session::SessionManager`]
//! builds a driver from: engine selection, executable paths, download
//! directory, proxy, extra flags, and engine-specific experimental options.
//! It can be populated programmatically, from `WEBACTIONS_*` environment
//! variables via [`SessionConfig::from_env`], or by layering
//! [`SessionConfigOverrides`] on top of either.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::wait::DEFAULT_WAIT;

/// Errors raised while assembling a [`SessionConfig`].
#[derive(Debug, Error)]
pub enum SessionConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field} (expected 1/0, true/false, yes/no, on/off)")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number for {field}")]
    InvalidNumber {
        field: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("invalid JSON for {field}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field} must be a JSON object")]
    InvalidJsonType { field: &'static str },
}

/// Browser engine driven by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    Chromium,
    Firefox,
    Edge,
}

impl BrowserEngine {
    pub fn parse(value: &str) -> Result<Self, SessionConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserEngine::Chromium),
            "firefox" => Ok(BrowserEngine::Firefox),
            "edge" => Ok(BrowserEngine::Edge),
            other => Err(SessionConfigError::InvalidEnumVariant {
                field: "WEBACTIONS_ENGINE",
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BrowserEngine::Chromium => "chromium",
            BrowserEngine::Firefox => "firefox",
            BrowserEngine::Edge => "edge",
        }
    }
}

impl Default for BrowserEngine {
    fn default() -> Self {
        BrowserEngine::Chromium
    }
}

/// Immutable session parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub engine: BrowserEngine,
    /// Browser executable. `None` lets the engine adapter discover one.
    pub binary_path: Option<PathBuf>,
    /// External automation-driver executable, for engines that need one.
    pub driver_path: Option<PathBuf>,
    /// Directory downloads land in; created (recursively) at launch.
    pub download_dir: Option<PathBuf>,
    /// `host:port` of an HTTP proxy, translated into engine flags.
    pub proxy_server: Option<String>,
    /// Extra command-line flags; deduplicated at plan time.
    pub extra_args: Vec<String>,
    /// Engine-specific options layered over the built-in defaults.
    pub experimental_options: Map<String, Value>,
    pub headless: bool,
    /// Wait applied when an operation is called without an explicit timeout.
    pub default_timeout: Duration,
    /// Instance-wide default: escalate resolution misses as errors.
    pub escalate_missing: bool,
    /// Propagate non-transient action faults instead of swallowing them.
    pub propagate_action_faults: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngine::default(),
            binary_path: None,
            driver_path: None,
            download_dir: None,
            proxy_server: None,
            extra_args: Vec::new(),
            experimental_options: Map::new(),
            headless: false,
            default_timeout: DEFAULT_WAIT,
            escalate_missing: false,
            propagate_action_faults: false,
        }
    }
}

impl SessionConfig {
    /// Build a config from `WEBACTIONS_*` environment variables, falling back
    /// to [`SessionConfig::default`] for anything unset. A `.env` file in the
    /// working directory is honoured.
    pub fn from_env() -> Result<Self, SessionConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Some(value) = env_var("WEBACTIONS_ENGINE") {
            config.engine = BrowserEngine::parse(&value)?;
        }
        config.binary_path = env_var("WEBACTIONS_BINARY").map(PathBuf::from);
        config.driver_path = env_var("WEBACTIONS_DRIVER").map(PathBuf::from);
        config.download_dir = env_var("WEBACTIONS_DOWNLOAD_DIR").map(PathBuf::from);
        config.proxy_server = env_var("WEBACTIONS_PROXY");
        if let Some(value) = env_var("WEBACTIONS_ARGS") {
            config.extra_args = value.split_whitespace().map(str::to_owned).collect();
        }
        if let Some(value) = env_var("WEBACTIONS_EXPERIMENTAL_OPTIONS") {
            config.experimental_options =
                parse_json_object("WEBACTIONS_EXPERIMENTAL_OPTIONS", &value)?;
        }
        if let Some(value) = env_var("WEBACTIONS_HEADLESS") {
            config.headless = parse_bool("WEBACTIONS_HEADLESS", &value)?;
        }
        if let Some(value) = env_var("WEBACTIONS_TIMEOUT_SECS") {
            config.default_timeout =
                Duration::from_secs(parse_u64("WEBACTIONS_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = env_var("WEBACTIONS_ESCALATE_MISSING") {
            config.escalate_missing = parse_bool("WEBACTIONS_ESCALATE_MISSING", &value)?;
        }
        if let Some(value) = env_var("WEBACTIONS_PROPAGATE_FAULTS") {
            config.propagate_action_faults = parse_bool("WEBACTIONS_PROPAGATE_FAULTS", &value)?;
        }
        Ok(config)
    }

    /// Apply caller overrides on top of this config.
    pub fn with_overrides(mut self, overrides: SessionConfigOverrides) -> Self {
        if let Some(engine) = overrides.engine {
            self.engine = engine;
        }
        if let Some(binary_path) = overrides.binary_path {
            self.binary_path = binary_path;
        }
        if let Some(driver_path) = overrides.driver_path {
            self.driver_path = driver_path;
        }
        if let Some(download_dir) = overrides.download_dir {
            self.download_dir = download_dir;
        }
        if let Some(proxy_server) = overrides.proxy_server {
            self.proxy_server = proxy_server;
        }
        if let Some(extra_args) = overrides.extra_args {
            self.extra_args = extra_args;
        }
        if let Some(experimental_options) = overrides.experimental_options {
            self.experimental_options = experimental_options;
        }
        if let Some(headless) = overrides.headless {
            self.headless = headless;
        }
        if let Some(default_timeout) = overrides.default_timeout {
            self.default_timeout = default_timeout;
        }
        if let Some(escalate_missing) = overrides.escalate_missing {
            self.escalate_missing = escalate_missing;
        }
        if let Some(propagate_action_faults) = overrides.propagate_action_faults {
            self.propagate_action_faults = propagate_action_faults;
        }
        self
    }
}

/// Caller overrides for [`SessionConfig::with_overrides`]. Optional fields
/// use `Option<Option<T>>` so an override can also clear a value.
#[derive(Debug, Clone, Default)]
pub struct SessionConfigOverrides {
    pub engine: Option<BrowserEngine>,
    pub binary_path: Option<Option<PathBuf>>,
    pub driver_path: Option<Option<PathBuf>>,
    pub download_dir: Option<Option<PathBuf>>,
    pub proxy_server: Option<Option<String>>,
    pub extra_args: Option<Vec<String>>,
    pub experimental_options: Option<Map<String, Value>>,
    pub headless: Option<bool>,
    pub default_timeout: Option<Duration>,
    pub escalate_missing: Option<bool>,
    pub propagate_action_faults: Option<bool>,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, SessionConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SessionConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, SessionConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| SessionConfigError::InvalidNumber { field, source })
}

fn parse_json_object(
    field: &'static str,
    value: &str,
) -> Result<Map<String, Value>, SessionConfigError> {
    let parsed: Value = serde_json::from_str(value)
        .map_err(|source| SessionConfigError::InvalidJson { field, source })?;
    match parsed {
        Value::Object(map) => Ok(map),
        _ => Err(SessionConfigError::InvalidJsonType { field }),
    }
}
