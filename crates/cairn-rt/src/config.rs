//! Runtime configuration.
//!
//! Read once per process, either from `CAIRN_*` environment variables or
//! from a TOML document supplied by the embedder:
//!
//! ```toml
//! log-filter = "cairn::resolve=debug"
//! log-style = "full"
//! fault-policy = "panic"
//! verify-growth = true
//! ```

use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the fault handler does after reporting an unrecoverable error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultPolicy {
    /// Abort the process. The only safe choice for compiled programs.
    #[default]
    Abort,
    /// Unwind with a panic so embedders and tests can observe the fault.
    Panic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogStyle {
    #[default]
    Compact,
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// An `EnvFilter` directive. Logging stays off when unset.
    pub log_filter: Option<String>,
    pub log_style: LogStyle,
    pub fault_policy: FaultPolicy,
    /// Re-check the preserved prefix of every grown function table.
    pub verify_growth: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse runtime config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
}

pub const ENV_LOG: &str = "CAIRN_LOG";
pub const ENV_LOG_STYLE: &str = "CAIRN_LOG_STYLE";
pub const ENV_FAULT: &str = "CAIRN_FAULT";
pub const ENV_VERIFY_GROWTH: &str = "CAIRN_VERIFY_GROWTH";

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = RuntimeConfig {
            log_filter: lookup(ENV_LOG).filter(|f| !f.trim().is_empty()),
            ..RuntimeConfig::default()
        };

        if let Some(style) = lookup(ENV_LOG_STYLE) {
            config.log_style = match style.as_str() {
                "" | "compact" => LogStyle::Compact,
                "full" => LogStyle::Full,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_LOG_STYLE,
                        value: style,
                    })
                }
            };
        }

        if let Some(policy) = lookup(ENV_FAULT) {
            config.fault_policy = match policy.as_str() {
                "" | "abort" => FaultPolicy::Abort,
                "panic" => FaultPolicy::Panic,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_FAULT,
                        value: policy,
                    })
                }
            };
        }

        if let Some(flag) = lookup(ENV_VERIFY_GROWTH) {
            config.verify_growth = match flag.as_str() {
                "1" | "true" | "yes" => true,
                "" | "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: ENV_VERIFY_GROWTH,
                        value: flag,
                    })
                }
            };
        }

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Process-wide instance
// ---------------------------------------------------------------------------

static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Install the process configuration.
///
/// Returns the rejected config if one was already installed or read.
pub fn install(config: RuntimeConfig) -> Result<(), RuntimeConfig> {
    CONFIG.set(config)
}

/// The installed configuration, falling back to the environment.
///
/// A malformed environment is reported on stderr and ignored: the runtime
/// cannot refuse to start over a logging knob.
pub fn config() -> &'static RuntimeConfig {
    CONFIG.get_or_init(|| {
        RuntimeConfig::from_env().unwrap_or_else(|err| {
            eprintln!("[cairn-rt] ignoring environment config: {err}");
            RuntimeConfig::default()
        })
    })
}
