//! Batch configuration
//!
//! Isolation and execution options can be loaded from YAML and adjusted through
//! environment variables:
//!
//! | Variable | Effect |
//! |---|---|
//! | `TANDEM_MAX_CONCURRENCY` | positive integer, or `unbounded` |
//! | `TANDEM_TASK_TIMEOUT_MS` | milliseconds, or `none` |
//! | `TANDEM_FAIL_FAST` | `true` / `false` |
//! | `TANDEM_SHARE_FILES` | `true` / `false` |
//! | `TANDEM_ISOLATE_TODOS` | `true` / `false` |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::IsolationOptions;
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::parallel::ExecutionOptions;

pub const ENV_MAX_CONCURRENCY: &str = "TANDEM_MAX_CONCURRENCY";
pub const ENV_TASK_TIMEOUT_MS: &str = "TANDEM_TASK_TIMEOUT_MS";
pub const ENV_FAIL_FAST: &str = "TANDEM_FAIL_FAST";
pub const ENV_SHARE_FILES: &str = "TANDEM_SHARE_FILES";
pub const ENV_ISOLATE_TODOS: &str = "TANDEM_ISOLATE_TODOS";

/// Isolation plus execution options for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchConfig {
    pub isolation: IsolationOptions,
    pub execution: ExecutionOptions,
}

impl BatchConfig {
    pub fn new(isolation: IsolationOptions, execution: ExecutionOptions) -> Self {
        Self {
            isolation,
            execution,
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> ConfigurationResult<Self> {
        let config: BatchConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigurationError::InvalidConfig(e.to_string()))?;
        config.execution.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigurationResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&yaml)
    }

    /// Apply `TANDEM_*` environment overrides on top of this config
    pub fn with_env_overrides(mut self) -> ConfigurationResult<Self> {
        if let Some(raw) = env_var(ENV_MAX_CONCURRENCY) {
            self.execution.max_concurrency = if raw.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(parse_env(ENV_MAX_CONCURRENCY, &raw)?)
            };
        }
        if let Some(raw) = env_var(ENV_TASK_TIMEOUT_MS) {
            self.execution.per_task_timeout = if raw.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(Duration::from_millis(parse_env(ENV_TASK_TIMEOUT_MS, &raw)?))
            };
        }
        if let Some(raw) = env_var(ENV_FAIL_FAST) {
            self.execution.fail_fast = parse_env(ENV_FAIL_FAST, &raw)?;
        }
        if let Some(raw) = env_var(ENV_SHARE_FILES) {
            self.isolation = self.isolation.share_files(parse_env(ENV_SHARE_FILES, &raw)?);
        }
        if let Some(raw) = env_var(ENV_ISOLATE_TODOS) {
            self.isolation = self
                .isolation
                .isolate_todos(parse_env(ENV_ISOLATE_TODOS, &raw)?);
        }
        self.execution.validate()?;
        Ok(self)
    }

    pub fn to_yaml(&self) -> ConfigurationResult<String> {
        serde_yaml::to_string(self).map_err(|e| ConfigurationError::InvalidConfig(e.to_string()))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> ConfigurationResult<T> {
    raw.parse()
        .map_err(|_| ConfigurationError::InvalidConfig(format!("{}={:?}", name, raw)))
}

/// Serialize `Option<Duration>` as optional milliseconds
pub mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Serialize `Duration` as milliseconds
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
