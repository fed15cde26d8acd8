//! Vault configuration.

use crate::backoff::{BACKOFF_EXPONENT, MAXIMUM_WAIT_MS, NORMAL_WAIT_MS};
use crate::error::{VaultError, VaultResult};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment overrides, e.g. `COURIER_VAULT_NORMAL_WAIT_MS`.
pub const ENV_PREFIX: &str = "COURIER_VAULT";

/// Default number of concurrent in-flight requests.
pub const MAX_PARALLEL_CALLS: usize = 1;

/// Vault configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultConfig {
    /// Vault name, used for the worker task and in logs
    pub name: String,

    /// Wait after a success and starting point of the backoff
    pub normal_wait: Duration,

    /// Upper bound of the backoff
    pub maximum_wait: Duration,

    /// Backoff growth factor
    pub backoff_exponent: f64,

    /// Maximum concurrent in-flight requests
    pub max_parallel_calls: usize,

    /// Pause after an unexpected worker error
    pub error_pause: Duration,

    /// Job store file, when the host uses the bundled file store
    pub store_path: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            normal_wait: Duration::from_millis(NORMAL_WAIT_MS),
            maximum_wait: Duration::from_millis(MAXIMUM_WAIT_MS),
            backoff_exponent: BACKOFF_EXPONENT,
            max_parallel_calls: MAX_PARALLEL_CALLS,
            error_pause: Duration::from_secs(1),
            store_path: None,
        }
    }
}

/// On-disk form. Durations are in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVaultConfig {
    name: Option<String>,
    normal_wait_ms: Option<u64>,
    maximum_wait_ms: Option<u64>,
    backoff_exponent: Option<f64>,
    max_parallel_calls: Option<usize>,
    error_pause_ms: Option<u64>,
    store_path: Option<PathBuf>,
}

impl VaultConfig {
    /// Create a configuration with defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the normal wait.
    pub fn with_normal_wait(mut self, wait: Duration) -> Self {
        self.normal_wait = wait;
        self
    }

    /// Set the maximum wait.
    pub fn with_maximum_wait(mut self, wait: Duration) -> Self {
        self.maximum_wait = wait;
        self
    }

    /// Set the backoff growth factor.
    pub fn with_backoff_exponent(mut self, exponent: f64) -> Self {
        self.backoff_exponent = exponent;
        self
    }

    /// Set the parallelism bound.
    pub fn with_max_parallel_calls(mut self, max: usize) -> Self {
        self.max_parallel_calls = max;
        self
    }

    /// Set the pause after worker errors.
    pub fn with_error_pause(mut self, pause: Duration) -> Self {
        self.error_pause = pause;
        self
    }

    /// Set the job store file.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(content: &str) -> VaultResult<Self> {
        let raw: RawVaultConfig = toml::from_str(content)
            .map_err(|e| VaultError::Config(format!("TOML parse error: {}", e)))?;
        let config = Self::default().merge(raw);
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file on top of the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> VaultResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VaultError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `COURIER_VAULT_*` environment overrides.
    pub fn with_env_overrides(self) -> VaultResult<Self> {
        self.with_overrides_from(|key| env::var(format!("{}_{}", ENV_PREFIX, key)).ok())
    }

    /// Apply overrides from an arbitrary lookup keyed by upper-case field name.
    pub fn with_overrides_from<F>(self, lookup: F) -> VaultResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> VaultResult<T> {
            value
                .trim()
                .parse()
                .map_err(|_| VaultError::Config(format!("Invalid value for {}: {}", key, value)))
        }

        let mut raw = RawVaultConfig {
            name: lookup("NAME"),
            store_path: lookup("STORE_PATH").map(PathBuf::from),
            ..Default::default()
        };
        if let Some(value) = lookup("NORMAL_WAIT_MS") {
            raw.normal_wait_ms = Some(parse("NORMAL_WAIT_MS", value)?);
        }
        if let Some(value) = lookup("MAXIMUM_WAIT_MS") {
            raw.maximum_wait_ms = Some(parse("MAXIMUM_WAIT_MS", value)?);
        }
        if let Some(value) = lookup("BACKOFF_EXPONENT") {
            raw.backoff_exponent = Some(parse("BACKOFF_EXPONENT", value)?);
        }
        if let Some(value) = lookup("MAX_PARALLEL_CALLS") {
            raw.max_parallel_calls = Some(parse("MAX_PARALLEL_CALLS", value)?);
        }
        if let Some(value) = lookup("ERROR_PAUSE_MS") {
            raw.error_pause_ms = Some(parse("ERROR_PAUSE_MS", value)?);
        }

        let config = self.merge(raw);
        config.validate()?;
        Ok(config)
    }

    fn merge(mut self, raw: RawVaultConfig) -> Self {
        if let Some(name) = raw.name {
            self.name = name;
        }
        if let Some(ms) = raw.normal_wait_ms {
            self.normal_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.maximum_wait_ms {
            self.maximum_wait = Duration::from_millis(ms);
        }
        if let Some(exponent) = raw.backoff_exponent {
            self.backoff_exponent = exponent;
        }
        if let Some(max) = raw.max_parallel_calls {
            self.max_parallel_calls = max;
        }
        if let Some(ms) = raw.error_pause_ms {
            self.error_pause = Duration::from_millis(ms);
        }
        if raw.store_path.is_some() {
            self.store_path = raw.store_path;
        }
        self
    }

    /// Check the configuration for values the vault cannot run with.
    pub fn validate(&self) -> VaultResult<()> {
        if self.normal_wait.is_zero() {
            return Err(VaultError::Config("normal_wait must be positive".into()));
        }
        if self.normal_wait > self.maximum_wait {
            return Err(VaultError::Config(
                "normal_wait must not exceed maximum_wait".into(),
            ));
        }
        if self.backoff_exponent.is_nan() || self.backoff_exponent < 1.0 {
            return Err(VaultError::Config(format!(
                "backoff_exponent must be at least 1.0, got {}",
                self.backoff_exponent
            )));
        }
        if self.max_parallel_calls == 0 {
            return Err(VaultError::Config(
                "max_parallel_calls must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
