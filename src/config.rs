//! Application configuration.
//!
//! Every field has a default, so a partial document (or none at all) is a
//! valid configuration:
//!
//! ```rust
//! use fastrest::Config;
//!
//! let config: Config = serde_json::from_str(r#"{ "metrics": true }"#).unwrap();
//! assert_eq!(config.addr, "0.0.0.0:8080");
//! assert!(config.metrics);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pool::DEFAULT_MAX_IDLE;

/// Default request body cap: 4 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Listen address, `host:port`.
    pub addr: String,

    /// How long a connection may take to send its request headers.
    pub read_timeout_secs: u64,

    /// How long shutdown waits for in-flight connections before aborting them.
    pub graceful_timeout_secs: u64,

    /// Registers `{health_path}`, `{health_path}/live` and `{health_path}/ready`.
    pub health_check: bool,
    pub health_path: String,

    /// Collects request metrics and serves `/metrics` and `/metrics/json`.
    pub metrics: bool,

    /// Installs [`RequestLogger`](crate::middleware::logger::RequestLogger)
    /// as the outermost global middleware.
    pub request_logger: bool,

    /// Logs a startup summary when the server starts listening.
    pub banner: bool,

    /// Free-form deployment label, reported in the startup summary.
    pub env: String,

    /// Idle request contexts kept for reuse.
    pub max_idle_contexts: usize,

    /// Largest request body the server buffers. Bigger ones get `413`.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_owned(),
            read_timeout_secs: 30,
            graceful_timeout_secs: 10,
            health_check: false,
            health_path: "/health".to_owned(),
            metrics: false,
            request_logger: false,
            banner: false,
            env: String::new(),
            max_idle_contexts: DEFAULT_MAX_IDLE,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Config {
    /// Defaults overridden by `FASTREST_*` environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `FASTREST_ADDR` | `addr` |
    /// | `FASTREST_HEALTH` | `health_check` |
    /// | `FASTREST_METRICS` | `metrics` |
    /// | `FASTREST_REQUEST_LOGGER` | `request_logger` |
    /// | `FASTREST_ENV` | `env` |
    /// | `FASTREST_GRACEFUL_TIMEOUT_SECS` | `graceful_timeout_secs` |
    /// | `FASTREST_MAX_BODY_BYTES` | `max_body_bytes` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(mut lookup: impl FnMut(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("FASTREST_ADDR") {
            config.addr = addr;
        }
        if let Some(v) = lookup("FASTREST_HEALTH") {
            config.health_check = flag("FASTREST_HEALTH", &v)?;
        }
        if let Some(v) = lookup("FASTREST_METRICS") {
            config.metrics = flag("FASTREST_METRICS", &v)?;
        }
        if let Some(v) = lookup("FASTREST_REQUEST_LOGGER") {
            config.request_logger = flag("FASTREST_REQUEST_LOGGER", &v)?;
        }
        if let Some(env) = lookup("FASTREST_ENV") {
            config.env = env;
        }
        if let Some(v) = lookup("FASTREST_GRACEFUL_TIMEOUT_SECS") {
            config.graceful_timeout_secs = number("FASTREST_GRACEFUL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("FASTREST_MAX_BODY_BYTES") {
            config.max_body_bytes = number("FASTREST_MAX_BODY_BYTES", &v)?;
        }

        Ok(config)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_secs)
    }

    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn health_check(mut self, enabled: bool) -> Self {
        self.health_check = enabled;
        self
    }

    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    pub fn request_logger(mut self, enabled: bool) -> Self {
        self.request_logger = enabled;
        self
    }

    pub fn banner(mut self, enabled: bool) -> Self {
        self.banner = enabled;
        self
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn read_timeout_secs(mut self, secs: u64) -> Self {
        self.read_timeout_secs = secs;
        self
    }

    pub fn graceful_timeout_secs(mut self, secs: u64) -> Self {
        self.graceful_timeout_secs = secs;
        self
    }

    pub fn max_idle_contexts(mut self, n: usize) -> Self {
        self.max_idle_contexts = n;
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

fn flag(key: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config { key, reason: format!("expected a boolean, got `{other}`") }),
    }
}

fn number<T>(key: &'static str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| Error::Config { key, reason: format!("{e}") })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.addr, "0.0.0.0:8080");
        assert_eq!(config.read_timeout(), Duration::from_secs(30));
        assert_eq!(config.graceful_timeout(), Duration::from_secs(10));
        assert_eq!(config.health_path, "/health");
        assert!(!config.health_check && !config.metrics && !config.request_logger);
        assert_eq!(config.max_idle_contexts, 1024);
        assert_eq!(config.max_body_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("FASTREST_ADDR", "127.0.0.1:9000"),
            ("FASTREST_HEALTH", "true"),
            ("FASTREST_METRICS", "1"),
            ("FASTREST_REQUEST_LOGGER", "off"),
            ("FASTREST_ENV", "staging"),
            ("FASTREST_GRACEFUL_TIMEOUT_SECS", "3"),
            ("FASTREST_MAX_BODY_BYTES", "1024"),
        ]))
        .unwrap();

        assert_eq!(config.addr, "127.0.0.1:9000");
        assert!(config.health_check);
        assert!(config.metrics);
        assert!(!config.request_logger);
        assert_eq!(config.env, "staging");
        assert_eq!(config.graceful_timeout(), Duration::from_secs(3));
        assert_eq!(config.max_body_bytes, 1024);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[("FASTREST_METRICS", "maybe")])).unwrap_err();
        assert!(matches!(err, Error::Config { key: "FASTREST_METRICS", .. }));

        let err = Config::from_lookup(lookup(&[("FASTREST_GRACEFUL_TIMEOUT_SECS", "-1")])).unwrap_err();
        assert!(matches!(err, Error::Config { key: "FASTREST_GRACEFUL_TIMEOUT_SECS", .. }));

        let err = Config::from_lookup(lookup(&[("FASTREST_MAX_BODY_BYTES", "4MB")])).unwrap_err();
        assert!(matches!(err, Error::Config { key: "FASTREST_MAX_BODY_BYTES", .. }));
    }

    #[test]
    fn builder_setters_chain() {
        let config = Config::default().addr("[::1]:3000").metrics(true).health_path("/hc");
        assert_eq!(config.addr, "[::1]:3000");
        assert!(config.metrics);
        assert_eq!(config.health_path, "/hc");
    }
}
