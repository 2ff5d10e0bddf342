//! Engine configuration.
//!
//! Settings are layered: built-in defaults, then an optional file (any format
//! the `config` crate understands), then environment variables prefixed with
//! `LDFJOIN`, using `__` between section and key, e.g.
//! `LDFJOIN__FETCH__MAX_PARALLEL=4`.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Only execute this many requests in parallel.
    pub max_parallel: usize,
    pub timeout_ms: u64,
    /// Media types in order of preference, joined into the `Accept` header.
    pub accept: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_parallel: 10,
            timeout_ms: 5000,
            accept: vec!["text/turtle;q=1.0".to_string(), "text/html;q=0.5".to_string()],
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
    pub fn accept_header(&self) -> String {
        self.accept.join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound for a single match store round trip.
    pub store_timeout_ms: u64,
    /// Stop after this many advances; unlimited when absent.
    pub max_steps: Option<u64>,
    /// Pause before asking again when every candidate is busy fetching.
    pub idle_backoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 30_000,
            max_steps: None,
            idle_backoff_ms: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fetch: FetchConfig,
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Loads the configuration from an optional file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("LDFJOIN")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Ok(settings.try_deserialize::<EngineConfig>()?)
    }
}
