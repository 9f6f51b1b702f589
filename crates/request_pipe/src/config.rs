//! Configuration
//!
//! [`PipeConfig`] is the initialization surface of a [`PipeClient`](crate::PipeClient).
//! It can be built in code, loaded from TOML, and overridden from the
//! environment. [`RequestConfig`] carries transport settings and is layered
//! per call: requester-wide values first, then the call's own overrides.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bucket::DuplicatePolicy;
use crate::error::PipeError;
use crate::service::ServiceSpec;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RequestConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Overlay `other` onto a copy of `self`: headers are unioned with
    /// `other` winning, set scalars in `other` replace ours.
    pub fn merged(&self, other: &RequestConfig) -> RequestConfig {
        let mut headers = self.headers.clone();
        headers.extend(other.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        RequestConfig {
            base_url: other.base_url.clone().or_else(|| self.base_url.clone()),
            headers,
            timeout_ms: other.timeout_ms.or(self.timeout_ms),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Enables Bucket deduplication of calls sharing an identity.
    #[serde(default)]
    pub unique: bool,
    /// Grace window in which a repeat call counts as a duplicate.
    /// `None` keeps entries live until their call completes.
    #[serde(default, alias = "uniqueInterval", skip_serializing_if = "Option::is_none")]
    pub unique_interval_ms: Option<u64>,
    #[serde(default, alias = "duplicatePolicy")]
    pub duplicate_policy: DuplicatePolicy,
    #[serde(default, alias = "requesterConfig")]
    pub requester_config: RequestConfig,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

const ENV_UNIQUE: &str = "PIPE_UNIQUE";
const ENV_UNIQUE_INTERVAL_MS: &str = "PIPE_UNIQUE_INTERVAL_MS";
const ENV_BASE_URL: &str = "PIPE_BASE_URL";
const ENV_TIMEOUT_MS: &str = "PIPE_TIMEOUT_MS";

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl PipeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, PipeError> {
        toml::from_str(content).map_err(|e| PipeError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Apply `PIPE_*` environment overrides on top of the loaded values.
    pub fn with_env_overrides(self) -> Result<Self, PipeError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, PipeError> {
        if let Some(unique) = lookup(ENV_UNIQUE) {
            self.unique = parse_bool_env(&unique);
        }
        if let Some(interval) = lookup(ENV_UNIQUE_INTERVAL_MS) {
            let interval = interval.trim().parse::<u64>().map_err(|e| {
                PipeError::Config(format!("{ENV_UNIQUE_INTERVAL_MS}={interval}: {e}"))
            })?;
            self.unique_interval_ms = Some(interval);
        }
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.requester_config.base_url = Some(base_url);
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_MS) {
            let timeout = timeout
                .trim()
                .parse::<u64>()
                .map_err(|e| PipeError::Config(format!("{ENV_TIMEOUT_MS}={timeout}: {e}")))?;
            self.requester_config.timeout_ms = Some(timeout);
        }
        Ok(self)
    }

    pub fn unique_interval(&self) -> Option<Duration> {
        self.unique_interval_ms.map(Duration::from_millis)
    }
}
