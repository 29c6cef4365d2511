//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Resource pool configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Pool name, used in traces and metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Maximum number of resources, both idle and checked out.
    #[serde(alias = "size")]
    pub max_size: usize,
    /// Maximum lifetime of a resource since creation.
    ///
    /// Resources older than this are closed instead of being reused. Zero disables reuse.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Maximum time a resource may sit unused in the pool.
    ///
    /// Zero disables reuse.
    #[serde(alias = "idle_timeout", with = "humantime_serde")]
    pub max_idle: Duration,
    /// Upper bound on a single resource creation attempt.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Minimum interval between pool state metric updates.
    #[serde(
        default = "PoolConfig::default_metrics_interval",
        with = "humantime_serde"
    )]
    pub metrics_interval: Duration,
}

impl PoolConfig {
    /// Create pool configuration.
    pub fn new(
        max_size: usize,
        max_age: Duration,
        max_idle: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            name: None,
            max_size,
            max_age,
            max_idle,
            connect_timeout,
            metrics_interval: Self::default_metrics_interval(),
        }
    }

    /// Set pool name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set minimum interval between pool state metric updates.
    #[must_use]
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Check configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns `Err` if maximum size or connect timeout are zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        Ok(())
    }

    /// Default value for [`Self::metrics_interval`].
    #[must_use]
    #[inline]
    fn default_metrics_interval() -> Duration {
        Duration::from_secs(15)
    }
}
