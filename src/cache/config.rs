//! Configuration for the cache store

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the query cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long an entry with no subscribers survives before collection
    pub gc_grace_period: Duration,

    /// Interval between background garbage collection passes
    pub gc_interval: Duration,

    /// Enable the background garbage collection task
    pub enable_gc: bool,

    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 5 minutes idle before an unsubscribed entry is dropped
            gc_grace_period: Duration::from_secs(300),
            gc_interval: Duration::from_secs(60),
            enable_gc: true,
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.enable_gc && self.gc_interval.is_zero() {
            return Err("gc_interval must be greater than 0 when gc is enabled".to_string());
        }

        Ok(())
    }

    /// Keep entries for the life of the process
    pub fn no_gc() -> Self {
        Self {
            enable_gc: false,
            ..Default::default()
        }
    }

    /// Collect unsubscribed entries almost immediately
    pub fn eager_gc() -> Self {
        Self {
            gc_grace_period: Duration::from_secs(5),
            gc_interval: Duration::from_secs(5),
            ..Default::default()
        }
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    gc_grace_period: Option<Duration>,
    gc_interval: Option<Duration>,
    enable_gc: Option<bool>,
    enable_metrics: Option<bool>,
}

impl CacheConfigBuilder {
    pub fn gc_grace_period(mut self, grace: Duration) -> Self {
        self.gc_grace_period = Some(grace);
        self
    }

    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    pub fn enable_gc(mut self, enable: bool) -> Self {
        self.enable_gc = Some(enable);
        self
    }

    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            gc_grace_period: self.gc_grace_period.unwrap_or(defaults.gc_grace_period),
            gc_interval: self.gc_interval.unwrap_or(defaults.gc_interval),
            enable_gc: self.enable_gc.unwrap_or(defaults.enable_gc),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}
