//! Engine configuration

use crate::cache::config::CacheConfig;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration for the query client and its mutation controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Quiet period before a debounced autosave fires
    pub autosave_quiet_period: Duration,

    /// Refresh subscribed stale keys in the background after each mutation
    pub refetch_on_settle: bool,

    /// Queue overlapping mutations per key instead of letting them interleave
    pub serialize_overlapping_mutations: bool,

    /// Prefix of placeholder ids for entities not yet created remotely
    pub temp_id_prefix: String,

    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autosave_quiet_period: Duration::from_millis(1000),
            refetch_on_settle: true,
            serialize_overlapping_mutations: false,
            temp_id_prefix: "temp-".to_string(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.autosave_quiet_period.is_zero() {
            return Err(EngineError::Config(
                "autosave_quiet_period must be greater than 0".to_string(),
            ));
        }

        if self.temp_id_prefix.is_empty() {
            return Err(EngineError::Config("temp_id_prefix must not be empty".to_string()));
        }

        self.cache.validate().map_err(EngineError::Config)
    }

    /// Overlapping mutations run one after another
    pub fn serialized() -> Self {
        Self {
            serialize_overlapping_mutations: true,
            ..Default::default()
        }
    }

    /// No background refresh or gc; every fetch is explicit
    pub fn manual() -> Self {
        Self {
            refetch_on_settle: false,
            cache: CacheConfig::no_gc(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `DELNOTES_*` variables, after loading `.env`
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("DELNOTES_AUTOSAVE_QUIET_MS")? {
            config.autosave_quiet_period = Duration::from_millis(ms);
        }
        if let Some(flag) = env_parse::<bool>("DELNOTES_REFETCH_ON_SETTLE")? {
            config.refetch_on_settle = flag;
        }
        if let Some(flag) = env_parse::<bool>("DELNOTES_SERIALIZE_MUTATIONS")? {
            config.serialize_overlapping_mutations = flag;
        }
        if let Ok(prefix) = std::env::var("DELNOTES_TEMP_ID_PREFIX") {
            config.temp_id_prefix = prefix;
        }
        if let Some(secs) = env_parse::<u64>("DELNOTES_GC_GRACE_SECS")? {
            config.cache.gc_grace_period = Duration::from_secs(secs);
        }
        if let Some(flag) = env_parse::<bool>("DELNOTES_ENABLE_GC")? {
            config.cache.enable_gc = flag;
        }

        config.validate()?;
        debug!("Loaded engine config from environment: {:?}", config);
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Builder for engine configuration
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    autosave_quiet_period: Option<Duration>,
    refetch_on_settle: Option<bool>,
    serialize_overlapping_mutations: Option<bool>,
    temp_id_prefix: Option<String>,
    cache: Option<CacheConfig>,
}

impl EngineConfigBuilder {
    pub fn autosave_quiet_period(mut self, period: Duration) -> Self {
        self.autosave_quiet_period = Some(period);
        self
    }

    pub fn refetch_on_settle(mut self, enable: bool) -> Self {
        self.refetch_on_settle = Some(enable);
        self
    }

    pub fn serialize_overlapping_mutations(mut self, enable: bool) -> Self {
        self.serialize_overlapping_mutations = Some(enable);
        self
    }

    pub fn temp_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_id_prefix = Some(prefix.into());
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> EngineConfig {
        let defaults = EngineConfig::default();

        EngineConfig {
            autosave_quiet_period: self
                .autosave_quiet_period
                .unwrap_or(defaults.autosave_quiet_period),
            refetch_on_settle: self.refetch_on_settle.unwrap_or(defaults.refetch_on_settle),
            serialize_overlapping_mutations: self
                .serialize_overlapping_mutations
                .unwrap_or(defaults.serialize_overlapping_mutations),
            temp_id_prefix: self.temp_id_prefix.unwrap_or(defaults.temp_id_prefix),
            cache: self.cache.unwrap_or(defaults.cache),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.autosave_quiet_period, Duration::from_millis(1000));
        assert!(config.refetch_on_settle);
        assert!(!config.serialize_overlapping_mutations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = EngineConfig::builder()
            .autosave_quiet_period(Duration::ZERO)
            .build();
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let config = EngineConfig::builder().temp_id_prefix("").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_and_presets() {
        let config = EngineConfig::builder()
            .serialize_overlapping_mutations(true)
            .cache(CacheConfig::no_gc())
            .build();
        assert!(config.serialize_overlapping_mutations);
        assert!(!config.cache.enable_gc);
        assert!(config.refetch_on_settle);

        assert!(EngineConfig::serialized().serialize_overlapping_mutations);
        assert!(!EngineConfig::manual().refetch_on_settle);
    }

    #[test]
    fn test_env_parse() {
        std::env::set_var("DELNOTES_TEST_BAD_NUMBER", "soon");
        assert!(env_parse::<u64>("DELNOTES_TEST_BAD_NUMBER").is_err());
        std::env::set_var("DELNOTES_TEST_GOOD_NUMBER", " 250 ");
        assert_eq!(env_parse::<u64>("DELNOTES_TEST_GOOD_NUMBER").unwrap(), Some(250));
        assert_eq!(env_parse::<u64>("DELNOTES_TEST_UNSET").unwrap(), None);
    }
}
