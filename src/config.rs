//! Enrichment configuration
//!
//! Loaded from YAML (every field is optional and falls back to a default),
//! constructed once and passed into the orchestrator builder. Credentials are
//! never read here; `api_key_env` only names the variable the caller should
//! resolve.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnrichError, Result};
use crate::types::SourceId;

/// Top-level run configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Records processed concurrently
    pub workers: usize,

    /// Per-call timeout; expiry counts as a network error
    pub call_timeout_ms: u64,

    /// Scalar conflict resolution order, highest priority first
    pub priority: Vec<SourceId>,

    pub retry: RetryConfig,

    pub cache: CacheConfig,

    pub breaker: BreakerConfig,

    /// Per-source settings keyed by source id
    pub sources: BTreeMap<SourceId, SourceSettings>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            call_timeout_ms: 15_000,
            priority: vec!["places".into(), "reviews".into(), "council".into()],
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            sources: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_days: u32,
    /// Ignore existing entries once per fingerprint and re-fetch
    pub refresh: bool,
    /// Directory for the persistent cache; in-memory when absent
    pub directory: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            refresh: false,
            directory: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ttl_days))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive permanent failures before a source is disabled for the run
    pub threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { threshold: 3 }
    }
}

/// Settings for one external source
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceSettings {
    pub enabled: bool,

    /// Published request ceiling
    pub max_per_second: u32,

    /// Optional minimum spacing between calls
    pub min_interval_ms: Option<u64>,

    /// Endpoint override (tests, proxies)
    pub base_url: Option<String>,

    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,

    /// Page URL template for scraped sources; `{query}` is substituted
    pub url_template: Option<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_second: 5,
            min_interval_ms: None,
            base_url: None,
            api_key_env: None,
            url_template: None,
        }
    }
}

impl SourceSettings {
    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval_ms.map(Duration::from_millis)
    }
}

impl EnrichmentConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loaded enrichment config");
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(EnrichError::Config("workers must be at least 1".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(EnrichError::Config(
                "call_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(EnrichError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.breaker.threshold == 0 {
            return Err(EnrichError::Config(
                "breaker.threshold must be at least 1".into(),
            ));
        }
        for (id, settings) in &self.sources {
            if settings.max_per_second == 0 {
                return Err(EnrichError::Config(format!(
                    "sources.{}.max_per_second must be at least 1",
                    id
                )));
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Settings for a source, defaulted when the source is not listed
    pub fn source_settings(&self, id: &SourceId) -> SourceSettings {
        self.sources.get(id).cloned().unwrap_or_default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_source(mut self, id: impl Into<SourceId>, settings: SourceSettings) -> Self {
        self.sources.insert(id.into(), settings);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_yaml() {
        let yaml = r#"
workers: 8
call_timeout_ms: 5000
priority: [places, council, reviews]
retry:
  max_attempts: 4
cache:
  ttl_days: 7
  directory: .cache/enrich
sources:
  places:
    max_per_second: 10
    api_key_env: GOOGLE_PLACES_API_KEY
  council:
    max_per_second: 1
    min_interval_ms: 2000
    url_template: "https://council.example/parks?q={query}"
"#;

        let config = EnrichmentConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.priority[1], SourceId::from("council"));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.cache.ttl_days, 7);
        assert!(!config.cache.refresh);

        let council = config.source_settings(&"council".into());
        assert_eq!(council.max_per_second, 1);
        assert_eq!(council.min_interval(), Some(Duration::from_millis(2000)));
        assert!(council.enabled);
    }

    #[test]
    fn test_defaults() {
        let config = EnrichmentConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.workers, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.cache.ttl(), chrono::Duration::days(30));
        assert_eq!(config.breaker.threshold, 3);
        assert_eq!(
            config.priority,
            vec![
                SourceId::from("places"),
                SourceId::from("reviews"),
                SourceId::from("council")
            ]
        );

        let unknown = config.source_settings(&"unknown".into());
        assert_eq!(unknown.max_per_second, 5);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        assert!(EnrichmentConfig::from_yaml_str("workers: 0").is_err());
        assert!(EnrichmentConfig::from_yaml_str("retry:\n  max_attempts: 0").is_err());
        assert!(EnrichmentConfig::from_yaml_str("breaker:\n  threshold: 0").is_err());
        assert!(EnrichmentConfig::from_yaml_str(
            "sources:\n  places:\n    max_per_second: 0"
        )
        .is_err());
    }
}
