//! Caller-supplied configuration.
//!
//! The core never parses command lines; hosts build a [`MeridianConfig`]
//! directly, from a JSON file, or from `MERIDIAN_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeridianConfig {
    /// Root directory holding `chunks/` and `index/`
    pub data_dir: PathBuf,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub linking: LinkingConfig,
    pub recall: RecallConfig,
    pub remember: RememberConfig,
}

impl Default for MeridianConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".meridian"),
            cache: CacheConfig::default(),
            session: SessionConfig::default(),
            linking: LinkingConfig::default(),
            recall: RecallConfig::default(),
            remember: RememberConfig::default(),
        }
    }
}

impl MeridianConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_temporal_window_minutes(mut self, minutes: i64) -> Self {
        self.linking.temporal_window_minutes = minutes;
        self
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.data_dir = expand_path(&config.data_dir)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from defaults overridden by `MERIDIAN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("MERIDIAN_DATA_DIR") {
            config.data_dir = expand_path(Path::new(&dir))?;
        }
        if let Some(v) = env_parse::<u32>("MERIDIAN_MAX_ITERATIONS")? {
            config.session.max_iterations = v;
        }
        if let Some(v) = env_parse::<f64>("MERIDIAN_MAX_COST_USD")? {
            config.session.max_cost_usd = v;
        }
        if let Some(v) = env_parse::<u64>("MERIDIAN_TIMEOUT_MS")? {
            config.session.timeout_ms = v;
        }
        if let Some(v) = env_parse::<i64>("MERIDIAN_TEMPORAL_WINDOW_MINUTES")? {
            config.linking.temporal_window_minutes = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.session.max_iterations == 0 {
            return Err(Error::Config("session.max_iterations must be > 0".into()));
        }
        if !(self.session.max_cost_usd >= 0.0) {
            return Err(Error::Config("session.max_cost_usd must be >= 0".into()));
        }
        if self.linking.temporal_window_minutes < 0 {
            return Err(Error::Config(
                "linking.temporal_window_minutes must be >= 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recall.min_confidence) {
            return Err(Error::Config("recall.min_confidence must be in [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.remember.default_confidence) {
            return Err(Error::Config(
                "remember.default_confidence must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Directory for the disk cache tier.
    pub fn disk_cache_dir(&self) -> PathBuf {
        self.cache
            .disk_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cache"))
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .map_err(|e| Error::Config(format!("Failed to expand {}: {}", raw, e)))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Cache tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_ttl_secs: u64,
    pub disk_ttl_secs: u64,
    pub disk_enabled: bool,
    /// Defaults to `<data_dir>/cache`
    pub disk_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_ttl_secs: 300,
            disk_ttl_secs: 3600,
            disk_enabled: true,
            disk_dir: None,
        }
    }
}

/// Session budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum `llm_query` calls per session lifetime
    pub max_iterations: u32,
    /// Wall-clock bound per `execute` call
    pub timeout_ms: u64,
    /// Cumulative cost budget; reaching it exactly is allowed
    pub max_cost_usd: f64,
    /// Cost assumed for a query before the provider reports the real one
    pub estimated_query_cost_usd: f64,
    /// Largest sequence `range()` may produce
    pub max_range: usize,
    /// Default `search_chunks` limit
    pub search_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            timeout_ms: 60_000,
            max_cost_usd: 1.0,
            estimated_query_cost_usd: 0.0,
            max_range: 10_000,
            search_limit: 10,
        }
    }
}

impl SessionConfig {
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_cost(mut self, usd: f64) -> Self {
        self.max_cost_usd = usd;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }
}

/// Auto-linker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkingConfig {
    pub temporal_window_minutes: i64,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            temporal_window_minutes: 5,
        }
    }
}

/// Recall defaults and the query-expansion table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    pub max_results: usize,
    pub min_confidence: f64,
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            min_confidence: 0.0,
            synonyms: default_synonyms(),
        }
    }
}

/// Remember defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RememberConfig {
    /// Content above this estimate is split on paragraph boundaries
    pub max_chunk_tokens: usize,
    pub default_confidence: f64,
}

impl Default for RememberConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 512,
            default_confidence: 0.7,
        }
    }
}

/// Built-in synonym groups used for query expansion.
pub fn default_synonyms() -> BTreeMap<String, Vec<String>> {
    let groups: &[(&str, &[&str])] = &[
        ("task", &["task", "bead", "issue", "ticket", "work item", "todo"]),
        ("tracking", &["tracking", "management", "organization", "workflow"]),
        ("beads", &["beads", "tasks", "issues", "tickets"]),
        ("memory", &["memory", "storage", "remember", "recall", "chunk"]),
        ("remember", &["remember", "store", "save", "record"]),
        ("project", &["project", "meridian", "system", "brain"]),
        ("status", &["status", "state", "progress", "complete", "done"]),
        ("architecture", &["architecture", "design", "structure", "system"]),
        ("components", &["components", "parts", "modules", "pieces"]),
        ("test", &["test", "testing", "validate", "verify", "pytest"]),
        ("file", &["file", "document", "code", "script"]),
        ("format", &["format", "structure", "layout", "style"]),
    ];

    groups
        .iter()
        .map(|(key, words)| {
            (
                key.to_string(),
                words.iter().map(|w| w.to_string()).collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeridianConfig::default();
        assert_eq!(config.cache.memory_ttl_secs, 300);
        assert_eq!(config.cache.disk_ttl_secs, 3600);
        assert_eq!(config.session.max_iterations, 10);
        assert_eq!(config.linking.temporal_window_minutes, 5);
        assert!(config.recall.synonyms.contains_key("task"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_partial_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meridian.json");
        std::fs::write(
            &path,
            r#"{"data_dir": "/tmp/brain", "session": {"max_cost_usd": 0.25}}"#,
        )
        .unwrap();

        let config = MeridianConfig::from_json_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/brain"));
        assert_eq!(config.session.max_cost_usd, 0.25);
        assert_eq!(config.session.max_iterations, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MeridianConfig::default();
        config.session.max_iterations = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = MeridianConfig::default();
        config.recall.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disk_cache_dir_defaults_under_data_dir() {
        let config = MeridianConfig::new("/srv/brain");
        assert_eq!(config.disk_cache_dir(), PathBuf::from("/srv/brain/cache"));
    }
}
