use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ClusterError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster detection parameters, supplied per invocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Aggregation window length in minutes
    #[serde(alias = "windowMinutes")]
    pub window_minutes: u64,
    /// Distinct wallets required to emit a signal
    #[serde(alias = "minClusterSize")]
    pub min_cluster_size: usize,
    /// Minimum unified trust score for a wallet to count
    #[serde(alias = "minTrustScore")]
    pub min_trust_score: f64,
    /// Suppression period after an emission, in minutes
    #[serde(alias = "cooldownMinutes")]
    pub cooldown_minutes: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            window_minutes: 15,
            min_cluster_size: 3,
            min_trust_score: 65.0,
            cooldown_minutes: 30,
        }
    }
}

/// Minutes as signed milliseconds, `None` when the product leaves `i64`
fn minutes_to_ms(minutes: u64) -> Option<i64> {
    i64::try_from(minutes).ok()?.checked_mul(60_000)
}

impl ClusterConfig {
    /// Window length in milliseconds, `None` if it does not fit a timestamp
    pub fn window_ms(&self) -> Option<i64> {
        minutes_to_ms(self.window_minutes)
    }

    /// Buckets outlive their window so late events in the window still find them
    pub fn bucket_ttl_secs(&self) -> u64 {
        self.window_minutes.saturating_mul(120)
    }

    pub fn cooldown_ttl_secs(&self) -> u64 {
        self.cooldown_minutes.saturating_mul(60)
    }

    /// Reject non-positive or unrepresentable parameters instead of
    /// substituting defaults
    pub fn validate(&self) -> Result<()> {
        if self.window_minutes == 0 {
            return Err(ClusterError::ConfigInvalid(
                "window_minutes must be positive".to_string(),
            ));
        }
        if self.window_ms().is_none() {
            return Err(ClusterError::ConfigInvalid(format!(
                "window_minutes {} overflows a millisecond timestamp",
                self.window_minutes
            )));
        }
        if self.min_cluster_size == 0 {
            return Err(ClusterError::ConfigInvalid(
                "min_cluster_size must be positive".to_string(),
            ));
        }
        if !(self.min_trust_score > 0.0) {
            return Err(ClusterError::ConfigInvalid(format!(
                "min_trust_score must be positive, got {}",
                self.min_trust_score
            )));
        }
        if self.cooldown_minutes == 0 {
            return Err(ClusterError::ConfigInvalid(
                "cooldown_minutes must be positive".to_string(),
            ));
        }
        if minutes_to_ms(self.cooldown_minutes).is_none() {
            return Err(ClusterError::ConfigInvalid(format!(
                "cooldown_minutes {} overflows a millisecond timestamp",
                self.cooldown_minutes
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// How bucket and cooldown writes are made against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Versioned compare-and-swap for buckets, set-if-absent for cooldowns
    #[default]
    Optimistic,
    /// Plain GET + SET; concurrent events may lose a wallet or double-emit
    BestEffort,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Redis connection URL (required when backend = "redis")
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub consistency: ConsistencyMode,
    /// Compare-and-swap attempts before giving up with a write conflict
    #[serde(default = "default_cas_max_retries")]
    pub cas_max_retries: u32,
}

fn default_cas_max_retries() -> u32 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: None,
            consistency: ConsistencyMode::Optimistic,
            cas_max_retries: default_cas_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Events processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    16
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Drop signals whose id was already delivered
    #[serde(default = "default_dedup")]
    pub dedup: bool,
    #[serde(default = "default_dedup_ttl_minutes")]
    pub dedup_ttl_minutes: u64,
}

fn default_dedup() -> bool {
    true
}

fn default_dedup_ttl_minutes() -> u64 {
    24 * 60
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            dedup: default_dedup(),
            dedup_ttl_minutes: default_dedup_ttl_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a directory and the environment
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("CLUSTER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (CLUSTER prefix, `__` between sections)
            .add_source(
                Environment::with_prefix("CLUSTER")
                    .separator("__")
                    .try_parsing(true),
            );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.cluster.validate() {
            errors.push(e.to_string());
        }

        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            errors.push("store.redis_url is required for the redis backend".to_string());
        }

        if self.store.cas_max_retries == 0 {
            errors.push("store.cas_max_retries must be at least 1".to_string());
        }

        if self.ingest.concurrency == 0 {
            errors.push("ingest.concurrency must be at least 1".to_string());
        }

        if self.sink.dedup && self.sink.dedup_ttl_minutes == 0 {
            errors.push("sink.dedup_ttl_minutes must be positive when dedup is on".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            store: StoreConfig::default(),
            ingest: IngestConfig::default(),
            sink: SinkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_defaults() {
        let cfg = ClusterConfig::default();
        assert_eq!(cfg.window_minutes, 15);
        assert_eq!(cfg.min_cluster_size, 3);
        assert_eq!(cfg.min_trust_score, 65.0);
        assert_eq!(cfg.cooldown_minutes, 30);
        assert_eq!(cfg.window_ms(), Some(900_000));
        assert_eq!(cfg.bucket_ttl_secs(), 1_800);
        assert_eq!(cfg.cooldown_ttl_secs(), 1_800);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_cluster_rejects_non_positive() {
        let zero_window = ClusterConfig {
            window_minutes: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_window.validate(),
            Err(ClusterError::ConfigInvalid(_))
        ));

        let zero_size = ClusterConfig {
            min_cluster_size: 0,
            ..Default::default()
        };
        assert!(zero_size.validate().is_err());

        let negative_trust = ClusterConfig {
            min_trust_score: -1.0,
            ..Default::default()
        };
        assert!(negative_trust.validate().is_err());

        let nan_trust = ClusterConfig {
            min_trust_score: f64::NAN,
            ..Default::default()
        };
        assert!(nan_trust.validate().is_err());

        let zero_cooldown = ClusterConfig {
            cooldown_minutes: 0,
            ..Default::default()
        };
        assert!(zero_cooldown.validate().is_err());
    }

    #[test]
    fn test_cluster_rejects_overflowing_minutes() {
        let huge_window = ClusterConfig {
            window_minutes: u64::MAX / 60,
            ..Default::default()
        };
        assert_eq!(huge_window.window_ms(), None);
        assert!(matches!(
            huge_window.validate(),
            Err(ClusterError::ConfigInvalid(msg)) if msg.contains("window_minutes")
        ));

        let huge_cooldown = ClusterConfig {
            cooldown_minutes: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(
            huge_cooldown.validate(),
            Err(ClusterError::ConfigInvalid(msg)) if msg.contains("cooldown_minutes")
        ));

        let largest = (i64::MAX / 60_000) as u64;
        let edge = ClusterConfig {
            window_minutes: largest,
            cooldown_minutes: largest,
            ..Default::default()
        };
        assert!(edge.validate().is_ok());
        assert!(ClusterConfig {
            window_minutes: largest + 1,
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_cluster_config_accepts_camel_case() {
        let cfg: ClusterConfig = serde_json::from_str(
            r#"{"windowMinutes":10,"minClusterSize":4,"minTrustScore":70,"cooldownMinutes":60}"#,
        )
        .unwrap();
        assert_eq!(cfg.window_minutes, 10);
        assert_eq!(cfg.min_cluster_size, 4);
        assert_eq!(cfg.min_trust_score, 70.0);
        assert_eq!(cfg.cooldown_minutes, 60);
    }

    #[test]
    fn test_app_config_validate() {
        let mut cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.store.backend = StoreBackend::Redis;
        cfg.ingest.concurrency = 0;
        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("redis_url")));
    }

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cluster-signals-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_from_reads_default_toml() {
        let dir = scratch_dir("load");
        std::fs::write(
            dir.join("default.toml"),
            "[cluster]\nwindow_minutes = 5\n\n[store]\nconsistency = \"best_effort\"\n",
        )
        .unwrap();

        let cfg = AppConfig::load_from(&dir).unwrap();
        assert_eq!(cfg.cluster.window_minutes, 5);
        assert_eq!(cfg.cluster.min_cluster_size, 3);
        assert_eq!(cfg.store.consistency, ConsistencyMode::BestEffort);
        assert_eq!(cfg.logging.level, "info");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_from_surfaces_config_error() {
        let dir = scratch_dir("bad");
        std::fs::write(dir.join("default.toml"), "[cluster]\nwindow_minutes = \"soon\"\n")
            .unwrap();

        let err = AppConfig::load_from(&dir).unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
