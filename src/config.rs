//! Configuration for the posture trigger engine.

use crate::backoff::BackoffPolicy;
use crate::classifier::PostureLabel;
use crate::core::{AggregationConfig, EvaluatorConfig};
use crate::dispatch::AssistantConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Duration of each aggregation window
    #[serde(with = "duration_serde")]
    pub window_duration: Duration,

    /// Fatigue decay factor, strictly in (0, 1)
    pub decay_factor: f64,

    /// Per-label fatigue weight; labels with weight > 0 are treated as bad
    pub label_weights: BTreeMap<PostureLabel, f64>,

    /// Fatigue score at or above which a trigger fires
    pub fatigue_threshold: f64,

    /// Posture switches within a window at or above which a trigger fires
    pub switch_threshold: u32,

    /// Time-in-posture for any bad label at or above which a trigger fires
    #[serde(with = "duration_serde")]
    pub sustained_threshold: Duration,

    /// Minimum interval between consecutive triggers
    #[serde(with = "duration_serde")]
    pub cooldown_duration: Duration,

    /// Fixed channel count of the sensor stream
    pub channel_count: usize,

    /// Timeout applied to each classifier call (milliseconds)
    pub classify_timeout_ms: u64,

    /// Bound on concurrently in-flight classifications
    pub max_inflight: usize,

    /// How many recent labels to carry in the dispatch payload
    pub recent_label_history: usize,

    /// Assistant service endpoint
    pub assistant: AssistantConfig,

    /// Delivery attempts per trigger before it is dropped
    pub dispatch_retry_limit: u32,

    /// Base delay for dispatch retry backoff (milliseconds)
    pub dispatch_backoff_base_ms: u64,

    /// Cap on any single dispatch retry delay (milliseconds)
    pub dispatch_backoff_max_ms: u64,

    /// Base delay for transport reconnect backoff (milliseconds)
    pub reconnect_backoff_base_ms: u64,

    /// Cap on any single reconnect delay (milliseconds)
    pub reconnect_backoff_max_ms: u64,

    /// Grace period for draining in-flight work on shutdown (milliseconds)
    pub shutdown_grace_ms: u64,

    /// Path for persisting engine counters
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("seatsense-engine");

        let mut label_weights = BTreeMap::new();
        label_weights.insert(PostureLabel::Upright, 0.0);
        label_weights.insert(PostureLabel::Slouched, 1.0);
        label_weights.insert(PostureLabel::ForwardLean, 0.8);
        label_weights.insert(PostureLabel::LeanLeft, 0.4);
        label_weights.insert(PostureLabel::LeanRight, 0.4);

        Self {
            window_duration: Duration::from_secs(300),
            decay_factor: 0.9,
            label_weights,
            fatigue_threshold: 6.0,
            switch_threshold: 10,
            sustained_threshold: Duration::from_secs(120),
            cooldown_duration: Duration::from_secs(300),
            channel_count: 16,
            classify_timeout_ms: 250,
            max_inflight: 4,
            recent_label_history: 16,
            assistant: AssistantConfig::default(),
            dispatch_retry_limit: 3,
            dispatch_backoff_base_ms: 500,
            dispatch_backoff_max_ms: 10_000,
            reconnect_backoff_base_ms: 500,
            reconnect_backoff_max_ms: 30_000,
            shutdown_grace_ms: 5_000,
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path. A missing file yields the
    /// defaults.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(&config_path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("seatsense-engine")
            .join("config.json")
    }

    /// Ensure required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.decay_factor > 0.0 && self.decay_factor < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "decay_factor must be in (0, 1), got {}",
                self.decay_factor
            )));
        }
        if self.channel_count == 0 {
            return Err(ConfigError::Invalid("channel_count must be > 0".into()));
        }
        if self.max_inflight == 0 {
            return Err(ConfigError::Invalid("max_inflight must be > 0".into()));
        }
        if self.window_duration.is_zero() {
            return Err(ConfigError::Invalid("window_duration must be > 0".into()));
        }
        Ok(())
    }

    pub fn aggregation_config(&self) -> AggregationConfig {
        AggregationConfig {
            window_duration: chrono::Duration::milliseconds(
                self.window_duration.as_millis() as i64
            ),
            decay_factor: self.decay_factor,
            label_weights: self.label_weights.clone(),
            recent_label_history: self.recent_label_history,
        }
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            fatigue_threshold: self.fatigue_threshold,
            switch_threshold: self.switch_threshold,
            sustained_threshold: chrono::Duration::milliseconds(
                self.sustained_threshold.as_millis() as i64,
            ),
            cooldown_duration: chrono::Duration::milliseconds(
                self.cooldown_duration.as_millis() as i64,
            ),
        }
    }

    /// Backoff policy for dispatch retries (bounded attempts).
    pub fn dispatch_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.dispatch_backoff_base_ms),
            Duration::from_millis(self.dispatch_backoff_max_ms),
            Some(self.dispatch_retry_limit),
        )
    }

    /// Backoff policy for transport reconnects (retries forever, bounded
    /// max delay).
    pub fn reconnect_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.reconnect_backoff_base_ms),
            Duration::from_millis(self.reconnect_backoff_max_ms),
            None,
        )
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_millis(self.classify_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Serde support for Duration (whole seconds).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
