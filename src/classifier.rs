//! Classifier Adapter.
//!
//! The posture model itself is an external capability behind the
//! [`PostureClassifier`] trait. [`ClassifierAdapter`] wraps any
//! implementation with a timeout and maps every failure mode to a
//! well-formed `unknown` result, so downstream aggregation never sees an
//! error.
//!
//! [`HeuristicClassifier`] is a built-in default deriving a label from the
//! pressure distribution; its accuracy is explicitly not a goal of this
//! crate.

use crate::source::SensorReading;
use crate::stats::SharedEngineStats;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Fixed posture label set, plus `unknown` for classification failures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PostureLabel {
    Upright,
    Slouched,
    LeanLeft,
    LeanRight,
    ForwardLean,
    Unknown,
}

impl PostureLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostureLabel::Upright => "upright",
            PostureLabel::Slouched => "slouched",
            PostureLabel::LeanLeft => "lean_left",
            PostureLabel::LeanRight => "lean_right",
            PostureLabel::ForwardLean => "forward_lean",
            PostureLabel::Unknown => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PostureLabel::Unknown)
    }
}

impl std::fmt::Display for PostureLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified reading. Created per reading, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Timestamp of the underlying reading
    pub timestamp: DateTime<Utc>,
    /// Posture label
    pub label: PostureLabel,
    /// Confidence in [0, 1]; 0.0 for `unknown` results
    pub confidence: f64,
}

/// Failures of the external model call.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier timed out")]
    Timeout,
    #[error("classifier model error: {0}")]
    Model(String),
}

/// External classification capability: feature vector in, (label,
/// confidence) out.
pub trait PostureClassifier: Send + Sync {
    fn classify(
        &self,
        channels: Vec<f64>,
    ) -> BoxFuture<'static, Result<(PostureLabel, f64), ClassifierError>>;
}

/// Timeout-and-fallback wrapper around a [`PostureClassifier`].
#[derive(Clone)]
pub struct ClassifierAdapter {
    inner: Arc<dyn PostureClassifier>,
    timeout: Duration,
    stats: SharedEngineStats,
}

impl ClassifierAdapter {
    pub fn new(
        inner: Arc<dyn PostureClassifier>,
        timeout: Duration,
        stats: SharedEngineStats,
    ) -> Self {
        Self {
            inner,
            timeout,
            stats,
        }
    }

    /// Classify one reading. Never fails: timeouts and model errors come
    /// back as `unknown` with confidence 0.0 and are counted.
    pub async fn classify(&self, reading: SensorReading) -> (SensorReading, ClassificationResult) {
        let call = self.inner.classify(reading.channels.clone());
        let (label, confidence) = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok((label, confidence))) => (label, confidence.clamp(0.0, 1.0)),
            Ok(Err(e)) => {
                self.stats.record_classification_error();
                tracing::warn!(error = %e, "classifier error, mapping to unknown");
                (PostureLabel::Unknown, 0.0)
            }
            Err(_) => {
                self.stats.record_classification_timeout();
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "classifier timed out, mapping to unknown"
                );
                (PostureLabel::Unknown, 0.0)
            }
        };

        let result = ClassificationResult {
            timestamp: reading.timestamp,
            label,
            confidence,
        };
        (reading, result)
    }
}

/// Minimum fraction of total pressure on the backrest for an upright label.
const BACKREST_SHARE_SLOUCH: f64 = 0.35;
/// Below this backrest share the occupant has come off the backrest entirely.
const BACKREST_SHARE_FORWARD: f64 = 0.15;
/// Lateral imbalance (signed fraction of pan pressure) treated as a lean.
const LATERAL_IMBALANCE: f64 = 0.25;
/// Total pressure below this reads as an empty or lifting-off seat.
const MIN_ACTIVATION: f64 = 1.0;

/// Built-in pressure-distribution classifier.
///
/// Channel layout assumption: the first half of the vector is the seat pan
/// (ordered left to right), the second half the backrest. Anything more
/// sophisticated belongs in an external model behind [`PostureClassifier`].
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self
    }

    fn label_for(channels: &[f64]) -> (PostureLabel, f64) {
        let total: f64 = channels.iter().sum();
        if channels.len() < 2 || total < MIN_ACTIVATION {
            return (PostureLabel::Unknown, 0.0);
        }

        let split = channels.len() / 2;
        let (pan, backrest) = channels.split_at(split);
        let pan_total: f64 = pan.iter().sum();
        let backrest_total: f64 = backrest.iter().sum();
        let backrest_share = backrest_total / total;

        // Lateral imbalance over the seat pan.
        let half = pan.len() / 2;
        let left: f64 = pan[..half].iter().sum();
        let right: f64 = pan[pan.len() - half..].iter().sum();
        let imbalance = if pan_total > 0.0 {
            (left - right) / pan_total
        } else {
            0.0
        };

        if imbalance > LATERAL_IMBALANCE {
            let confidence = (0.5 + imbalance).min(0.95);
            return (PostureLabel::LeanLeft, confidence);
        }
        if imbalance < -LATERAL_IMBALANCE {
            let confidence = (0.5 - imbalance).min(0.95);
            return (PostureLabel::LeanRight, confidence);
        }
        if backrest_share < BACKREST_SHARE_FORWARD {
            return (PostureLabel::ForwardLean, 0.8);
        }
        if backrest_share < BACKREST_SHARE_SLOUCH {
            return (PostureLabel::Slouched, 0.7);
        }
        (PostureLabel::Upright, 0.9)
    }
}

impl PostureClassifier for HeuristicClassifier {
    fn classify(
        &self,
        channels: Vec<f64>,
    ) -> BoxFuture<'static, Result<(PostureLabel, f64), ClassifierError>> {
        let outcome = Self::label_for(&channels);
        async move { Ok(outcome) }.boxed()
    }
}
