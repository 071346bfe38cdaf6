//! Aggregation window.
//!
//! Consumes classification results and maintains [`AggregateState`] over a
//! time window, rolling forward when a result's timestamp reaches the window
//! end. The state is owned exclusively by [`AggregationWindow`]; the trigger
//! evaluator only ever sees value-copy snapshots.
//!
//! All timing here is stream time (reading timestamps), never wall clock, so
//! replayed streams aggregate identically.

use crate::classifier::{ClassificationResult, PostureLabel};
use crate::source::SensorReading;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Per-channel pressure distribution summary for the active window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PressureSummary {
    /// Running mean per channel
    pub mean: Vec<f64>,
    /// Peak value per channel
    pub peak: Vec<f64>,
}

impl PressureSummary {
    fn update(&mut self, channels: &[f64], count: u64) {
        if self.mean.len() != channels.len() {
            self.mean = vec![0.0; channels.len()];
            self.peak = vec![f64::MIN; channels.len()];
        }
        let n = count as f64;
        for (i, &value) in channels.iter().enumerate() {
            self.mean[i] += (value - self.mean[i]) / n;
            if value > self.peak[i] {
                self.peak[i] = value;
            }
        }
    }
}

/// Rolling statistics for the active window.
///
/// `fatigue_score` is a running decaying accumulator and survives rollover;
/// everything else is scoped to the window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateState {
    /// Start of the active window
    pub window_start: DateTime<Utc>,
    /// End of the active window
    pub window_end: DateTime<Utc>,
    /// Readings counted in this window
    pub readings_total: u64,
    /// Seconds spent per label within this window
    pub time_in_posture: BTreeMap<PostureLabel, f64>,
    /// Label changes between consecutive classifications in this window
    pub switch_count: u32,
    /// Exponentially decaying fatigue accumulator
    pub fatigue_score: f64,
    /// Last-seen pressure distribution summary
    pub pressure: PressureSummary,
}

impl AggregateState {
    fn fresh(start: DateTime<Utc>, duration: Duration, fatigue_score: f64) -> Self {
        Self {
            window_start: start,
            window_end: start + duration,
            readings_total: 0,
            time_in_posture: BTreeMap::new(),
            switch_count: 0,
            fatigue_score,
            pressure: PressureSummary::default(),
        }
    }

    /// Seconds accumulated for a label in this window.
    pub fn time_in(&self, label: PostureLabel) -> f64 {
        self.time_in_posture.get(&label).copied().unwrap_or(0.0)
    }
}

/// Aggregation parameters.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Duration of each window
    pub window_duration: Duration,
    /// Fatigue decay factor, strictly in (0, 1)
    pub decay_factor: f64,
    /// Per-label fatigue weight; labels with weight > 0 are "bad"
    pub label_weights: BTreeMap<PostureLabel, f64>,
    /// How many recent labels to retain for dispatch context
    pub recent_label_history: usize,
}

impl AggregationConfig {
    pub fn weight(&self, label: PostureLabel) -> f64 {
        self.label_weights.get(&label).copied().unwrap_or(0.0)
    }

    /// Labels considered "bad" posture: any with a positive fatigue weight.
    pub fn bad_labels(&self) -> Vec<PostureLabel> {
        self.label_weights
            .iter()
            .filter(|(_, &w)| w > 0.0)
            .map(|(&label, _)| label)
            .collect()
    }
}

/// Single-owner aggregation state machine.
pub struct AggregationWindow {
    config: AggregationConfig,
    state: AggregateState,
    /// Last non-unknown label seen; carries across rollover so a switch
    /// spanning a window boundary is still counted exactly once.
    last_label: Option<PostureLabel>,
    /// Timestamp of the previous result (any label, including unknown)
    last_timestamp: Option<DateTime<Utc>>,
    recent_labels: VecDeque<PostureLabel>,
}

impl AggregationWindow {
    /// Create a window starting at `start`.
    pub fn new(config: AggregationConfig, start: DateTime<Utc>) -> Self {
        let state = AggregateState::fresh(start, config.window_duration, 0.0);
        Self {
            config,
            state,
            last_label: None,
            last_timestamp: None,
            recent_labels: VecDeque::new(),
        }
    }

    /// Apply one classification result (with its source reading, for the
    /// pressure summary). Returns `true` if the window rolled forward.
    ///
    /// Unknown labels contribute zero time-in-posture and never count as a
    /// switch; they still advance the elapsed-time anchor so the next known
    /// label does not absorb the gap.
    pub fn apply(&mut self, reading: &SensorReading, result: &ClassificationResult) -> bool {
        let ts = result.timestamp;

        let rolled = ts >= self.state.window_end;
        if rolled {
            self.roll_to(ts);
        }

        let elapsed_secs = self
            .last_timestamp
            .map(|prev| ((ts - prev).num_milliseconds().max(0)) as f64 / 1000.0)
            .unwrap_or(0.0);

        self.state.readings_total += 1;
        self.state
            .pressure
            .update(&reading.channels, self.state.readings_total);

        let label = result.label;
        if !label.is_unknown() {
            if let Some(prev) = self.last_label {
                if prev != label {
                    self.state.switch_count += 1;
                }
            }
            self.last_label = Some(label);
            *self.state.time_in_posture.entry(label).or_insert(0.0) += elapsed_secs;
        }

        self.state.fatigue_score =
            self.state.fatigue_score * self.config.decay_factor + self.config.weight(label);

        self.last_timestamp = Some(ts);

        self.recent_labels.push_back(label);
        while self.recent_labels.len() > self.config.recent_label_history {
            self.recent_labels.pop_front();
        }

        rolled
    }

    /// Value copy of the current state; never a live reference.
    pub fn snapshot(&self) -> AggregateState {
        self.state.clone()
    }

    /// Recent label history, oldest first.
    pub fn recent_labels(&self) -> Vec<PostureLabel> {
        self.recent_labels.iter().copied().collect()
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Roll the window forward, aligned to the incoming timestamp. Window
    /// counters reset; the fatigue accumulator and switch anchor carry over.
    fn roll_to(&mut self, ts: DateTime<Utc>) {
        let fatigue = self.state.fatigue_score;
        self.state = AggregateState::fresh(ts, self.config.window_duration, fatigue);
    }
}
