//! Trigger evaluator.
//!
//! A two-state machine (`Idle` / `Cooldown`) that turns aggregate snapshots
//! into trigger events. Conditions are checked in a fixed priority order —
//! fatigue, then rapid switching, then sustained bad posture — and the
//! cooldown debounces repeated triggers for one sustained condition. The
//! machine has no terminal state; it runs for the lifetime of the stream.
//!
//! Like the aggregation window, the evaluator runs on stream time: `now` is
//! the timestamp of the result that produced the snapshot.

use crate::classifier::PostureLabel;
use crate::core::aggregate::AggregateState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Why a trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerReason {
    HighFatigue,
    RapidSwitching,
    SustainedBadPosture,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerReason::HighFatigue => "high-fatigue",
            TriggerReason::RapidSwitching => "rapid-switching",
            TriggerReason::SustainedBadPosture => "sustained-bad-posture",
        };
        f.write_str(s)
    }
}

/// Evidence that the assistant should be invoked. Immutable; consumed once
/// by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Stream time at which the trigger fired
    pub timestamp: DateTime<Utc>,
    /// Highest-priority condition that matched
    pub reason: TriggerReason,
    /// Aggregate state at trigger time (value copy)
    pub snapshot: AggregateState,
    /// Recent label history, oldest first
    pub recent_labels: Vec<PostureLabel>,
}

/// Threshold and debounce parameters.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub fatigue_threshold: f64,
    pub switch_threshold: u32,
    /// Minimum time-in-posture for any bad label
    pub sustained_threshold: Duration,
    /// Minimum stream-time interval between consecutive triggers
    pub cooldown_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvaluatorState {
    Idle,
    Cooldown { until: DateTime<Utc> },
}

/// The `Idle`/`Cooldown` trigger state machine.
pub struct TriggerEvaluator {
    config: EvaluatorConfig,
    bad_labels: Vec<PostureLabel>,
    state: EvaluatorState,
}

impl TriggerEvaluator {
    pub fn new(config: EvaluatorConfig, bad_labels: Vec<PostureLabel>) -> Self {
        Self {
            config,
            bad_labels,
            state: EvaluatorState::Idle,
        }
    }

    pub fn in_cooldown(&self) -> bool {
        matches!(self.state, EvaluatorState::Cooldown { .. })
    }

    /// Evaluate one snapshot at stream time `now`. Returns a trigger event
    /// when a condition matches in `Idle`; nothing while cooling down.
    pub fn evaluate(
        &mut self,
        snapshot: &AggregateState,
        recent_labels: &[PostureLabel],
        now: DateTime<Utc>,
    ) -> Option<TriggerEvent> {
        if let EvaluatorState::Cooldown { until } = self.state {
            if now < until {
                return None;
            }
            self.state = EvaluatorState::Idle;
        }

        let reason = self.matching_reason(snapshot)?;
        self.state = EvaluatorState::Cooldown {
            until: now + self.config.cooldown_duration,
        };

        Some(TriggerEvent {
            timestamp: now,
            reason,
            snapshot: snapshot.clone(),
            recent_labels: recent_labels.to_vec(),
        })
    }

    /// First matching condition in priority order:
    /// fatigue > rapid switching > sustained bad posture.
    fn matching_reason(&self, snapshot: &AggregateState) -> Option<TriggerReason> {
        if snapshot.fatigue_score >= self.config.fatigue_threshold {
            return Some(TriggerReason::HighFatigue);
        }
        if snapshot.switch_count >= self.config.switch_threshold {
            return Some(TriggerReason::RapidSwitching);
        }
        let sustained_secs = self.config.sustained_threshold.num_milliseconds() as f64 / 1000.0;
        if self
            .bad_labels
            .iter()
            .any(|&label| snapshot.time_in(label) >= sustained_secs)
        {
            return Some(TriggerReason::SustainedBadPosture);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn snapshot(fatigue: f64, switches: u32, slouched_secs: f64) -> AggregateState {
        let mut time_in_posture = BTreeMap::new();
        if slouched_secs > 0.0 {
            time_in_posture.insert(PostureLabel::Slouched, slouched_secs);
        }
        AggregateState {
            window_start: t(0),
            window_end: t(300),
            readings_total: 10,
            time_in_posture,
            switch_count: switches,
            fatigue_score: fatigue,
            pressure: Default::default(),
        }
    }

    fn evaluator(fatigue: f64, switches: u32, sustained_secs: i64, cooldown_secs: i64) -> TriggerEvaluator {
        TriggerEvaluator::new(
            EvaluatorConfig {
                fatigue_threshold: fatigue,
                switch_threshold: switches,
                sustained_threshold: Duration::seconds(sustained_secs),
                cooldown_duration: Duration::seconds(cooldown_secs),
            },
            vec![PostureLabel::Slouched, PostureLabel::ForwardLean],
        )
    }

    #[test]
    fn test_no_trigger_below_thresholds() {
        let mut ev = evaluator(5.0, 10, 60, 300);
        assert!(ev.evaluate(&snapshot(4.9, 9, 59.0), &[], t(0)).is_none());
        assert!(!ev.in_cooldown());
    }

    #[test]
    fn test_fatigue_has_highest_priority() {
        let mut ev = evaluator(5.0, 10, 60, 300);
        // All three conditions exceeded at once; fatigue wins.
        let event = ev.evaluate(&snapshot(6.0, 20, 120.0), &[], t(0)).unwrap();
        assert_eq!(event.reason, TriggerReason::HighFatigue);
    }

    #[test]
    fn test_switching_beats_sustained() {
        let mut ev = evaluator(5.0, 10, 60, 300);
        let event = ev.evaluate(&snapshot(1.0, 12, 120.0), &[], t(0)).unwrap();
        assert_eq!(event.reason, TriggerReason::RapidSwitching);
    }

    #[test]
    fn test_sustained_bad_posture_fires_last() {
        let mut ev = evaluator(5.0, 10, 60, 300);
        let event = ev.evaluate(&snapshot(1.0, 2, 75.0), &[], t(0)).unwrap();
        assert_eq!(event.reason, TriggerReason::SustainedBadPosture);
    }

    #[test]
    fn test_cooldown_suppresses_then_rearms() {
        let mut ev = evaluator(5.0, 10, 60, 300);
        assert!(ev.evaluate(&snapshot(9.0, 0, 0.0), &[], t(0)).is_some());
        assert!(ev.in_cooldown());

        // Threshold still exceeded: nothing fires within the cooldown.
        assert!(ev.evaluate(&snapshot(9.0, 0, 0.0), &[], t(10)).is_none());
        assert!(ev.evaluate(&snapshot(9.0, 0, 0.0), &[], t(299)).is_none());

        // Cooldown elapsed: the same sustained condition may fire again.
        let event = ev.evaluate(&snapshot(9.0, 0, 0.0), &[], t(300)).unwrap();
        assert_eq!(event.reason, TriggerReason::HighFatigue);
    }

    #[test]
    fn test_event_carries_snapshot_and_history() {
        let mut ev = evaluator(5.0, 10, 60, 300);
        let recent = vec![PostureLabel::Upright, PostureLabel::Slouched];
        let event = ev
            .evaluate(&snapshot(7.5, 3, 0.0), &recent, t(42))
            .unwrap();
        assert_eq!(event.timestamp, t(42));
        assert_eq!(event.snapshot.fatigue_score, 7.5);
        assert_eq!(event.recent_labels, recent);
    }

    #[test]
    fn test_reason_serializes_kebab_case() {
        let json = serde_json::to_string(&TriggerReason::HighFatigue).unwrap();
        assert_eq!(json, "\"high-fatigue\"");
        let json = serde_json::to_string(&TriggerReason::SustainedBadPosture).unwrap();
        assert_eq!(json, "\"sustained-bad-posture\"");
    }
}
