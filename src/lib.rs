//! SeatSense Engine - posture aggregation and trigger engine.
//!
//! Consumes a stream of seat pressure readings, classifies each reading into
//! a posture label, folds labels into per-window aggregate statistics, and
//! fires debounced triggers toward an assistant service when fatigue,
//! posture switching, or sustained bad posture crosses a threshold.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SeatSense Engine                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌────────┐ │
//! │  │  Source  │──▶│ Classifier │──▶│ Aggregate │──▶│Trigger │ │
//! │  │ (frames) │   │ (bounded)  │   │ (windows) │   │ (eval) │ │
//! │  └──────────┘   └────────────┘   └───────────┘   └────────┘ │
//! │        │                                              │      │
//! │        ▼                                              ▼      │
//! │  ┌──────────┐                                  ┌──────────┐ │
//! │  │  Stats   │                                  │ Dispatch │ │
//! │  │(counters)│                                  │ (retry)  │ │
//! │  └──────────┘                                  └──────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All windowing, cooldown, and trigger timing runs on stream time (the
//! timestamps carried by the readings), never on wall-clock time, so replays
//! of a recorded stream behave deterministically.

pub mod backoff;
pub mod classifier;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod engine;
pub mod source;
pub mod stats;

// Re-export key types at crate root for convenience
pub use backoff::{Backoff, BackoffPolicy};
pub use classifier::{
    ClassificationResult, ClassifierAdapter, ClassifierError, HeuristicClassifier, PostureClassifier,
    PostureLabel,
};
pub use config::{Config, ConfigError};
pub use core::{
    AggregateState, AggregationConfig, AggregationWindow, EvaluatorConfig, TriggerEvaluator,
    TriggerEvent, TriggerReason,
};
pub use dispatch::{
    AssistantClient, AssistantConfig, DispatchError, Dispatcher, HttpAssistantClient,
    TriggerPayload,
};
pub use engine::{Engine, EngineReport};
pub use source::{ParseError, SensorReading, SourceAdapter, SourcePoll, Transport, TransportError};
pub use stats::{
    create_shared_stats, create_shared_stats_with_persistence, EngineStats, EngineStatsSnapshot,
    SharedEngineStats,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
