//! Core aggregation and trigger logic.
//!
//! This module owns the stateful heart of the engine: the aggregation
//! window (rolling posture statistics) and the trigger evaluator (the
//! `Idle`/`Cooldown` debounce machine).

pub mod aggregate;
pub mod trigger;

pub use aggregate::{AggregateState, AggregationConfig, AggregationWindow, PressureSummary};
pub use trigger::{EvaluatorConfig, TriggerEvaluator, TriggerEvent, TriggerReason};
