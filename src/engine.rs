//! Engine orchestration.
//!
//! Wires the pipeline together: a blocking ingest thread reads the sensor
//! transport and feeds a bounded channel; an async stage classifies readings
//! with a bounded in-flight set, folds results into the aggregation window,
//! and evaluates triggers; a dispatcher task delivers triggers to the
//! assistant. Aggregation is single-writer, so window state needs no locks.
//!
//! Readings are classified concurrently but applied in arrival order
//! (`FuturesOrdered`), which keeps elapsed-time and switch accounting exact.

use crate::backoff::Backoff;
use crate::classifier::{ClassificationResult, ClassifierAdapter, PostureClassifier};
use crate::config::Config;
use crate::core::{AggregateState, AggregationConfig, AggregationWindow, TriggerEvaluator};
use crate::dispatch::{generate_device_id, AssistantClient, Dispatcher};
use crate::source::{SensorReading, SourceAdapter, SourcePoll, Transport, TransportError};
use crate::stats::{EngineStatsSnapshot, SharedEngineStats};
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesOrdered;
use futures_util::{FutureExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// How long the ingest thread blocks on the transport per poll.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Capacity of the reading channel between ingest and aggregation.
const READING_QUEUE: usize = 64;

/// What the engine leaves behind when it stops.
#[derive(Debug)]
pub struct EngineReport {
    /// Aggregate state of the last open window, if any reading arrived
    pub final_window: Option<AggregateState>,
    /// Counter snapshot at shutdown
    pub stats: EngineStatsSnapshot,
}

/// The assembled pipeline. Construct once, run once.
pub struct Engine {
    config: Config,
    transport: Box<dyn Transport>,
    classifier: Arc<dyn PostureClassifier>,
    assistant: Arc<dyn AssistantClient>,
    stats: SharedEngineStats,
}

impl Engine {
    pub fn new(
        config: Config,
        transport: Box<dyn Transport>,
        classifier: Arc<dyn PostureClassifier>,
        assistant: Arc<dyn AssistantClient>,
        stats: SharedEngineStats,
    ) -> Self {
        Self {
            config,
            transport,
            classifier,
            assistant,
            stats,
        }
    }

    /// Run until the transport permanently closes or `shutdown` flips to
    /// true. On shutdown, in-flight classifications and the last published
    /// trigger are drained within the configured grace period.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> EngineReport {
        let agg_config = self.config.aggregation_config();
        let max_inflight = self.config.max_inflight;
        let grace = self.config.shutdown_grace();

        // Ingest thread: transport -> bounded reading channel.
        let (reading_tx, mut reading_rx) = mpsc::channel::<SensorReading>(READING_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));
        let ingest_handle = {
            let stop = stop.clone();
            let stats = self.stats.clone();
            let policy = self.config.reconnect_backoff();
            let channel_count = self.config.channel_count;
            let transport = self.transport;
            std::thread::spawn(move || {
                ingest_loop(transport, channel_count, reading_tx, stop, policy, stats)
            })
        };

        // Dispatcher task: depth-one trigger queue -> assistant.
        let (trigger_tx, trigger_rx) = watch::channel(None);
        let dispatch_handle = {
            let dispatcher = Dispatcher::new(
                self.assistant,
                self.config.dispatch_backoff(),
                generate_device_id(),
                self.stats.clone(),
            );
            tokio::spawn(async move { dispatcher.run(trigger_rx).await })
        };

        let adapter = ClassifierAdapter::new(
            self.classifier,
            self.config.classify_timeout(),
            self.stats.clone(),
        );
        let mut stage = AggregationStage::new(
            agg_config.clone(),
            TriggerEvaluator::new(self.config.evaluator_config(), agg_config.bad_labels()),
            trigger_tx,
            self.stats.clone(),
        );

        let mut inflight: FuturesOrdered<
            BoxFuture<'static, (SensorReading, ClassificationResult)>,
        > = FuturesOrdered::new();
        let mut readings_open = true;
        let mut interrupted = false;

        loop {
            tokio::select! {
                maybe = reading_rx.recv(), if readings_open && inflight.len() < max_inflight => {
                    match maybe {
                        Some(reading) => {
                            let adapter = adapter.clone();
                            inflight.push_back(
                                async move { adapter.classify(reading).await }.boxed(),
                            );
                        }
                        None => readings_open = false,
                    }
                }
                Some((reading, result)) = inflight.next(), if !inflight.is_empty() => {
                    stage.apply(&reading, &result);
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as a shutdown request.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("shutdown requested, draining pipeline");
                        interrupted = true;
                        break;
                    }
                }
            }

            if !readings_open && inflight.is_empty() {
                tracing::info!("sensor stream ended");
                break;
            }
        }

        stop.store(true, Ordering::Relaxed);
        // Unblock the ingest thread if it is waiting on a full queue.
        reading_rx.close();

        if interrupted && !inflight.is_empty() {
            let drain = async {
                while let Some((reading, result)) = inflight.next().await {
                    stage.apply(&reading, &result);
                }
            };
            if tokio::time::timeout(grace, drain).await.is_err() {
                tracing::warn!("shutdown grace elapsed with classifications in flight");
            }
        }

        // Close the trigger queue, then give the dispatcher the same grace
        // to finish an in-progress delivery.
        let stats_snapshot = {
            drop(stage.triggers);
            if tokio::time::timeout(grace, dispatch_handle).await.is_err() {
                tracing::warn!("shutdown grace elapsed with a delivery in flight");
            }
            self.stats.snapshot()
        };

        let _ = tokio::task::spawn_blocking(move || ingest_handle.join()).await;

        let final_window = stage.window.as_ref().map(|w| w.snapshot());
        if let Some(state) = &final_window {
            tracing::info!(
                readings = state.readings_total,
                switches = state.switch_count,
                fatigue = format!("{:.2}", state.fatigue_score).as_str(),
                "final window at shutdown"
            );
        }

        EngineReport {
            final_window,
            stats: stats_snapshot,
        }
    }
}

/// Single-writer aggregation plus trigger evaluation.
struct AggregationStage {
    agg_config: AggregationConfig,
    window: Option<AggregationWindow>,
    evaluator: TriggerEvaluator,
    triggers: watch::Sender<Option<crate::core::TriggerEvent>>,
    stats: SharedEngineStats,
}

impl AggregationStage {
    fn new(
        agg_config: AggregationConfig,
        evaluator: TriggerEvaluator,
        triggers: watch::Sender<Option<crate::core::TriggerEvent>>,
        stats: SharedEngineStats,
    ) -> Self {
        Self {
            agg_config,
            window: None,
            evaluator,
            triggers,
            stats,
        }
    }

    /// Fold one classified reading into the window and evaluate triggers at
    /// its stream time. The first reading opens the first window.
    fn apply(&mut self, reading: &SensorReading, result: &ClassificationResult) {
        let window = self.window.get_or_insert_with(|| {
            AggregationWindow::new(self.agg_config.clone(), result.timestamp)
        });

        if window.apply(reading, result) {
            self.stats.record_window_rolled();
            tracing::debug!("aggregation window rolled");
        }

        let snapshot = window.snapshot();
        if let Some(event) =
            self.evaluator
                .evaluate(&snapshot, &window.recent_labels(), result.timestamp)
        {
            self.stats.record_trigger_emitted();
            tracing::info!(
                reason = %event.reason,
                fatigue = format!("{:.2}", snapshot.fatigue_score).as_str(),
                switches = snapshot.switch_count,
                "trigger emitted"
            );
            // Depth-one queue: a still-unsent older trigger is superseded.
            self.triggers.send_replace(Some(event));
        }
    }
}

/// Blocking transport loop. Reconnects with backoff on disconnect; a
/// permanently closed transport or the stop flag ends the stream.
fn ingest_loop(
    mut transport: Box<dyn Transport>,
    channel_count: usize,
    reading_tx: mpsc::Sender<SensorReading>,
    stop: Arc<AtomicBool>,
    policy: crate::backoff::BackoffPolicy,
    stats: SharedEngineStats,
) {
    let mut backoff = Backoff::new(policy);

    'outer: while !stop.load(Ordering::Relaxed) {
        let receiver = match transport.connect() {
            Ok(receiver) => {
                backoff.reset();
                receiver
            }
            Err(TransportError::Closed) => {
                tracing::info!("sensor transport closed");
                break;
            }
            Err(e) => {
                let Some(delay) = backoff.next_delay() else {
                    break;
                };
                tracing::warn!(
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "transport connect failed"
                );
                std::thread::sleep(delay);
                continue;
            }
        };

        let adapter = SourceAdapter::new(channel_count, receiver, stats.clone());
        loop {
            if stop.load(Ordering::Relaxed) {
                break 'outer;
            }
            match adapter.poll(POLL_INTERVAL) {
                SourcePoll::Reading(reading) => {
                    stats.record_reading();
                    if reading_tx.blocking_send(reading).is_err() {
                        break 'outer;
                    }
                }
                SourcePoll::Idle => {}
                SourcePoll::Disconnected => {
                    stats.record_disconnect();
                    tracing::warn!("sensor stream disconnected, reconnecting");
                    break;
                }
            }
        }
    }
    // Dropping the sender signals end-of-stream to the aggregation stage.
}
