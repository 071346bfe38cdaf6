//! End-to-end pipeline tests with scripted transports, a deterministic
//! classifier, and in-memory assistant clients.

use crossbeam_channel::{bounded, Receiver, Sender};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use seatsense_engine::{
    AssistantClient, ClassifierError, Config, DispatchError, Engine, EngineReport,
    PostureClassifier, PostureLabel, Transport, TransportError, TriggerPayload, TriggerReason,
};
use seatsense_engine::stats::create_shared_stats;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BASE_MS: i64 = 1_700_000_000_000;

/// One frame per second of stream time; channel 0 encodes the label the
/// classifier will assign.
fn frame(secs: i64, code: f64) -> String {
    format!("{},{},0.0", BASE_MS + secs * 1000, code)
}

const CODE_UPRIGHT: f64 = 0.0;
const CODE_SLOUCHED: f64 = 1.0;

/// Maps channel 0 straight to a label. Keeps scenarios deterministic.
struct CodeClassifier;

impl PostureClassifier for CodeClassifier {
    fn classify(
        &self,
        channels: Vec<f64>,
    ) -> BoxFuture<'static, Result<(PostureLabel, f64), ClassifierError>> {
        let label = match channels.first().copied() {
            Some(c) if c == CODE_UPRIGHT => PostureLabel::Upright,
            Some(c) if c == CODE_SLOUCHED => PostureLabel::Slouched,
            _ => PostureLabel::Unknown,
        };
        async move { Ok((label, 1.0)) }.boxed()
    }
}

/// Yields one pre-seeded receiver per connect; each drains and then reports
/// a disconnect. Once the script is exhausted the transport is closed.
struct ScriptedTransport {
    batches: VecDeque<Vec<String>>,
}

impl ScriptedTransport {
    fn new(batches: Vec<Vec<String>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    fn single(frames: Vec<String>) -> Self {
        Self::new(vec![frames])
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> Result<Receiver<String>, TransportError> {
        match self.batches.pop_front() {
            Some(frames) => {
                let (tx, rx) = bounded(frames.len().max(1));
                for f in frames {
                    tx.send(f).expect("scripted channel sized to fit");
                }
                Ok(rx)
            }
            None => Err(TransportError::Closed),
        }
    }
}

/// Connects once and never sends or disconnects.
struct SilentTransport {
    holder: Option<Sender<String>>,
}

impl Transport for SilentTransport {
    fn connect(&mut self) -> Result<Receiver<String>, TransportError> {
        let (tx, rx) = bounded(1);
        self.holder = Some(tx);
        Ok(rx)
    }
}

/// Records every delivered payload.
#[derive(Default)]
struct RecordingClient {
    payloads: Mutex<Vec<TriggerPayload>>,
}

impl AssistantClient for RecordingClient {
    fn deliver(&self, payload: TriggerPayload) -> BoxFuture<'static, Result<(), DispatchError>> {
        self.payloads.lock().unwrap().push(payload);
        async { Ok(()) }.boxed()
    }
}

/// Refuses every delivery.
struct DownClient;

impl AssistantClient for DownClient {
    fn deliver(&self, _payload: TriggerPayload) -> BoxFuture<'static, Result<(), DispatchError>> {
        async { Err(DispatchError::Network("connection refused".into())) }.boxed()
    }
}

/// Config tuned so tests finish fast and only the scenario under test can
/// fire.
fn test_config() -> Config {
    let mut config = Config::default();
    config.channel_count = 2;
    config.fatigue_threshold = 5.0;
    config.switch_threshold = 10;
    config.sustained_threshold = Duration::from_secs(100_000);
    config.cooldown_duration = Duration::from_secs(300);
    config.window_duration = Duration::from_secs(300);
    config.dispatch_retry_limit = 2;
    config.dispatch_backoff_base_ms = 1;
    config.dispatch_backoff_max_ms = 4;
    config.reconnect_backoff_base_ms = 1;
    config.reconnect_backoff_max_ms = 2;
    config.shutdown_grace_ms = 1_000;
    config
}

async fn run_engine(
    config: Config,
    transport: Box<dyn Transport>,
    assistant: Arc<dyn AssistantClient>,
) -> EngineReport {
    let stats = create_shared_stats();
    let engine = Engine::new(
        config,
        transport,
        Arc::new(CodeClassifier),
        assistant,
        stats,
    );
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    engine.run(shutdown_rx).await
}

#[tokio::test]
async fn sustained_slouching_fires_exactly_one_fatigue_trigger() {
    // One slouched reading per second for a minute. With decay 0.9 and
    // weight 1.0 the fatigue score crosses 5.0 at the seventh reading, and
    // the 300s cooldown outlasts the rest of the stream.
    let frames: Vec<String> = (0..60).map(|s| frame(s, CODE_SLOUCHED)).collect();
    let client = Arc::new(RecordingClient::default());

    let report = run_engine(
        test_config(),
        Box::new(ScriptedTransport::single(frames)),
        client.clone(),
    )
    .await;

    assert_eq!(report.stats.readings_ingested, 60);
    assert_eq!(report.stats.triggers_emitted, 1);
    assert_eq!(report.stats.triggers_delivered, 1);
    assert_eq!(report.stats.triggers_dropped, 0);
    assert_eq!(report.stats.windows_rolled, 0);

    let payloads = client.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].reason, TriggerReason::HighFatigue);
    assert!(payloads[0].fatigue_score >= 5.0);
    assert_eq!(payloads[0].switch_count, 0);

    let window = report.final_window.expect("stream produced readings");
    assert_eq!(window.readings_total, 60);
    // 59 one-second gaps, all credited to slouched.
    let slouched = window.time_in_posture[&PostureLabel::Slouched];
    assert!((slouched - 59.0).abs() < 1e-9);
}

#[tokio::test]
async fn rapid_switching_fires_exactly_one_trigger() {
    // Alternate labels every second; each reading after the first is a
    // switch, so the count reaches 10 at the eleventh reading.
    let frames: Vec<String> = (0..21)
        .map(|s| {
            let code = if s % 2 == 0 { CODE_SLOUCHED } else { CODE_UPRIGHT };
            frame(s, code)
        })
        .collect();
    let client = Arc::new(RecordingClient::default());

    let mut config = test_config();
    config.fatigue_threshold = 1e9;

    let report = run_engine(
        config,
        Box::new(ScriptedTransport::single(frames)),
        client.clone(),
    )
    .await;

    assert_eq!(report.stats.triggers_emitted, 1);
    assert_eq!(report.stats.triggers_delivered, 1);

    let payloads = client.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].reason, TriggerReason::RapidSwitching);
    assert_eq!(payloads[0].switch_count, 10);

    let window = report.final_window.unwrap();
    assert_eq!(window.switch_count, 20);
}

#[tokio::test]
async fn unreachable_assistant_never_blocks_aggregation() {
    let frames: Vec<String> = (0..60).map(|s| frame(s, CODE_SLOUCHED)).collect();

    let report = run_engine(
        test_config(),
        Box::new(ScriptedTransport::single(frames)),
        Arc::new(DownClient),
    )
    .await;

    // Aggregation is unaffected by the dead assistant.
    assert_eq!(report.stats.readings_ingested, 60);
    let window = report.final_window.unwrap();
    assert_eq!(window.readings_total, 60);

    // The one trigger was retried to exhaustion and dropped.
    assert_eq!(report.stats.triggers_emitted, 1);
    assert_eq!(report.stats.triggers_delivered, 0);
    assert_eq!(report.stats.triggers_dropped, 1);
    // Initial attempt plus two retries.
    assert_eq!(report.stats.dispatch_failures, 3);
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_counted() {
    let mut frames = Vec::new();
    for s in 0..10 {
        frames.push(frame(s, CODE_UPRIGHT));
    }
    frames.insert(3, "not-a-frame".to_string());
    frames.insert(7, format!("{},0.5", BASE_MS)); // wrong arity
    frames.insert(9, format!("{},NaN,0.0", BASE_MS + 500)); // non-finite

    let client = Arc::new(RecordingClient::default());
    let mut config = test_config();
    config.fatigue_threshold = 1e9;

    let report = run_engine(
        config,
        Box::new(ScriptedTransport::single(frames)),
        client.clone(),
    )
    .await;

    assert_eq!(report.stats.readings_ingested, 10);
    assert_eq!(report.stats.parse_errors, 3);
    assert_eq!(report.stats.triggers_emitted, 0);
    assert_eq!(report.final_window.unwrap().readings_total, 10);
}

#[tokio::test]
async fn aggregation_continues_across_reconnects() {
    // The fatigue accumulator crosses the threshold at the seventh reading
    // overall, which only happens if state survives the reconnect between
    // batches.
    let first: Vec<String> = (0..5).map(|s| frame(s, CODE_SLOUCHED)).collect();
    let second: Vec<String> = (5..10).map(|s| frame(s, CODE_SLOUCHED)).collect();
    let client = Arc::new(RecordingClient::default());

    let report = run_engine(
        test_config(),
        Box::new(ScriptedTransport::new(vec![first, second])),
        client.clone(),
    )
    .await;

    assert_eq!(report.stats.readings_ingested, 10);
    assert_eq!(report.stats.transport_disconnects, 2);
    assert_eq!(report.stats.triggers_emitted, 1);

    let payloads = client.payloads.lock().unwrap();
    assert_eq!(payloads[0].reason, TriggerReason::HighFatigue);

    let window = report.final_window.unwrap();
    assert_eq!(window.readings_total, 10);
}

#[tokio::test]
async fn window_rollover_resets_stats_but_keeps_fatigue() {
    // 30s windows; readings span two windows. The second window starts
    // fresh except for the fatigue accumulator, which keeps climbing until
    // the trigger fires inside it.
    let frames: Vec<String> = (0..40).map(|s| frame(s, CODE_SLOUCHED)).collect();
    let client = Arc::new(RecordingClient::default());

    let mut config = test_config();
    config.window_duration = Duration::from_secs(30);
    config.fatigue_threshold = 9.6; // crossed at the 31st reading (t=30)

    let report = run_engine(
        config,
        Box::new(ScriptedTransport::single(frames)),
        client.clone(),
    )
    .await;

    assert_eq!(report.stats.windows_rolled, 1);
    assert_eq!(report.stats.triggers_emitted, 1);

    let payloads = client.payloads.lock().unwrap();
    assert_eq!(payloads[0].reason, TriggerReason::HighFatigue);
    // The trigger fired in the second window: its per-window counters were
    // reset at the rollover while the fatigue score carried over.
    assert!(payloads[0].fatigue_score >= 9.6);
    let slouched = payloads[0].time_in_posture[&PostureLabel::Slouched];
    assert!(slouched < 30.0);

    let window = report.final_window.unwrap();
    assert_eq!(window.readings_total, 10); // readings t=30..39
}

#[tokio::test]
async fn shutdown_stops_an_idle_engine() {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine = Engine::new(
        test_config(),
        Box::new(SilentTransport { holder: None }),
        Arc::new(CodeClassifier),
        Arc::new(RecordingClient::default()),
        create_shared_stats(),
    );

    let run = tokio::spawn(engine.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("engine should stop after shutdown")
        .unwrap();
    assert_eq!(report.stats.readings_ingested, 0);
    assert!(report.final_window.is_none());
}
