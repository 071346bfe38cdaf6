//! Trigger dispatch to the assistant service.
//!
//! Delivery is best effort with a depth-one queue: the aggregation side
//! publishes trigger events through a `watch` channel, so a newer trigger
//! supersedes an older one that has not been picked up yet. The dispatcher
//! retries failed deliveries with backoff up to the configured attempt
//! limit, then drops the event and records the drop. Slow or unreachable
//! assistants never block aggregation.

use crate::backoff::Backoff;
use crate::classifier::PostureLabel;
use crate::core::{TriggerEvent, TriggerReason};
use crate::stats::SharedEngineStats;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Assistant service endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Assistant host (default: 127.0.0.1)
    pub host: String,
    /// Assistant port
    pub port: u16,
    /// Bearer authentication token
    pub token: String,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8742,
            token: String::new(),
            request_timeout_secs: 10,
        }
    }
}

impl AssistantConfig {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
            ..Self::default()
        }
    }

    /// Get the full assistant base URL.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get the trigger endpoint URL.
    pub fn trigger_url(&self) -> String {
        format!("{}/v1/trigger", self.url())
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.url())
    }
}

/// Dispatch error types.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Network/HTTP error; worth retrying
    #[error("assistant network error: {0}")]
    Network(String),
    /// Assistant returned an error response
    #[error("assistant server error ({status}): {message}")]
    Server { status: u16, message: String },
    /// JSON serialization error; never retried
    #[error("payload serialization error: {0}")]
    Serialization(String),
}

/// Wire payload for the assistant trigger endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerPayload {
    /// Device identifier
    pub device_id: String,
    /// Stream time at which the trigger fired (RFC3339)
    pub triggered_at: String,
    /// Condition that fired
    pub reason: TriggerReason,
    /// Running fatigue score at trigger time
    pub fatigue_score: f64,
    /// Posture switches within the current window
    pub switch_count: u32,
    /// Seconds spent in each label within the current window
    pub time_in_posture: BTreeMap<PostureLabel, f64>,
    /// Current window bounds (RFC3339)
    pub window_start: String,
    pub window_end: String,
    /// Recent label history, oldest first
    pub recent_labels: Vec<PostureLabel>,
}

impl TriggerPayload {
    pub fn from_event(event: &TriggerEvent, device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            triggered_at: event.timestamp.to_rfc3339(),
            reason: event.reason,
            fatigue_score: event.snapshot.fatigue_score,
            switch_count: event.snapshot.switch_count,
            time_in_posture: event.snapshot.time_in_posture.clone(),
            window_start: event.snapshot.window_start.to_rfc3339(),
            window_end: event.snapshot.window_end.to_rfc3339(),
            recent_labels: event.recent_labels.clone(),
        }
    }
}

/// Delivery capability for trigger payloads.
pub trait AssistantClient: Send + Sync {
    fn deliver(&self, payload: TriggerPayload) -> BoxFuture<'static, Result<(), DispatchError>>;
}

/// HTTP client for the assistant service.
pub struct HttpAssistantClient {
    config: AssistantConfig,
    client: reqwest::Client,
}

impl HttpAssistantClient {
    pub fn new(config: AssistantConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Test connection to the assistant.
    pub async fn test_connection(&self) -> Result<bool, DispatchError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

impl AssistantClient for HttpAssistantClient {
    fn deliver(&self, payload: TriggerPayload) -> BoxFuture<'static, Result<(), DispatchError>> {
        let request = self
            .client
            .post(self.config.trigger_url())
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("Content-Type", "application/json")
            .json(&payload);

        Box::pin(async move {
            let response = request
                .send()
                .await
                .map_err(|e| DispatchError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(DispatchError::Server {
                    status: status.as_u16(),
                    message,
                });
            }

            Ok(())
        })
    }
}

/// Generate a device identifier from hostname plus a per-process suffix.
pub fn generate_device_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!(
        "seatsense-{}-{}",
        hostname,
        &uuid::Uuid::new_v4().to_string()[..8]
    )
}

/// Retrying dispatcher over an [`AssistantClient`].
pub struct Dispatcher {
    client: Arc<dyn AssistantClient>,
    policy: crate::backoff::BackoffPolicy,
    device_id: String,
    stats: SharedEngineStats,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn AssistantClient>,
        policy: crate::backoff::BackoffPolicy,
        device_id: String,
        stats: SharedEngineStats,
    ) -> Self {
        Self {
            client,
            policy,
            device_id,
            stats,
        }
    }

    /// Deliver one trigger event, retrying with backoff. Returns whether
    /// delivery ultimately succeeded; an exhausted event is dropped and
    /// counted, never re-queued.
    pub async fn dispatch(&self, event: &TriggerEvent) -> bool {
        let payload = TriggerPayload::from_event(event, &self.device_id);
        let mut backoff = Backoff::new(self.policy.clone());

        loop {
            match self.client.deliver(payload.clone()).await {
                Ok(()) => {
                    self.stats.record_trigger_delivered();
                    tracing::info!(
                        reason = %event.reason,
                        attempts = backoff.attempts() + 1,
                        "trigger delivered"
                    );
                    return true;
                }
                Err(e) => {
                    self.stats.record_dispatch_failure();
                    match backoff.next_delay() {
                        Some(delay) => {
                            tracing::warn!(
                                error = %e,
                                retry_in_ms = delay.as_millis() as u64,
                                "trigger delivery failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            self.stats.record_trigger_dropped();
                            tracing::error!(
                                error = %e,
                                reason = %event.reason,
                                "trigger delivery exhausted retries, dropping"
                            );
                            return false;
                        }
                    }
                }
            }
        }
    }

    /// Consume trigger events from a depth-one `watch` queue until the
    /// sender side closes and the last published event has been handled.
    pub async fn run(
        &self,
        mut triggers: tokio::sync::watch::Receiver<Option<TriggerEvent>>,
    ) {
        // changed() still yields Ok for a value published before the sender
        // dropped, so the final trigger is drained before exit.
        while triggers.changed().await.is_ok() {
            let event = triggers.borrow_and_update().clone();
            if let Some(event) = event {
                self.dispatch(&event).await;
            }
        }
        tracing::debug!("dispatcher finished");
    }
}
