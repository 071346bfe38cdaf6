//! Reading Source Adapter.
//!
//! The sensor-stream transport is an external collaborator: it owns the wire
//! and hands us raw frames over a bounded channel. This module turns those
//! frames into [`SensorReading`]s, dropping (and counting) malformed input,
//! and reports disconnects to the caller so reconnect policy stays explicit.

pub mod types;

pub use types::{ParseError, SensorReading};

use crate::stats::SharedEngineStats;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// Errors at the transport boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection attempt failed; the caller may retry with backoff.
    #[error("transport connect failed: {0}")]
    Connect(String),
    /// The stream has permanently ended (no reconnect possible).
    #[error("transport closed")]
    Closed,
}

/// A source of raw sensor frames.
///
/// `connect` is called once at startup and again after every disconnect; the
/// returned receiver yields frames until the transport drops its sender.
pub trait Transport: Send {
    fn connect(&mut self) -> Result<Receiver<String>, TransportError>;
}

/// Outcome of a single poll of the source adapter.
#[derive(Debug)]
pub enum SourcePoll {
    /// A well-formed reading.
    Reading(SensorReading),
    /// Nothing arrived within the poll timeout.
    Idle,
    /// The transport dropped its sender; caller should reconnect.
    Disconnected,
}

/// Wraps a connected transport receiver and parses frames into readings.
pub struct SourceAdapter {
    channel_count: usize,
    receiver: Receiver<String>,
    stats: SharedEngineStats,
}

impl SourceAdapter {
    pub fn new(channel_count: usize, receiver: Receiver<String>, stats: SharedEngineStats) -> Self {
        Self {
            channel_count,
            receiver,
            stats,
        }
    }

    /// Poll for the next reading, waiting at most `timeout`.
    ///
    /// Malformed frames are consumed here: they are counted as parse errors
    /// and polling continues until the timeout, a valid reading, or a
    /// disconnect.
    pub fn poll(&self, timeout: Duration) -> SourcePoll {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(frame) => match SensorReading::parse(&frame, self.channel_count) {
                    Ok(reading) => return SourcePoll::Reading(reading),
                    Err(e) => {
                        self.stats.record_parse_error();
                        tracing::debug!(error = %e, "dropped malformed frame");
                    }
                },
                Err(RecvTimeoutError::Timeout) => return SourcePoll::Idle,
                Err(RecvTimeoutError::Disconnected) => return SourcePoll::Disconnected,
            }
        }
    }
}
