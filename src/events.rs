//! Typed progress events with pluggable synchronous sinks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Envelope format version.
pub const EVENT_VERSION: &str = "1.0";

/// Progress events, emitted synchronously from the scheduling loop in
/// occurrence order. For any task, `task:start` precedes its
/// `task:complete` or `task:error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrchestratorEvent {
    /// A batch of tasks admitted at one scheduling tick.
    #[serde(rename = "wave:start")]
    WaveStart { task_ids: Vec<String> },

    #[serde(rename = "task:start")]
    TaskStart { task_id: String, agent_id: String },

    #[serde(rename = "task:complete")]
    TaskComplete {
        task_id: String,
        agent_id: String,
        tokens_used: u64,
        duration_ms: u64,
    },

    #[serde(rename = "task:error")]
    TaskError {
        task_id: String,
        agent_id: String,
        error: String,
    },

    #[serde(rename = "task:skipped")]
    TaskSkipped { task_id: String, reason: String },

    #[serde(rename = "workflow:complete")]
    WorkflowComplete {
        completed: usize,
        failed: usize,
        skipped: usize,
        cancelled: bool,
    },
}

/// What sinks receive: the event plus per-run ordering metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub version: String,
    /// Monotonic within one run, starting at 1.
    pub sequence: u64,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: OrchestratorEvent,
}

/// Synchronous event receiver, invoked inline from the scheduling loop.
/// Implementations should return quickly. A panic inside a sink is caught
/// and logged; it never aborts the run or starves later sinks.
pub trait EventSink: Send + Sync {
    fn on_event(&self, envelope: &EventEnvelope);
}

/// Fans envelopes out to the registered sinks, stamping the per-run
/// sequence. One emitter exists per run.
pub struct EventEmitter {
    run_id: String,
    sequence: AtomicU64,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new(run_id: impl Into<String>, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            run_id: run_id.into(),
            sequence: AtomicU64::new(0),
            sinks,
        }
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        if self.sinks.is_empty() {
            return;
        }
        let envelope = EventEnvelope {
            version: EVENT_VERSION.to_string(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
            event,
        };
        for sink in &self.sinks {
            if catch_unwind(AssertUnwindSafe(|| sink.on_event(&envelope))).is_err() {
                warn!(
                    run_id = %self.run_id,
                    sequence = envelope.sequence,
                    "event sink panicked; continuing"
                );
            }
        }
    }
}

/// Sink that forwards every envelope to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn on_event(&self, envelope: &EventEnvelope) {
        debug!(
            run_id = %envelope.run_id,
            sequence = envelope.sequence,
            event = ?envelope.event,
            "orchestrator event"
        );
    }
}

/// Sink that accumulates envelopes in memory. Useful in tests and for UIs
/// that poll instead of streaming.
#[derive(Debug, Default)]
pub struct BufferingEventSink {
    buffer: RwLock<Vec<EventEnvelope>>,
}

impl BufferingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.buffer.read().clone()
    }

    pub fn events(&self) -> Vec<OrchestratorEvent> {
        self.buffer.read().iter().map(|e| e.event.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    pub fn clear(&self) {
        self.buffer.write().clear();
    }
}

impl EventSink for BufferingEventSink {
    fn on_event(&self, envelope: &EventEnvelope) {
        self.buffer.write().push(envelope.clone());
    }
}
