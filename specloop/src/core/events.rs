//! Agent activity events and in-order delivery.
//!
//! Events are transport independent: a callback, a channel or a polled queue
//! all hand the same [`EventEnvelope`] values to the reducer in
//! [`crate::core::activity`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token usage reported with the final `complete` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cache_creation_input_tokens: u64,
}

/// One unit of agent activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ToolStart {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolEnd {
        name: String,
        #[serde(default)]
        output: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Thinking {
        text: String,
    },
    Message {
        text: String,
    },
    Error {
        message: String,
    },
    Complete {
        success: bool,
        #[serde(default)]
        duration_ms: u64,
        #[serde(default)]
        cost: Option<f64>,
        #[serde(default)]
        usage: Option<Usage>,
    },
}

/// An event tagged with its position in the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonic sequence number, starting at 0 for each iteration.
    pub seq: u64,
    /// Milliseconds since the iteration started.
    pub at_ms: u64,
    pub event: AgentEvent,
}

/// Buffers out-of-order envelopes and releases them strictly by `seq`.
///
/// Envelopes with a sequence number that was already released (or is
/// already buffered) are dropped.
#[derive(Debug, Default)]
pub struct Resequencer {
    next: u64,
    pending: BTreeMap<u64, EventEnvelope>,
    dropped: u64,
}

impl Resequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one envelope and return every envelope now deliverable in order.
    pub fn push(&mut self, envelope: EventEnvelope) -> Vec<EventEnvelope> {
        if envelope.seq < self.next || self.pending.contains_key(&envelope.seq) {
            self.dropped += 1;
            return Vec::new();
        }
        self.pending.insert(envelope.seq, envelope);

        let mut ready = Vec::new();
        while let Some(next) = self.pending.remove(&self.next) {
            ready.push(next);
            self.next += 1;
        }
        ready
    }

    /// Envelopes held back waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Release everything still buffered, in `seq` order, skipping gaps.
    ///
    /// Used when the stream ends while a gap is still open.
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        let ready: Vec<EventEnvelope> = std::mem::take(&mut self.pending).into_values().collect();
        if let Some(last) = ready.last() {
            self.next = last.seq + 1;
        }
        ready
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
