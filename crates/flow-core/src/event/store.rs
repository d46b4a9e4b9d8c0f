//! Append-only event storage for per-task flows.
//!
//! Each flow (keyed by a UUID) accumulates an ordered sequence of
//! `FlowEvent`s. The store never mutates or deletes an existing event;
//! state is always reconstructed by replay.

use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use super::{FlowEvent, FlowEventKind};

/// Append-only event storage for flows.
///
/// - `append_kind` appends a deterministic event to `flow_id`'s log and
///   assigns `seq` and `ts`.
/// - `list` returns all events for `flow_id` in ascending `seq` order.
pub trait EventStore {
    fn append_kind(&mut self, flow_id: Uuid, kind: FlowEventKind) -> FlowEvent;
    fn list(&self, flow_id: Uuid) -> Vec<FlowEvent>;
}

/// In-memory `EventStore`. Volatile; not thread-safe on its own (wrap in a
/// `Mutex`/`RwLock` for concurrent access). Used by the in-memory queue
/// backend and by tests.
pub struct InMemoryEventStore {
    pub inner: HashMap<Uuid, Vec<FlowEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self { inner: HashMap::new() }
    }

    pub fn len_for(&self, flow_id: Uuid) -> usize {
        self.inner.get(&flow_id).map(|v| v.len()).unwrap_or(0)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn append_kind(&mut self, flow_id: Uuid, kind: FlowEventKind) -> FlowEvent {
        let vec = self.inner.entry(flow_id).or_default();
        let seq = vec.len() as u64;
        let ev = FlowEvent { seq, flow_id, kind, ts: Utc::now() };
        vec.push(ev.clone());
        ev
    }

    fn list(&self, flow_id: Uuid) -> Vec<FlowEvent> {
        self.inner.get(&flow_id).cloned().unwrap_or_default()
    }
}
