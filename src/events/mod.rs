//! Analytics side channel.
//!
//! The emitter observes tool dispatch, provider fallbacks and turn outcomes.
//! Sinks are append-only and must tolerate concurrent writers; a sink
//! failure is logged and never reaches the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Timing record for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub session_id: Option<String>,
    pub tool_name: String,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one turn. `failed` marks a turn that ended without an answer
/// because every provider failed; cancelled turns emit nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEvent {
    pub session_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub is_fallback: bool,
    pub tool_calls_made: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    pub cap_hit: bool,
    #[serde(default)]
    pub failed: bool,
}

/// The executor moved from one provider to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub session_id: Option<String>,
    pub from: String,
    pub to: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Tool(ToolEvent),
    Turn(TurnEvent),
    Fallback(FallbackEvent),
}

/// Stamped event as handed to sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub at: DateTime<Utc>,
    pub event: Event,
}

/// Destination for analytics events.
pub trait EventSink: Send + Sync {
    fn record(&self, record: &EventRecord);
}

/// Fan-out handle shared by every component. Cheap to clone.
#[derive(Clone, Default)]
pub struct EventEmitter {
    sinks: Vec<Arc<dyn EventSink>>,
    session_id: Option<String>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// A handle that stamps every event with `session_id`.
    pub fn for_session(&self, session_id: &str) -> Self {
        Self {
            sinks: self.sinks.clone(),
            session_id: Some(session_id.to_string()),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn tool(&self, tool_name: &str, duration_ms: u64, success: bool, error: Option<String>) {
        self.emit(Event::Tool(ToolEvent {
            session_id: self.session_id.clone(),
            tool_name: tool_name.to_string(),
            duration_ms,
            success,
            error,
        }));
    }

    pub fn fallback(&self, from: &str, to: Option<&str>, reason: &str) {
        self.emit(Event::Fallback(FallbackEvent {
            session_id: self.session_id.clone(),
            from: from.to_string(),
            to: to.map(str::to_string),
            reason: reason.to_string(),
        }));
    }

    pub fn turn(&self, mut event: TurnEvent) {
        event.session_id = self.session_id.clone();
        self.emit(Event::Turn(event));
    }

    fn emit(&self, event: Event) {
        let record = EventRecord {
            id: ulid::Ulid::new().to_string(),
            at: Utc::now(),
            event,
        };
        for sink in &self.sinks {
            sink.record(&record);
        }
    }
}

/// Mirrors events into the log.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, record: &EventRecord) {
        match &record.event {
            Event::Tool(e) => debug!(
                "tool {} finished in {}ms (success: {})",
                e.tool_name, e.duration_ms, e.success
            ),
            Event::Turn(e) if e.failed => warn!(
                "turn failed, last planned provider {}/{} (tool calls: {})",
                e.provider, e.model, e.tool_calls_made
            ),
            Event::Turn(e) => info!(
                "turn served by {}/{} (fallback: {}, tool calls: {}, cap hit: {})",
                e.provider, e.model, e.is_fallback, e.tool_calls_made, e.cap_hit
            ),
            Event::Fallback(e) => info!(
                "falling back from {} to {}: {}",
                e.from,
                e.to.as_deref().unwrap_or("<none>"),
                e.reason
            ),
        }
    }
}

/// Keeps every event in memory. Handy in tests.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<EventRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.records
            .lock()
            .map(|r| r.iter().map(|rec| rec.event.clone()).collect())
            .unwrap_or_default()
    }

    pub fn tool_events(&self) -> Vec<ToolEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Tool(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn turn_events(&self) -> Vec<TurnEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Turn(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn fallback_events(&self) -> Vec<FallbackEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Fallback(f) => Some(f),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, record: &EventRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_handle_stamps_events() {
        let sink = Arc::new(MemorySink::new());
        let emitter = EventEmitter::new().with_sink(sink.clone());
        let scoped = emitter.for_session("s-1");

        emitter.tool("check_adapter_status", 12, true, None);
        scoped.tool("ping_gateway", 40, false, Some("timed out".into()));

        let events = sink.tool_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].session_id, None);
        assert_eq!(events[1].session_id.as_deref(), Some("s-1"));
        assert_eq!(events[1].error.as_deref(), Some("timed out"));
    }

    #[test]
    fn turn_event_serializes_with_kind_tag() {
        let event = Event::Turn(TurnEvent {
            session_id: None,
            provider: "ollama".into(),
            model: "llama3.1".into(),
            is_fallback: true,
            tool_calls_made: 2,
            tokens_used: None,
            cap_hit: false,
            failed: false,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "turn");
        assert!(value.get("tokens_used").is_none());
    }

    #[test]
    fn emitter_without_sinks_is_a_no_op() {
        EventEmitter::new().fallback("openai", Some("ollama"), "timeout");
    }
}
