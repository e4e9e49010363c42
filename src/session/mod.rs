//! Conversation sessions.
//!
//! Each session owns its conversation and ladder. Turns within a session run
//! one at a time; different sessions run concurrently.

use crate::agent::ToolCallingLoop;
use crate::error::TurnExecutionError;
use crate::events::EventEmitter;
use crate::ladder::{LadderCorrelator, LadderSnapshot};
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OUT_OF_STEPS: &str = "I ran out of diagnostic steps before reaching a conclusion. \
                            Ask me to continue and I will pick up where I left off.";

const NO_ANSWER: &str = "I could not put an answer together this time. Please try again.";

/// State carried between turns of one conversation.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub conversation: Conversation,
    pub ladder: LadderCorrelator,
    pub turns: u64,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            conversation: Conversation::new(),
            ladder: LadderCorrelator::new(),
            turns: 0,
            created_at: Utc::now(),
        }
    }
}

/// Reply to the transport plus the engine-level outcome.
#[derive(Debug)]
pub struct SessionTurn {
    pub response: TurnResponse,
    pub outcome: Result<ExecutionResult, TurnExecutionError>,
}

/// Sessions held in memory before idle ones are evicted.
pub const DEFAULT_MAX_SESSIONS: usize = 256;

struct SessionSlot {
    session: Arc<Mutex<Session>>,
    last_used: u64,
}

/// Session map plus a logical clock for least-recently-used eviction.
#[derive(Default)]
struct SessionTable {
    slots: HashMap<String, SessionSlot>,
    clock: u64,
}

impl SessionTable {
    /// Drop the least recently used session nobody is holding.
    fn evict_idle(&mut self) -> Option<String> {
        let victim = self
            .slots
            .iter()
            .filter(|(_, slot)| Arc::strong_count(&slot.session) == 1)
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(id, _)| id.clone())?;
        self.slots.remove(&victim);
        Some(victim)
    }
}

pub struct SessionManager {
    engine: Arc<ToolCallingLoop>,
    events: EventEmitter,
    max_sessions: usize,
    sessions: std::sync::Mutex<SessionTable>,
}

impl SessionManager {
    pub fn new(engine: Arc<ToolCallingLoop>, events: EventEmitter) -> Self {
        Self {
            engine,
            events,
            max_sessions: DEFAULT_MAX_SESSIONS,
            sessions: std::sync::Mutex::new(SessionTable::default()),
        }
    }

    /// Cap on sessions kept in memory. Past it, starting a new conversation
    /// evicts the least recently used idle one, history included.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    pub fn engine(&self) -> &ToolCallingLoop {
        &self.engine
    }

    /// Handle one inbound message.
    ///
    /// A missing or unknown conversation id starts a new session. Hard
    /// failures become a generic reply; details go to the log only.
    pub async fn handle(&self, request: TurnRequest, cancel: &CancellationToken) -> SessionTurn {
        let session = self.session(request.conversation_id.as_deref());
        let mut session = session.lock().await;
        let session_id = session.id.clone();

        if session.ladder.is_concluded() {
            debug!("Session {}: previous ladder run concluded, resetting", session_id);
            session.ladder.reset();
        }
        session.conversation.push(ChatMessage::user(request.message));

        let events = self.events.for_session(&session_id);
        let Session {
            conversation,
            ladder,
            ..
        } = &mut *session;
        let outcome = self.engine.run_turn(conversation, ladder, &events, cancel).await;
        session.turns += 1;

        let response = match &outcome {
            Ok(result) => TurnResponse {
                response: match result.answer.as_deref().map(str::trim) {
                    Some(answer) if !answer.is_empty() => answer.to_string(),
                    _ if result.cap_hit => OUT_OF_STEPS.to_string(),
                    _ => NO_ANSWER.to_string(),
                },
                tool_calls: (!result.tool_history.is_empty()).then(|| {
                    result
                        .tool_history
                        .iter()
                        .map(|r| ToolCallRecord {
                            name: r.tool_name.clone(),
                            success: r.success,
                            summary: r.summary.clone(),
                            duration_ms: r.elapsed_ms,
                        })
                        .collect()
                }),
                conversation_id: session_id.clone(),
            },
            Err(e) => {
                warn!("Session {}: turn failed: {}", session_id, e);
                TurnResponse {
                    response: e.user_message().to_string(),
                    tool_calls: None,
                    conversation_id: session_id.clone(),
                }
            }
        };

        SessionTurn { response, outcome }
    }

    /// Ladder state for a session, if it exists.
    pub async fn ladder(&self, conversation_id: &str) -> Option<LadderSnapshot> {
        let session = self.lookup(conversation_id)?;
        let session = session.lock().await;
        Some(session.ladder.snapshot())
    }

    /// Clear a session's conversation and ladder. Returns false if unknown.
    pub async fn reset(&self, conversation_id: &str) -> bool {
        let Some(session) = self.lookup(conversation_id) else {
            return false;
        };
        let mut session = session.lock().await;
        session.conversation.clear();
        session.ladder.reset();
        info!("Session {} reset", conversation_id);
        true
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|t| t.slots.len()).unwrap_or(0)
    }

    fn lookup(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        let table = self.sessions.lock().ok()?;
        table.slots.get(id).map(|slot| slot.session.clone())
    }

    fn session(&self, requested: Option<&str>) -> Arc<Mutex<Session>> {
        let id = requested
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| ulid::Ulid::new().to_string());

        let mut table = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.clock += 1;
        let now = table.clock;

        if let Some(slot) = table.slots.get_mut(&id) {
            slot.last_used = now;
            return slot.session.clone();
        }

        if table.slots.len() >= self.max_sessions {
            match table.evict_idle() {
                Some(evicted) => info!("Evicted idle session {}", evicted),
                None => warn!("All {} sessions are busy; exceeding the cap", table.slots.len()),
            }
        }

        info!("New session {}", id);
        let session = Arc::new(Mutex::new(Session::new(id.clone())));
        table.slots.insert(
            id,
            SessionSlot {
                session: session.clone(),
                last_used: now,
            },
        );
        session
    }
}
