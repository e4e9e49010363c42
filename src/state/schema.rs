//! Analytics database schema.

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Full DDL for the analytics database.
pub const CREATE_SCHEMA: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- One row per conversation seen by the engine
CREATE TABLE IF NOT EXISTS sessions (
    id           TEXT PRIMARY KEY,
    turn_count   INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL DEFAULT (datetime('now')),
    last_seen_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Completed turns
CREATE TABLE IF NOT EXISTS turn_events (
    id              TEXT PRIMARY KEY,
    session_id      TEXT,
    provider        TEXT NOT NULL,
    model           TEXT NOT NULL,
    is_fallback     INTEGER NOT NULL DEFAULT 0,
    tool_calls_made INTEGER NOT NULL DEFAULT 0,
    tokens_used     INTEGER,
    cap_hit         INTEGER NOT NULL DEFAULT 0,
    failed          INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Individual tool dispatches
CREATE TABLE IF NOT EXISTS tool_events (
    id          TEXT PRIMARY KEY,
    session_id  TEXT,
    tool_name   TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    success     INTEGER NOT NULL DEFAULT 1,
    error       TEXT,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Provider escalations
CREATE TABLE IF NOT EXISTS fallback_events (
    id            TEXT PRIMARY KEY,
    session_id    TEXT,
    from_provider TEXT NOT NULL,
    to_provider   TEXT,
    reason        TEXT NOT NULL,
    created_at    TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_turn_events_session ON turn_events(session_id);
CREATE INDEX IF NOT EXISTS idx_turn_events_created ON turn_events(created_at);
CREATE INDEX IF NOT EXISTS idx_tool_events_name ON tool_events(tool_name);
CREATE INDEX IF NOT EXISTS idx_fallback_events_created ON fallback_events(created_at);
"#;
