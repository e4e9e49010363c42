//! SQLite database wrapper with WAL mode and migration support.

use crate::events::{Event, EventRecord, FallbackEvent, ToolEvent, TurnEvent};
use crate::state::schema;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// The analytics database.
pub struct Database {
    conn: Connection,
}

/// Aggregate view used by `troubleshooter status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub sessions: u64,
    pub turns: u64,
    pub fallback_turns: u64,
    pub capped_turns: u64,
    pub failed_turns: u64,
    pub tool_calls: u64,
    pub tool_failures: u64,
    pub fallback_events: u64,
}

impl AnalyticsSummary {
    /// Share of turns served by a fallback provider, 0.0 with no turns.
    pub fn fallback_rate(&self) -> f64 {
        if self.turns == 0 {
            0.0
        } else {
            self.fallback_turns as f64 / self.turns as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStats {
    pub tool_name: String,
    pub calls: u64,
    pub failures: u64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnRow {
    pub session_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub is_fallback: bool,
    pub tool_calls_made: u64,
    pub tokens_used: Option<u32>,
    pub cap_hit: bool,
    pub failed: bool,
    pub created_at: String,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // WAL lets `status` read while a chat session writes.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema creation and migrations.
    fn migrate(&mut self) -> Result<()> {
        let version = self.schema_version();

        if version == 0 {
            info!("Creating analytics schema v{}", schema::SCHEMA_VERSION);
            self.conn
                .execute_batch(schema::CREATE_SCHEMA)
                .context("Failed to create schema")?;
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![schema::SCHEMA_VERSION],
            )?;
        } else if version > schema::SCHEMA_VERSION {
            anyhow::bail!(
                "Analytics database is schema v{}, newer than supported v{}",
                version,
                schema::SCHEMA_VERSION
            );
        }

        Ok(())
    }

    /// Get the current schema version (0 if uninitialized).
    fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Event ingestion
    // -----------------------------------------------------------------------

    /// Persist one analytics event. Re-recording the same id is a no-op.
    pub fn record_event(&self, record: &EventRecord) -> Result<()> {
        let at = record.at.to_rfc3339();
        match &record.event {
            Event::Tool(e) => self.record_tool_event(&record.id, &at, e),
            Event::Turn(e) => self.record_turn_event(&record.id, &at, e),
            Event::Fallback(e) => self.record_fallback_event(&record.id, &at, e),
        }
    }

    fn record_tool_event(&self, id: &str, at: &str, e: &ToolEvent) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO tool_events (id, session_id, tool_name, duration_ms, success, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                e.session_id,
                e.tool_name,
                e.duration_ms as i64,
                e.success as i32,
                e.error,
                at,
            ],
        )?;
        if inserted > 0 {
            if let Some(session) = &e.session_id {
                self.touch_session(session, at, false)?;
            }
        }
        Ok(())
    }

    fn record_turn_event(&self, id: &str, at: &str, e: &TurnEvent) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO turn_events
             (id, session_id, provider, model, is_fallback, tool_calls_made, tokens_used, cap_hit, failed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                e.session_id,
                e.provider,
                e.model,
                e.is_fallback as i32,
                e.tool_calls_made as i64,
                e.tokens_used,
                e.cap_hit as i32,
                e.failed as i32,
                at,
            ],
        )?;
        if inserted > 0 {
            if let Some(session) = &e.session_id {
                self.touch_session(session, at, true)?;
            }
        }
        Ok(())
    }

    fn record_fallback_event(&self, id: &str, at: &str, e: &FallbackEvent) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO fallback_events (id, session_id, from_provider, to_provider, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, e.session_id, e.from, e.to, e.reason, at],
        )?;
        if inserted > 0 {
            if let Some(session) = &e.session_id {
                self.touch_session(session, at, false)?;
            }
        }
        Ok(())
    }

    fn touch_session(&self, session_id: &str, at: &str, completed_turn: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sessions (id, turn_count, created_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET
                turn_count = turn_count + ?2,
                last_seen_at = ?3",
            params![session_id, completed_turn as i64, at],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn summary(&self) -> Result<AnalyticsSummary> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(AnalyticsSummary {
            sessions: count("SELECT COUNT(*) FROM sessions")?,
            turns: count("SELECT COUNT(*) FROM turn_events")?,
            fallback_turns: count("SELECT COUNT(*) FROM turn_events WHERE is_fallback = 1")?,
            capped_turns: count("SELECT COUNT(*) FROM turn_events WHERE cap_hit = 1")?,
            failed_turns: count("SELECT COUNT(*) FROM turn_events WHERE failed = 1")?,
            tool_calls: count("SELECT COUNT(*) FROM tool_events")?,
            tool_failures: count("SELECT COUNT(*) FROM tool_events WHERE success = 0")?,
            fallback_events: count("SELECT COUNT(*) FROM fallback_events")?,
        })
    }

    /// Per-tool call counts, busiest first.
    pub fn tool_stats(&self) -> Result<Vec<ToolStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT tool_name, COUNT(*), SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), AVG(duration_ms)
             FROM tool_events GROUP BY tool_name ORDER BY COUNT(*) DESC, tool_name ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ToolStats {
                    tool_name: row.get(0)?,
                    calls: row.get::<_, i64>(1)? as u64,
                    failures: row.get::<_, i64>(2)? as u64,
                    avg_duration_ms: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent turns, newest first.
    pub fn recent_turns(&self, limit: usize) -> Result<Vec<TurnRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, provider, model, is_fallback, tool_calls_made, tokens_used, cap_hit, failed, created_at
             FROM turn_events ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(TurnRow {
                    session_id: row.get(0)?,
                    provider: row.get(1)?,
                    model: row.get(2)?,
                    is_fallback: row.get::<_, i32>(3)? != 0,
                    tool_calls_made: row.get::<_, i64>(4)? as u64,
                    tokens_used: row.get(5)?,
                    cap_hit: row.get::<_, i32>(6)? != 0,
                    failed: row.get::<_, i32>(7)? != 0,
                    created_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Turns recorded for one session.
    pub fn session_turn_count(&self, session_id: &str) -> Result<u64> {
        let count: Option<i64> = self
            .conn
            .query_row(
                "SELECT turn_count FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0) as u64)
    }
}
