//! Durable state for the Minder host — conversations, messages, jobs,
//! activities, schedules, capability sets, and usage records.
//!
//! Single-writer embedded SQLite: every write goes through one
//! `Mutex<Connection>`; readers share the same handle. Operations are
//! individually atomic, and compound operations (submit = message + job)
//! run inside one transaction.

mod activities;
mod conversations;
mod error;
mod jobs;
mod messages;
mod schedules;
mod schema;
mod types;
mod usage;

pub use error::{StoreError, StoreResult};
pub use types::{
    Activity, ActivityKind, Conversation, Job, JobStatus, MessageRecord, MessageRole, NewActivity,
    NewMessage, PendingKind, ScheduleRecord, UsageRecord,
};

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use minder_domain::capability::ActiveCapabilities;

/// Handle to the embedded database. Cheap to share behind an `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by the test suites.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Capability sets ────────────────────────────────────────────

    /// Load the active capability set for a conversation (empty if none
    /// was ever stored).
    pub fn capability_set(&self, conversation_id: &str) -> StoreResult<ActiveCapabilities> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT entries FROM capability_sets WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_not_found)?;
        match json {
            Some(j) => Ok(serde_json::from_str(&j)?),
            None => Ok(ActiveCapabilities::new()),
        }
    }

    /// Persist the capability set for a conversation.
    pub fn set_capability_set(
        &self,
        conversation_id: &str,
        set: &ActiveCapabilities,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(set)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO capability_sets (conversation_id, entries, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(conversation_id) DO UPDATE SET entries = ?2, updated_at = ?3",
            rusqlite::params![conversation_id, json, types::now_str()],
        )?;
        Ok(())
    }
}

/// Map `QueryReturnedNoRows` to `Ok(None)`, pass through everything else.
fn ignore_not_found<T>(e: rusqlite::Error) -> Result<Option<T>, rusqlite::Error> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}
