//! Conversation rows: creation, forking, archiving, summaries.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::types::{parse_ts, Conversation};
use crate::{ignore_not_found, Store, StoreError, StoreResult};

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        created_at: parse_ts(&row.get::<_, String>(1)?),
        forked_from: row.get(2)?,
        branch_number: row.get(3)?,
        is_archived: row.get::<_, i64>(4)? != 0,
        scheduler_id: row.get(5)?,
        is_scheduler_run: row.get::<_, i64>(6)? != 0,
        read_at: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_ts(&s)),
        summary: row.get(8)?,
        summary_up_to_seq: row.get(9)?,
    })
}

const CONV_COLS: &str = "id, created_at, forked_from, branch_number, is_archived, \
                         scheduler_id, is_scheduler_run, read_at, summary, summary_up_to_seq";

impl Store {
    /// Create a fresh conversation. `scheduler_id` marks schedule-created
    /// runs.
    pub fn create_conversation(&self, scheduler_id: Option<&str>) -> StoreResult<Conversation> {
        let conv = Conversation {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            forked_from: None,
            branch_number: None,
            is_archived: false,
            scheduler_id: scheduler_id.map(String::from),
            is_scheduler_run: scheduler_id.is_some(),
            read_at: None,
            summary: None,
            summary_up_to_seq: None,
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (id, created_at, scheduler_id, is_scheduler_run)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conv.id,
                conv.created_at.to_rfc3339(),
                conv.scheduler_id,
                conv.is_scheduler_run as i64
            ],
        )?;
        Ok(conv)
    }

    pub fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                &format!("SELECT {CONV_COLS} FROM conversations WHERE id = ?1"),
                [id],
                conversation_from_row,
            )
            .map(Some)
            .or_else(ignore_not_found)?;
        Ok(result)
    }

    /// List conversations, newest first. Archived ones are excluded unless
    /// requested.
    pub fn list_conversations(&self, include_archived: bool) -> StoreResult<Vec<Conversation>> {
        let conn = self.conn.lock();
        let sql = if include_archived {
            format!("SELECT {CONV_COLS} FROM conversations ORDER BY created_at DESC")
        } else {
            format!(
                "SELECT {CONV_COLS} FROM conversations WHERE is_archived = 0 ORDER BY created_at DESC"
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], conversation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Fork a conversation: the new branch duplicates all messages with
    /// seq ≤ `up_to_seq`, preserving their seqs.
    pub fn fork_conversation(&self, parent_id: &str, up_to_seq: i64) -> StoreResult<Conversation> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let parent_exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM conversations WHERE id = ?1",
            [parent_id],
            |row| row.get(0),
        )?;
        if parent_exists == 0 {
            return Err(StoreError::NotFound(format!("conversation {parent_id}")));
        }

        let branch_number: i64 = tx.query_row(
            "SELECT COUNT(*) + 1 FROM conversations WHERE forked_from = ?1",
            [parent_id],
            |row| row.get(0),
        )?;

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO conversations (id, created_at, forked_from, branch_number)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, created_at.to_rfc3339(), parent_id, branch_number],
        )?;
        tx.execute(
            "INSERT INTO messages (conversation_id, seq, role, content, tool_calls,
                                   tool_call_id, thinking, metadata, internal, created_at)
             SELECT ?1, seq, role, content, tool_calls, tool_call_id, thinking, metadata,
                    internal, created_at
             FROM messages WHERE conversation_id = ?2 AND seq <= ?3",
            params![id, parent_id, up_to_seq],
        )?;
        tx.commit()?;

        Ok(Conversation {
            id,
            created_at,
            forked_from: Some(parent_id.to_string()),
            branch_number: Some(branch_number),
            is_archived: false,
            scheduler_id: None,
            is_scheduler_run: false,
            read_at: None,
            summary: None,
            summary_up_to_seq: None,
        })
    }

    pub fn set_archived(&self, id: &str, archived: bool) -> StoreResult<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE conversations SET is_archived = ?2 WHERE id = ?1",
            params![id, archived as i64],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }
        Ok(())
    }

    pub fn mark_read(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE conversations SET read_at = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Persist a (new or extended) summary. Enforces the invariant that
    /// the boundary never passes the newest user/assistant message.
    pub fn set_summary(&self, id: &str, summary: &str, up_to_seq: i64) -> StoreResult<()> {
        let conn = self.conn.lock();
        let newest: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM messages
             WHERE conversation_id = ?1 AND role IN ('user', 'assistant')",
            [id],
            |row| row.get(0),
        )?;
        if up_to_seq > newest {
            return Err(StoreError::SummaryBoundary {
                requested: up_to_seq,
                newest,
            });
        }
        let n = conn.execute(
            "UPDATE conversations SET summary = ?2, summary_up_to_seq = ?3 WHERE id = ?1",
            params![id, summary, up_to_seq],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }
        Ok(())
    }
}
