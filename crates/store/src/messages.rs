//! Message rows: ordered, per-conversation monotonic seq allocation.

use rusqlite::{params, Row};

use crate::types::{now_str, parse_ts, MessageRecord, MessageRole, NewMessage};
use crate::{Store, StoreError, StoreResult};

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let role_str: String = row.get(2)?;
    let tool_calls: Option<String> = row.get(4)?;
    let metadata: Option<String> = row.get(7)?;
    Ok(MessageRecord {
        conversation_id: row.get(0)?,
        seq: row.get(1)?,
        role: MessageRole::parse(&role_str).unwrap_or(MessageRole::Internal),
        content: row.get(3)?,
        tool_calls: tool_calls.and_then(|s| serde_json::from_str(&s).ok()),
        tool_call_id: row.get(5)?,
        thinking: row.get(6)?,
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
        internal: row.get::<_, i64>(8)? != 0,
        created_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

const MSG_COLS: &str = "conversation_id, seq, role, content, tool_calls, tool_call_id, \
                        thinking, metadata, internal, created_at";

impl Store {
    /// Append a message, returning its seq — strictly greater than every
    /// seq previously returned for the same conversation. Allocation and
    /// insert share one transaction under the writer lock.
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        msg: NewMessage,
    ) -> StoreResult<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let seq = insert_message(&tx, conversation_id, role, &msg)?;
        tx.commit()?;
        Ok(seq)
    }

    /// Messages after `since_seq` (exclusive), oldest first.
    pub fn read_messages(
        &self,
        conversation_id: &str,
        since_seq: Option<i64>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<MessageRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MSG_COLS} FROM messages
             WHERE conversation_id = ?1 AND seq > ?2
             ORDER BY seq ASC LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    conversation_id,
                    since_seq.unwrap_or(0),
                    limit.map(|l| l as i64).unwrap_or(-1)
                ],
                message_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Latest message with the given role, if any.
    pub fn latest_message_with_role(
        &self,
        conversation_id: &str,
        role: MessageRole,
    ) -> StoreResult<Option<MessageRecord>> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                &format!(
                    "SELECT {MSG_COLS} FROM messages
                     WHERE conversation_id = ?1 AND role = ?2
                     ORDER BY seq DESC LIMIT 1"
                ),
                params![conversation_id, role.as_str()],
                message_from_row,
            )
            .map(Some)
            .or_else(crate::ignore_not_found)?;
        Ok(result)
    }
}

/// Shared insert used by `append_message` and by compound operations that
/// already hold a transaction (job submission, gate responses).
pub(crate) fn insert_message(
    tx: &rusqlite::Transaction<'_>,
    conversation_id: &str,
    role: MessageRole,
    msg: &NewMessage,
) -> StoreResult<i64> {
    let exists: i64 = tx.query_row(
        "SELECT COUNT(*) FROM conversations WHERE id = ?1",
        [conversation_id],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(StoreError::NotFound(format!(
            "conversation {conversation_id}"
        )));
    }

    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
        [conversation_id],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT INTO messages (conversation_id, seq, role, content, tool_calls,
                               tool_call_id, thinking, metadata, internal, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            conversation_id,
            seq,
            role.as_str(),
            msg.content,
            msg.tool_calls.as_ref().map(|v| v.to_string()),
            msg.tool_call_id,
            msg.thinking,
            msg.metadata.as_ref().map(|v| v.to_string()),
            msg.internal as i64,
            now_str(),
        ],
    )?;
    Ok(seq)
}
