//! Activity rows: the append-only per-job progress log.

use rusqlite::{params, Row};

use crate::types::{now_str, parse_ts, Activity, ActivityKind, NewActivity};
use crate::{Store, StoreResult};

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    let kind_str: String = row.get(3)?;
    let detail: Option<String> = row.get(5)?;
    Ok(Activity {
        job_id: row.get(0)?,
        seq: row.get(1)?,
        at: parse_ts(&row.get::<_, String>(2)?),
        kind: ActivityKind::parse(&kind_str).unwrap_or(ActivityKind::Step),
        message: row.get(4)?,
        detail: detail.and_then(|s| serde_json::from_str(&s).ok()),
        tool_name: row.get(6)?,
        is_error: row.get::<_, i64>(7)? != 0,
    })
}

const ACT_COLS: &str = "job_id, seq, at, kind, message, detail, tool_name, is_error";

impl Store {
    /// Append one activity record. Seqs are strictly increasing per job,
    /// starting at 1; the record is never mutated afterwards.
    pub fn append_activity(&self, job_id: &str, activity: NewActivity) -> StoreResult<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM activities WHERE job_id = ?1",
            [job_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO activities (job_id, seq, at, kind, message, detail, tool_name, is_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job_id,
                seq,
                now_str(),
                activity.kind.as_str(),
                activity.message,
                activity.detail.as_ref().map(|v| v.to_string()),
                activity.tool_name,
                activity.is_error as i64,
            ],
        )?;
        tx.commit()?;
        Ok(seq)
    }

    /// Successful sub-agent completions across all jobs of a
    /// conversation. Backs the per-conversation delegate quota, which has
    /// to survive restarts.
    pub fn successful_delegate_count(&self, conversation_id: &str) -> StoreResult<u32> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM activities a
             JOIN jobs j ON j.id = a.job_id
             WHERE j.conversation_id = ?1 AND a.kind = 'delegate_end' AND a.is_error = 0",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(n as u32)
    }

    /// Read activities after `since_seq` (exclusive). Returns the records
    /// and the latest seq for the job (the next poll watermark).
    pub fn read_activities(
        &self,
        job_id: &str,
        since_seq: Option<i64>,
    ) -> StoreResult<(Vec<Activity>, i64)> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACT_COLS} FROM activities
             WHERE job_id = ?1 AND seq > ?2 ORDER BY seq ASC"
        ))?;
        let records = stmt
            .query_map(params![job_id, since_seq.unwrap_or(0)], activity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let latest: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM activities WHERE job_id = ?1",
            [job_id],
            |row| row.get(0),
        )?;
        Ok((records, latest))
    }
}
