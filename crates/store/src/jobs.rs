//! Job rows: the durable half of the queue, with validated status
//! transitions and per-conversation dispatch exclusivity.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::messages::insert_message;
use crate::types::{now_str, parse_ts, Job, JobStatus, MessageRole, NewMessage, PendingKind};
use crate::{ignore_not_found, Store, StoreError, StoreResult};

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status_str: String = row.get(3)?;
    let payload: Option<String> = row.get(12)?;
    Ok(Job {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_message: row.get(2)?,
        status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Failed),
        created_at: parse_ts(&row.get::<_, String>(4)?),
        started_at: row.get::<_, Option<String>>(5)?.map(|s| parse_ts(&s)),
        ended_at: row.get::<_, Option<String>>(6)?.map(|s| parse_ts(&s)),
        result: row.get(7)?,
        error: row.get(8)?,
        worker_id: row.get(9)?,
        cancel_requested: row.get::<_, i64>(10)? != 0,
        pending_call_id: row.get(11)?,
        pending_payload: payload.and_then(|s| serde_json::from_str(&s).ok()),
        trigger_time: row.get::<_, Option<String>>(13)?.map(|s| parse_ts(&s)),
    })
}

const JOB_COLS: &str = "id, conversation_id, user_message, status, created_at, started_at, \
                        ended_at, result, error, worker_id, cancel_requested, pending_call_id, \
                        pending_payload, trigger_time";

/// Statuses that occupy a conversation's single execution slot.
const DISPATCHED_STATUSES: &str = "('running', 'waiting_for_input', 'oauth_pending')";

impl Store {
    /// Persist the user message and a `pending` job in one atomic write.
    /// Returns the message seq and the created job.
    pub fn submit_job(
        &self,
        conversation_id: &str,
        text: &str,
        trigger_time: Option<DateTime<Utc>>,
    ) -> StoreResult<(i64, Job)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let seq = insert_message(
            &tx,
            conversation_id,
            MessageRole::User,
            &NewMessage::text(text),
        )?;

        let job = Job {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            user_message: text.to_string(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
            worker_id: None,
            cancel_requested: false,
            pending_call_id: None,
            pending_payload: None,
            trigger_time,
        };
        tx.execute(
            "INSERT INTO jobs (id, conversation_id, user_message, status, created_at, trigger_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.id,
                job.conversation_id,
                job.user_message,
                job.status.as_str(),
                job.created_at.to_rfc3339(),
                job.trigger_time.map(|t| t.to_rfc3339()),
            ],
        )?;
        tx.commit()?;
        Ok((seq, job))
    }

    pub fn get_job(&self, id: &str) -> StoreResult<Option<Job>> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                &format!("SELECT {JOB_COLS} FROM jobs WHERE id = ?1"),
                [id],
                job_from_row,
            )
            .map(Some)
            .or_else(ignore_not_found)?;
        Ok(result)
    }

    /// List jobs newest-first with optional filters. Returns
    /// `(page, total_matching)`.
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        conversation_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<(Vec<Job>, usize)> {
        let conn = self.conn.lock();
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(s) = status {
            clauses.push(format!("status = ?{}", args.len() + 1));
            args.push(s.as_str().to_string());
        }
        if let Some(c) = conversation_id {
            clauses.push(format!("conversation_id = ?{}", args.len() + 1));
            args.push(c.to_string());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let total: usize = conn.query_row(
            &format!("SELECT COUNT(*) FROM jobs {where_sql}"),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get::<_, i64>(0).map(|n| n as usize),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLS} FROM jobs {where_sql}
             ORDER BY created_at DESC, rowid DESC LIMIT {limit} OFFSET {offset}"
        ))?;
        let page = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((page, total))
    }

    pub fn jobs_in_status(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLS} FROM jobs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt
            .query_map([status.as_str()], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn queue_depth(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Validated status transition. Sets `started_at` on entry to
    /// `running` and `ended_at` on entry to a terminal state.
    pub fn update_job_status(&self, id: &str, to: JobStatus) -> StoreResult<Job> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let job = transition(&tx, id, to, None, None)?;
        tx.commit()?;
        Ok(job)
    }

    /// Terminal transition carrying a result or error.
    pub fn finish_job(
        &self,
        id: &str,
        to: JobStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> StoreResult<Job> {
        debug_assert!(to.is_terminal());
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let job = transition(&tx, id, to, result, error)?;
        tx.commit()?;
        Ok(job)
    }

    /// Claim the oldest `pending` job whose conversation has no job in a
    /// dispatched state. The select and the `running` update share one
    /// transaction, so two workers can never claim jobs of the same
    /// conversation concurrently.
    pub fn claim_next_pending(&self, worker_id: &str) -> StoreResult<Option<Job>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let candidate = tx
            .query_row(
                &format!(
                    "SELECT {JOB_COLS} FROM jobs j
                     WHERE j.status = 'pending'
                       AND NOT EXISTS (
                           SELECT 1 FROM jobs o
                           WHERE o.conversation_id = j.conversation_id
                             AND o.status IN {DISPATCHED_STATUSES}
                       )
                     ORDER BY j.created_at ASC, j.rowid ASC
                     LIMIT 1"
                ),
                [],
                job_from_row,
            )
            .map(Some)
            .or_else(ignore_not_found)?;

        let Some(mut job) = candidate else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs SET status = 'running', worker_id = ?2,
                    started_at = COALESCE(started_at, ?3)
             WHERE id = ?1",
            params![job.id, worker_id, now_str()],
        )?;
        tx.commit()?;

        job.status = JobStatus::Running;
        job.worker_id = Some(worker_id.to_string());
        job.started_at.get_or_insert_with(Utc::now);
        Ok(Some(job))
    }

    /// Set the cancel flag. A no-op on terminal jobs; returns the job's
    /// current status either way (cancel idempotence).
    pub fn request_cancel(&self, id: &str) -> StoreResult<JobStatus> {
        let conn = self.conn.lock();
        let status_str: Option<String> = conn
            .query_row("SELECT status FROM jobs WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(ignore_not_found)?;
        let Some(status_str) = status_str else {
            return Err(StoreError::NotFound(format!("job {id}")));
        };
        let status = JobStatus::parse(&status_str).unwrap_or(JobStatus::Failed);
        if !status.is_terminal() {
            conn.execute(
                "UPDATE jobs SET cancel_requested = 1 WHERE id = ?1",
                [id],
            )?;
        }
        Ok(status)
    }

    pub fn cancel_requested(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let flag: i64 = conn.query_row(
            "SELECT cancel_requested FROM jobs WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(flag != 0)
    }

    /// Suspend a running job on a question or OAuth gate, recording the
    /// pending tool-call id and payload.
    pub fn suspend_job(
        &self,
        id: &str,
        kind: PendingKind,
        call_id: &str,
        payload: &Value,
    ) -> StoreResult<Job> {
        let to = match kind {
            PendingKind::Question => JobStatus::WaitingForInput,
            PendingKind::Oauth => JobStatus::OauthPending,
        };
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let job = transition(&tx, id, to, None, None)?;
        tx.execute(
            "UPDATE jobs SET pending_kind = ?2, pending_call_id = ?3, pending_payload = ?4
             WHERE id = ?1",
            params![
                id,
                match kind {
                    PendingKind::Question => "question",
                    PendingKind::Oauth => "oauth",
                },
                call_id,
                payload.to_string()
            ],
        )?;
        tx.commit()?;
        Ok(job)
    }

    /// Resume a suspended job: persist the response as a user message and
    /// transition to the target status (`running` when a live waiter will
    /// pick it up, `pending` on the restart-requeue path), atomically.
    ///
    /// Fails with `NoPendingQuestion` when the job is not suspended.
    pub fn resume_suspended(
        &self,
        id: &str,
        response: &str,
        to: JobStatus,
    ) -> StoreResult<(i64, Job)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let job = tx
            .query_row(
                &format!("SELECT {JOB_COLS} FROM jobs WHERE id = ?1"),
                [id],
                job_from_row,
            )
            .map(Some)
            .or_else(ignore_not_found)?
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;

        if !matches!(
            job.status,
            JobStatus::WaitingForInput | JobStatus::OauthPending
        ) || job.pending_call_id.is_none()
        {
            return Err(StoreError::NoPendingQuestion(id.to_string()));
        }

        let seq = insert_message(
            &tx,
            &job.conversation_id,
            MessageRole::User,
            &NewMessage::text(response),
        )?;
        let job = transition(&tx, id, to, None, None)?;
        tx.commit()?;
        Ok((seq, job))
    }

    /// Clear the pending-call marker once the tool result has been
    /// persisted by the worker.
    pub fn clear_pending(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE jobs SET pending_kind = NULL, pending_call_id = NULL, pending_payload = NULL
             WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    /// Startup recovery: every `running` job belonged to a worker that no
    /// longer exists, so revert them to `pending`. Suspended jobs are left
    /// for the gate to re-arm. Returns the reverted job ids.
    pub fn recover_orphaned_running(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT id FROM jobs WHERE status = 'running' ORDER BY created_at ASC")?;
            let rows = stmt.query_map([], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        for id in &ids {
            transition(&tx, id, JobStatus::Pending, None, None)?;
            tx.execute("UPDATE jobs SET worker_id = NULL WHERE id = ?1", [id.as_str()])?;
        }
        tx.commit()?;
        Ok(ids)
    }
}

fn transition(
    tx: &rusqlite::Transaction<'_>,
    id: &str,
    to: JobStatus,
    result: Option<&str>,
    error: Option<&str>,
) -> StoreResult<Job> {
    let mut job = tx
        .query_row(
            &format!("SELECT {JOB_COLS} FROM jobs WHERE id = ?1"),
            [id],
            job_from_row,
        )
        .map(Some)
        .or_else(ignore_not_found)?
        .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;

    if !job.status.can_transition_to(to) {
        return Err(StoreError::IllegalTransition {
            job_id: id.to_string(),
            from: job.status,
            to,
        });
    }

    let now = Utc::now();
    let started = if to == JobStatus::Running && job.started_at.is_none() {
        Some(now)
    } else {
        job.started_at
    };
    let ended = if to.is_terminal() { Some(now) } else { None };

    tx.execute(
        "UPDATE jobs SET status = ?2, started_at = ?3, ended_at = ?4,
                result = COALESCE(?5, result), error = COALESCE(?6, error)
         WHERE id = ?1",
        params![
            id,
            to.as_str(),
            started.map(|t| t.to_rfc3339()),
            ended.map(|t| t.to_rfc3339()),
            result,
            error
        ],
    )?;

    job.status = to;
    job.started_at = started;
    job.ended_at = ended;
    if let Some(r) = result {
        job.result = Some(r.to_string());
    }
    if let Some(e) = error {
        job.error = Some(e.to_string());
    }
    Ok(job)
}
