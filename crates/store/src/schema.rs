use rusqlite::Connection;

use crate::StoreResult;

// Schema version (increment when changing table definitions).
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            forked_from TEXT,
            branch_number INTEGER,
            is_archived INTEGER NOT NULL DEFAULT 0,
            scheduler_id TEXT,
            is_scheduler_run INTEGER NOT NULL DEFAULT 0,
            read_at TEXT,
            summary TEXT,
            summary_up_to_seq INTEGER
        );

        CREATE TABLE IF NOT EXISTS messages (
            conversation_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            tool_calls TEXT,
            tool_call_id TEXT,
            thinking TEXT,
            metadata TEXT,
            internal INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (conversation_id, seq),
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
        );

        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            user_message TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            started_at TEXT,
            ended_at TEXT,
            result TEXT,
            error TEXT,
            worker_id TEXT,
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            pending_kind TEXT,
            pending_call_id TEXT,
            pending_payload TEXT,
            trigger_time TEXT,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
        );

        CREATE TABLE IF NOT EXISTS activities (
            job_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            at TEXT NOT NULL,
            kind TEXT NOT NULL,
            message TEXT NOT NULL,
            detail TEXT,
            tool_name TEXT,
            is_error INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (job_id, seq),
            FOREIGN KEY (job_id) REFERENCES jobs(id)
        );

        CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            conversation_id TEXT,
            name TEXT NOT NULL,
            prompt TEXT NOT NULL,
            cron TEXT NOT NULL,
            timezone TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            next_fire_at TEXT,
            run_count INTEGER NOT NULL DEFAULT 0,
            source_conversation_id TEXT,
            context TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS capability_sets (
            conversation_id TEXT PRIMARY KEY,
            entries TEXT NOT NULL,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS usage_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT,
            model TEXT NOT NULL,
            provider TEXT NOT NULL,
            prompt_tokens INTEGER NOT NULL,
            completion_tokens INTEGER NOT NULL,
            cost_usd REAL NOT NULL DEFAULT 0,
            component TEXT NOT NULL,
            at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conv_seq ON messages(conversation_id, seq);
        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
        CREATE INDEX IF NOT EXISTS idx_jobs_conversation ON jobs(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_activities_job_seq ON activities(job_id, seq);
        CREATE INDEX IF NOT EXISTS idx_schedules_fire ON schedules(enabled, next_fire_at);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}
