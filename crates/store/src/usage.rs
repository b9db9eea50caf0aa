//! Usage rows: one append-only record per LLM call.

use rusqlite::params;

use crate::types::{parse_ts, UsageRecord};
use crate::{Store, StoreResult};

impl Store {
    pub fn append_usage(&self, record: &UsageRecord) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO usage_records (job_id, model, provider, prompt_tokens,
                                        completion_tokens, cost_usd, component, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.job_id,
                record.model,
                record.provider,
                record.prompt_tokens,
                record.completion_tokens,
                record.cost_usd,
                record.component,
                record.at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn usage_for_job(&self, job_id: &str) -> StoreResult<Vec<UsageRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT job_id, model, provider, prompt_tokens, completion_tokens, cost_usd,
                    component, at
             FROM usage_records WHERE job_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([job_id], |row| {
                Ok(UsageRecord {
                    job_id: row.get(0)?,
                    model: row.get(1)?,
                    provider: row.get(2)?,
                    prompt_tokens: row.get(3)?,
                    completion_tokens: row.get(4)?,
                    cost_usd: row.get(5)?,
                    component: row.get(6)?,
                    at: parse_ts(&row.get::<_, String>(7)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
