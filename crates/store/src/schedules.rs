//! Schedule rows. The scheduler owns all writes here; workers only read.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::types::{parse_ts, ScheduleRecord};
use crate::{ignore_not_found, Store, StoreError, StoreResult};

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleRecord> {
    Ok(ScheduleRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        name: row.get(2)?,
        prompt: row.get(3)?,
        cron: row.get(4)?,
        timezone: row.get(5)?,
        enabled: row.get::<_, i64>(6)? != 0,
        next_fire_at: row.get::<_, Option<String>>(7)?.map(|s| parse_ts(&s)),
        run_count: row.get(8)?,
        source_conversation_id: row.get(9)?,
        context: row.get(10)?,
        created_at: parse_ts(&row.get::<_, String>(11)?),
        updated_at: parse_ts(&row.get::<_, String>(12)?),
    })
}

const SCHED_COLS: &str = "id, conversation_id, name, prompt, cron, timezone, enabled, \
                          next_fire_at, run_count, source_conversation_id, context, \
                          created_at, updated_at";

impl Store {
    pub fn upsert_schedule(&self, schedule: &ScheduleRecord) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO schedules (id, conversation_id, name, prompt, cron, timezone, enabled,
                                    next_fire_at, run_count, source_conversation_id, context,
                                    created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                 name = ?3, prompt = ?4, cron = ?5, timezone = ?6, enabled = ?7,
                 next_fire_at = ?8, run_count = ?9, context = ?11, updated_at = ?13",
            params![
                schedule.id,
                schedule.conversation_id,
                schedule.name,
                schedule.prompt,
                schedule.cron,
                schedule.timezone,
                schedule.enabled as i64,
                schedule.next_fire_at.map(|t| t.to_rfc3339()),
                schedule.run_count,
                schedule.source_conversation_id,
                schedule.context,
                schedule.created_at.to_rfc3339(),
                schedule.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_schedule(&self, id: &str) -> StoreResult<Option<ScheduleRecord>> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                &format!("SELECT {SCHED_COLS} FROM schedules WHERE id = ?1"),
                [id],
                schedule_from_row,
            )
            .map(Some)
            .or_else(ignore_not_found)?;
        Ok(result)
    }

    pub fn list_schedules(&self) -> StoreResult<Vec<ScheduleRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHED_COLS} FROM schedules ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map([], schedule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_schedule(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM schedules WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    /// Enabled schedules whose next fire is due at or before `now`.
    pub fn due_schedules(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHED_COLS} FROM schedules
             WHERE enabled = 1 AND next_fire_at IS NOT NULL AND next_fire_at <= ?1
             ORDER BY next_fire_at ASC"
        ))?;
        let rows = stmt
            .query_map([now.to_rfc3339()], schedule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Earliest upcoming fire across all enabled schedules.
    pub fn earliest_next_fire(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let next: Option<String> = conn.query_row(
            "SELECT MIN(next_fire_at) FROM schedules
             WHERE enabled = 1 AND next_fire_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(next.map(|s| parse_ts(&s)))
    }

    /// Advance the cron cursor. Persisted *before* the fire's job is
    /// enqueued, which is what makes fires at-most-once across restarts.
    pub fn advance_schedule_fire(
        &self,
        id: &str,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE schedules SET next_fire_at = ?2, run_count = run_count + 1, updated_at = ?3
             WHERE id = ?1",
            params![
                id,
                next_fire_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339()
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    /// Flip enablement. Disabling clears `next_fire_at`; the scheduler
    /// recomputes it from now on re-enable.
    pub fn set_schedule_enabled(
        &self,
        id: &str,
        enabled: bool,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE schedules SET enabled = ?2, next_fire_at = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                id,
                enabled as i64,
                if enabled {
                    next_fire_at.map(|t| t.to_rfc3339())
                } else {
                    None
                },
                Utc::now().to_rfc3339()
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn schedule(next: Option<DateTime<Utc>>) -> ScheduleRecord {
        ScheduleRecord {
            id: Uuid::new_v4().to_string(),
            conversation_id: None,
            name: "report".into(),
            prompt: "run report".into(),
            cron: "*/5 * * * *".into(),
            timezone: "UTC".into(),
            enabled: true,
            next_fire_at: next,
            run_count: 0,
            source_conversation_id: None,
            context: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_and_get() {
        let store = Store::open_in_memory().unwrap();
        let s = schedule(Some(Utc::now()));
        store.upsert_schedule(&s).unwrap();

        let loaded = store.get_schedule(&s.id).unwrap().unwrap();
        assert_eq!(loaded.name, "report");
        assert_eq!(loaded.cron, "*/5 * * * *");
        assert!(loaded.enabled);
    }

    #[test]
    fn due_only_returns_ripe_enabled() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        let ripe = schedule(Some(now - chrono::Duration::seconds(5)));
        let future = schedule(Some(now + chrono::Duration::hours(1)));
        let mut disabled = schedule(Some(now - chrono::Duration::seconds(5)));
        disabled.enabled = false;
        disabled.next_fire_at = None;

        store.upsert_schedule(&ripe).unwrap();
        store.upsert_schedule(&future).unwrap();
        store.upsert_schedule(&disabled).unwrap();

        let due = store.due_schedules(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, ripe.id);
    }

    #[test]
    fn advance_increments_run_count() {
        let store = Store::open_in_memory().unwrap();
        let s = schedule(Some(Utc::now()));
        store.upsert_schedule(&s).unwrap();

        let next = Utc::now() + chrono::Duration::minutes(5);
        store.advance_schedule_fire(&s.id, Some(next)).unwrap();

        let loaded = store.get_schedule(&s.id).unwrap().unwrap();
        assert_eq!(loaded.run_count, 1);
        assert_eq!(
            loaded.next_fire_at.unwrap().timestamp(),
            next.timestamp()
        );
    }

    #[test]
    fn disable_clears_next_fire() {
        let store = Store::open_in_memory().unwrap();
        let s = schedule(Some(Utc::now()));
        store.upsert_schedule(&s).unwrap();

        store.set_schedule_enabled(&s.id, false, None).unwrap();
        let loaded = store.get_schedule(&s.id).unwrap().unwrap();
        assert!(!loaded.enabled);
        assert!(loaded.next_fire_at.is_none());
    }

    #[test]
    fn earliest_next_fire_across_schedules() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let near = schedule(Some(now + chrono::Duration::minutes(1)));
        let far = schedule(Some(now + chrono::Duration::hours(2)));
        store.upsert_schedule(&near).unwrap();
        store.upsert_schedule(&far).unwrap();

        let earliest = store.earliest_next_fire().unwrap().unwrap();
        assert_eq!(
            earliest.timestamp(),
            near.next_fire_at.unwrap().timestamp()
        );
    }

    #[test]
    fn delete_missing_schedule_errors() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.delete_schedule("ghost").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }
}
