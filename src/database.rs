use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::dates::format_date;
use crate::schedule::{CompletionRecord, CustomTask, DayLog, Routine, RoutineWithSteps, Step};

/// A persisted chat line. Assistant content may carry an encoded execution trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChatMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct ScheduleDatabase {
    conn: Mutex<Connection>,
}

impl ScheduleDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open schedule database at {:?}", path))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS routine (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                days TEXT NOT NULL DEFAULT '0,1,2,3,4',
                description TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS step (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                routine_id INTEGER NOT NULL REFERENCES routine(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                time TEXT NOT NULL DEFAULT '00:00',
                category TEXT NOT NULL DEFAULT 'Other',
                memo TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS step_completion (
                date TEXT NOT NULL,
                step_id INTEGER NOT NULL REFERENCES step(id) ON DELETE CASCADE,
                done INTEGER NOT NULL DEFAULT 0,
                memo TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (date, step_id)
            );

            CREATE TABLE IF NOT EXISTS custom_task (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                name TEXT NOT NULL,
                time TEXT NOT NULL DEFAULT '00:00',
                done INTEGER NOT NULL DEFAULT 0,
                memo TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS day_log (
                date TEXT PRIMARY KEY,
                content TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS chat_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_step_routine ON step(routine_id);
            CREATE INDEX IF NOT EXISTS idx_custom_task_date ON custom_task(date, time);
            "#,
        )
        .context("Failed to create schedule schema")?;
        Ok(())
    }

    /// Run read-only queries against the store.
    pub fn read<T>(&self, f: impl FnOnce(&ScheduleStore<'_>) -> Result<T>) -> Result<T> {
        let conn = self.lock_conn()?;
        f(&ScheduleStore { conn: &conn })
    }

    /// Run `f` inside one transaction. Commits on `Ok`, rolls back otherwise.
    pub fn transaction<T>(&self, f: impl FnOnce(&ScheduleStore<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let value = f(&ScheduleStore { conn: &tx })?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }

    pub fn add_chat_message(&self, role: &str, content: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO chat_history (id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, role, content, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    /// Most recent `limit` messages, oldest first.
    pub fn get_chat_history(&self, limit: usize) -> Result<Vec<StoredChatMessage>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, role, content, created_at FROM chat_history
             ORDER BY seq DESC
             LIMIT ?1",
        )?;
        let mut messages = stmt
            .query_map([limit as i64], |row| {
                Ok(StoredChatMessage {
                    id: row.get(0)?,
                    role: row.get(1)?,
                    content: row.get(2)?,
                    created_at: row.get::<_, String>(3)?.parse().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub fn clear_chat_history(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        Ok(conn.execute("DELETE FROM chat_history", [])?)
    }
}

fn date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn routine_from_row(row: &Row<'_>) -> rusqlite::Result<Routine> {
    Ok(Routine {
        id: row.get(0)?,
        name: row.get(1)?,
        days: row.get(2)?,
        description: row.get(3)?,
    })
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<Step> {
    Ok(Step {
        id: row.get(0)?,
        routine_id: row.get(1)?,
        name: row.get(2)?,
        time: row.get(3)?,
        category: row.get(4)?,
        memo: row.get(5)?,
    })
}

fn custom_task_from_row(row: &Row<'_>) -> rusqlite::Result<CustomTask> {
    Ok(CustomTask {
        id: row.get(0)?,
        date: date_at(row, 1)?,
        name: row.get(2)?,
        time: row.get(3)?,
        done: row.get::<_, i64>(4)? != 0,
        memo: row.get(5)?,
    })
}

fn completion_from_row(row: &Row<'_>) -> rusqlite::Result<CompletionRecord> {
    Ok(CompletionRecord {
        date: date_at(row, 0)?,
        step_id: row.get(1)?,
        done: row.get::<_, i64>(2)? != 0,
        memo: row.get(3)?,
    })
}

const STEP_COLUMNS: &str = "id, routine_id, name, time, category, memo";
const TASK_COLUMNS: &str = "id, date, name, time, done, memo";

/// Typed access to the schedule tables over a locked connection or open transaction.
pub struct ScheduleStore<'a> {
    conn: &'a Connection,
}

impl ScheduleStore<'_> {
    // Routines

    pub fn list_routines(&self) -> Result<Vec<Routine>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, days, description FROM routine ORDER BY id")?;
        let routines = stmt
            .query_map([], routine_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(routines)
    }

    pub fn get_routine(&self, id: i64) -> Result<Option<Routine>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, days, description FROM routine WHERE id = ?1",
                [id],
                routine_from_row,
            )
            .optional()?)
    }

    pub fn routines_with_steps(&self) -> Result<Vec<RoutineWithSteps>> {
        self.list_routines()?
            .into_iter()
            .map(|routine| {
                let steps = self.steps_for_routine(routine.id)?;
                Ok(RoutineWithSteps { routine, steps })
            })
            .collect()
    }

    /// Routines active on `weekday` (0 = Monday), with their steps.
    pub fn routines_for_weekday(&self, weekday: u32) -> Result<Vec<RoutineWithSteps>> {
        Ok(self
            .routines_with_steps()?
            .into_iter()
            .filter(|entry| entry.routine.runs_on(weekday))
            .collect())
    }

    pub fn insert_routine(&self, name: &str, days: &str, description: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO routine (name, days, description) VALUES (?1, ?2, ?3)",
            params![name, days, description],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn delete_routine(&self, id: i64) -> Result<bool> {
        Ok(self.conn.execute("DELETE FROM routine WHERE id = ?1", [id])? > 0)
    }

    pub fn set_routine_days(&self, id: i64, days: &str) -> Result<bool> {
        Ok(self
            .conn
            .execute("UPDATE routine SET days = ?2 WHERE id = ?1", params![id, days])?
            > 0)
    }

    // Steps

    pub fn get_step(&self, id: i64) -> Result<Option<Step>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM step WHERE id = ?1", STEP_COLUMNS),
                [id],
                step_from_row,
            )
            .optional()?)
    }

    pub fn steps_for_routine(&self, routine_id: i64) -> Result<Vec<Step>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM step WHERE routine_id = ?1 ORDER BY time, id",
            STEP_COLUMNS
        ))?;
        let steps = stmt
            .query_map([routine_id], step_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(steps)
    }

    pub fn insert_step(
        &self,
        routine_id: i64,
        name: &str,
        time: &str,
        category: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO step (routine_id, name, time, category) VALUES (?1, ?2, ?3, ?4)",
            params![routine_id, name, time, category],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn delete_step(&self, id: i64) -> Result<bool> {
        Ok(self.conn.execute("DELETE FROM step WHERE id = ?1", [id])? > 0)
    }

    pub fn set_step_time(&self, id: i64, time: &str) -> Result<bool> {
        Ok(self
            .conn
            .execute("UPDATE step SET time = ?2 WHERE id = ?1", params![id, time])?
            > 0)
    }

    pub fn set_step_name(&self, id: i64, name: &str) -> Result<bool> {
        Ok(self
            .conn
            .execute("UPDATE step SET name = ?2 WHERE id = ?1", params![id, name])?
            > 0)
    }

    pub fn set_step_memo(&self, id: i64, memo: &str) -> Result<bool> {
        Ok(self
            .conn
            .execute("UPDATE step SET memo = ?2 WHERE id = ?1", params![id, memo])?
            > 0)
    }

    // Step completion

    pub fn get_completion(&self, date: NaiveDate, step_id: i64) -> Result<Option<CompletionRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT date, step_id, done, memo FROM step_completion WHERE date = ?1 AND step_id = ?2",
                params![format_date(date), step_id],
                completion_from_row,
            )
            .optional()?)
    }

    pub fn completions_on(&self, date: NaiveDate) -> Result<Vec<CompletionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, step_id, done, memo FROM step_completion WHERE date = ?1 ORDER BY step_id",
        )?;
        let records = stmt
            .query_map([format_date(date)], completion_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn upsert_completion(&self, record: &CompletionRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO step_completion (date, step_id, done, memo) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(date, step_id) DO UPDATE SET done = excluded.done, memo = excluded.memo",
            params![
                format_date(record.date),
                record.step_id,
                record.done as i64,
                record.memo
            ],
        )?;
        Ok(())
    }

    // Custom tasks

    pub fn get_custom_task(&self, id: i64) -> Result<Option<CustomTask>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM custom_task WHERE id = ?1", TASK_COLUMNS),
                [id],
                custom_task_from_row,
            )
            .optional()?)
    }

    /// Tasks with `start <= date <= end`, ordered by date then time.
    pub fn custom_tasks_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CustomTask>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM custom_task WHERE date BETWEEN ?1 AND ?2 ORDER BY date, time, id",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(
                params![format_date(start), format_date(end)],
                custom_task_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn insert_custom_task(
        &self,
        date: NaiveDate,
        name: &str,
        time: &str,
        memo: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO custom_task (date, name, time, memo) VALUES (?1, ?2, ?3, ?4)",
            params![format_date(date), name, time, memo],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn delete_custom_task(&self, id: i64) -> Result<bool> {
        Ok(self
            .conn
            .execute("DELETE FROM custom_task WHERE id = ?1", [id])?
            > 0)
    }

    pub fn set_custom_task_done(&self, id: i64, done: bool, memo: Option<&str>) -> Result<bool> {
        let changed = match memo {
            Some(memo) => self.conn.execute(
                "UPDATE custom_task SET done = ?2, memo = ?3 WHERE id = ?1",
                params![id, done as i64, memo],
            )?,
            None => self.conn.execute(
                "UPDATE custom_task SET done = ?2 WHERE id = ?1",
                params![id, done as i64],
            )?,
        };
        Ok(changed > 0)
    }

    pub fn set_custom_task_time(&self, id: i64, time: &str) -> Result<bool> {
        Ok(self
            .conn
            .execute("UPDATE custom_task SET time = ?2 WHERE id = ?1", params![id, time])?
            > 0)
    }

    pub fn set_custom_task_name(&self, id: i64, name: &str) -> Result<bool> {
        Ok(self
            .conn
            .execute("UPDATE custom_task SET name = ?2 WHERE id = ?1", params![id, name])?
            > 0)
    }

    pub fn set_custom_task_memo(&self, id: i64, memo: &str) -> Result<bool> {
        Ok(self
            .conn
            .execute("UPDATE custom_task SET memo = ?2 WHERE id = ?1", params![id, memo])?
            > 0)
    }

    // Day logs

    pub fn get_day_log(&self, date: NaiveDate) -> Result<Option<DayLog>> {
        Ok(self
            .conn
            .query_row(
                "SELECT date, content FROM day_log WHERE date = ?1",
                [format_date(date)],
                |row| {
                    Ok(DayLog {
                        date: date_at(row, 0)?,
                        content: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn upsert_day_log(&self, date: NaiveDate, content: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO day_log (date, content) VALUES (?1, ?2)
             ON CONFLICT(date) DO UPDATE SET content = excluded.content",
            params![format_date(date), content],
        )?;
        Ok(())
    }

    /// Non-empty logs with `start <= date <= end`, newest first.
    pub fn day_logs_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DayLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, content FROM day_log
             WHERE date BETWEEN ?1 AND ?2 AND TRIM(content) != ''
             ORDER BY date DESC",
        )?;
        let logs = stmt
            .query_map(params![format_date(start), format_date(end)], |row| {
                Ok(DayLog {
                    date: date_at(row, 0)?,
                    content: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }
}
