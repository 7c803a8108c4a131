//! Compact, read-only view of the schedule around "today" used to ground the model.

use anyhow::Result;
use chrono::{Duration, NaiveDate};

use crate::config::SchedulerConfig;
use crate::database::ScheduleDatabase;
use crate::dates::{format_date, weekday_index};
use crate::schedule::{
    done_label, memo_or_none, weekday_label, CompletionRecord, CustomTask, DayLog,
    RoutineWithSteps,
};

/// How far around today the snapshot reaches.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotWindow {
    pub days_ahead: u32,
    pub recent_log_days: u32,
}

impl Default for SnapshotWindow {
    fn default() -> Self {
        Self {
            days_ahead: 3,
            recent_log_days: 7,
        }
    }
}

impl From<&SchedulerConfig> for SnapshotWindow {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            days_ahead: config.snapshot_days_ahead,
            recent_log_days: config.recent_log_days,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleSnapshot {
    pub today: NaiveDate,
    pub routines: Vec<RoutineWithSteps>,
    /// Custom tasks from today through `days_ahead` days out
    pub upcoming_tasks: Vec<CustomTask>,
    pub today_completions: Vec<CompletionRecord>,
    /// Newest first
    pub recent_logs: Vec<DayLog>,
    /// The store could not be read; the model is grounded on the date only
    pub degraded: bool,
}

impl ScheduleSnapshot {
    pub fn empty(today: NaiveDate) -> Self {
        Self {
            today,
            routines: Vec::new(),
            upcoming_tasks: Vec::new(),
            today_completions: Vec::new(),
            recent_logs: Vec::new(),
            degraded: false,
        }
    }

    /// Read the snapshot. Store failures produce a degraded, empty snapshot.
    pub fn capture(db: &ScheduleDatabase, today: NaiveDate, window: SnapshotWindow) -> Self {
        match Self::try_capture(db, today, window) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Schedule snapshot unavailable, continuing without it: {:#}", e);
                Self {
                    degraded: true,
                    ..Self::empty(today)
                }
            }
        }
    }

    fn try_capture(db: &ScheduleDatabase, today: NaiveDate, window: SnapshotWindow) -> Result<Self> {
        let horizon = today + Duration::days(window.days_ahead as i64);
        let logs_from = today - Duration::days(window.recent_log_days as i64);
        db.read(|store| {
            Ok(Self {
                today,
                routines: store.routines_with_steps()?,
                upcoming_tasks: store.custom_tasks_between(today, horizon)?,
                today_completions: store.completions_on(today)?,
                recent_logs: store.day_logs_between(logs_from, today)?,
                degraded: false,
            })
        })
    }

    /// Render the snapshot as the grounding section of the system prompt.
    pub fn to_prompt(&self) -> String {
        let today_weekday = weekday_index(self.today);
        let mut lines = vec![format!(
            "today_date: {} ({})",
            format_date(self.today),
            weekday_label(today_weekday)
        )];

        if self.degraded {
            lines.push(
                "schedule_snapshot: unavailable; use the query actions to look things up"
                    .to_string(),
            );
            return lines.join("\n");
        }

        lines.push(String::new());
        lines.push("routines (days: 0=Mon .. 6=Sun):".to_string());
        if self.routines.is_empty() {
            lines.push("- none".to_string());
        }
        for entry in &self.routines {
            let routine = &entry.routine;
            let marker = if routine.runs_on(today_weekday) {
                " [today]"
            } else {
                ""
            };
            lines.push(format!(
                "- routine [{}] {} (days: {}){}",
                routine.id, routine.name, routine.days, marker
            ));
            for step in &entry.steps {
                let state = self
                    .today_completions
                    .iter()
                    .find(|record| record.step_id == step.id)
                    .map(|record| done_label(record.done))
                    .unwrap_or("open");
                lines.push(format!(
                    "  - step [{}] {} {} ({}) today: {} (memo: {})",
                    step.id,
                    step.time,
                    step.name,
                    step.category,
                    state,
                    memo_or_none(&step.memo)
                ));
            }
        }

        lines.push(String::new());
        lines.push("custom_tasks:".to_string());
        if self.upcoming_tasks.is_empty() {
            lines.push("- none".to_string());
        }
        for task in &self.upcoming_tasks {
            lines.push(format!(
                "- [{}] {} {} {} ({}) (memo: {})",
                task.id,
                format_date(task.date),
                task.time,
                task.name,
                done_label(task.done),
                memo_or_none(&task.memo)
            ));
        }

        lines.push(String::new());
        lines.push("recent_day_logs:".to_string());
        if self.recent_logs.is_empty() {
            lines.push("- none".to_string());
        }
        for log in &self.recent_logs {
            lines.push(format!(
                "- {} ({}): {}",
                format_date(log.date),
                weekday_label(weekday_index(log.date)),
                log.content.replace('\n', " / ")
            ));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    #[test]
    fn capture_reads_the_configured_window() {
        let dir = tempfile::tempdir().unwrap();
        let db = ScheduleDatabase::new(dir.path().join("snap.db")).unwrap();
        db.transaction(|s| {
            let routine = s.insert_routine("Weekend", "5,6", "")?;
            let step = s.insert_step(routine, "Laundry", "10:00", "Chores")?;
            s.upsert_completion(&CompletionRecord {
                date: today(),
                step_id: step,
                done: true,
                memo: String::new(),
            })?;
            s.insert_custom_task(today(), "Haircut", "15:00", "")?;
            s.insert_custom_task(today() + Duration::days(2), "Dentist", "09:00", "")?;
            s.insert_custom_task(today() + Duration::days(10), "Far away", "09:00", "")?;
            s.upsert_day_log(today() - Duration::days(1), "Friday notes")?;
            s.upsert_day_log(today() - Duration::days(30), "Old notes")?;
            Ok(())
        })
        .unwrap();

        let snapshot = ScheduleSnapshot::capture(&db, today(), SnapshotWindow::default());
        assert!(!snapshot.degraded);
        assert_eq!(snapshot.routines.len(), 1);
        assert_eq!(snapshot.upcoming_tasks.len(), 2);
        assert_eq!(snapshot.today_completions.len(), 1);
        assert_eq!(snapshot.recent_logs.len(), 1);

        let prompt = snapshot.to_prompt();
        assert!(prompt.starts_with("today_date: 2026-10-17 (Sat)"));
        assert!(prompt.contains("Weekend (days: 5,6) [today]"));
        assert!(prompt.contains("10:00 Laundry (Chores) today: done"));
        assert!(prompt.contains("2026-10-19 09:00 Dentist (open)"));
        assert!(!prompt.contains("Far away"));
        assert!(prompt.contains("2026-10-16 (Fri): Friday notes"));
        assert!(!prompt.contains("Old notes"));
    }

    #[test]
    fn degraded_snapshot_still_grounds_the_date() {
        let snapshot = ScheduleSnapshot {
            degraded: true,
            ..ScheduleSnapshot::empty(today())
        };
        let prompt = snapshot.to_prompt();
        assert!(prompt.contains("today_date: 2026-10-17 (Sat)"));
        assert!(prompt.contains("unavailable"));
    }
}
