//! Read-only schedule queries.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde_json::json;
use std::sync::Arc;

use super::{Action, ActionCategory, ActionContext, ActionHandler, ActionOutput};
use crate::database::ScheduleStore;
use crate::dates::{format_date, weekday_index};
use crate::schedule::{done_label, memo_or_none, weekday_label};

/// Longest period `list_tasks_in_period` will enumerate.
const MAX_PERIOD_DAYS: i64 = 62;

pub fn handlers() -> Vec<Arc<dyn ActionHandler>> {
    vec![
        Arc::new(GetDayLog),
        Arc::new(ListTasksInPeriod),
        Arc::new(GetDailySummary),
    ]
}

/// One line per routine step scheduled on `date`, with that day's completion state.
fn routine_step_lines(store: &ScheduleStore<'_>, date: NaiveDate) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for entry in store.routines_for_weekday(weekday_index(date))? {
        for step in &entry.steps {
            let record = store.get_completion(date, step.id)?;
            let done = record.as_ref().is_some_and(|r| r.done);
            let memo = record
                .as_ref()
                .map(|r| r.memo.as_str())
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(step.memo.as_str());
            lines.push(format!(
                "step [{}] {} {} - {} - {} ({}) (memo: {})",
                step.id,
                format_date(date),
                step.time,
                entry.routine.name,
                step.name,
                done_label(done),
                memo_or_none(memo)
            ));
        }
    }
    Ok(lines)
}

pub struct GetDayLog;

#[async_trait]
impl ActionHandler for GetDayLog {
    fn name(&self) -> &str {
        "get_day_log"
    }

    fn description(&self) -> &str {
        "Read the day log (journal) for a date, defaulting to today_date."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "format": "date", "description": "YYYY-MM-DD, defaults to today_date" }
            }
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let date = match ctx.date_param(action, "date") {
            Ok(date) => date,
            Err(reason) => return Ok(ActionOutput::Error(reason)),
        };
        let log = ctx.store.read(|store| store.get_day_log(date))?;
        Ok(ActionOutput::Text(match log {
            Some(log) if !log.content.trim().is_empty() => {
                format!("Day log for {}:\n{}", format_date(date), log.content)
            }
            _ => format!("No day log for {}", format_date(date)),
        }))
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Query
    }

    fn date_dependent(&self) -> bool {
        true
    }
}

pub struct ListTasksInPeriod;

#[async_trait]
impl ActionHandler for ListTasksInPeriod {
    fn name(&self) -> &str {
        "list_tasks_in_period"
    }

    fn description(&self) -> &str {
        "List custom tasks and routine steps between two dates (inclusive). \
         Use calc_week_range first for questions like 'next week'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "start_date": { "type": "string", "format": "date", "description": "YYYY-MM-DD, defaults to today_date" },
                "end_date": { "type": "string", "format": "date", "description": "YYYY-MM-DD, defaults to today_date" }
            }
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let start = match ctx.date_param(action, "start_date") {
            Ok(date) => date,
            Err(reason) => return Ok(ActionOutput::Error(reason)),
        };
        let end = match ctx.date_param(action, "end_date") {
            Ok(date) => date,
            Err(reason) => return Ok(ActionOutput::Error(reason)),
        };
        if start > end {
            return Ok(ActionOutput::Error(format!(
                "start_date {} is after end_date {}",
                format_date(start),
                format_date(end)
            )));
        }
        if (end - start).num_days() >= MAX_PERIOD_DAYS {
            return Ok(ActionOutput::Error(format!(
                "period is too long; query at most {} days at a time",
                MAX_PERIOD_DAYS
            )));
        }

        let lines = ctx.store.read(|store| {
            let mut lines: Vec<String> = store
                .custom_tasks_between(start, end)?
                .into_iter()
                .map(|task| {
                    format!(
                        "custom task [{}] {} {} - {} ({}) (memo: {})",
                        task.id,
                        format_date(task.date),
                        task.time,
                        task.name,
                        done_label(task.done),
                        memo_or_none(&task.memo)
                    )
                })
                .collect();

            let mut day = start;
            while day <= end {
                lines.extend(routine_step_lines(store, day)?);
                day += Duration::days(1);
            }
            Ok(lines)
        })?;

        let range = format!("{} to {}", format_date(start), format_date(end));
        Ok(ActionOutput::Text(if lines.is_empty() {
            format!("No tasks found from {}", range)
        } else {
            format!("Tasks from {}:\n{}", range, lines.join("\n"))
        }))
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Query
    }

    fn date_dependent(&self) -> bool {
        true
    }
}

pub struct GetDailySummary;

#[async_trait]
impl ActionHandler for GetDailySummary {
    fn name(&self) -> &str {
        "get_daily_summary"
    }

    fn description(&self) -> &str {
        "Summarise one day: its day log, custom tasks and routine steps with completion state."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "format": "date", "description": "YYYY-MM-DD, defaults to today_date" }
            }
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let date = match ctx.date_param(action, "date") {
            Ok(date) => date,
            Err(reason) => return Ok(ActionOutput::Error(reason)),
        };

        let parts = ctx.store.read(|store| {
            let mut parts = Vec::new();
            match store.get_day_log(date)? {
                Some(log) if !log.content.trim().is_empty() => {
                    parts.push(format!("Day log: {}", log.content))
                }
                _ => parts.push("Day log: none".to_string()),
            }

            let tasks = store.custom_tasks_between(date, date)?;
            if tasks.is_empty() {
                parts.push("Custom tasks: none".to_string());
            } else {
                parts.push("Custom tasks:".to_string());
                parts.extend(tasks.iter().map(|task| {
                    format!(
                        "- [{}] {} {} ({}) (memo: {})",
                        task.id,
                        task.time,
                        task.name,
                        done_label(task.done),
                        memo_or_none(&task.memo)
                    )
                }));
            }

            let steps = routine_step_lines(store, date)?;
            if steps.is_empty() {
                parts.push("Routine steps: none".to_string());
            } else {
                parts.push("Routine steps:".to_string());
                parts.extend(steps.into_iter().map(|line| format!("- {}", line)));
            }
            Ok(parts)
        })?;

        Ok(ActionOutput::Text(format!(
            "Summary for {} ({}):\n{}",
            format_date(date),
            weekday_label(weekday_index(date)),
            parts.join("\n")
        )))
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Query
    }

    fn date_dependent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ScheduleDatabase;
    use crate::tools::ActionCatalog;

    async fn seeded() -> (tempfile::TempDir, ActionContext, ActionCatalog) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ScheduleDatabase::new(dir.path().join("q.db")).expect("db"));
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(); // Saturday
        store
            .transaction(|s| {
                let weekend = s.insert_routine("Weekend", "5,6", "")?;
                s.insert_step(weekend, "Laundry", "10:00", "Chores")?;
                let weekday = s.insert_routine("Commute", "0,1,2,3,4", "")?;
                s.insert_step(weekday, "Train", "08:00", "Other")?;
                s.insert_custom_task(today, "Haircut", "15:00", "")?;
                s.upsert_day_log(today, "Quiet morning")?;
                Ok(())
            })
            .expect("seed");
        let ctx = ActionContext { store, today };
        (dir, ctx, ActionCatalog::with_builtin_actions().await)
    }

    #[tokio::test]
    async fn daily_summary_lists_log_tasks_and_weekday_steps() {
        let (_dir, ctx, catalog) = seeded().await;
        let action = catalog.normalize("get_daily_summary", &json!({})).await;
        let text = catalog.apply(&action, &ctx).await.to_llm_string();

        assert!(text.starts_with("Summary for 2026-10-17 (Sat)"));
        assert!(text.contains("Day log: Quiet morning"));
        assert!(text.contains("15:00 Haircut (open)"));
        assert!(text.contains("Weekend - Laundry"));
        assert!(!text.contains("Commute"));
    }

    #[tokio::test]
    async fn period_listing_walks_each_day() {
        let (_dir, ctx, catalog) = seeded().await;
        let action = catalog
            .normalize(
                "list_tasks_in_period",
                &json!({"start_date": "2026-10-17", "end_date": "2026-10-19"}),
            )
            .await;
        let text = catalog.apply(&action, &ctx).await.to_llm_string();

        assert!(text.contains("custom task [1] 2026-10-17 15:00 - Haircut"));
        assert!(text.contains("2026-10-18 10:00 - Weekend - Laundry"));
        assert!(text.contains("2026-10-19 08:00 - Commute - Train"));
    }

    #[tokio::test]
    async fn inverted_period_is_an_error() {
        let (_dir, ctx, catalog) = seeded().await;
        let action = catalog
            .normalize(
                "list_tasks_in_period",
                &json!({"start_date": "2026-10-20", "end_date": "2026-10-17"}),
            )
            .await;
        let output = catalog.apply(&action, &ctx).await;
        assert!(!output.is_success());
        assert!(output.to_llm_string().contains("is after end_date"));
    }

    #[tokio::test]
    async fn missing_day_log_is_reported_plainly() {
        let (_dir, ctx, catalog) = seeded().await;
        let action = catalog
            .normalize("get_day_log", &json!({"date": "2026-10-01"}))
            .await;
        assert_eq!(
            catalog.apply(&action, &ctx).await.to_llm_string(),
            "No day log for 2026-10-01"
        );
    }
}
