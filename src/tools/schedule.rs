//! Mutating actions: custom tasks, routines, steps, step completion and day logs.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::{missing, unchanged, Action, ActionContext, ActionHandler, ActionOutput};
use crate::dates::{format_date, normalize_hhmm};
use crate::schedule::{
    done_label, CompletionRecord, EntityRef, DEFAULT_ROUTINE_DAYS, DEFAULT_STEP_CATEGORY,
    DEFAULT_STEP_TIME,
};

pub fn handlers() -> Vec<Arc<dyn ActionHandler>> {
    vec![
        Arc::new(CreateCustomTask),
        Arc::new(DeleteCustomTask),
        Arc::new(ToggleCustomTask),
        Arc::new(UpdateCustomTaskTime),
        Arc::new(RenameCustomTask),
        Arc::new(UpdateCustomTaskMemo),
        Arc::new(ToggleStep),
        Arc::new(UpdateLog),
        Arc::new(AppendDayLog),
        Arc::new(AddRoutine),
        Arc::new(DeleteRoutine),
        Arc::new(UpdateRoutineDays),
        Arc::new(AddStep),
        Arc::new(DeleteStep),
        Arc::new(UpdateStepTime),
        Arc::new(RenameStep),
        Arc::new(UpdateStepMemo),
    ]
}

fn not_found(kind: &str, key: &str, id: i64) -> ActionOutput {
    ActionOutput::Error(format!("{} {}={} not found", kind, key, id))
}

/// Canonical weekday set: unique values 0..=6, ascending, comma-separated.
pub fn normalize_days(raw: &str) -> Option<String> {
    let mut days = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let day: u32 = part.parse().ok()?;
        if day > 6 {
            return None;
        }
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return None;
    }
    days.sort_unstable();
    Some(
        days.iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(","),
    )
}

// ---------------------------------------------------------------------------
// Custom tasks
// ---------------------------------------------------------------------------

pub struct CreateCustomTask;

#[async_trait]
impl ActionHandler for CreateCustomTask {
    fn name(&self) -> &str {
        "create_custom_task"
    }

    fn description(&self) -> &str {
        "Add a one-off task on a date. Dates other than today_date must come from a calc_* action."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "format": "date", "description": "YYYY-MM-DD, defaults to today_date" },
                "name": { "type": "string", "description": "Task name" },
                "time": { "type": "string", "format": "time", "description": "HH:MM, defaults to 00:00" },
                "memo": { "type": "string", "description": "Optional note" }
            },
            "required": ["name"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let date = match ctx.date_param(action, "date") {
            Ok(date) => date,
            Err(reason) => return Ok(ActionOutput::Error(reason)),
        };
        let Some(name) = action.text("name") else {
            return Ok(missing("name"));
        };
        let time = action
            .text("time")
            .and_then(normalize_hhmm)
            .unwrap_or_else(|| DEFAULT_STEP_TIME.to_string());
        let memo = action.text("memo").unwrap_or_default();

        let id = ctx
            .store
            .transaction(|store| store.insert_custom_task(date, name, &time, memo))?;
        Ok(ActionOutput::changed(
            format!(
                "Added task '{}' on {} at {} (id={})",
                name,
                format_date(date),
                time,
                id
            ),
            vec![EntityRef::CustomTask(id)],
        ))
    }

    fn date_dependent(&self) -> bool {
        true
    }
}

pub struct DeleteCustomTask;

#[async_trait]
impl ActionHandler for DeleteCustomTask {
    fn name(&self) -> &str {
        "delete_custom_task"
    }

    fn description(&self) -> &str {
        "Delete a one-off task by id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "integer", "description": "Custom task id" }
            },
            "required": ["task_id"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(task_id) = action.int("task_id") else {
            return Ok(missing("task_id"));
        };
        ctx.store.transaction(|store| {
            let Some(task) = store.get_custom_task(task_id)? else {
                return Ok(not_found("custom task", "task_id", task_id));
            };
            store.delete_custom_task(task_id)?;
            Ok(ActionOutput::changed(
                format!(
                    "Deleted task '{}' on {} (id={})",
                    task.name,
                    format_date(task.date),
                    task_id
                ),
                vec![EntityRef::CustomTask(task_id)],
            ))
        })
    }
}

pub struct ToggleCustomTask;

#[async_trait]
impl ActionHandler for ToggleCustomTask {
    fn name(&self) -> &str {
        "toggle_custom_task"
    }

    fn description(&self) -> &str {
        "Mark a one-off task done or not done, optionally updating its memo."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "integer", "description": "Custom task id" },
                "done": { "type": "boolean", "description": "Defaults to true" },
                "memo": { "type": "string", "description": "Optional memo replacing the current one" }
            },
            "required": ["task_id"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(task_id) = action.int("task_id") else {
            return Ok(missing("task_id"));
        };
        let done = action.flag("done").unwrap_or(true);
        let memo = action.text("memo");

        ctx.store.transaction(|store| {
            let Some(task) = store.get_custom_task(task_id)? else {
                return Ok(not_found("custom task", "task_id", task_id));
            };
            if task.done == done && memo.map_or(true, |m| m == task.memo) {
                return Ok(unchanged(&format!("Task '{}'", task.name)));
            }
            store.set_custom_task_done(task_id, done, memo)?;
            Ok(ActionOutput::changed(
                format!("Marked task '{}' as {}", task.name, done_label(done)),
                vec![EntityRef::CustomTask(task_id)],
            ))
        })
    }
}

pub struct UpdateCustomTaskTime;

#[async_trait]
impl ActionHandler for UpdateCustomTaskTime {
    fn name(&self) -> &str {
        "update_custom_task_time"
    }

    fn description(&self) -> &str {
        "Change the time of a one-off task."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "integer", "description": "Custom task id" },
                "new_time": { "type": "string", "format": "time", "description": "HH:MM" }
            },
            "required": ["task_id", "new_time"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(task_id) = action.int("task_id") else {
            return Ok(missing("task_id"));
        };
        let Some(new_time) = action.text("new_time").and_then(normalize_hhmm) else {
            return Ok(missing("new_time"));
        };

        ctx.store.transaction(|store| {
            let Some(task) = store.get_custom_task(task_id)? else {
                return Ok(not_found("custom task", "task_id", task_id));
            };
            if task.time == new_time {
                return Ok(unchanged(&format!("Task '{}'", task.name)));
            }
            store.set_custom_task_time(task_id, &new_time)?;
            Ok(ActionOutput::changed(
                format!(
                    "Moved task '{}' from {} to {}",
                    task.name, task.time, new_time
                ),
                vec![EntityRef::CustomTask(task_id)],
            ))
        })
    }
}

pub struct RenameCustomTask;

#[async_trait]
impl ActionHandler for RenameCustomTask {
    fn name(&self) -> &str {
        "rename_custom_task"
    }

    fn description(&self) -> &str {
        "Rename a one-off task."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "integer", "description": "Custom task id" },
                "new_name": { "type": "string", "description": "New task name" }
            },
            "required": ["task_id", "new_name"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(task_id) = action.int("task_id") else {
            return Ok(missing("task_id"));
        };
        let Some(new_name) = action.text("new_name") else {
            return Ok(missing("new_name"));
        };

        ctx.store.transaction(|store| {
            let Some(task) = store.get_custom_task(task_id)? else {
                return Ok(not_found("custom task", "task_id", task_id));
            };
            if task.name == new_name {
                return Ok(unchanged(&format!("Task '{}'", task.name)));
            }
            store.set_custom_task_name(task_id, new_name)?;
            Ok(ActionOutput::changed(
                format!("Renamed task '{}' to '{}'", task.name, new_name),
                vec![EntityRef::CustomTask(task_id)],
            ))
        })
    }
}

pub struct UpdateCustomTaskMemo;

#[async_trait]
impl ActionHandler for UpdateCustomTaskMemo {
    fn name(&self) -> &str {
        "update_custom_task_memo"
    }

    fn description(&self) -> &str {
        "Replace the memo of a one-off task. Omit new_memo to clear it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "integer", "description": "Custom task id" },
                "new_memo": { "type": "string", "description": "New memo text" }
            },
            "required": ["task_id"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(task_id) = action.int("task_id") else {
            return Ok(missing("task_id"));
        };
        let new_memo = action.text("new_memo").unwrap_or_default();

        ctx.store.transaction(|store| {
            let Some(task) = store.get_custom_task(task_id)? else {
                return Ok(not_found("custom task", "task_id", task_id));
            };
            if task.memo == new_memo {
                return Ok(unchanged(&format!("Memo of task '{}'", task.name)));
            }
            store.set_custom_task_memo(task_id, new_memo)?;
            Ok(ActionOutput::changed(
                format!("Updated the memo of task '{}'", task.name),
                vec![EntityRef::CustomTask(task_id)],
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Step completion and day logs
// ---------------------------------------------------------------------------

pub struct ToggleStep;

#[async_trait]
impl ActionHandler for ToggleStep {
    fn name(&self) -> &str {
        "toggle_step"
    }

    fn description(&self) -> &str {
        "Record whether a routine step was completed on a date (defaults to today_date)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "step_id": { "type": "integer", "description": "Routine step id" },
                "date": { "type": "string", "format": "date", "description": "YYYY-MM-DD, defaults to today_date" },
                "done": { "type": "boolean", "description": "Defaults to true" },
                "memo": { "type": "string", "description": "Optional memo for that day" }
            },
            "required": ["step_id"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(step_id) = action.int("step_id") else {
            return Ok(missing("step_id"));
        };
        let date = match ctx.date_param(action, "date") {
            Ok(date) => date,
            Err(reason) => return Ok(ActionOutput::Error(reason)),
        };
        let done = action.flag("done").unwrap_or(true);
        let memo = action.text("memo");

        ctx.store.transaction(|store| {
            let Some(step) = store.get_step(step_id)? else {
                return Ok(not_found("step", "step_id", step_id));
            };
            let existing = store.get_completion(date, step_id)?;
            let record = CompletionRecord {
                date,
                step_id,
                done,
                memo: memo
                    .map(str::to_string)
                    .or_else(|| existing.as_ref().map(|r| r.memo.clone()))
                    .unwrap_or_default(),
            };
            if existing.as_ref() == Some(&record) {
                return Ok(unchanged(&format!("Step '{}'", step.name)));
            }
            store.upsert_completion(&record)?;
            Ok(ActionOutput::changed(
                format!(
                    "Marked step '{}' as {} on {}",
                    step.name,
                    done_label(done),
                    format_date(date)
                ),
                vec![EntityRef::Completion { step_id, date }],
            ))
        })
    }

    fn date_dependent(&self) -> bool {
        true
    }
}

pub struct UpdateLog;

#[async_trait]
impl ActionHandler for UpdateLog {
    fn name(&self) -> &str {
        "update_log"
    }

    fn description(&self) -> &str {
        "Overwrite the day log (journal) for a date, defaulting to today_date."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "format": "date", "description": "YYYY-MM-DD, defaults to today_date" },
                "content": { "type": "string", "description": "Full log text" }
            },
            "required": ["content"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let date = match ctx.date_param(action, "date") {
            Ok(date) => date,
            Err(reason) => return Ok(ActionOutput::Error(reason)),
        };
        let Some(content) = action.text("content") else {
            return Ok(missing("content"));
        };

        ctx.store.transaction(|store| {
            if store
                .get_day_log(date)?
                .is_some_and(|log| log.content == content)
            {
                return Ok(unchanged(&format!("Day log for {}", format_date(date))));
            }
            store.upsert_day_log(date, content)?;
            Ok(ActionOutput::changed(
                format!("Saved the day log for {}", format_date(date)),
                vec![EntityRef::DayLog(date)],
            ))
        })
    }

    fn date_dependent(&self) -> bool {
        true
    }
}

pub struct AppendDayLog;

#[async_trait]
impl ActionHandler for AppendDayLog {
    fn name(&self) -> &str {
        "append_day_log"
    }

    fn description(&self) -> &str {
        "Append a line to the day log for a date, keeping existing content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "format": "date", "description": "YYYY-MM-DD, defaults to today_date" },
                "content": { "type": "string", "description": "Text to append" }
            },
            "required": ["content"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let date = match ctx.date_param(action, "date") {
            Ok(date) => date,
            Err(reason) => return Ok(ActionOutput::Error(reason)),
        };
        let Some(content) = action.text("content") else {
            return Ok(missing("content"));
        };

        ctx.store.transaction(|store| {
            let combined = match store.get_day_log(date)? {
                Some(log) if !log.content.trim().is_empty() => {
                    format!("{}\n{}", log.content.trim_end(), content)
                }
                _ => content.to_string(),
            };
            store.upsert_day_log(date, &combined)?;
            Ok(ActionOutput::changed(
                format!("Appended to the day log for {}", format_date(date)),
                vec![EntityRef::DayLog(date)],
            ))
        })
    }

    fn date_dependent(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Routines
// ---------------------------------------------------------------------------

pub struct AddRoutine;

#[async_trait]
impl ActionHandler for AddRoutine {
    fn name(&self) -> &str {
        "add_routine"
    }

    fn description(&self) -> &str {
        "Create a recurring routine active on a weekday set (0=Mon .. 6=Sun)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Routine name" },
                "days": { "type": "string", "description": "Comma-separated weekdays, defaults to 0,1,2,3,4" },
                "description": { "type": "string", "description": "Optional description" }
            },
            "required": ["name"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(name) = action.text("name") else {
            return Ok(missing("name"));
        };
        let days = match action.text("days") {
            None => DEFAULT_ROUTINE_DAYS.to_string(),
            Some(raw) => match normalize_days(raw) {
                Some(days) => days,
                None => {
                    return Ok(ActionOutput::Error(format!(
                        "days must be comma-separated weekdays 0-6, got '{}'",
                        raw
                    )))
                }
            },
        };
        let description = action.text("description").unwrap_or_default();

        let id = ctx
            .store
            .transaction(|store| store.insert_routine(name, &days, description))?;
        Ok(ActionOutput::changed(
            format!("Added routine '{}' on days {} (id={})", name, days, id),
            vec![EntityRef::Routine(id)],
        ))
    }
}

pub struct DeleteRoutine;

#[async_trait]
impl ActionHandler for DeleteRoutine {
    fn name(&self) -> &str {
        "delete_routine"
    }

    fn description(&self) -> &str {
        "Delete a routine together with its steps."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "routine_id": { "type": "integer", "description": "Routine id" }
            },
            "required": ["routine_id"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(routine_id) = action.int("routine_id") else {
            return Ok(missing("routine_id"));
        };

        ctx.store.transaction(|store| {
            let Some(routine) = store.get_routine(routine_id)? else {
                return Ok(not_found("routine", "routine_id", routine_id));
            };
            let steps = store.steps_for_routine(routine_id)?;
            store.delete_routine(routine_id)?;

            let mut modified = vec![EntityRef::Routine(routine_id)];
            modified.extend(steps.iter().map(|step| EntityRef::Step(step.id)));
            Ok(ActionOutput::changed(
                format!(
                    "Deleted routine '{}' and its {} step(s)",
                    routine.name,
                    steps.len()
                ),
                modified,
            ))
        })
    }
}

pub struct UpdateRoutineDays;

#[async_trait]
impl ActionHandler for UpdateRoutineDays {
    fn name(&self) -> &str {
        "update_routine_days"
    }

    fn description(&self) -> &str {
        "Change which weekdays a routine runs on (0=Mon .. 6=Sun)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "routine_id": { "type": "integer", "description": "Routine id" },
                "new_days": { "type": "string", "description": "Comma-separated weekdays, e.g. 0,2,4" }
            },
            "required": ["routine_id", "new_days"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(routine_id) = action.int("routine_id") else {
            return Ok(missing("routine_id"));
        };
        let Some(raw_days) = action.text("new_days") else {
            return Ok(missing("new_days"));
        };
        let Some(days) = normalize_days(raw_days) else {
            return Ok(ActionOutput::Error(format!(
                "new_days must be comma-separated weekdays 0-6, got '{}'",
                raw_days
            )));
        };

        ctx.store.transaction(|store| {
            let Some(routine) = store.get_routine(routine_id)? else {
                return Ok(not_found("routine", "routine_id", routine_id));
            };
            if routine.days == days {
                return Ok(unchanged(&format!("Routine '{}'", routine.name)));
            }
            store.set_routine_days(routine_id, &days)?;
            Ok(ActionOutput::changed(
                format!(
                    "Routine '{}' now runs on days {} (was {})",
                    routine.name, days, routine.days
                ),
                vec![EntityRef::Routine(routine_id)],
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

pub struct AddStep;

#[async_trait]
impl ActionHandler for AddStep {
    fn name(&self) -> &str {
        "add_step"
    }

    fn description(&self) -> &str {
        "Add a step to a routine."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "routine_id": { "type": "integer", "description": "Routine id" },
                "name": { "type": "string", "description": "Step name" },
                "time": { "type": "string", "format": "time", "description": "HH:MM, defaults to 00:00" },
                "category": { "type": "string", "description": "Category label, defaults to Other" }
            },
            "required": ["routine_id", "name"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(routine_id) = action.int("routine_id") else {
            return Ok(missing("routine_id"));
        };
        let Some(name) = action.text("name") else {
            return Ok(missing("name"));
        };
        let time = action
            .text("time")
            .and_then(normalize_hhmm)
            .unwrap_or_else(|| DEFAULT_STEP_TIME.to_string());
        let category = action.text("category").unwrap_or(DEFAULT_STEP_CATEGORY);

        ctx.store.transaction(|store| {
            let Some(routine) = store.get_routine(routine_id)? else {
                return Ok(not_found("routine", "routine_id", routine_id));
            };
            let id = store.insert_step(routine_id, name, &time, category)?;
            Ok(ActionOutput::changed(
                format!(
                    "Added step '{}' at {} to routine '{}' (id={})",
                    name, time, routine.name, id
                ),
                vec![EntityRef::Step(id)],
            ))
        })
    }
}

pub struct DeleteStep;

#[async_trait]
impl ActionHandler for DeleteStep {
    fn name(&self) -> &str {
        "delete_step"
    }

    fn description(&self) -> &str {
        "Delete a routine step."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "step_id": { "type": "integer", "description": "Routine step id" }
            },
            "required": ["step_id"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(step_id) = action.int("step_id") else {
            return Ok(missing("step_id"));
        };

        ctx.store.transaction(|store| {
            let Some(step) = store.get_step(step_id)? else {
                return Ok(not_found("step", "step_id", step_id));
            };
            store.delete_step(step_id)?;
            Ok(ActionOutput::changed(
                format!("Deleted step '{}'", step.name),
                vec![EntityRef::Step(step_id)],
            ))
        })
    }
}

pub struct UpdateStepTime;

#[async_trait]
impl ActionHandler for UpdateStepTime {
    fn name(&self) -> &str {
        "update_step_time"
    }

    fn description(&self) -> &str {
        "Change the time of a routine step."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "step_id": { "type": "integer", "description": "Routine step id" },
                "new_time": { "type": "string", "format": "time", "description": "HH:MM" }
            },
            "required": ["step_id", "new_time"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(step_id) = action.int("step_id") else {
            return Ok(missing("step_id"));
        };
        let Some(new_time) = action.text("new_time").and_then(normalize_hhmm) else {
            return Ok(missing("new_time"));
        };

        ctx.store.transaction(|store| {
            let Some(step) = store.get_step(step_id)? else {
                return Ok(not_found("step", "step_id", step_id));
            };
            if step.time == new_time {
                return Ok(unchanged(&format!("Step '{}'", step.name)));
            }
            store.set_step_time(step_id, &new_time)?;
            Ok(ActionOutput::changed(
                format!("Moved step '{}' from {} to {}", step.name, step.time, new_time),
                vec![EntityRef::Step(step_id)],
            ))
        })
    }
}

pub struct RenameStep;

#[async_trait]
impl ActionHandler for RenameStep {
    fn name(&self) -> &str {
        "rename_step"
    }

    fn description(&self) -> &str {
        "Rename a routine step."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "step_id": { "type": "integer", "description": "Routine step id" },
                "new_name": { "type": "string", "description": "New step name" }
            },
            "required": ["step_id", "new_name"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(step_id) = action.int("step_id") else {
            return Ok(missing("step_id"));
        };
        let Some(new_name) = action.text("new_name") else {
            return Ok(missing("new_name"));
        };

        ctx.store.transaction(|store| {
            let Some(step) = store.get_step(step_id)? else {
                return Ok(not_found("step", "step_id", step_id));
            };
            if step.name == new_name {
                return Ok(unchanged(&format!("Step '{}'", step.name)));
            }
            store.set_step_name(step_id, new_name)?;
            Ok(ActionOutput::changed(
                format!("Renamed step '{}' to '{}'", step.name, new_name),
                vec![EntityRef::Step(step_id)],
            ))
        })
    }
}

pub struct UpdateStepMemo;

#[async_trait]
impl ActionHandler for UpdateStepMemo {
    fn name(&self) -> &str {
        "update_step_memo"
    }

    fn description(&self) -> &str {
        "Replace the standing memo of a routine step. Omit new_memo to clear it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "step_id": { "type": "integer", "description": "Routine step id" },
                "new_memo": { "type": "string", "description": "New memo text" }
            },
            "required": ["step_id"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(step_id) = action.int("step_id") else {
            return Ok(missing("step_id"));
        };
        let new_memo = action.text("new_memo").unwrap_or_default();

        ctx.store.transaction(|store| {
            let Some(step) = store.get_step(step_id)? else {
                return Ok(not_found("step", "step_id", step_id));
            };
            if step.memo == new_memo {
                return Ok(unchanged(&format!("Memo of step '{}'", step.name)));
            }
            store.set_step_memo(step_id, new_memo)?;
            Ok(ActionOutput::changed(
                format!("Updated the memo of step '{}'", step.name),
                vec![EntityRef::Step(step_id)],
            ))
        })
    }
}
