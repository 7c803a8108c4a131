//! Schedule entities as stored in the database and shown to the model.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_ROUTINE_DAYS: &str = "0,1,2,3,4";
pub const DEFAULT_STEP_TIME: &str = "00:00";
pub const DEFAULT_STEP_CATEGORY: &str = "Other";

/// A recurring routine, active on a comma-separated weekday set (0=Mon .. 6=Sun).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    pub id: i64,
    pub name: String,
    pub days: String,
    pub description: String,
}

impl Routine {
    pub fn runs_on(&self, weekday: u32) -> bool {
        self.days
            .split(',')
            .filter_map(|d| d.trim().parse::<u32>().ok())
            .any(|d| d == weekday)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: i64,
    pub routine_id: i64,
    pub name: String,
    pub time: String,
    pub category: String,
    pub memo: String,
}

/// Completion state of one routine step on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub date: NaiveDate,
    pub step_id: i64,
    pub done: bool,
    pub memo: String,
}

/// A one-off task pinned to a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTask {
    pub id: i64,
    pub date: NaiveDate,
    pub name: String,
    pub time: String,
    pub done: bool,
    pub memo: String,
}

/// Free-text journal for a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayLog {
    pub date: NaiveDate,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct RoutineWithSteps {
    pub routine: Routine,
    pub steps: Vec<Step>,
}

/// Stable identifier of a schedule entity, rendered as `kind:key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Routine(i64),
    Step(i64),
    CustomTask(i64),
    DayLog(NaiveDate),
    Completion { step_id: i64, date: NaiveDate },
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Routine(id) => write!(f, "routine:{}", id),
            EntityRef::Step(id) => write!(f, "step:{}", id),
            EntityRef::CustomTask(id) => write!(f, "custom_task:{}", id),
            EntityRef::DayLog(date) => write!(f, "day_log:{}", date.format("%Y-%m-%d")),
            EntityRef::Completion { step_id, date } => {
                write!(f, "completion:{}@{}", step_id, date.format("%Y-%m-%d"))
            }
        }
    }
}

pub fn weekday_label(weekday: u32) -> &'static str {
    match weekday {
        0 => "Mon",
        1 => "Tue",
        2 => "Wed",
        3 => "Thu",
        4 => "Fri",
        5 => "Sat",
        _ => "Sun",
    }
}

pub fn done_label(done: bool) -> &'static str {
    if done {
        "done"
    } else {
        "open"
    }
}

pub fn memo_or_none(memo: &str) -> &str {
    if memo.trim().is_empty() {
        "none"
    } else {
        memo
    }
}
