//! Date calculation actions.
//!
//! The model resolves relative expressions ("tomorrow", "the last Friday of
//! next month") by chaining these, then passes the resulting ISO dates to the
//! schedule actions. They never touch the store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;

use super::{missing, Action, ActionCategory, ActionContext, ActionHandler, ActionOutput};
use crate::dates::{
    date_offset, format_date, month_boundary, nearest_weekday, parse_iso_date, time_offset,
    week_bounds, week_weekday, weekday_index, MonthBoundary, SearchDirection,
};
use crate::schedule::weekday_label;

pub fn handlers() -> Vec<Arc<dyn ActionHandler>> {
    vec![
        Arc::new(CalcDateOffset),
        Arc::new(CalcMonthBoundary),
        Arc::new(CalcNearestWeekday),
        Arc::new(CalcWeekWeekday),
        Arc::new(CalcWeekRange),
        Arc::new(CalcTimeOffset),
        Arc::new(GetDateInfo),
    ]
}

fn describe(date: NaiveDate) -> String {
    let weekday = weekday_index(date);
    format!(
        "date={} weekday={}({})",
        format_date(date),
        weekday_label(weekday),
        weekday
    )
}

fn base_date(action: &Action, key: &str) -> Option<NaiveDate> {
    action.text(key).and_then(parse_iso_date)
}

fn out_of_range(what: &str) -> ActionOutput {
    ActionOutput::Error(format!("{} is out of range", what))
}

fn weekday_property() -> serde_json::Value {
    json!({ "type": "integer", "description": "0=Mon, 1=Tue, 2=Wed, 3=Thu, 4=Fri, 5=Sat, 6=Sun" })
}

pub struct CalcDateOffset;

#[async_trait]
impl ActionHandler for CalcDateOffset {
    fn name(&self) -> &str {
        "calc_date_offset"
    }

    fn description(&self) -> &str {
        "Date N days after (positive) or before (negative) a base date. Tomorrow is +1, yesterday -1."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "base_date": { "type": "string", "format": "date", "description": "YYYY-MM-DD, usually today_date" },
                "offset_days": { "type": "integer", "description": "Day offset" }
            },
            "required": ["base_date", "offset_days"]
        })
    }

    async fn apply(&self, action: &Action, _ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(base) = base_date(action, "base_date") else {
            return Ok(missing("base_date"));
        };
        let Some(offset) = action.int("offset_days") else {
            return Ok(missing("offset_days"));
        };
        Ok(match date_offset(base, offset) {
            Some(date) => ActionOutput::Text(format!(
                "calc_date_offset({}, {:+}) => {}",
                format_date(base),
                offset,
                describe(date)
            )),
            None => out_of_range("offset_days"),
        })
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Calculation
    }
}

pub struct CalcMonthBoundary;

#[async_trait]
impl ActionHandler for CalcMonthBoundary {
    fn name(&self) -> &str {
        "calc_month_boundary"
    }

    fn description(&self) -> &str {
        "First (start) or last (end) day of a given month."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "year": { "type": "integer", "description": "e.g. 2026" },
                "month": { "type": "integer", "description": "1-12" },
                "boundary": { "type": "string", "enum": ["start", "end"] }
            },
            "required": ["year", "month", "boundary"]
        })
    }

    async fn apply(&self, action: &Action, _ctx: &ActionContext) -> Result<ActionOutput> {
        let (Some(year), Some(month)) = (action.int("year"), action.int("month")) else {
            return Ok(missing("year/month"));
        };
        let Some(boundary) = action.text("boundary").and_then(MonthBoundary::parse) else {
            return Ok(missing("boundary"));
        };
        let date = i32::try_from(year)
            .ok()
            .zip(u32::try_from(month).ok())
            .and_then(|(y, m)| month_boundary(y, m, boundary));
        Ok(match date {
            Some(date) => ActionOutput::Text(format!(
                "calc_month_boundary({}, {}, {}) => {}",
                year,
                month,
                if boundary == MonthBoundary::Start {
                    "start"
                } else {
                    "end"
                },
                describe(date)
            )),
            None => out_of_range("year/month"),
        })
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Calculation
    }
}

pub struct CalcNearestWeekday;

#[async_trait]
impl ActionHandler for CalcNearestWeekday {
    fn name(&self) -> &str {
        "calc_nearest_weekday"
    }

    fn description(&self) -> &str {
        "Nearest date on a weekday searching forward or backward from a base date. \
         The base date itself counts if it matches."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "base_date": { "type": "string", "format": "date", "description": "YYYY-MM-DD" },
                "weekday": weekday_property(),
                "direction": { "type": "string", "enum": ["forward", "backward"] }
            },
            "required": ["base_date", "weekday", "direction"]
        })
    }

    async fn apply(&self, action: &Action, _ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(base) = base_date(action, "base_date") else {
            return Ok(missing("base_date"));
        };
        let Some(weekday) = action.int("weekday") else {
            return Ok(missing("weekday"));
        };
        let Some(direction) = action.text("direction").and_then(SearchDirection::parse) else {
            return Ok(missing("direction"));
        };
        let date = u32::try_from(weekday)
            .ok()
            .and_then(|w| nearest_weekday(base, w, direction));
        Ok(match date {
            Some(date) => ActionOutput::Text(format!(
                "calc_nearest_weekday({}, {}, {:?}) => {}",
                format_date(base),
                weekday,
                direction,
                describe(date)
            )),
            None => out_of_range("week_offset/weekday"),
        })
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Calculation
    }
}

pub struct CalcWeekWeekday;

#[async_trait]
impl ActionHandler for CalcWeekWeekday {
    fn name(&self) -> &str {
        "calc_week_weekday"
    }

    fn description(&self) -> &str {
        "A weekday N weeks from the base date's week. Next Tuesday is week_offset=1, weekday=1."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "base_date": { "type": "string", "format": "date", "description": "YYYY-MM-DD" },
                "week_offset": { "type": "integer", "description": "0=this week, 1=next week, -1=last week" },
                "weekday": weekday_property()
            },
            "required": ["base_date", "week_offset", "weekday"]
        })
    }

    async fn apply(&self, action: &Action, _ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(base) = base_date(action, "base_date") else {
            return Ok(missing("base_date"));
        };
        let (Some(week_offset), Some(weekday)) = (action.int("week_offset"), action.int("weekday"))
        else {
            return Ok(missing("week_offset/weekday"));
        };
        let date = u32::try_from(weekday)
            .ok()
            .and_then(|w| week_weekday(base, week_offset, w));
        Ok(match date {
            Some(date) => ActionOutput::Text(format!(
                "calc_week_weekday({}, {:+}, {}) => {}",
                format_date(base),
                week_offset,
                weekday,
                describe(date)
            )),
            None => out_of_range("week_offset/weekday"),
        })
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Calculation
    }
}

pub struct CalcWeekRange;

#[async_trait]
impl ActionHandler for CalcWeekRange {
    fn name(&self) -> &str {
        "calc_week_range"
    }

    fn description(&self) -> &str {
        "Monday to Sunday range of the week containing the base date."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "base_date": { "type": "string", "format": "date", "description": "Any day of the target week" }
            },
            "required": ["base_date"]
        })
    }

    async fn apply(&self, action: &Action, _ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(base) = base_date(action, "base_date") else {
            return Ok(missing("base_date"));
        };
        let (start, end) = week_bounds(base);
        Ok(ActionOutput::Text(format!(
            "calc_week_range({}) => period_start={} period_end={}",
            format_date(base),
            format_date(start),
            format_date(end)
        )))
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Calculation
    }
}

pub struct CalcTimeOffset;

#[async_trait]
impl ActionHandler for CalcTimeOffset {
    fn name(&self) -> &str {
        "calc_time_offset"
    }

    fn description(&self) -> &str {
        "Add or subtract minutes from a date and time, rolling over midnight. Two hours later is +120."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "base_date": { "type": "string", "format": "date", "description": "YYYY-MM-DD" },
                "base_time": { "type": "string", "format": "time", "description": "HH:MM" },
                "offset_minutes": { "type": "integer", "description": "Minute offset" }
            },
            "required": ["base_date", "base_time", "offset_minutes"]
        })
    }

    async fn apply(&self, action: &Action, _ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(base) = base_date(action, "base_date") else {
            return Ok(missing("base_date"));
        };
        let Some(base_time) = action.text("base_time") else {
            return Ok(missing("base_time"));
        };
        let Some(offset) = action.int("offset_minutes") else {
            return Ok(missing("offset_minutes"));
        };
        Ok(match time_offset(base, base_time, offset) {
            Some(shifted) => ActionOutput::Text(format!(
                "calc_time_offset({} {}, {:+}) => {} time={}",
                format_date(base),
                base_time,
                offset,
                describe(shifted.date()),
                shifted.format("%H:%M")
            )),
            None => out_of_range("offset_minutes"),
        })
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Calculation
    }
}

pub struct GetDateInfo;

#[async_trait]
impl ActionHandler for GetDateInfo {
    fn name(&self) -> &str {
        "get_date_info"
    }

    fn description(&self) -> &str {
        "Weekday and week range of a date, for checking a calculation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "format": "date", "description": "YYYY-MM-DD" }
            },
            "required": ["date"]
        })
    }

    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput> {
        let Some(date) = base_date(action, "date") else {
            return Ok(missing("date"));
        };
        let (start, end) = week_bounds(date);
        let days_from_today = (date - ctx.today).num_days();
        Ok(ActionOutput::Text(format!(
            "get_date_info({}) => {} week={}..{} days_from_today={:+}",
            format_date(date),
            describe(date),
            format_date(start),
            format_date(end),
            days_from_today
        )))
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Calculation
    }
}
