//! Calendar helpers shared by the date-calculation actions and the schedule handlers.
//!
//! Dates crossing the model boundary are always ISO `YYYY-MM-DD`; anything
//! relative ("tomorrow", "来週", "friday") must be resolved through a
//! calculation action first.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

const RELATIVE_TOKENS: &[&str] = &[
    "今日", "本日", "明日", "明後日", "昨日", "一昨日", "来週", "再来週", "先週", "今週", "次の",
    "今度の", "きょう", "あした", "あさって", "きのう", "おととい",
];

const RELATIVE_WORDS_EN: &[&str] = &[
    "today",
    "tomorrow",
    "yesterday",
    "tonight",
    "next week",
    "last week",
    "this week",
    "next month",
    "last month",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthBoundary {
    Start,
    End,
}

impl MonthBoundary {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

impl SearchDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "forward" => Some(Self::Forward),
            "backward" => Some(Self::Backward),
            _ => None,
        }
    }
}

/// Strict `YYYY-MM-DD` parsing.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// 0 = Monday .. 6 = Sunday
pub fn weekday_index(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_monday()
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Normalise a clock time to zero-padded `HH:MM`.
///
/// Accepts `9:05`, `09 : 05`, `9時`, `9時30分`, and the words 正午 / 深夜.
pub fn normalize_hhmm(value: &str) -> Option<String> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(re) = regex_lite::Regex::new(r"^([01]?\d|2[0-3])\s*:\s*([0-5]\d)$") {
        if let Some(caps) = re.captures(text) {
            let hour: u32 = caps[1].parse().ok()?;
            let minute: u32 = caps[2].parse().ok()?;
            return Some(format!("{:02}:{:02}", hour, minute));
        }
    }

    if let Ok(re) = regex_lite::Regex::new(r"^([01]?\d|2[0-3])\s*時(?:\s*([0-5]?\d)\s*分?)?$") {
        if let Some(caps) = re.captures(text) {
            let hour: u32 = caps[1].parse().ok()?;
            let minute: u32 = caps
                .get(2)
                .map(|m| m.as_str().parse().unwrap_or(0))
                .unwrap_or(0);
            return Some(format!("{:02}:{:02}", hour, minute));
        }
    }

    match text {
        "正午" => Some("12:00".to_string()),
        "深夜" | "真夜中" => Some("00:00".to_string()),
        _ => None,
    }
}

/// True when the text names a date relative to "now" instead of an absolute day.
pub fn is_relative_datetime_text(value: &str) -> bool {
    let text = value.trim();
    if text.is_empty() {
        return false;
    }

    if RELATIVE_TOKENS.iter().any(|token| text.contains(token)) {
        return true;
    }

    let lower = text.to_lowercase();
    if RELATIVE_WORDS_EN.iter().any(|word| lower.contains(word)) {
        return true;
    }

    let patterns = [
        r"\d+\s*(日|週|週間|時間|分)\s*(後|前|まえ)",
        r"(月|火|水|木|金|土|日)曜",
        r"\b(mon(day)?|tue(sday)?|wed(nesday)?|thu(rsday)?|fri(day)?|sat(urday)?|sun(day)?)\b",
        r"\b(in\s+\d+\s+(day|week|hour|minute)s?|\d+\s+(day|week|hour|minute)s?\s+(ago|later))\b",
    ];
    patterns.iter().any(|pattern| {
        regex_lite::Regex::new(pattern)
            .map(|re| re.is_match(&lower))
            .unwrap_or(false)
    })
}

/// Monday and Sunday of the week containing `anchor`.
pub fn week_bounds(anchor: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = anchor - Duration::days(weekday_index(anchor) as i64);
    (monday, monday + Duration::days(6))
}

pub fn date_offset(base: NaiveDate, offset_days: i64) -> Option<NaiveDate> {
    base.checked_add_signed(Duration::try_days(offset_days)?)
}

pub fn month_boundary(year: i32, month: u32, boundary: MonthBoundary) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    match boundary {
        MonthBoundary::Start => Some(first),
        MonthBoundary::End => {
            let (next_year, next_month) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
            NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
        }
    }
}

/// Nearest date with the given weekday, counting `base` itself as a match.
pub fn nearest_weekday(
    base: NaiveDate,
    weekday: u32,
    direction: SearchDirection,
) -> Option<NaiveDate> {
    if weekday > 6 {
        return None;
    }
    let current = weekday_index(base) as i64;
    let target = weekday as i64;
    let delta = match direction {
        SearchDirection::Forward => (target - current).rem_euclid(7),
        SearchDirection::Backward => -((current - target).rem_euclid(7)),
    };
    date_offset(base, delta)
}

/// The given weekday of the week `week_offset` weeks away from `base`'s week.
pub fn week_weekday(base: NaiveDate, week_offset: i64, weekday: u32) -> Option<NaiveDate> {
    if weekday > 6 {
        return None;
    }
    let (monday, _) = week_bounds(base);
    date_offset(
        monday,
        week_offset.checked_mul(7)?.checked_add(weekday as i64)?,
    )
}

pub fn time_offset(base: NaiveDate, base_time: &str, offset_minutes: i64) -> Option<NaiveDateTime> {
    let hhmm = normalize_hhmm(base_time)?;
    let time = NaiveTime::parse_from_str(&hhmm, "%H:%M").ok()?;
    base.and_time(time)
        .checked_add_signed(Duration::try_minutes(offset_minutes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn normalizes_clock_times() {
        assert_eq!(normalize_hhmm("9:05").as_deref(), Some("09:05"));
        assert_eq!(normalize_hhmm(" 21 : 30 ").as_deref(), Some("21:30"));
        assert_eq!(normalize_hhmm("9時").as_deref(), Some("09:00"));
        assert_eq!(normalize_hhmm("7時15分").as_deref(), Some("07:15"));
        assert_eq!(normalize_hhmm("正午").as_deref(), Some("12:00"));
        assert_eq!(normalize_hhmm("25:00"), None);
        assert_eq!(normalize_hhmm("soon"), None);
    }

    #[test]
    fn detects_relative_expressions() {
        assert!(is_relative_datetime_text("明日"));
        assert!(is_relative_datetime_text("3日後"));
        assert!(is_relative_datetime_text("金曜日"));
        assert!(is_relative_datetime_text("tomorrow"));
        assert!(is_relative_datetime_text("next Friday"));
        assert!(is_relative_datetime_text("in 3 days"));
        assert!(!is_relative_datetime_text("2026-10-18"));
        assert!(!is_relative_datetime_text(""));
    }

    #[test]
    fn strict_iso_dates_only() {
        assert_eq!(parse_iso_date(" 2026-10-17 "), Some(d(2026, 10, 17)));
        assert_eq!(parse_iso_date("2026/10/17"), None);
        assert_eq!(parse_iso_date("2026-02-30"), None);
    }

    #[test]
    fn week_helpers_use_monday_start() {
        // 2026-10-17 is a Saturday
        assert_eq!(weekday_index(d(2026, 10, 17)), 5);
        assert_eq!(week_bounds(d(2026, 10, 17)), (d(2026, 10, 12), d(2026, 10, 18)));
        assert_eq!(week_weekday(d(2026, 10, 17), 1, 1), Some(d(2026, 10, 20)));
        assert_eq!(week_weekday(d(2026, 10, 17), -1, 4), Some(d(2026, 10, 9)));
        assert_eq!(week_weekday(d(2026, 10, 17), 0, 7), None);
    }

    #[test]
    fn huge_week_offsets_are_rejected() {
        assert_eq!(week_weekday(d(2026, 10, 17), i64::MAX / 7, 6), None);
        assert_eq!(week_weekday(d(2026, 10, 17), i64::MIN / 7, 0), None);
        assert_eq!(week_weekday(d(2026, 10, 17), i64::MAX, 0), None);
        assert_eq!(date_offset(d(2026, 10, 17), i64::MAX), None);
    }

    #[test]
    fn nearest_weekday_counts_base_day() {
        let saturday = d(2026, 10, 17);
        assert_eq!(
            nearest_weekday(saturday, 5, SearchDirection::Forward),
            Some(saturday)
        );
        assert_eq!(
            nearest_weekday(saturday, 0, SearchDirection::Forward),
            Some(d(2026, 10, 19))
        );
        assert_eq!(
            nearest_weekday(saturday, 4, SearchDirection::Backward),
            Some(d(2026, 10, 16))
        );
    }

    #[test]
    fn month_boundaries_handle_december_and_leap_years() {
        assert_eq!(month_boundary(2026, 12, MonthBoundary::End), Some(d(2026, 12, 31)));
        assert_eq!(month_boundary(2028, 2, MonthBoundary::End), Some(d(2028, 2, 29)));
        assert_eq!(month_boundary(2026, 11, MonthBoundary::Start), Some(d(2026, 11, 1)));
        assert_eq!(month_boundary(2026, 13, MonthBoundary::Start), None);
    }

    #[test]
    fn time_offset_crosses_midnight() {
        let shifted = time_offset(d(2026, 10, 17), "23:30", 45).unwrap();
        assert_eq!(shifted.date(), d(2026, 10, 18));
        assert_eq!(shifted.format("%H:%M").to_string(), "00:15");
    }
}
