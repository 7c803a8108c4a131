//! Text the round executor feeds the model besides the conversation itself.

use super::snapshot::ScheduleSnapshot;
use super::trace::{ExecutionRound, OutcomeStatus};

pub fn system_prompt(snapshot: &ScheduleSnapshot, max_rounds: usize) -> String {
    format!(
        r#"You are a scheduling assistant. You manage the user's recurring routines (with steps), one-off custom tasks and daily logs by calling the provided actions.

Rules:
- Every date parameter must be an absolute YYYY-MM-DD date. Resolve words like "tomorrow", "next Friday" or "end of the month" with a calc_* action first, then use its result in a later round.
- Times are HH:MM (24 hour).
- Use the ids shown in the schedule below; look things up with the query actions when they are not shown.
- Do not repeat an action that already succeeded in this conversation turn.
- You have at most {max_rounds} rounds of actions. When the request is satisfied, answer the user in plain language without calling any action.

Schedule:
{snapshot}"#,
        max_rounds = max_rounds,
        snapshot = snapshot.to_prompt()
    )
}

/// How many resolved calculations are repeated in each round's feedback.
const RESOLVED_DATES_SHOWN: usize = 3;

/// Summary of one round, sent after the individual tool results.
///
/// `resolved_dates` holds the calculation results of the whole turn so far,
/// oldest first; the most recent ones are repeated so deferred actions can
/// be re-issued with them.
pub fn round_feedback(round: &ExecutionRound, resolved_dates: &[String]) -> String {
    let mut executed = Vec::new();
    let mut errors = Vec::new();
    let mut skipped = Vec::new();
    let mut deferred = Vec::new();

    for outcome in &round.actions {
        let fingerprint = outcome.action.fingerprint();
        match outcome.status {
            OutcomeStatus::Applied => {
                executed.push(format!("- {} => {}", fingerprint, first_line(&outcome.message)))
            }
            OutcomeStatus::Error => errors.push(format!("- {}: {}", fingerprint, outcome.message)),
            OutcomeStatus::SkippedDuplicate => {
                skipped.push(format!("- {} (already applied this turn)", fingerprint))
            }
            OutcomeStatus::SkippedStreak => {
                skipped.push(format!("- {} (too many lookups in a row)", fingerprint))
            }
            OutcomeStatus::Deferred => deferred.push(format!("- {}", fingerprint)),
        }
    }

    let mut lines = vec![format!("Round {} finished.", round.round_index + 1)];
    if !resolved_dates.is_empty() {
        lines.push("resolved_dates:".to_string());
        let skip = resolved_dates.len().saturating_sub(RESOLVED_DATES_SHOWN);
        lines.extend(resolved_dates[skip..].iter().map(|entry| format!("- {}", entry)));
    }
    for (title, entries) in [
        ("executed_actions:", executed),
        ("errors:", errors),
        ("skipped_actions:", skipped),
        ("deferred_actions (re-issue them with the calculated YYYY-MM-DD dates):", deferred),
    ] {
        if !entries.is_empty() {
            lines.push(title.to_string());
            lines.extend(entries);
        }
    }
    lines.push(
        "If the user's request is now satisfied, reply in plain language without calling any action. \
         Otherwise call only the actions that are still needed."
            .to_string(),
    );
    lines.join("\n")
}

pub(crate) fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
