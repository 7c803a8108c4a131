//! Builds the user-facing reply from the final narrative and the trace.

use super::trace::{ExecutionTrace, OutcomeStatus, TerminationReason};
use crate::llm_client::strip_thinking;

const MAX_REPORTED_ERRORS: usize = 3;

pub fn synthesize_reply(trace: &ExecutionTrace, narrative: Option<&str>) -> String {
    let narrative = narrative
        .map(strip_thinking)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let mut sections = Vec::new();
    let has_narrative = narrative.is_some();
    sections.push(narrative.unwrap_or_else(|| fallback_body(trace)));

    let errors: Vec<&str> = trace
        .outcomes()
        .filter(|outcome| outcome.status == OutcomeStatus::Error)
        .map(|outcome| outcome.message.as_str())
        .collect();
    if !errors.is_empty() {
        // Narratives only get the summary line.
        let mut section = String::from("Some steps could not be completed");
        if has_narrative {
            section.push_str(&format!(" ({} failed).", errors.len()));
        } else {
            section.push(':');
            for error in errors.iter().take(MAX_REPORTED_ERRORS) {
                section.push_str("\n- ");
                section.push_str(error);
            }
        }
        sections.push(section);
    }

    if let Some(caveat) = termination_caveat(trace) {
        sections.push(caveat);
    }

    sections.join("\n\n")
}

fn fallback_body(trace: &ExecutionTrace) -> String {
    let applied: Vec<&str> = trace
        .outcomes()
        .filter(|outcome| outcome.is_applied_mutation())
        .map(|outcome| outcome.message.as_str())
        .collect();
    if !applied.is_empty() {
        let mut body = String::from("Done:");
        for message in applied {
            body.push_str("\n- ");
            body.push_str(message);
        }
        return body;
    }

    let reads: Vec<&str> = trace
        .outcomes()
        .filter(|outcome| outcome.is_applied_read())
        .map(|outcome| outcome.message.trim())
        .filter(|message| !message.is_empty())
        .collect();
    if !reads.is_empty() {
        return reads.join("\n\n");
    }

    if trace.is_empty() {
        "Sorry, I don't have an answer for that right now.".to_string()
    } else {
        "I couldn't find anything to change for that request.".to_string()
    }
}

fn termination_caveat(trace: &ExecutionTrace) -> Option<String> {
    let rounds = trace.rounds.len();
    match trace.termination_reason {
        TerminationReason::Completed => None,
        TerminationReason::RoundCap => Some(format!(
            "I stopped after {} round(s) of actions, so part of the request may be unfinished.",
            rounds
        )),
        TerminationReason::StreakCap => Some(
            "I stopped looking things up repeatedly without making progress. \
             Tell me what you would like to change and I'll continue."
                .to_string(),
        ),
        TerminationReason::Error => Some(
            "The assistant service ran into a problem partway through, \
             so the request may be incomplete. Anything listed as done was saved."
                .to_string(),
        ),
        TerminationReason::Cancelled => Some(
            "The request was cancelled before it finished. Anything listed as done was saved."
                .to_string(),
        ),
    }
}
