//! Embeds an [`ExecutionTrace`] in the stored assistant message text.
//!
//! The trace travels as a trailing line `[[EXEC_TRACE_B64:<base64 json>]]`.
//! Everything before that line is the human-readable reply and is never
//! altered. Swapping these two functions is all it takes to move the trace
//! into its own column.

use base64::Engine;

use super::trace::ExecutionTrace;

const TRACE_BLOCK_START: &str = "[[EXEC_TRACE_B64:";
const TRACE_BLOCK_END: &str = "]]";

/// Append `trace` to `content`. Empty traces are not encoded.
pub fn encode_trace(content: &str, trace: &ExecutionTrace) -> String {
    if trace.is_empty() {
        return content.to_string();
    }
    let json = match serde_json::to_vec(trace) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to serialise execution trace: {}", e);
            return content.to_string();
        }
    };
    let payload = base64::engine::general_purpose::STANDARD.encode(json);

    let mut encoded = content.trim_end().to_string();
    encoded.push('\n');
    encoded.push_str(TRACE_BLOCK_START);
    encoded.push_str(&payload);
    encoded.push_str(TRACE_BLOCK_END);
    encoded
}

/// Split stored content into the visible body and its trace, if any.
///
/// A block that fails to decode is dropped from the body and yields no trace.
pub fn decode_trace(content: &str) -> (String, Option<ExecutionTrace>) {
    let Some((body, payload)) = split_trace_block(content) else {
        return (content.to_string(), None);
    };

    let trace = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| e.to_string())
        .and_then(|bytes| {
            serde_json::from_slice::<ExecutionTrace>(&bytes).map_err(|e| e.to_string())
        });

    match trace {
        Ok(trace) => (body.to_string(), Some(trace)),
        Err(e) => {
            tracing::warn!("Ignoring corrupted execution trace block: {}", e);
            (body.to_string(), None)
        }
    }
}

/// `(body, payload)` when the last line of `content` is a trace block.
fn split_trace_block(content: &str) -> Option<(&str, &str)> {
    let trimmed = content.trim_end();
    let start = trimmed.rfind(TRACE_BLOCK_START)?;
    let block = &trimmed[start..];
    if !block.ends_with(TRACE_BLOCK_END) || block.contains('\n') {
        return None;
    }
    let before = &trimmed[..start];
    if !before.is_empty() && !before.ends_with('\n') {
        return None;
    }
    let payload = &block[TRACE_BLOCK_START.len()..block.len() - TRACE_BLOCK_END.len()];
    Some((before.trim_end(), payload.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::trace::{
        ActionOutcome, ExecutionRound, OutcomeStatus, TerminationReason,
    };
    use crate::tools::Action;

    fn sample_trace() -> ExecutionTrace {
        ExecutionTrace {
            rounds: vec![ExecutionRound {
                round_index: 0,
                actions: vec![ActionOutcome {
                    action: Action::new(
                        "create_custom_task",
                        [("date", "2026-10-18"), ("name", "Dentist"), ("time", "15:00")],
                    ),
                    status: OutcomeStatus::Applied,
                    message: "Created custom task 'Dentist' on 2026-10-18 at 15:00".to_string(),
                    modified_entity_ids: ["custom_task:1".to_string()].into_iter().collect(),
                    read_only: false,
                }],
                model_narrative: Some("Adding it now.".to_string()),
            }],
            termination_reason: TerminationReason::Completed,
        }
    }

    #[test]
    fn encoded_trace_decodes_to_the_same_value() {
        let trace = sample_trace();
        let stored = encode_trace("Added the dentist appointment.", &trace);

        assert!(stored.starts_with("Added the dentist appointment.\n[[EXEC_TRACE_B64:"));
        let (body, decoded) = decode_trace(&stored);
        assert_eq!(body, "Added the dentist appointment.");
        assert_eq!(decoded, Some(trace));
    }

    #[test]
    fn multi_line_bodies_survive() {
        let body = "Done:\n- created Dentist\n- logged the day";
        let (decoded_body, decoded) = decode_trace(&encode_trace(body, &sample_trace()));
        assert_eq!(decoded_body, body);
        assert!(decoded.is_some());
    }

    #[test]
    fn empty_trace_leaves_content_alone() {
        let trace = ExecutionTrace::completed_without_actions();
        assert_eq!(encode_trace("Hello!", &trace), "Hello!");
    }

    #[test]
    fn plain_messages_have_no_trace() {
        let (body, trace) = decode_trace("Nothing special here");
        assert_eq!(body, "Nothing special here");
        assert!(trace.is_none());
    }

    #[test]
    fn corrupted_block_is_dropped_without_a_trace() {
        let (body, trace) = decode_trace("Reply text\n[[EXEC_TRACE_B64:not*base64!]]");
        assert_eq!(body, "Reply text");
        assert!(trace.is_none());

        let not_json = base64::engine::general_purpose::STANDARD.encode("{\"rounds\":");
        let (body, trace) = decode_trace(&format!("Reply text\n[[EXEC_TRACE_B64:{}]]", not_json));
        assert_eq!(body, "Reply text");
        assert!(trace.is_none());
    }

    #[test]
    fn inline_marker_text_is_not_a_block() {
        let content = "I typed [[EXEC_TRACE_B64:abc]] in the middle of a sentence";
        let (body, trace) = decode_trace(content);
        assert_eq!(body, content);
        assert!(trace.is_none());
    }
}
