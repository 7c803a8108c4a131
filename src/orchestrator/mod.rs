//! Multi-round chat orchestration.
//!
//! One chat turn is a bounded loop: ask the model what to do, guard and apply
//! the proposed actions one at a time, feed the outcomes back, and stop when
//! the model proposes nothing, a cap is hit, the model fails or the turn is
//! cancelled. Everything that happened is kept in an [`ExecutionTrace`].

pub mod codec;
pub mod guard;
pub mod prompt;
pub mod reply;
pub mod snapshot;
pub mod trace;

#[cfg(test)]
mod tests;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::database::ScheduleDatabase;
use crate::llm_client::{Message, ModelCapability, ModelError, ModelTurn};
use crate::tools::{ActionCatalog, ActionCategory, ActionContext, ActionOutput};

use guard::{GuardVerdict, TurnGuard};
use snapshot::ScheduleSnapshot;
use trace::{
    ActionOutcome, ConversationMessage, ExecutionRound, ExecutionTrace, OutcomeStatus, Role,
    TerminationReason,
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_rounds: usize,
    pub read_streak_cap: usize,
    pub model_timeout: Duration,
    /// Prior messages (including the new user message) shown to the model
    pub history_window: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for OrchestratorSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_rounds: config.max_action_rounds.clamp(1, 10),
            read_streak_cap: config.read_streak_cap.clamp(1, 10),
            model_timeout: Duration::from_secs(config.model_timeout_secs.max(1)),
            history_window: config.history_window.max(1),
        }
    }
}

/// Result of one chat turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub modified_entity_ids: Vec<String>,
    pub trace: ExecutionTrace,
}

pub struct RoundExecutor {
    model: Arc<dyn ModelCapability>,
    catalog: Arc<ActionCatalog>,
    store: Arc<ScheduleDatabase>,
    settings: OrchestratorSettings,
}

impl RoundExecutor {
    pub fn new(
        model: Arc<dyn ModelCapability>,
        catalog: Arc<ActionCatalog>,
        store: Arc<ScheduleDatabase>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            model,
            catalog,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run one chat turn. `history` must end with the user's new message.
    ///
    /// Only a malformed request is an `Err`; model failures end the turn with
    /// [`TerminationReason::Error`] and keep whatever was already applied.
    pub async fn process_chat_turn(
        &self,
        history: &[ConversationMessage],
        snapshot: &ScheduleSnapshot,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        match history.last() {
            Some(last) if last.role == Role::User => {}
            Some(_) => anyhow::bail!("chat turn must end with a user message"),
            None => anyhow::bail!("chat turn has no messages"),
        }

        let max_rounds = self.settings.max_rounds.max(1);
        let mut conversation = vec![Message::system(prompt::system_prompt(snapshot, max_rounds))];
        let window_start = history.len().saturating_sub(self.settings.history_window.max(1));
        conversation.extend(history[window_start..].iter().map(|message| match message.role {
            Role::User => Message::user(message.content.clone()),
            Role::Assistant => Message::assistant(codec::decode_trace(&message.content).0),
        }));

        let tools = self.catalog.tool_definitions().await;
        let ctx = ActionContext {
            store: self.store.clone(),
            today: snapshot.today,
        };
        let mut guard = TurnGuard::new(self.settings.read_streak_cap);
        let mut rounds: Vec<ExecutionRound> = Vec::new();
        let mut resolved_dates: Vec<String> = Vec::new();
        let mut final_narrative = None;
        let mut termination = TerminationReason::RoundCap;

        tracing::info!(
            "Chat turn started ({} message(s) of context, up to {} round(s))",
            conversation.len() - 1,
            max_rounds
        );

        for round_index in 0..max_rounds {
            if cancel.is_cancelled() {
                tracing::info!("Chat turn cancelled before round {}", round_index + 1);
                termination = TerminationReason::Cancelled;
                break;
            }

            tracing::debug!("Round {}: calling model", round_index + 1);
            let turn = match self.invoke_model(&conversation, &tools).await {
                Ok(turn) => turn,
                Err(e) => {
                    tracing::warn!("Model call failed in round {}: {}", round_index + 1, e);
                    if !rounds.is_empty() {
                        rounds.push(ExecutionRound {
                            round_index,
                            actions: Vec::new(),
                            model_narrative: None,
                        });
                    }
                    termination = TerminationReason::Error;
                    break;
                }
            };

            if turn.actions.is_empty() {
                tracing::debug!("Round {}: no actions proposed, turn complete", round_index + 1);
                final_narrative = turn.narrative;
                termination = TerminationReason::Completed;
                break;
            }

            tracing::debug!(
                "Round {}: model proposed {} action(s)",
                round_index + 1,
                turn.actions.len()
            );
            let round = self.run_round(round_index, &turn, &ctx, &mut guard).await;

            conversation.push(Message::assistant_tool_calls(
                turn.narrative.clone(),
                turn.actions.iter().map(|a| a.to_llm_tool_call()).collect(),
            ));
            for (proposed, outcome) in turn.actions.iter().zip(&round.actions) {
                conversation.push(Message::tool_result(
                    proposed.call_id.clone(),
                    tool_result_text(outcome),
                ));
            }
            self.remember_calculations(&round, &mut resolved_dates).await;
            conversation.push(Message::system(prompt::round_feedback(&round, &resolved_dates)));
            rounds.push(round);

            if guard.tripped() {
                tracing::warn!("Read streak cap reached in round {}", round_index + 1);
                termination = TerminationReason::StreakCap;
                break;
            }
        }

        if termination == TerminationReason::RoundCap {
            tracing::warn!("Chat turn stopped at the round cap ({})", max_rounds);
        }

        let trace = ExecutionTrace {
            rounds,
            termination_reason: termination,
        };
        let reply = reply::synthesize_reply(&trace, final_narrative.as_deref());
        let modified_entity_ids = trace.modified_entity_ids();
        tracing::info!(
            "Chat turn finished: {:?} after {} round(s), {} entit(ies) modified",
            trace.termination_reason,
            trace.rounds.len(),
            modified_entity_ids.len()
        );

        Ok(TurnOutcome {
            reply,
            modified_entity_ids,
            trace,
        })
    }

    async fn invoke_model(
        &self,
        conversation: &[Message],
        tools: &[crate::tools::ToolDef],
    ) -> Result<ModelTurn, ModelError> {
        let timeout = self.settings.model_timeout;
        match tokio::time::timeout(timeout, self.model.invoke(conversation, tools)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(timeout.as_secs())),
        }
    }

    /// Append the first line of each applied calculation not seen before.
    async fn remember_calculations(&self, round: &ExecutionRound, resolved: &mut Vec<String>) {
        for outcome in &round.actions {
            if outcome.status != OutcomeStatus::Applied {
                continue;
            }
            let category = self.catalog.category_of(&outcome.action.action_type).await;
            if category != Some(ActionCategory::Calculation) {
                continue;
            }
            let line = prompt::first_line(&outcome.message).trim();
            if !line.is_empty() && !resolved.iter().any(|seen| seen == line) {
                resolved.push(line.to_string());
            }
        }
    }

    /// Guard and apply one round of proposals, strictly in order.
    async fn run_round(
        &self,
        round_index: usize,
        turn: &ModelTurn,
        ctx: &ActionContext,
        guard: &mut TurnGuard,
    ) -> ExecutionRound {
        let mut proposals = Vec::with_capacity(turn.actions.len());
        for proposed in &turn.actions {
            let action = self
                .catalog
                .normalize(&proposed.action_type, &proposed.arguments)
                .await;
            let category = self
                .catalog
                .category_of(&action.action_type)
                .await
                .unwrap_or(ActionCategory::Mutation);
            let date_dependent = self.catalog.is_date_dependent(&action.action_type).await;
            proposals.push((action, category, date_dependent));
        }

        // Dates computed this round are not known yet, so anything that
        // consumes a date waits for the next round.
        let has_calculation = proposals
            .iter()
            .any(|(_, category, _)| *category == ActionCategory::Calculation);

        let mut outcomes = Vec::with_capacity(proposals.len());
        for (action, category, date_dependent) in proposals {
            let read_only = category.is_read_only();

            if has_calculation && date_dependent {
                tracing::debug!("Deferred {} until calculations land", action.fingerprint());
                outcomes.push(ActionOutcome {
                    action,
                    status: OutcomeStatus::Deferred,
                    message: "Deferred until the date calculation in this round is available"
                        .to_string(),
                    modified_entity_ids: Default::default(),
                    read_only,
                });
                continue;
            }

            let verdict = guard.check(&action, read_only);
            if let Some(status) = verdict.rejection_status() {
                tracing::warn!("Guard rejected {}: {}", action.fingerprint(), status.as_str());
                let message = match verdict {
                    GuardVerdict::SkipDuplicate => {
                        "Skipped: identical to an action already applied this turn"
                    }
                    _ => "Skipped: too many lookups in a row without a change",
                };
                outcomes.push(ActionOutcome {
                    action,
                    status,
                    message: message.to_string(),
                    modified_entity_ids: Default::default(),
                    read_only,
                });
                continue;
            }

            let (status, message, modified_entity_ids) = match self.catalog.apply(&action, ctx).await
            {
                ActionOutput::Text(text) => (OutcomeStatus::Applied, text, Default::default()),
                ActionOutput::Changed { message, modified } => (
                    OutcomeStatus::Applied,
                    message,
                    modified.iter().map(|entity| entity.to_string()).collect(),
                ),
                ActionOutput::Error(reason) => (OutcomeStatus::Error, reason, Default::default()),
            };
            guard.record(&action, read_only, status);
            outcomes.push(ActionOutcome {
                action,
                status,
                message,
                modified_entity_ids,
                read_only,
            });
        }

        ExecutionRound {
            round_index,
            actions: outcomes,
            model_narrative: turn.narrative.clone(),
        }
    }
}

fn tool_result_text(outcome: &ActionOutcome) -> String {
    match outcome.status {
        OutcomeStatus::Applied => outcome.message.clone(),
        OutcomeStatus::Error => format!("[ERROR] {}", outcome.message),
        status => format!("[{}] {}", status.as_str().to_uppercase(), outcome.message),
    }
}
