//! Round-by-round record of what a chat turn did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::tools::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Applied,
    SkippedDuplicate,
    SkippedStreak,
    /// Held back because a date calculation in the same round had to land first
    Deferred,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Applied => "applied",
            OutcomeStatus::SkippedDuplicate => "skipped-duplicate",
            OutcomeStatus::SkippedStreak => "skipped-streak",
            OutcomeStatus::Deferred => "deferred",
            OutcomeStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub action: Action,
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(default)]
    pub modified_entity_ids: BTreeSet<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl ActionOutcome {
    pub fn is_applied_mutation(&self) -> bool {
        self.status == OutcomeStatus::Applied && !self.read_only
    }

    pub fn is_applied_read(&self) -> bool {
        self.status == OutcomeStatus::Applied && self.read_only
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRound {
    pub round_index: usize,
    pub actions: Vec<ActionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_narrative: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    Completed,
    RoundCap,
    StreakCap,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTrace {
    pub rounds: Vec<ExecutionRound>,
    pub termination_reason: TerminationReason,
}

impl ExecutionTrace {
    /// A turn that finished without any action round.
    pub fn completed_without_actions() -> Self {
        Self {
            rounds: Vec::new(),
            termination_reason: TerminationReason::Completed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.rounds.iter().flat_map(|round| round.actions.iter())
    }

    /// Union of modified entity ids across rounds, in first-seen order.
    pub fn modified_entity_ids(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut ids = Vec::new();
        for outcome in self.outcomes() {
            for id in &outcome.modified_entity_ids {
                if seen.insert(id.clone()) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<ExecutionTrace>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            trace: None,
        }
    }

    pub fn assistant(content: impl Into<String>, trace: Option<ExecutionTrace>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            trace,
        }
    }
}
