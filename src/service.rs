//! Chat service: persistence around one orchestrated chat turn.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::database::{ScheduleDatabase, StoredChatMessage};
use crate::llm_client::{ModelCapability, OpenAiCompatibleModel};
use crate::model_selection::ModelSelection;
use crate::orchestrator::codec::{decode_trace, encode_trace};
use crate::orchestrator::snapshot::{ScheduleSnapshot, SnapshotWindow};
use crate::orchestrator::trace::{ConversationMessage, ExecutionTrace, Role};
use crate::orchestrator::{OrchestratorSettings, RoundExecutor};
use crate::tools::ActionCatalog;

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    /// Whether anything in the schedule changed and views should reload
    pub should_refresh: bool,
    pub modified_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_trace: Option<ExecutionTrace>,
}

pub struct ChatService {
    db: Arc<ScheduleDatabase>,
    executor: RoundExecutor,
    window: SnapshotWindow,
    selection: Arc<RwLock<ModelSelection>>,
}

impl ChatService {
    pub fn new(
        db: Arc<ScheduleDatabase>,
        executor: RoundExecutor,
        window: SnapshotWindow,
        selection: Arc<RwLock<ModelSelection>>,
    ) -> Self {
        Self {
            db,
            executor,
            window,
            selection,
        }
    }

    /// Open the store and wire the built-in catalog to an OpenAI-compatible model.
    pub async fn bootstrap(config: &SchedulerConfig) -> Result<Self> {
        let db = Arc::new(
            ScheduleDatabase::new(&config.database_path)
                .with_context(|| format!("failed to open {}", config.database_path))?,
        );
        let selection = Arc::new(RwLock::new(config.model.clone().normalized()));
        let model: Arc<dyn ModelCapability> = Arc::new(OpenAiCompatibleModel::new(
            selection.clone(),
            config.temperature,
            config.max_tokens,
        ));
        let catalog = Arc::new(ActionCatalog::with_builtin_actions().await);
        tracing::info!(
            "Chat service ready: {} action(s), database {}",
            catalog.list_names().await.len(),
            config.database_path
        );

        let executor = RoundExecutor::new(
            model,
            catalog,
            db.clone(),
            OrchestratorSettings::from(config),
        );
        Ok(Self::new(db, executor, SnapshotWindow::from(config), selection))
    }

    pub fn selection(&self) -> Arc<RwLock<ModelSelection>> {
        self.selection.clone()
    }

    /// Handle a user message dated with the local calendar day.
    pub async fn handle_message(
        &self,
        text: &str,
        prior: Option<Vec<ConversationMessage>>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let today = chrono::Local::now().date_naive();
        self.handle_message_on(today, text, prior, cancel).await
    }

    /// Handle a user message.
    ///
    /// `prior` replaces the stored history as context when the caller keeps
    /// its own transcript. Both messages are persisted either way.
    pub async fn handle_message_on(
        &self,
        today: NaiveDate,
        text: &str,
        prior: Option<Vec<ConversationMessage>>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let text = text.trim();
        if text.is_empty() {
            anyhow::bail!("message cannot be empty");
        }

        self.db
            .add_chat_message(Role::User.as_str(), text)
            .context("failed to store user message")?;

        let history = match prior {
            Some(mut prior) => {
                prior.push(ConversationMessage::user(text));
                prior
            }
            None => self.history(self.executor.settings().history_window)?,
        };

        let snapshot = ScheduleSnapshot::capture(&self.db, today, self.window);
        let outcome = self
            .executor
            .process_chat_turn(&history, &snapshot, cancel)
            .await?;

        let stored = encode_trace(&outcome.reply, &outcome.trace);
        if let Err(e) = self.db.add_chat_message(Role::Assistant.as_str(), &stored) {
            tracing::error!("Failed to store assistant reply: {:#}", e);
        }

        Ok(ChatResponse {
            reply: outcome.reply,
            should_refresh: !outcome.modified_entity_ids.is_empty(),
            modified_ids: outcome.modified_entity_ids,
            execution_trace: (!outcome.trace.is_empty()).then_some(outcome.trace),
        })
    }

    /// Most recent `limit` messages, oldest first, with traces decoded.
    pub fn history(&self, limit: usize) -> Result<Vec<ConversationMessage>> {
        Ok(self
            .db
            .get_chat_history(limit)?
            .into_iter()
            .filter_map(decode_stored)
            .collect())
    }

    pub fn clear_history(&self) -> Result<usize> {
        self.db.clear_chat_history()
    }
}

fn decode_stored(stored: StoredChatMessage) -> Option<ConversationMessage> {
    let Some(role) = Role::parse(&stored.role) else {
        tracing::warn!("Skipping chat message {} with role '{}'", stored.id, stored.role);
        return None;
    };
    let (content, trace) = match role {
        Role::Assistant => decode_trace(&stored.content),
        Role::User => (stored.content, None),
    };
    Some(ConversationMessage {
        role,
        content,
        created_at: stored.created_at,
        trace,
    })
}
