//! Model transport.
//!
//! The orchestrator only sees [`ModelCapability`]: given the conversation so
//! far and the action catalog, return optional narrative text plus zero or more
//! proposed actions. [`OpenAiCompatibleModel`] implements it against any
//! OpenAI-compatible `/chat/completions` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model_selection::ModelSelection;
use crate::tools::ToolDef;

/// A message in the conversation (OpenAI chat format)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<LlmToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<LlmToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Tool call as returned by the LLM (OpenAI format)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: LlmFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmFunctionCall {
    pub name: String,
    pub arguments: String, // JSON string
}

/// One action the model asked for, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedAction {
    pub call_id: String,
    pub action_type: String,
    pub arguments: serde_json::Value,
}

impl ProposedAction {
    pub fn new(call_id: impl Into<String>, action_type: &str, arguments: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            action_type: action_type.to_string(),
            arguments,
        }
    }

    pub fn to_llm_tool_call(&self) -> LlmToolCall {
        LlmToolCall {
            id: self.call_id.clone(),
            call_type: "function".to_string(),
            function: LlmFunctionCall {
                name: self.action_type.clone(),
                arguments: self.arguments.to_string(),
            },
        }
    }
}

/// What one model invocation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub narrative: Option<String>,
    pub actions: Vec<ProposedAction>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no API key configured for provider '{0}'")]
    MissingApiKey(String),
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed model response: {0}")]
    Malformed(String),
    #[error("model call timed out after {0}s")]
    Timeout(u64),
}

#[async_trait]
pub trait ModelCapability: Send + Sync {
    async fn invoke(
        &self,
        conversation: &[Message],
        tools: &[ToolDef],
    ) -> Result<ModelTurn, ModelError>;
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    selection: Arc<RwLock<ModelSelection>>,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatibleModel {
    pub fn new(selection: Arc<RwLock<ModelSelection>>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            selection,
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl ModelCapability for OpenAiCompatibleModel {
    async fn invoke(
        &self,
        conversation: &[Message],
        tools: &[ToolDef],
    ) -> Result<ModelTurn, ModelError> {
        let selection = self.selection.read().await.clone();
        let api_key = selection.resolve_api_key();
        // A custom endpoint (local server) may run without a key
        if api_key.is_none() && selection.base_url.is_none() {
            return Err(ModelError::MissingApiKey(selection.provider.clone()));
        }

        let url = format!("{}/chat/completions", selection.resolved_base_url());
        let mut body = serde_json::json!({
            "model": selection.model,
            "messages": conversation,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)
                .map_err(|e| ModelError::Malformed(format!("unserialisable tools: {}", e)))?;
        }

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        tracing::debug!(
            "Calling {} model {} with {} message(s)",
            selection.provider,
            selection.model,
            conversation.len()
        );
        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status, body });
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        parse_completion(&response_json)
    }
}

/// Turn a chat completion response into a [`ModelTurn`].
///
/// Native `tool_calls` win. Without them, a JSON envelope of the form
/// `{"reply": "...", "actions": [{"type": "...", ...}]}` in the content is
/// accepted too. Thinking blocks are stripped from the narrative.
pub fn parse_completion(response: &serde_json::Value) -> Result<ModelTurn, ModelError> {
    let message = response["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .map(|choice| &choice["message"])
        .ok_or_else(|| ModelError::Malformed("empty choices in model response".to_string()))?;

    let narrative = message["content"]
        .as_str()
        .map(strip_thinking)
        .filter(|text| !text.is_empty());

    let mut actions = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|tc| tc.as_array()) {
        for (index, call) in calls.iter().enumerate() {
            let Some(name) = call["function"]["name"].as_str() else {
                tracing::warn!("Skipping tool call without a function name");
                continue;
            };
            let call_id = call["id"]
                .as_str()
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", index));
            let arguments = match &call["function"]["arguments"] {
                serde_json::Value::String(raw) if raw.trim().is_empty() => serde_json::json!({}),
                serde_json::Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse tool arguments as JSON: {}", e);
                    serde_json::json!({})
                }),
                serde_json::Value::Object(_) => call["function"]["arguments"].clone(),
                _ => serde_json::json!({}),
            };
            actions.push(ProposedAction::new(call_id, name, arguments));
        }
    }

    if actions.is_empty() {
        if let Some(text) = narrative.as_deref() {
            if let Some(turn) = parse_envelope(text) {
                return Ok(turn);
            }
        }
    }

    Ok(ModelTurn { narrative, actions })
}

/// Parse the `{"reply", "actions"}` JSON envelope, tolerating code fences and
/// prose around the object.
pub fn parse_envelope(text: &str) -> Option<ModelTurn> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&text[start..=end]).ok()?;
    let object = value.as_object()?;
    if !object.contains_key("actions") && !object.contains_key("reply") {
        return None;
    }

    let narrative = object
        .get("reply")
        .and_then(|r| r.as_str())
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    let actions = object
        .get("actions")
        .and_then(|a| a.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object())
                .enumerate()
                .filter_map(|(index, item)| {
                    let action_type = item.get("type")?.as_str()?.trim();
                    if action_type.is_empty() {
                        return None;
                    }
                    let arguments = match item.get("params") {
                        Some(params) if params.is_object() => params.clone(),
                        _ => serde_json::Value::Object(
                            item.iter()
                                .filter(|(key, _)| key.as_str() != "type")
                                .map(|(key, value)| (key.clone(), value.clone()))
                                .collect(),
                        ),
                    };
                    Some(ProposedAction::new(
                        format!("envelope_{}", index),
                        action_type,
                        arguments,
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ModelTurn { narrative, actions })
}

/// Remove `<think>` / `<thinking>` blocks, including an unterminated trailing one.
pub fn strip_thinking(input: &str) -> String {
    fn remove_tag(mut text: String, open_tag: &str, close_tag: &str) -> String {
        while let Some(start) = text.find(open_tag) {
            let content_start = start + open_tag.len();
            match text[content_start..].find(close_tag) {
                Some(rel_end) => {
                    let remove_end = content_start + rel_end + close_tag.len();
                    text.replace_range(start..remove_end, "");
                }
                None => text.truncate(start),
            }
        }
        text
    }

    let without_thinking = remove_tag(input.to_string(), "<thinking>", "</thinking>");
    remove_tag(without_thinking, "<think>", "</think>")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization() {
        let msg = Message::user("Hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "Hello");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_tool_result_message_serialization() {
        let msg = Message::tool_result("call_123", "Added task");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_123");
    }

    #[test]
    fn parses_native_tool_calls() {
        let response = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "create_custom_task",
                            "arguments": "{\"name\": \"Dentist\", \"date\": \"2026-10-18\"}"
                        }
                    }]
                }
            }]
        });
        let turn = parse_completion(&response).unwrap();
        assert!(turn.narrative.is_none());
        assert_eq!(turn.actions.len(), 1);
        assert_eq!(turn.actions[0].call_id, "call_1");
        assert_eq!(turn.actions[0].arguments["name"], "Dentist");
    }

    #[test]
    fn bad_argument_json_falls_back_to_empty_object() {
        let response = json!({
            "choices": [{ "message": { "tool_calls": [{
                "function": { "name": "get_day_log", "arguments": "{not json" }
            }]}}]
        });
        let turn = parse_completion(&response).unwrap();
        assert_eq!(turn.actions[0].call_id, "call_0");
        assert_eq!(turn.actions[0].arguments, json!({}));
    }

    #[test]
    fn falls_back_to_json_envelope_in_content() {
        let response = json!({
            "choices": [{ "message": { "content":
                "```json\n{\"reply\": \"Adding it now\", \"actions\": [{\"type\": \"append_day_log\", \"content\": \"ran\"}]}\n```"
            }}]
        });
        let turn = parse_completion(&response).unwrap();
        assert_eq!(turn.narrative.as_deref(), Some("Adding it now"));
        assert_eq!(turn.actions.len(), 1);
        assert_eq!(turn.actions[0].action_type, "append_day_log");
        assert_eq!(turn.actions[0].arguments, json!({"content": "ran"}));
    }

    #[test]
    fn plain_text_is_narrative_without_actions() {
        let response = json!({
            "choices": [{ "message": { "content": "<think>check the list</think>\nYou have two tasks {today}." } }]
        });
        let turn = parse_completion(&response).unwrap();
        assert_eq!(turn.narrative.as_deref(), Some("You have two tasks {today}."));
        assert!(turn.actions.is_empty());
    }

    #[test]
    fn empty_choices_is_malformed() {
        let err = parse_completion(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
    }

    #[test]
    fn strips_both_think_tag_variants() {
        assert_eq!(
            strip_thinking("<thinking>plan</thinking>\n<think>detail</think>\nDone"),
            "Done"
        );
        assert_eq!(strip_thinking("Answer <think>unterminated"), "Answer");
    }
}
