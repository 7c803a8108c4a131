//! Action catalog: the operations the model may invoke against the schedule.
//!
//! Each handler declares a JSON Schema for its parameters, which doubles as the
//! OpenAI-format function definition and as the validation contract applied
//! before the handler runs. Handlers are looked up by name in an
//! [`ActionCatalog`]; adding one never requires touching the orchestrator.

pub mod calc;
pub mod queries;
pub mod schedule;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::database::ScheduleDatabase;
use crate::dates::{is_relative_datetime_text, normalize_hhmm, parse_bool, parse_iso_date};
use crate::schedule::EntityRef;

/// How an action interacts with the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionCategory {
    /// Pure date arithmetic, never touches the store
    Calculation,
    /// Reads the store
    Query,
    /// Changes the store
    Mutation,
}

impl ActionCategory {
    pub fn is_read_only(self) -> bool {
        !matches!(self, ActionCategory::Mutation)
    }
}

/// A proposed operation. Two actions are the same action when their type and
/// normalised parameters are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Action {
    pub fn new<I, K, V>(action_type: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            action_type: action_type.trim().to_string(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into().trim().to_string()))
                .collect(),
        }
    }

    /// Flatten model-supplied JSON arguments into string parameters.
    ///
    /// Strings are trimmed, numbers and booleans are stringified, nulls are
    /// dropped. Anything that is not an object yields no parameters.
    pub fn from_arguments(action_type: &str, arguments: &serde_json::Value) -> Self {
        let mut params = BTreeMap::new();
        if let Some(object) = arguments.as_object() {
            for (key, value) in object {
                let text = match value {
                    serde_json::Value::Null => continue,
                    serde_json::Value::String(s) => s.trim().to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Number(n) => n.to_string(),
                    other => other.to_string(),
                };
                params.insert(key.trim().to_string(), text);
            }
        }
        Self {
            action_type: action_type.trim().to_string(),
            params,
        }
    }

    /// Parameter value, `None` when absent or blank.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.text(key).and_then(|v| v.parse().ok())
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.text(key).and_then(parse_bool)
    }

    /// Parameters as a JSON object, used when echoing the action back to the model.
    pub fn params_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_else(|_| serde_json::json!({}))
    }

    /// Stable one-line rendering: `type {"k":"v",...}` with sorted keys.
    pub fn fingerprint(&self) -> String {
        format!("{} {}", self.action_type, self.params_json())
    }
}

/// The result of applying one action.
#[derive(Debug, Clone)]
pub enum ActionOutput {
    /// Read or calculation result
    Text(String),
    /// A write happened; `modified` lists what actually changed
    Changed {
        message: String,
        modified: Vec<EntityRef>,
    },
    /// Validation or domain failure. The message is safe to show to the user.
    Error(String),
}

impl ActionOutput {
    pub fn changed(message: impl Into<String>, modified: Vec<EntityRef>) -> Self {
        ActionOutput::Changed {
            message: message.into(),
            modified,
        }
    }

    /// Convert to a string representation suitable for feeding back to the LLM
    pub fn to_llm_string(&self) -> String {
        match self {
            ActionOutput::Text(s) => s.clone(),
            ActionOutput::Changed { message, .. } => message.clone(),
            ActionOutput::Error(e) => format!("[ERROR] {}", e),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, ActionOutput::Error(_))
    }
}

/// Context passed to handlers during application
#[derive(Clone)]
pub struct ActionContext {
    pub store: Arc<ScheduleDatabase>,
    /// Date used when a date parameter is omitted
    pub today: NaiveDate,
}

impl ActionContext {
    /// Read a date parameter, defaulting to today when it is omitted.
    pub fn date_param(&self, action: &Action, key: &str) -> std::result::Result<NaiveDate, String> {
        match action.text(key) {
            None => Ok(self.today),
            Some(raw) => parse_iso_date(raw).ok_or_else(|| date_format_error(key, raw)),
        }
    }
}

fn date_format_error(key: &str, raw: &str) -> String {
    if is_relative_datetime_text(raw) {
        format!(
            "{} '{}' is a relative expression; resolve it with a calc_* action first and pass YYYY-MM-DD",
            key, raw
        )
    } else {
        format!("{} must be a YYYY-MM-DD date, got '{}'", key, raw)
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Unique name used in function-calling (e.g., "create_custom_task")
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters.
    ///
    /// Besides the usual `type`/`required`/`enum` keys, string properties may
    /// carry `"format": "date"` (strict `YYYY-MM-DD`) or `"format": "time"`
    /// (normalised to `HH:MM`).
    fn parameters_schema(&self) -> serde_json::Value;

    /// Apply an action whose parameters already passed schema validation.
    ///
    /// Domain failures are returned as `ActionOutput::Error`; `Err` is reserved
    /// for storage faults and is never shown to the user verbatim.
    async fn apply(&self, action: &Action, ctx: &ActionContext) -> Result<ActionOutput>;

    fn category(&self) -> ActionCategory {
        ActionCategory::Mutation
    }

    /// Whether a date parameter of this action usually comes from a calculation
    fn date_dependent(&self) -> bool {
        false
    }
}

/// OpenAI-format function definition for LLM function-calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// OpenAI-format tool definition (wraps FunctionDef)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

/// Thread-safe registry of action handlers.
pub struct ActionCatalog {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Catalog with every built-in schedule, query and calculation action.
    pub async fn with_builtin_actions() -> Self {
        let catalog = Self::new();
        for handler in schedule::handlers()
            .into_iter()
            .chain(queries::handlers())
            .chain(calc::handlers())
        {
            catalog.register(handler).await;
        }
        catalog
    }

    /// Register a handler. Overwrites any existing handler with the same name.
    pub async fn register(&self, handler: Arc<dyn ActionHandler>) {
        let name = handler.name().to_string();
        tracing::debug!(
            "Registered action: {} (category: {:?})",
            name,
            handler.category()
        );
        self.handlers.write().await.insert(name, handler);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.read().await.get(name).cloned()
    }

    pub async fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn category_of(&self, name: &str) -> Option<ActionCategory> {
        self.get(name).await.map(|handler| handler.category())
    }

    pub async fn is_date_dependent(&self, name: &str) -> bool {
        self.get(name)
            .await
            .map(|handler| handler.date_dependent())
            .unwrap_or(false)
    }

    /// OpenAI-format definitions for every handler, sorted by name.
    pub async fn tool_definitions(&self) -> Vec<ToolDef> {
        let handlers = self.handlers.read().await;
        let mut defs: Vec<ToolDef> = handlers
            .values()
            .map(|handler| ToolDef {
                tool_type: "function".to_string(),
                function: FunctionDef {
                    name: handler.name().to_string(),
                    description: handler.description().to_string(),
                    parameters: handler.parameters_schema(),
                },
            })
            .collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Build an [`Action`] from raw model arguments, canonicalising values
    /// according to the handler's schema so equal requests compare equal.
    pub async fn normalize(&self, action_type: &str, arguments: &serde_json::Value) -> Action {
        let mut action = Action::from_arguments(action_type, arguments);
        let Some(handler) = self.get(&action.action_type).await else {
            return action;
        };
        let schema = handler.parameters_schema();
        let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
            return action;
        };

        for (key, value) in action.params.iter_mut() {
            let Some(property) = properties.get(key) else {
                continue;
            };
            let canonical = match property_kind(property) {
                PropertyKind::Integer => value.parse::<i64>().ok().map(|n| n.to_string()),
                PropertyKind::Boolean => parse_bool(value).map(|b| b.to_string()),
                PropertyKind::Time => normalize_hhmm(value),
                PropertyKind::Date | PropertyKind::Text => None,
            };
            if let Some(canonical) = canonical {
                *value = canonical;
            }
        }
        action
    }

    /// Validate and apply one action. Never fails: every problem becomes an
    /// `ActionOutput::Error` the loop can record and feed back.
    pub async fn apply(&self, action: &Action, ctx: &ActionContext) -> ActionOutput {
        let handler = match self.get(&action.action_type).await {
            Some(handler) => handler,
            None => {
                return ActionOutput::Error(format!("Unknown action: {}", action.action_type));
            }
        };

        if let Err(reason) = validate_params(&handler.parameters_schema(), action) {
            return ActionOutput::Error(format!("{}: {}", action.action_type, reason));
        }

        match handler.apply(action, ctx).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Action {} failed: {:#}", action.fingerprint(), e);
                ActionOutput::Error(format!(
                    "{} could not be completed; nothing was changed",
                    action.action_type
                ))
            }
        }
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

enum PropertyKind {
    Integer,
    Boolean,
    Date,
    Time,
    Text,
}

fn property_kind(property: &serde_json::Value) -> PropertyKind {
    match property.get("type").and_then(|t| t.as_str()) {
        Some("integer") => PropertyKind::Integer,
        Some("boolean") => PropertyKind::Boolean,
        _ => match property.get("format").and_then(|f| f.as_str()) {
            Some("date") => PropertyKind::Date,
            Some("time") => PropertyKind::Time,
            _ => PropertyKind::Text,
        },
    }
}

/// Check `action` against a handler schema: required keys present and
/// non-blank, typed values parse, enums match.
pub fn validate_params(
    schema: &serde_json::Value,
    action: &Action,
) -> std::result::Result<(), String> {
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if action.text(key).is_none() {
                return Err(format!("missing required parameter '{}'", key));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };

    for (key, property) in properties {
        let Some(value) = action.text(key) else {
            continue;
        };
        match property_kind(property) {
            PropertyKind::Integer => {
                if value.parse::<i64>().is_err() {
                    return Err(format!("'{}' must be an integer, got '{}'", key, value));
                }
            }
            PropertyKind::Boolean => {
                if parse_bool(value).is_none() {
                    return Err(format!("'{}' must be true or false, got '{}'", key, value));
                }
            }
            PropertyKind::Date => {
                if parse_iso_date(value).is_none() {
                    return Err(date_format_error(key, value));
                }
            }
            PropertyKind::Time => {
                if normalize_hhmm(value).is_none() {
                    return Err(format!("'{}' must be a HH:MM time, got '{}'", key, value));
                }
            }
            PropertyKind::Text => {}
        }

        if let Some(options) = property.get("enum").and_then(|e| e.as_array()) {
            if !options.iter().any(|o| o.as_str() == Some(value)) {
                return Err(format!("'{}' has unsupported value '{}'", key, value));
            }
        }
    }

    Ok(())
}

/// Error output for a parameter the handler cannot work without.
pub(crate) fn missing(key: &str) -> ActionOutput {
    ActionOutput::Error(format!("missing required parameter '{}'", key))
}

/// Output for an update whose target already held the requested value.
pub(crate) fn unchanged(what: &str) -> ActionOutput {
    ActionOutput::changed(format!("{} already had that value; nothing changed", what), vec![])
}
