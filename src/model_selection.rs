//! Which provider and model the chat turn talks to.
//!
//! Every provider is reached through its OpenAI-compatible chat completions
//! endpoint; a provider only contributes a default base URL, a default model
//! and the environment variables holding its API key.

use serde::{Deserialize, Serialize};
use std::env;

pub const DEFAULT_PROVIDER: &str = "openai";

pub struct ProviderDefaults {
    pub provider: &'static str,
    pub default_model: &'static str,
    pub default_base_url: &'static str,
    pub api_key_envs: &'static [&'static str],
    pub base_url_env: &'static str,
}

pub const PROVIDERS: &[ProviderDefaults] = &[
    ProviderDefaults {
        provider: "openai",
        default_model: "gpt-5.1",
        default_base_url: "https://api.openai.com/v1",
        api_key_envs: &["OPENAI_API_KEY"],
        base_url_env: "OPENAI_BASE_URL",
    },
    ProviderDefaults {
        provider: "gemini",
        default_model: "gemini-2.5-flash-lite",
        default_base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        api_key_envs: &["GEMINI_API_KEY", "GOOGLE_API_KEY", "PALM_API_KEY"],
        base_url_env: "GEMINI_API_BASE",
    },
    ProviderDefaults {
        provider: "groq",
        default_model: "llama-3.3-70b-versatile",
        default_base_url: "https://api.groq.com/openai/v1",
        api_key_envs: &["GROQ_API_KEY"],
        base_url_env: "GROQ_API_BASE",
    },
    ProviderDefaults {
        provider: "claude",
        default_model: "claude-haiku-4-5",
        default_base_url: "https://api.anthropic.com/v1",
        api_key_envs: &["CLAUDE_API_KEY", "ANTHROPIC_API_KEY"],
        base_url_env: "CLAUDE_API_BASE",
    },
];

pub fn provider_defaults(provider: &str) -> Option<&'static ProviderDefaults> {
    let provider = provider.trim();
    PROVIDERS
        .iter()
        .find(|p| p.provider.eq_ignore_ascii_case(provider))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub provider: String,
    pub model: String,
    /// Overrides the provider's default endpoint (e.g. a local OpenAI-compatible server)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self::for_provider(DEFAULT_PROVIDER)
    }
}

impl ModelSelection {
    /// Selection for `provider` with its default model. Unknown providers fall back to openai.
    pub fn for_provider(provider: &str) -> Self {
        let defaults = provider_defaults(provider).unwrap_or(&PROVIDERS[0]);
        Self {
            provider: defaults.provider.to_string(),
            model: defaults.default_model.to_string(),
            base_url: None,
        }
    }

    /// Trim fields and fill blanks from the provider defaults.
    pub fn normalized(self) -> Self {
        let defaults = provider_defaults(&self.provider).unwrap_or(&PROVIDERS[0]);
        let model = self.model.trim();
        Self {
            provider: defaults.provider.to_string(),
            model: if model.is_empty() {
                defaults.default_model.to_string()
            } else {
                model.to_string()
            },
            base_url: self
                .base_url
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        }
    }

    pub fn resolved_base_url(&self) -> String {
        self.resolved_base_url_with(|key| env::var(key).ok())
    }

    fn resolved_base_url_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        if let Some(url) = self.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return url.trim_end_matches('/').to_string();
        }
        let defaults = provider_defaults(&self.provider).unwrap_or(&PROVIDERS[0]);
        lookup(defaults.base_url_env)
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| defaults.default_base_url.to_string())
    }

    /// First non-empty API key among the provider's environment variables.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|key| env::var(key).ok())
    }

    fn resolve_api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        let defaults = provider_defaults(&self.provider)?;
        defaults
            .api_key_envs
            .iter()
            .filter_map(|name| lookup(name))
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
    }
}
