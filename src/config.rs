use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::model_selection::ModelSelection;

const MAX_CAP: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on model rounds per chat turn (1..=10)
    #[serde(default = "default_max_action_rounds")]
    pub max_action_rounds: usize,
    /// Consecutive read-only actions allowed before the turn is stopped (1..=10)
    #[serde(default = "default_read_streak_cap")]
    pub read_streak_cap: usize,
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
    /// How many prior chat messages are shown to the model
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_snapshot_days_ahead")]
    pub snapshot_days_ahead: u32,
    #[serde(default = "default_recent_log_days")]
    pub recent_log_days: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub model: ModelSelection,
}

fn default_max_action_rounds() -> usize {
    5
}

fn default_read_streak_cap() -> usize {
    3
}

fn default_model_timeout_secs() -> u64 {
    60
}

fn default_history_window() -> usize {
    10
}

fn default_snapshot_days_ahead() -> u32 {
    3
}

fn default_recent_log_days() -> u32 {
    7
}

fn default_temperature() -> f32 {
    0.4
}

fn default_max_tokens() -> u32 {
    900
}

fn default_database_path() -> String {
    "scheduler.db".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_action_rounds: default_max_action_rounds(),
            read_streak_cap: default_read_streak_cap(),
            model_timeout_secs: default_model_timeout_secs(),
            history_window: default_history_window(),
            snapshot_days_ahead: default_snapshot_days_ahead(),
            recent_log_days: default_recent_log_days(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            database_path: default_database_path(),
            bind_addr: default_bind_addr(),
            model: ModelSelection::default(),
        }
    }
}

impl SchedulerConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Candidate config files, next to the executable first, then the working directory
    pub fn config_paths() -> Vec<PathBuf> {
        vec![
            Self::get_base_dir().join("scheduler_config.toml"),
            PathBuf::from("scheduler_config.toml"),
        ]
    }

    /// Load config from scheduler_config.toml, then apply environment overrides.
    pub fn load() -> Self {
        let mut config = None;
        for path in Self::config_paths() {
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };
            match toml::from_str::<SchedulerConfig>(&contents) {
                Ok(parsed) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config = Some(parsed);
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        let mut config = config.unwrap_or_else(|| {
            tracing::warn!("No config file found, using defaults + env vars");
            Self::default()
        });
        config.apply_overrides(|key| env::var(key).ok());
        config
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok());
        config
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(rounds) = lookup("SCHEDULER_MAX_ACTION_ROUNDS") {
            if let Ok(rounds) = rounds.trim().parse() {
                self.max_action_rounds = rounds;
            }
        }

        if let Some(streak) = lookup("SCHEDULER_MAX_SAME_READ_ACTION_STREAK") {
            if let Ok(streak) = streak.trim().parse() {
                self.read_streak_cap = streak;
            }
        }

        if let Some(timeout) = lookup("SCHEDULER_MODEL_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.trim().parse() {
                self.model_timeout_secs = seconds;
            }
        }

        if let Some(window) = lookup("SCHEDULER_HISTORY_WINDOW") {
            if let Ok(window) = window.trim().parse() {
                self.history_window = window;
            }
        }

        if let Some(path) = lookup("SCHEDULER_DATABASE_PATH") {
            if !path.trim().is_empty() {
                self.database_path = path;
            }
        }

        if let Some(bind) = lookup("SCHEDULER_BIND") {
            if !bind.trim().is_empty() {
                self.bind_addr = bind;
            }
        }

        if let Some(provider) = lookup("SCHEDULER_MODEL_PROVIDER") {
            self.model = ModelSelection::for_provider(&provider);
        }

        if let Some(model) = lookup("SCHEDULER_MODEL") {
            if !model.trim().is_empty() {
                self.model.model = model.trim().to_string();
            }
        }

        if let Some(base_url) = lookup("SCHEDULER_MODEL_BASE_URL") {
            if !base_url.trim().is_empty() {
                self.model.base_url = Some(base_url.trim().trim_end_matches('/').to_string());
            }
        }

        self.max_action_rounds = self.max_action_rounds.clamp(1, MAX_CAP);
        self.read_streak_cap = self.read_streak_cap.clamp(1, MAX_CAP);
        if self.model_timeout_secs == 0 {
            self.model_timeout_secs = default_model_timeout_secs();
        }
    }
}
