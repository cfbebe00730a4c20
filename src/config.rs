//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use std::env;
use std::time::Duration;

/// Default bridge address (host port forwarded to the solver VM)
pub const DEFAULT_BRIDGE_URL: &str = "http://localhost:18080";

/// Default polling interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1500;

/// Model id every conversation is created with
pub const DEFAULT_MODEL_ID: &str = "deepseek-v1";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Execution bridge configuration
    pub bridge: BridgeConfig,
    /// Translation service configuration
    pub translation: TranslationConfig,
    /// Polling configuration
    pub polling: PollingConfig,
}

/// Execution bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URL of the bridge, without trailing slash
    pub base_url: String,
    /// Per-request timeout (in seconds)
    pub timeout_secs: u64,
    /// Optional case name sent with every submission
    pub case_name: Option<String>,
}

/// Translation service configuration
#[derive(Clone)]
pub struct TranslationConfig {
    /// Preset id used for translation
    pub model_id: String,
    /// API key; absence is only reported when a translation is attempted
    pub api_key: Option<String>,
    /// Overrides the preset base URL when set
    pub base_url_override: Option<String>,
}

impl std::fmt::Debug for TranslationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationConfig")
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url_override", &self.base_url_override)
            .finish()
    }
}

/// Polling configuration
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between two status queries (in milliseconds)
    pub interval_ms: u64,
}

impl PollingConfig {
    /// Interval as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Request settings of one translation model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPreset {
    /// Preset id referenced by conversations
    pub id: &'static str,
    /// Human readable label
    pub label: &'static str,
    /// API base URL
    pub base_url: &'static str,
    /// Chat completions path
    pub path: &'static str,
    /// Upstream model name
    pub model: &'static str,
    /// Sampling temperature
    pub temperature: f32,
}

/// Known translation presets; the first one is the fallback
pub const MODEL_PRESETS: &[ModelPreset] = &[
    ModelPreset {
        id: "deepseek-v1",
        label: "DeepSeek V1 (Translate)",
        base_url: "https://api.deepseek.com",
        path: "/v1/chat/completions",
        model: "deepseek-chat",
        temperature: 0.2,
    },
    ModelPreset {
        id: "deepseek-r1",
        label: "DeepSeek R1 (Translate+Reasoning)",
        base_url: "https://api.deepseek.com",
        path: "/v1/chat/completions",
        model: "deepseek-reasoner",
        temperature: 0.1,
    },
];

/// Look up a preset by id, falling back to the first preset
pub fn model_preset(model_id: &str) -> &'static ModelPreset {
    MODEL_PRESETS
        .iter()
        .find(|p| p.id == model_id)
        .unwrap_or(&MODEL_PRESETS[0])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig {
                base_url: DEFAULT_BRIDGE_URL.to_string(),
                timeout_secs: 30,
                case_name: None,
            },
            translation: TranslationConfig {
                model_id: DEFAULT_MODEL_ID.to_string(),
                api_key: None,
                base_url_override: None,
            },
            polling: PollingConfig {
                interval_ms: DEFAULT_POLL_INTERVAL_MS,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bridge: BridgeConfig {
                base_url: env::var("FOAM_BRIDGE_URL")
                    .map(|u| u.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.bridge.base_url),
                timeout_secs: env::var("FOAM_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(defaults.bridge.timeout_secs),
                case_name: non_empty_var("FOAM_CASE_NAME"),
            },
            translation: TranslationConfig {
                model_id: non_empty_var("TRANSLATION_MODEL")
                    .unwrap_or(defaults.translation.model_id),
                api_key: non_empty_var("DEEPSEEK_API_KEY"),
                base_url_override: non_empty_var("DEEPSEEK_BASE_URL"),
            },
            polling: PollingConfig {
                interval_ms: env::var("FOAM_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|t| t.parse().ok())
                    .filter(|ms| *ms > 0)
                    .unwrap_or(defaults.polling.interval_ms),
            },
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
