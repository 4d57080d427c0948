use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for the Parley chat service.
///
/// Loaded from `~/.parley/config.toml` by default. Every section falls back
/// to its defaults, so a partial file is always valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the service unusable.
    pub fn validate(&self) -> Result<()> {
        if self.session.ttl_minutes == 0 {
            return Err(ParleyError::Config(
                "session.ttl_minutes must be greater than 0".to_string(),
            ));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(ParleyError::Config(
                "session.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.chat.max_message_length == 0 {
            return Err(ParleyError::Config(
                "chat.max_message_length must be greater than 0".to_string(),
            ));
        }
        if self.chat.stream_buffer == 0 {
            return Err(ParleyError::Config(
                "chat.stream_buffer must be greater than 0".to_string(),
            ));
        }
        if self.feedback.queue_capacity == 0 {
            return Err(ParleyError::Config(
                "feedback.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if !matches!(self.backend.kind.as_str(), "scripted" | "openai") {
            return Err(ParleyError::Config(format!(
                "backend.kind must be 'scripted' or 'openai', got '{}'",
                self.backend.kind
            )));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Address the HTTP server binds to.
    pub host: String,
    /// HTTP server port.
    pub port: u16,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Data directory for the record database.
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            data_dir: "~/.parley/data".to_string(),
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session is evictable.
    pub ttl_minutes: u64,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Number of most recent turns replayed to the backend as context.
    pub context_messages: usize,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 24 * 60,
            sweep_interval_secs: 3600,
            context_messages: 8,
        }
    }
}

/// Turn processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Whether chat turns are accepted at all.
    pub enabled: bool,
    /// Maximum user message length in characters. Longer input is rejected.
    pub max_message_length: usize,
    /// Seconds to wait for the first fragment before failing the turn.
    pub first_fragment_timeout_secs: u64,
    /// Capacity of the per-turn event channel between processor and transport.
    pub stream_buffer: usize,
    /// Text appended to the partial answer of a stopped turn.
    pub stop_marker: String,
}

impl ChatConfig {
    pub fn first_fragment_timeout(&self) -> Duration {
        Duration::from_secs(self.first_fragment_timeout_secs)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_message_length: 1000,
            first_fragment_timeout_secs: 30,
            stream_buffer: 32,
            stop_marker: "[Response stopped by user]".to_string(),
        }
    }
}

/// Answer-generation and translation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// "scripted" (built-in canned answers) or "openai" (chat completions API).
    pub kind: String,
    /// Chat model used for answers.
    pub model: String,
    /// Model used by the translation endpoint.
    pub translation_model: String,
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Sampling temperature for translation requests.
    pub temperature: f32,
    /// System prompt prepended to every generation request.
    pub system_prompt: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "scripted".to_string(),
            model: "gpt-4o-mini".to_string(),
            translation_model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.1,
            system_prompt: "You are a helpful assistant. Keep answers concise (<=150 words). \
                            If the user writes in Roman Urdu, answer in Roman Urdu using A-Z letters only."
                .to_string(),
        }
    }
}

/// Feedback and event recording settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Records buffered between request handlers and the database writer.
    pub queue_capacity: usize,
    /// Database file name, relative to `general.data_dir`.
    pub database_file: String,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            database_file: "parley.db".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Requests per second allowed on the non-streaming routes.
    pub rate_limit_per_sec: u64,
    /// CORS origins. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Global request body limit.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 100,
            allowed_origins: Vec::new(),
            max_body_bytes: 64 * 1024,
        }
    }
}
