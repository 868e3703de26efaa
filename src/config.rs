//! Configuration types for the GlitchCube service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::tools::types::ToolIntent;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "GLITCHCUBE_CONFIG";

/// Top-level configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeConfig {
    /// HTTP endpoint settings.
    pub server: ServerConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Conversation lifecycle settings.
    pub conversation: ConversationConfig,
    /// Conversation store settings.
    pub store: StoreConfig,
    /// Tool execution settings.
    pub tools: ToolsConfig,
    /// Background tool-intention queue settings.
    pub dispatch: DispatchConfig,
    /// Home Assistant connection and exposed services.
    pub home_assistant: HomeAssistantConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Language reported when the request does not carry one.
    pub default_language: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 4567,
            default_language: "en".to_owned(),
        }
    }
}

/// Language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (without `/v1`).
    pub base_url: String,
    /// API key. Empty means "read from the environment".
    pub api_key: String,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Hard timeout for one completion request.
    pub timeout_secs: u64,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
    /// Number of prior turns replayed as history.
    pub history_turns: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api".to_owned(),
            api_key: String::new(),
            model: "google/gemini-2.5-flash".to_owned(),
            timeout_secs: 120,
            temperature: 0.8,
            max_tokens: 1024,
            history_turns: 10,
        }
    }
}

impl LlmConfig {
    /// Returns the configured API key, falling back to `OPENROUTER_API_KEY`
    /// and then `OPENAI_API_KEY`.
    pub fn effective_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.clone());
        }
        ["OPENROUTER_API_KEY", "OPENAI_API_KEY"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
    }
}

/// Conversation lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// A conversation whose last turn is older than this is treated as abandoned.
    pub staleness_window_secs: u64,
    /// Seconds the voice front-end waits before listening again.
    pub continue_delay_secs: u64,
    /// Persona used when nothing else has been selected.
    pub default_persona: String,
    /// Directory of `<persona>.md` prompt overlays.
    pub personas_dir: Option<PathBuf>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            staleness_window_secs: 300,
            continue_delay_secs: 3,
            default_persona: "buddy".to_owned(),
            personas_dir: None,
        }
    }
}

/// Conversation store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("glitchcube.db"),
        }
    }
}

/// Tool execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Maximum time for one tool invocation.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Background dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of queued, not-yet-processed intention batches.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// A Home Assistant service exposed to the model as a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HassServiceConfig {
    /// Tool name in `<domain>.<service>` form.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// Whether the service answers a question or changes the world.
    #[serde(default = "default_service_intent")]
    pub intent: ToolIntent,
}

fn default_service_intent() -> ToolIntent {
    ToolIntent::Action
}

/// Home Assistant configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// Base URL, e.g. `http://homeassistant.local:8123`. Empty disables the tools.
    pub url: String,
    /// Long-lived access token. Empty means "read `HASS_TOKEN`".
    pub token: String,
    /// Request timeout.
    pub timeout_secs: u64,
    /// Services registered as tools.
    pub services: Vec<HassServiceConfig>,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        let service = |name: &str, description: &str| HassServiceConfig {
            name: name.to_owned(),
            description: description.to_owned(),
            intent: ToolIntent::Action,
        };
        Self {
            url: String::new(),
            token: String::new(),
            timeout_secs: 10,
            services: vec![
                service("light.turn_on", "Turn on lights; accepts entity_id, rgb_color, brightness, effect"),
                service("light.turn_off", "Turn off lights; accepts entity_id"),
                service("scene.turn_on", "Activate a lighting scene; accepts entity_id"),
                service("script.turn_on", "Run an effect script; accepts entity_id"),
                service("tts.speak", "Make an announcement; accepts entity_id, message"),
            ],
        }
    }
}

impl HomeAssistantConfig {
    /// Whether Home Assistant integration is configured.
    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Returns the configured token, falling back to `HASS_TOKEN`.
    pub fn effective_token(&self) -> Option<String> {
        if !self.token.trim().is_empty() {
            return Some(self.token.clone());
        }
        std::env::var("HASS_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the daily rolling log file. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
    /// Default filter directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            filter: "info".to_owned(),
        }
    }
}

/// Returns the default data directory: `~/.local/share/glitchcube`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("glitchcube")
}

impl CubeConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::CubeError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::CubeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the config file path: `$GLITCHCUBE_CONFIG`, else
    /// `~/.config/glitchcube/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp/glitchcube-config"))
            .join("glitchcube")
            .join("config.toml")
    }

    /// Load from the default path, or use defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be parsed.
    pub fn load_or_default() -> crate::error::Result<Self> {
        let path = Self::default_config_path();
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values that would make the pipeline misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`CubeError::Config`](crate::error::CubeError::Config) naming the bad field.
    pub fn validate(&self) -> crate::error::Result<()> {
        let fail = |msg: &str| Err(crate::error::CubeError::Config(msg.to_owned()));
        if self.llm.model.trim().is_empty() {
            return fail("llm.model must not be empty");
        }
        if self.llm.timeout_secs == 0 {
            return fail("llm.timeout_secs must be greater than zero");
        }
        if self.tools.timeout_secs == 0 {
            return fail("tools.timeout_secs must be greater than zero");
        }
        if self.conversation.staleness_window_secs == 0 {
            return fail("conversation.staleness_window_secs must be greater than zero");
        }
        if self.dispatch.queue_capacity == 0 {
            return fail("dispatch.queue_capacity must be greater than zero");
        }
        if self.conversation.default_persona.trim().is_empty() {
            return fail("conversation.default_persona must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CubeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 4567);
        assert_eq!(config.conversation.staleness_window_secs, 300);
        assert_eq!(config.conversation.continue_delay_secs, 3);
        assert_eq!(config.llm.timeout_secs, 120);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CubeConfig::default();
        config.server.port = 8080;
        config.conversation.default_persona = "jax".to_owned();
        config.llm.temperature = 0.2;

        config.save_to_file(&path).expect("save");
        let loaded = CubeConfig::from_file(&path).expect("load");
        assert_eq!(loaded.server.port, 8080);
        assert_eq!(loaded.conversation.default_persona, "jax");
        assert!((loaded.llm.temperature - 0.2).abs() < f64::EPSILON);
        assert_eq!(loaded.home_assistant.services.len(), 5);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = CubeConfig::from_file(std::path::Path::new("/nonexistent/glitchcube.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").expect("write");
        let result = CubeConfig::from_file(&path);
        assert!(matches!(result, Err(crate::error::CubeError::Config(_))));
    }

    #[test]
    fn partial_section_uses_defaults() {
        let config: CubeConfig = toml::from_str(
            r#"
[conversation]
staleness_window_secs = 60
"#,
        )
        .unwrap();
        assert_eq!(config.conversation.staleness_window_secs, 60);
        assert_eq!(config.conversation.continue_delay_secs, 3);
        assert_eq!(config.server.port, 4567);
    }

    #[test]
    fn hass_service_intent_defaults_to_action() {
        let config: CubeConfig = toml::from_str(
            r#"
[home_assistant]
url = "http://ha.local:8123"

[[home_assistant.services]]
name = "light.turn_on"
description = "lights"

[[home_assistant.services]]
name = "sensor.read"
description = "read a sensor"
intent = "query"
"#,
        )
        .unwrap();
        assert!(config.home_assistant.is_enabled());
        assert_eq!(config.home_assistant.services.len(), 2);
        assert_eq!(config.home_assistant.services[0].intent, ToolIntent::Action);
        assert_eq!(config.home_assistant.services[1].intent, ToolIntent::Query);
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut config = CubeConfig::default();
        config.llm.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = CubeConfig::default();
        config.tools.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_model() {
        let mut config = CubeConfig::default();
        config.llm.model = "  ".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_api_key_wins() {
        let config = LlmConfig {
            api_key: "sk-test".to_owned(),
            ..LlmConfig::default()
        };
        assert_eq!(config.effective_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn hass_disabled_without_url() {
        assert!(!HomeAssistantConfig::default().is_enabled());
    }
}
