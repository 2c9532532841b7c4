use crate::error::{Result, VersoError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersoConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom path for the SQLite database. Defaults to `~/.config/verso/verso.db`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_web_host")]
    pub host: String,
    /// Header carrying the authenticated user id, set by the fronting auth layer.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// Allow `text/event-stream` responses on the chat endpoint.
    #[serde(default = "default_true")]
    pub streaming: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
            host: default_web_host(),
            identity_header: default_identity_header(),
            streaming: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub env_var: Option<String>,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on waiting for the model's first byte.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Remove `<think>...</think>` blocks emitted by reasoning models.
    #[serde(default = "default_true")]
    pub strip_reasoning: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            base_url: None,
            env_var: None,
            max_tokens: default_llm_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            strip_reasoning: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Persona placed at the top of every system instruction.
    #[serde(default = "default_persona")]
    pub persona: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            language: default_language(),
            max_question_chars: default_max_question_chars(),
        }
    }
}

/// Valid LLM provider names.
pub const VALID_LLM_PROVIDERS: &[&str] = &["groq", "openai", "deepseek", "xai", "ollama", "echo"];

// -- Defaults --

fn default_web_port() -> u16 {
    8088
}
fn default_web_host() -> String {
    "127.0.0.1".to_string()
}
fn default_identity_header() -> String {
    "x-verso-user".to_string()
}
fn default_true() -> bool {
    true
}
fn default_llm_provider() -> String {
    "groq".to_string()
}
fn default_llm_model() -> String {
    "llama-3.1-8b-instant".to_string()
}
fn default_llm_max_tokens() -> usize {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_timeout_secs() -> u64 {
    25
}
fn default_persona() -> String {
    "You are a professional literary scholar and critic. You discuss the poem below \
     with the reader: its themes, imagery, form, and historical context. Quote the \
     text exactly when you cite it and never invent lines that are not in it."
        .to_string()
}
fn default_language() -> String {
    "English".to_string()
}
fn default_max_question_chars() -> usize {
    4000
}

impl VersoConfig {
    /// Load configuration with a layered merge:
    /// 1. ~/.config/verso/config.toml (global)
    /// 2. .verso/config.toml (project)
    /// 3. .verso/config.local.toml (local, gitignored)
    /// 4. `VERSO__SECTION__KEY` environment variables
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        // Layer 1: Global config
        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                builder = builder.add_source(File::from(global_path).required(false));
            }
        }

        // Layer 2 and 3: Project and local config
        if let Some(dir) = project_dir {
            let project_config = dir.join(".verso").join("config.toml");
            if project_config.exists() {
                builder = builder.add_source(File::from(project_config).required(false));
            }

            let local_config = dir.join(".verso").join("config.local.toml");
            if local_config.exists() {
                builder = builder.add_source(File::from(local_config).required(false));
            }
        }

        // Layer 4: Environment
        builder = builder.add_source(
            Environment::with_prefix("VERSO")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| VersoError::Config(e.to_string()))?;

        let mut cfg: Self = config
            .try_deserialize()
            .map_err(|e| VersoError::Config(e.to_string()))?;

        cfg.validate();
        Ok(cfg)
    }

    /// Load with defaults only (no files).
    pub fn default_config() -> Self {
        Self {
            storage: StorageConfig::default(),
            web: WebConfig::default(),
            llm: LlmConfig::default(),
            chat: ChatConfig::default(),
        }
    }

    /// Validate config values, clamping out-of-range values and logging warnings.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !VALID_LLM_PROVIDERS.contains(&self.llm.provider.as_str()) {
            warnings.push(format!(
                "unknown LLM provider '{}', valid: {}",
                self.llm.provider,
                VALID_LLM_PROVIDERS.join(", ")
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            warnings.push(format!(
                "llm.temperature = {} out of range [0.0, 2.0], clamping",
                self.llm.temperature
            ));
            self.llm.temperature = self.llm.temperature.clamp(0.0, 2.0);
        }

        if self.llm.max_tokens == 0 {
            warnings.push("llm.max_tokens = 0, setting to 256".to_string());
            self.llm.max_tokens = 256;
        }
        if self.llm.timeout_secs == 0 {
            warnings.push("llm.timeout_secs = 0, setting to 1".to_string());
            self.llm.timeout_secs = 1;
        }
        if self.chat.max_question_chars == 0 {
            warnings.push("chat.max_question_chars = 0, setting to 1".to_string());
            self.chat.max_question_chars = 1;
        }
        if self.web.identity_header.trim().is_empty() {
            warnings.push("web.identity_header is empty, using x-verso-user".to_string());
            self.web.identity_header = default_identity_header();
        }

        for w in &warnings {
            tracing::warn!("config: {}", w);
        }

        warnings
    }

    /// Serialize to TOML, for writing a starter config file.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VersoError::Config(e.to_string()))
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("verso").join("config.toml"))
}

/// Resolve an API key from config, a custom env var, or a default env var.
pub fn resolve_api_key(config: &LlmConfig, default_env_var: &str) -> Result<String> {
    if let Some(ref key) = config.api_key {
        if !key.is_empty() {
            return Ok(key.clone());
        }
    }

    let env_var_name = config.env_var.as_deref().unwrap_or(default_env_var);

    std::env::var(env_var_name).map_err(|_| {
        VersoError::Config(format!(
            "{} LLM provider requires an API key (set llm.api_key or {})",
            config.provider, env_var_name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VersoConfig::default_config();
        assert_eq!(config.llm.provider, "groq");
        assert_eq!(config.llm.timeout_secs, 25);
        assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.web.identity_header, "x-verso-user");
        assert!(config.web.streaming);
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = VersoConfig::default_config();
        let toml_str = config.to_toml().unwrap();
        let parsed: VersoConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.chat.language, config.chat.language);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: VersoConfig = toml::from_str(
            r#"
            [llm]
            provider = "ollama"
            model = "qwen3"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.llm.provider, "ollama");
        assert_eq!(parsed.llm.max_tokens, 1024);
        assert_eq!(parsed.web.port, 8088);
        assert_eq!(parsed.chat.max_question_chars, 4000);
    }

    #[test]
    fn test_load_project_config() {
        let dir = std::env::temp_dir().join(format!("verso-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join(".verso")).unwrap();
        std::fs::write(
            dir.join(".verso").join("config.toml"),
            "[web]\nport = 9100\n[llm]\nprovider = \"echo\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.join(".verso").join("config.local.toml"),
            "[web]\nport = 9200\n",
        )
        .unwrap();

        let config = VersoConfig::load(Some(&dir)).unwrap();
        assert_eq!(config.web.port, 9200, "local layer overrides project layer");
        assert_eq!(config.llm.provider, "echo");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = VersoConfig::default_config();
        config.llm.temperature = 3.5;
        config.llm.max_tokens = 0;
        config.llm.timeout_secs = 0;
        config.llm.provider = "banana".into();

        let warnings = config.validate();
        assert_eq!(warnings.len(), 4);
        assert!((config.llm.temperature - 2.0).abs() < f32::EPSILON);
        assert_eq!(config.llm.max_tokens, 256);
        assert_eq!(config.llm.timeout_secs, 1);
    }

    #[test]
    fn test_validate_default_is_clean() {
        let mut config = VersoConfig::default_config();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_resolve_api_key_from_config() {
        let config = LlmConfig {
            api_key: Some("config-key".into()),
            ..Default::default()
        };
        let key = resolve_api_key(&config, "GROQ_API_KEY").unwrap();
        assert_eq!(key, "config-key");
    }

    #[test]
    fn test_resolve_api_key_custom_env_var() {
        std::env::set_var("VERSO_TEST_LLM_KEY", "env-llm-key");
        let config = LlmConfig {
            api_key: None,
            env_var: Some("VERSO_TEST_LLM_KEY".into()),
            ..Default::default()
        };
        let key = resolve_api_key(&config, "GROQ_API_KEY").unwrap();
        assert_eq!(key, "env-llm-key");
        std::env::remove_var("VERSO_TEST_LLM_KEY");
    }

    #[test]
    fn test_resolve_api_key_missing() {
        let config = LlmConfig {
            api_key: Some(String::new()),
            env_var: Some("VERSO_TEST_KEY_THAT_IS_NEVER_SET".into()),
            ..Default::default()
        };
        let err = resolve_api_key(&config, "GROQ_API_KEY").unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}
