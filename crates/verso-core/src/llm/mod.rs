mod echo;
mod ollama;
mod openai;
mod reasoning;
mod stream;

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::Serialize;

use crate::config::{resolve_api_key, LlmConfig};
use crate::error::{Result, VersoError};

pub use reasoning::{strip_reasoning, ReasoningFilter};

/// Incremental answer text. Each item is one fragment as delivered upstream;
/// an `Err` item ends the stream abnormally.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Role vocabulary of chat-completion APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ModelMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// One model invocation: a system instruction plus the ordered conversation,
/// newest user message last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<ModelMessage>,
}

impl ModelRequest {
    /// System instruction followed by the conversation, as sent on the wire.
    pub fn wire_messages(&self) -> Vec<ModelMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if !self.system.is_empty() {
            out.push(ModelMessage::system(self.system.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    /// The message the model is being asked to answer.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

/// A language-model backend able to answer a [`ModelRequest`] in full or as
/// a stream of text fragments.
pub trait ChatModel: Send + Sync + 'static {
    /// Short backend label used in logs.
    fn name(&self) -> &str;

    fn complete(
        &self,
        request: &ModelRequest,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    fn stream(
        &self,
        request: &ModelRequest,
    ) -> impl std::future::Future<Output = Result<FragmentStream>> + Send;
}

/// The configured production backend.
pub struct LlmService {
    backend: Backend,
    config: LlmConfig,
}

impl std::fmt::Debug for LlmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmService")
            .field("provider", &self.config.provider)
            .field("model", &self.config.model)
            .finish()
    }
}

enum Backend {
    OpenAi(openai::OpenAiCompatible),
    Ollama(ollama::Ollama),
    Echo,
}

/// Hosted OpenAI-compatible providers: (name, default base URL, API key env var).
const OPENAI_COMPATIBLE: &[(&str, &str, &str)] = &[
    ("groq", "https://api.groq.com/openai/v1", "GROQ_API_KEY"),
    ("openai", "https://api.openai.com/v1", "OPENAI_API_KEY"),
    ("deepseek", "https://api.deepseek.com/v1", "DEEPSEEK_API_KEY"),
    ("xai", "https://api.x.ai/v1", "XAI_API_KEY"),
];

const OLLAMA_BASE_URL: &str = "http://localhost:11434";

impl LlmService {
    /// Create the service for `config.provider`. Hosted providers fail here
    /// when no API key can be resolved.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let provider = config.provider.trim().to_lowercase();
        let client = || {
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(config.timeout_secs.max(1)))
                .read_timeout(Duration::from_secs(config.timeout_secs.max(1)))
                .build()
                .map_err(VersoError::Http)
        };

        let backend = if let Some((name, default_url, env_var)) =
            OPENAI_COMPATIBLE.iter().find(|(name, _, _)| *name == provider)
        {
            let api_key = resolve_api_key(config, env_var)?;
            let base_url = config.base_url.as_deref().unwrap_or(*default_url);
            Backend::OpenAi(openai::OpenAiCompatible::new(client()?, name, base_url, api_key))
        } else {
            match provider.as_str() {
                "ollama" => {
                    let base_url = config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL);
                    Backend::Ollama(ollama::Ollama::new(client()?, base_url))
                }
                "echo" => Backend::Echo,
                other => {
                    return Err(VersoError::Config(format!(
                        "unknown LLM provider: '{other}' (expected one of {})",
                        crate::config::VALID_LLM_PROVIDERS.join(", ")
                    )));
                }
            }
        };

        Ok(Self {
            backend,
            config: config.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.backend, Backend::Echo)
    }
}

impl ChatModel for LlmService {
    fn name(&self) -> &str {
        &self.config.provider
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        let raw = match &self.backend {
            Backend::OpenAi(api) => api.complete(&self.config, request).await?,
            Backend::Ollama(api) => api.complete(&self.config, request).await?,
            Backend::Echo => echo::reply(request),
        };

        if self.config.strip_reasoning {
            Ok(strip_reasoning(&raw))
        } else {
            Ok(raw)
        }
    }

    async fn stream(&self, request: &ModelRequest) -> Result<FragmentStream> {
        let fragments = match &self.backend {
            Backend::OpenAi(api) => api.stream(&self.config, request).await?,
            Backend::Ollama(api) => api.stream(&self.config, request).await?,
            Backend::Echo => echo::stream(request),
        };

        if self.config.strip_reasoning {
            Ok(filter_reasoning(fragments))
        } else {
            Ok(fragments)
        }
    }
}

/// Apply a [`ReasoningFilter`] to a fragment stream, dropping fragments that
/// end up empty.
pub fn filter_reasoning(fragments: FragmentStream) -> FragmentStream {
    Box::pin(async_stream::stream! {
        let mut fragments = fragments;
        let mut filter = ReasoningFilter::new();
        let mut failure = None;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(text) => {
                    let visible = filter.push(&text);
                    if !visible.is_empty() {
                        yield Ok(visible);
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let visible = filter.finish();
        if !visible.is_empty() {
            yield Ok(visible);
        }
        if let Some(e) = failure {
            yield Err(e);
        }
    })
}

/// Build an `Upstream` error from a non-success response body, preferring the
/// provider's own `error.message` when present.
pub(crate) fn upstream_error(provider: &str, status: reqwest::StatusCode, body: &str) -> VersoError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| error_message(&json))
        .unwrap_or_else(|| body.trim().chars().take(300).collect());
    VersoError::Upstream(format!("{provider} API error {status}: {message}"))
}

/// Extract `error.message` (OpenAI style) or a bare `error` string (Ollama style).
pub(crate) fn error_message(json: &serde_json::Value) -> Option<String> {
    let error = json.get("error").filter(|e| !e.is_null())?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(|s| s.to_string())
        .or_else(|| Some(error.to_string()))
}
