use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use super::stream::lines;
use super::{error_message, upstream_error, FragmentStream, ModelRequest};
use crate::config::LlmConfig;
use crate::error::{Result, VersoError};

/// Ollama: POST {base_url}/api/chat
pub(crate) struct Ollama {
    client: reqwest::Client,
    url: String,
}

impl Ollama {
    pub(crate) fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/api/chat", base_url.trim_end_matches('/')),
        }
    }

    pub(crate) async fn complete(&self, config: &LlmConfig, request: &ModelRequest) -> Result<String> {
        let resp = self.send(config, request, false).await?;
        let json: Value = resp.json().await?;
        parse_chunk(&json)?
            .ok_or_else(|| VersoError::Upstream("Ollama response missing 'message.content'".into()))
    }

    pub(crate) async fn stream(
        &self,
        config: &LlmConfig,
        request: &ModelRequest,
    ) -> Result<FragmentStream> {
        let resp = self.send(config, request, true).await?;
        Ok(Box::pin(ndjson_fragments(lines(resp.bytes_stream()))))
    }

    async fn send(
        &self,
        config: &LlmConfig,
        request: &ModelRequest,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": config.model,
            "messages": request.wire_messages(),
            "stream": stream,
            "options": {
                "temperature": config.temperature,
                "num_predict": config.max_tokens,
            }
        });

        tracing::debug!(model = %config.model, stream, "sending Ollama chat request");

        let resp = self.client.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(upstream_error("Ollama", status, &text));
        }
        Ok(resp)
    }
}

/// One JSON object per line; the last one has `"done": true`.
fn ndjson_fragments<S>(lines: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    try_stream! {
        let mut lines = Box::pin(lines);
        while let Some(line) = lines.next().await {
            let line = line?;
            let json: Value = serde_json::from_str(&line)?;
            if let Some(text) = parse_chunk(&json)? {
                if !text.is_empty() {
                    yield text;
                }
            }
            if json["done"].as_bool().unwrap_or(false) {
                break;
            }
        }
    }
}

fn parse_chunk(json: &Value) -> Result<Option<String>> {
    if let Some(message) = error_message(json) {
        return Err(VersoError::Upstream(format!("Ollama error: {message}")));
    }
    Ok(json["message"]["content"].as_str().map(|s| s.to_string()))
}
