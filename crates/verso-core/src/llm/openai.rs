use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use super::stream::{lines, parse_sse_line, SseEvent};
use super::{error_message, upstream_error, FragmentStream, ModelRequest};
use crate::config::LlmConfig;
use crate::error::{Result, VersoError};

/// OpenAI-style `POST {base}/chat/completions` endpoint (Groq, OpenAI,
/// DeepSeek, xAI, or any compatible server).
pub(crate) struct OpenAiCompatible {
    client: reqwest::Client,
    label: String,
    url: String,
    api_key: String,
}

impl OpenAiCompatible {
    pub(crate) fn new(client: reqwest::Client, label: &str, base_url: &str, api_key: String) -> Self {
        Self {
            client,
            label: label.to_string(),
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        }
    }

    pub(crate) async fn complete(&self, config: &LlmConfig, request: &ModelRequest) -> Result<String> {
        let resp = self.send(config, request, false).await?;
        let json: Value = resp.json().await?;
        parse_completion(&self.label, &json)
    }

    pub(crate) async fn stream(
        &self,
        config: &LlmConfig,
        request: &ModelRequest,
    ) -> Result<FragmentStream> {
        let resp = self.send(config, request, true).await?;
        Ok(Box::pin(sse_fragments(
            self.label.clone(),
            lines(resp.bytes_stream()),
        )))
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
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
            "stream": stream,
        });

        tracing::debug!(provider = %self.label, model = %config.model, stream, "sending chat completion");

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(upstream_error(&self.label, status, &text));
        }
        Ok(resp)
    }
}

/// Decode SSE lines into answer fragments, stopping at `[DONE]`.
fn sse_fragments<S>(label: String, lines: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    try_stream! {
        let mut lines = Box::pin(lines);
        while let Some(line) = lines.next().await {
            let line = line?;
            match parse_sse_line(&line) {
                Some(SseEvent::Done) => break,
                Some(SseEvent::Data(data)) => {
                    if let Some(text) = parse_delta(&label, &data)? {
                        yield text;
                    }
                }
                None => {}
            }
        }
    }
}

/// `choices[0].message.content` of a complete response.
fn parse_completion(label: &str, json: &Value) -> Result<String> {
    if let Some(message) = error_message(json) {
        return Err(VersoError::Upstream(format!("{label} API error: {message}")));
    }
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| VersoError::Upstream(format!("unexpected {label} response format: {json}")))
}

/// `choices[0].delta.content` of one streamed chunk. Role-only and final
/// chunks carry no content and yield `None`.
fn parse_delta(label: &str, data: &str) -> Result<Option<String>> {
    let json: Value = serde_json::from_str(data)?;
    if let Some(message) = error_message(&json) {
        return Err(VersoError::Upstream(format!("{label} stream error: {message}")));
    }
    Ok(json["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelMessage;
    use axum::routing::post;
    use axum::Router;

    fn request() -> ModelRequest {
        ModelRequest {
            system: "You are a literary critic.".into(),
            messages: vec![ModelMessage::user("What is the theme?")],
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    fn endpoint(base_url: &str) -> OpenAiCompatible {
        OpenAiCompatible::new(reqwest::Client::new(), "groq", base_url, "test-key".into())
    }

    #[test]
    fn parse_completion_reads_content() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Loneliness."}}]
        });
        assert_eq!(parse_completion("groq", &json).unwrap(), "Loneliness.");
    }

    #[test]
    fn parse_completion_surfaces_api_error() {
        let json = serde_json::json!({"error": {"message": "Rate limit reached"}});
        let err = parse_completion("groq", &json).unwrap_err();
        assert!(err.is_upstream());
        assert!(err.to_string().contains("Rate limit reached"));
    }

    #[test]
    fn parse_completion_rejects_unexpected_shape() {
        let err = parse_completion("groq", &serde_json::json!({"choices": []})).unwrap_err();
        assert!(err.to_string().contains("unexpected groq response format"));
    }

    #[test]
    fn parse_delta_variants() {
        assert_eq!(
            parse_delta("groq", r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            Some("Hel".into())
        );
        assert_eq!(
            parse_delta("groq", r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            None
        );
        assert!(parse_delta("groq", "{not json").unwrap_err().is_upstream());
    }

    #[tokio::test]
    async fn complete_against_local_server() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|axum::Json(body): axum::Json<Value>| async move {
                assert_eq!(body["stream"], false);
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["content"], "What is the theme?");
                axum::Json(serde_json::json!({
                    "choices": [{"message": {"content": "Freedom and exile."}}]
                }))
            }),
        );
        let base = serve(router).await;

        let answer = endpoint(&base)
            .complete(&LlmConfig::default(), &request())
            .await
            .unwrap();
        assert_eq!(answer, "Freedom and exile.");
    }

    #[tokio::test]
    async fn stream_against_local_server() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                let body = concat!(
                    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Free\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"dom.\"}}]}\n\n",
                    "data: [DONE]\n\n",
                );
                ([("content-type", "text/event-stream")], body)
            }),
        );
        let base = serve(router).await;

        let stream = endpoint(&base)
            .stream(&LlmConfig::default(), &request())
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["Free", "dom."]);
    }

    #[tokio::test]
    async fn stalled_body_hits_read_timeout() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                let first = futures_util::stream::iter([Ok::<_, std::convert::Infallible>(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Free\"}}]}\n\n",
                )]);
                let body = axum::body::Body::from_stream(first.chain(futures_util::stream::pending()));
                ([("content-type", "text/event-stream")], body)
            }),
        );
        let base = serve(router).await;

        let client = reqwest::Client::builder()
            .read_timeout(std::time::Duration::from_millis(200))
            .build()
            .unwrap();
        let endpoint = OpenAiCompatible::new(client, "groq", &base, "test-key".into());
        let mut stream = endpoint
            .stream(&LlmConfig::default(), &request())
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "Free");
        let next = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
            .await
            .expect("read timeout ends the stream");
        assert!(matches!(next, Some(Err(_))));
    }

    #[tokio::test]
    async fn error_status_becomes_upstream_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    axum::Json(serde_json::json!({"error": {"message": "Invalid API Key"}})),
                )
            }),
        );
        let base = serve(router).await;

        let err = endpoint(&base)
            .complete(&LlmConfig::default(), &request())
            .await
            .unwrap_err();
        assert!(err.is_upstream());
        assert!(err.to_string().contains("Invalid API Key"));
    }
}
