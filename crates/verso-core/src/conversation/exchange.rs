use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::{prompt, ConversationManager};
use crate::error::{Result, VersoError};
use crate::llm::{ChatModel, FragmentStream, ModelRequest};
use crate::model::{Caller, Role, Turn};
use crate::storage::SqliteStorage;

/// One item of a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum Fragment {
    /// A piece of answer text, in delivery order.
    Text(String),
    /// Terminal failure marker carrying the user-facing fallback message.
    Error(String),
}

/// Why the model produced no usable answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeFailure {
    Timeout,
    Empty,
    Backend(String),
}

/// The text stored and shown in place of an answer when the model fails.
pub fn fallback_message(failure: &ExchangeFailure) -> String {
    match failure {
        ExchangeFailure::Timeout => {
            "The model did not answer in time. Please ask again in a moment.".to_string()
        }
        ExchangeFailure::Empty => {
            "The model returned an empty answer. Please try rephrasing the question.".to_string()
        }
        ExchangeFailure::Backend(detail) => {
            format!("The model is unavailable right now ({detail}). Please try again later.")
        }
    }
}

const UNSAVED_ANSWER: &str = "The answer could not be saved to the conversation history.";

fn classify(err: &VersoError) -> ExchangeFailure {
    if err.is_timeout() {
        ExchangeFailure::Timeout
    } else {
        ExchangeFailure::Backend(err.to_string())
    }
}

/// Lazily produced answer of a streaming exchange.
///
/// Dropping it before the end stops consuming the model and stores whatever
/// text was already handed out as the model turn.
pub struct ExchangeStream {
    session_id: Uuid,
    inner: Pin<Box<dyn Stream<Item = Fragment> + Send>>,
}

impl ExchangeStream {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Drain the stream into the answer text and the terminal error, if any.
    pub async fn collect_answer(mut self) -> (String, Option<String>) {
        let mut text = String::new();
        let mut error = None;
        while let Some(fragment) = self.next().await {
            match fragment {
                Fragment::Text(t) => text.push_str(&t),
                Fragment::Error(e) => error = Some(e),
            }
        }
        (text, error)
    }
}

impl Stream for ExchangeStream {
    type Item = Fragment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Fragment>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ExchangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeStream")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Collects delivered fragments and writes the model turn exactly once:
/// explicitly at the end of the stream, or from `Drop` when the consumer
/// goes away first. Holds the session lock until the turn is written.
struct TurnSink {
    storage: SqliteStorage,
    session_id: Uuid,
    text: String,
    fragments: usize,
    committed: bool,
    guard: Option<OwnedMutexGuard<()>>,
}

impl TurnSink {
    fn new(storage: SqliteStorage, session_id: Uuid, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            storage,
            session_id,
            text: String::new(),
            fragments: 0,
            committed: false,
            guard: Some(guard),
        }
    }

    fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    /// Store the accumulated text, or `replacement` instead when given.
    async fn commit(&mut self, replacement: Option<String>) -> Result<Turn> {
        self.committed = true;
        let content = replacement.unwrap_or_else(|| std::mem::take(&mut self.text));
        let result = self
            .storage
            .append_turn(self.session_id, Role::Model, &content)
            .await;
        self.guard.take();
        result
    }
}

impl Drop for TurnSink {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if self.text.is_empty() {
            tracing::debug!(session_id = %self.session_id, "stream dropped before any answer text");
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                session_id = %self.session_id,
                "stream dropped outside a runtime; partial answer not saved"
            );
            return;
        };

        let storage = self.storage.clone();
        let session_id = self.session_id;
        let text = std::mem::take(&mut self.text);
        let fragments = self.fragments;
        let guard = self.guard.take();
        handle.spawn(async move {
            let _guard = guard;
            match storage.append_turn(session_id, Role::Model, &text).await {
                Ok(_) => tracing::info!(%session_id, fragments, "saved partial answer after cancellation"),
                Err(e) => tracing::error!(%session_id, error = %e, "failed to save partial answer"),
            }
        });
    }
}

impl<M: ChatModel> ConversationManager<M> {
    /// Trim the question and enforce the length limits.
    pub fn validate_question(&self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(VersoError::InvalidInput("question cannot be empty".into()));
        }
        let len = question.chars().count();
        if len > self.settings.max_question_chars {
            return Err(VersoError::InvalidInput(format!(
                "question is {len} characters, the limit is {}",
                self.settings.max_question_chars
            )));
        }
        Ok(question.to_string())
    }

    /// Complete-mode exchange: store the question, ask the model, store and
    /// return the answer. Model failures come back as the fallback message,
    /// which is also what gets stored.
    pub async fn exchange(&self, caller: &Caller, session_id: Uuid, question: &str) -> Result<String> {
        caller.require_user()?;
        let question = self.validate_question(question)?;
        let session = self.owned_session(caller, session_id).await?;

        let _guard = self.locks.acquire(session.id).await;
        let request = self.prepare(session.id, session.poem_id, &question).await?;

        let answer = match tokio::time::timeout(self.settings.timeout, self.model.complete(&request)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text,
            Ok(Ok(_)) => {
                tracing::warn!(session_id = %session.id, model = self.model.name(), "empty answer");
                fallback_message(&ExchangeFailure::Empty)
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session.id, model = self.model.name(), error = %e, "model call failed");
                fallback_message(&classify(&e))
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session.id,
                    model = self.model.name(),
                    timeout_secs = self.settings.timeout.as_secs(),
                    "model call timed out"
                );
                fallback_message(&ExchangeFailure::Timeout)
            }
        };

        self.storage
            .append_turn(session.id, Role::Model, &answer)
            .await?;
        tracing::debug!(session_id = %session.id, chars = answer.len(), "exchange complete");
        Ok(answer)
    }

    /// Streaming-mode exchange. The question is stored before this returns;
    /// the answer is stored when the returned stream ends or is dropped.
    pub async fn exchange_stream(
        &self,
        caller: &Caller,
        session_id: Uuid,
        question: &str,
    ) -> Result<ExchangeStream> {
        caller.require_user()?;
        let question = self.validate_question(question)?;
        let session = self.owned_session(caller, session_id).await?;

        let guard = self.locks.acquire(session.id).await;
        let request = self.prepare(session.id, session.poem_id, &question).await?;

        let sink = TurnSink::new(self.storage.clone(), session.id, guard);
        let model = Arc::clone(&self.model);
        let timeout = self.settings.timeout;

        let inner = async_stream::stream! {
            let mut sink = sink;
            let mut failure = None;

            match open_fragments(model.as_ref(), &request, timeout).await {
                Ok(mut fragments) => {
                    loop {
                        // Every fragment, not just the first, must arrive in time.
                        let next = match tokio::time::timeout(timeout, fragments.next()).await {
                            Ok(next) => next,
                            Err(_) => {
                                tracing::warn!(session_id = %sink.session_id, fragments = sink.fragments, "model stream went quiet");
                                failure = Some(ExchangeFailure::Timeout);
                                break;
                            }
                        };

                        match next {
                            Some(Ok(text)) if text.is_empty() => {}
                            Some(Ok(text)) => {
                                sink.push(&text);
                                yield Fragment::Text(text);
                            }
                            Some(Err(e)) => {
                                tracing::warn!(session_id = %sink.session_id, error = %e, "model stream broke");
                                failure = Some(classify(&e));
                                break;
                            }
                            None => break,
                        }
                    }
                }
                Err(failure_kind) => failure = Some(failure_kind),
            }

            if failure.is_none() && !sink.has_text() {
                failure = Some(ExchangeFailure::Empty);
            }

            match failure {
                None => {
                    if let Err(e) = sink.commit(None).await {
                        tracing::error!(session_id = %sink.session_id, error = %e, "failed to save answer");
                        yield Fragment::Error(UNSAVED_ANSWER.to_string());
                    }
                }
                Some(failure) => {
                    let message = fallback_message(&failure);
                    let replacement = (!sink.has_text()).then(|| message.clone());
                    if let Err(e) = sink.commit(replacement).await {
                        tracing::error!(session_id = %sink.session_id, error = %e, "failed to save failed answer");
                    }
                    yield Fragment::Error(message);
                }
            }
        };

        Ok(ExchangeStream {
            session_id: session.id,
            inner: Box::pin(inner),
        })
    }

    /// The non-session variant: ask about a poem in the caller's latest
    /// session for it, creating one when needed.
    pub async fn ask_about_poem(&self, caller: &Caller, poem_id: i64, question: &str) -> Result<String> {
        caller.require_user()?;
        let question = self.validate_question(question)?;
        let session = self.resolve_or_create(caller, poem_id, false).await?;
        self.exchange(caller, session.id, &question).await
    }

    /// Load the poem and prior turns, store the question, build the request.
    /// Must run with the session lock held.
    async fn prepare(&self, session_id: Uuid, poem_id: i64, question: &str) -> Result<ModelRequest> {
        let poem = self.storage.get_poem(poem_id).await?;
        let history = self.storage.list_turns(session_id).await?;
        self.storage
            .append_turn(session_id, Role::User, question)
            .await?;
        tracing::debug!(%session_id, poem_id, prior_turns = history.len(), "question stored");
        Ok(prompt::build_request(&self.settings, &poem, &history, question))
    }
}

async fn open_fragments<M: ChatModel>(
    model: &M,
    request: &ModelRequest,
    timeout: Duration,
) -> std::result::Result<FragmentStream, ExchangeFailure> {
    match tokio::time::timeout(timeout, model.stream(request)).await {
        Ok(Ok(fragments)) => Ok(fragments),
        Ok(Err(e)) => {
            tracing::warn!(model = model.name(), error = %e, "model stream failed to open");
            Err(classify(&e))
        }
        Err(_) => {
            tracing::warn!(model = model.name(), "model stream timed out before opening");
            Err(ExchangeFailure::Timeout)
        }
    }
}
