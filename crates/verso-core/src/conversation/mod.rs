//! The Conversation Manager: per-user chat sessions about a poem, their
//! ordered turn log, and the exchange pipeline that replays a session into a
//! language model and records the answer.
//!
//! Every operation takes an explicit [`Caller`]. Anonymous callers may look
//! at a poem's chat view but cannot create sessions or post turns.

mod exchange;
mod history;
mod locks;
mod prompt;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::VersoConfig;
use crate::error::Result;
use crate::llm::ChatModel;
use crate::model::{Caller, ChatSession, Poem, Turn};
use crate::storage::SqliteStorage;

pub use exchange::{fallback_message, ExchangeFailure, ExchangeStream, Fragment};
pub use prompt::{build_request, system_instruction};

use locks::SessionLocks;

/// Knobs for prompt assembly and model calls.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub persona: String,
    pub language: String,
    /// Upper bound on waiting for the model's answer (complete mode) or its
    /// first fragment (streaming mode).
    pub timeout: Duration,
    pub max_question_chars: usize,
}

impl ExchangeSettings {
    pub fn from_config(config: &VersoConfig) -> Self {
        Self {
            persona: config.chat.persona.clone(),
            language: config.chat.language.clone(),
            timeout: Duration::from_secs(config.llm.timeout_secs.max(1)),
            max_question_chars: config.chat.max_question_chars.max(1),
        }
    }
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self::from_config(&VersoConfig::default_config())
    }
}

/// What a caller sees when opening a poem's chat page.
#[derive(Debug, Clone, Serialize)]
pub struct ChatView {
    pub poem: Poem,
    /// `None` for anonymous callers, whose view is read-only.
    pub session: Option<ChatSession>,
    pub turns: Vec<Turn>,
}

pub struct ConversationManager<M> {
    storage: SqliteStorage,
    model: Arc<M>,
    settings: ExchangeSettings,
    locks: SessionLocks,
}

impl<M> Clone for ConversationManager<M> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            model: Arc::clone(&self.model),
            settings: self.settings.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<M> std::fmt::Debug for ConversationManager<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationManager")
            .field("storage", &self.storage)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<M: ChatModel> ConversationManager<M> {
    pub fn new(storage: SqliteStorage, model: M, settings: ExchangeSettings) -> Self {
        Self {
            storage,
            model: Arc::new(model),
            settings,
            locks: SessionLocks::default(),
        }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn settings(&self) -> &ExchangeSettings {
        &self.settings
    }

    /// The chat page for a poem. Authenticated callers get their latest (or a
    /// forced new) session with its turns; anonymous callers get the poem only
    /// and nothing is written.
    pub async fn open_chat(&self, caller: &Caller, poem_id: i64, force_new: bool) -> Result<ChatView> {
        let poem = self.storage.get_poem(poem_id).await?;
        if caller.as_user().is_none() {
            return Ok(ChatView {
                poem,
                session: None,
                turns: Vec::new(),
            });
        }

        let session = self.resolve_or_create(caller, poem_id, force_new).await?;
        let turns = self.storage.list_turns(session.id).await?;
        Ok(ChatView {
            poem,
            session: Some(session),
            turns,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::error::VersoError;

    #[tokio::test]
    async fn anonymous_chat_view_is_read_only() {
        let fx = fixture().await;
        let manager = ConversationManager::new(
            fx.storage.clone(),
            FakeModel::new(Script::Answer("ok")),
            ExchangeSettings::default(),
        );

        let view = manager.open_chat(&Caller::Anonymous, fx.poem_id, false).await.unwrap();
        assert_eq!(view.poem.title, "The Sail");
        assert!(view.session.is_none());
        assert!(view.turns.is_empty());
        assert_eq!(fx.storage.counts().await.unwrap().sessions, 0);
    }

    #[tokio::test]
    async fn chat_view_creates_exactly_one_session_on_first_visit() {
        let fx = fixture().await;
        let manager = ConversationManager::new(
            fx.storage.clone(),
            FakeModel::new(Script::Answer("ok")),
            ExchangeSettings::default(),
        );

        let first = manager.open_chat(&fx.reader, fx.poem_id, false).await.unwrap();
        let second = manager.open_chat(&fx.reader, fx.poem_id, false).await.unwrap();
        assert_eq!(first.session.as_ref().unwrap().id, second.session.as_ref().unwrap().id);
        assert_eq!(fx.storage.counts().await.unwrap().sessions, 1);

        let fresh = manager.open_chat(&fx.reader, fx.poem_id, true).await.unwrap();
        assert_ne!(fresh.session.unwrap().id, first.session.unwrap().id);
    }

    #[tokio::test]
    async fn chat_view_for_missing_poem_is_not_found() {
        let fx = fixture().await;
        let manager = ConversationManager::new(
            fx.storage.clone(),
            FakeModel::new(Script::Answer("ok")),
            ExchangeSettings::default(),
        );
        let err = manager.open_chat(&fx.reader, 4242, false).await.unwrap_err();
        assert!(matches!(err, VersoError::NotFound(_)));
    }

    #[test]
    fn settings_follow_config() {
        let mut config = VersoConfig::default_config();
        config.llm.timeout_secs = 7;
        config.chat.language = "Russian".into();
        let settings = ExchangeSettings::from_config(&config);
        assert_eq!(settings.timeout, Duration::from_secs(7));
        assert_eq!(settings.language, "Russian");
    }
}
