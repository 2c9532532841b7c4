use uuid::Uuid;

use super::ConversationManager;
use crate::error::{Result, VersoError};
use crate::llm::ChatModel;
use crate::model::{Caller, ChatSession};

impl<M: ChatModel> ConversationManager<M> {
    /// Latest session of the caller for this poem, or a new one when none
    /// exists or `force_new` is set.
    pub async fn resolve_or_create(
        &self,
        caller: &Caller,
        poem_id: i64,
        force_new: bool,
    ) -> Result<ChatSession> {
        let user = caller.require_user()?;
        self.storage.open_session(user.id, poem_id, force_new).await
    }

    /// The caller's sessions for a poem, newest first.
    pub async fn sessions_for_poem(&self, caller: &Caller, poem_id: i64) -> Result<Vec<ChatSession>> {
        let user = caller.require_user()?;
        self.storage.get_poem(poem_id).await?;
        self.storage.sessions_for(user.id, Some(poem_id)).await
    }

    /// Load a session on behalf of its owner. Foreign sessions are reported
    /// exactly like missing ones.
    pub async fn owned_session(&self, caller: &Caller, session_id: Uuid) -> Result<ChatSession> {
        let user = caller.require_user()?;
        match self.storage.get_session(session_id).await? {
            Some(session) if session.user_id == user.id => Ok(session),
            _ => Err(VersoError::NotFound(format!("session {session_id}"))),
        }
    }
}
