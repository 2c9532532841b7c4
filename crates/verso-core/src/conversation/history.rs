use uuid::Uuid;

use super::ConversationManager;
use crate::error::Result;
use crate::llm::ChatModel;
use crate::model::{Caller, Role, Turn};

impl<M: ChatModel> ConversationManager<M> {
    /// Append a turn to one of the caller's sessions.
    pub async fn append(
        &self,
        caller: &Caller,
        session_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<Turn> {
        let session = self.owned_session(caller, session_id).await?;
        self.storage.append_turn(session.id, role, content).await
    }

    /// Every turn of one of the caller's sessions, oldest first. Always read
    /// from storage, never cached.
    pub async fn list(&self, caller: &Caller, session_id: Uuid) -> Result<Vec<Turn>> {
        let session = self.owned_session(caller, session_id).await?;
        self.storage.list_turns(session.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::ExchangeSettings;
    use super::*;
    use crate::error::VersoError;

    #[tokio::test]
    async fn list_is_stable_and_preserves_append_order() {
        let fx = fixture().await;
        let manager = ConversationManager::new(
            fx.storage.clone(),
            FakeModel::new(Script::Answer("ok")),
            ExchangeSettings::default(),
        );
        let session = manager.resolve_or_create(&fx.reader, fx.poem_id, false).await.unwrap();

        let script = [
            (Role::User, "What is the theme?"),
            (Role::User, "Also, who is the speaker?"),
            (Role::Model, "Restless longing."),
            (Role::Model, "The speaker watches from shore."),
            (Role::User, "Thanks"),
        ];
        for (role, content) in script {
            manager.append(&fx.reader, session.id, role, content).await.unwrap();
        }

        let first = manager.list(&fx.reader, session.id).await.unwrap();
        let second = manager.list(&fx.reader, session.id).await.unwrap();
        assert_eq!(first, second);

        let got: Vec<(Role, &str)> = first.iter().map(|t| (t.role, t.content.as_str())).collect();
        assert_eq!(got, script);
    }

    #[tokio::test]
    async fn other_users_cannot_read_or_write() {
        let fx = fixture().await;
        let manager = ConversationManager::new(
            fx.storage.clone(),
            FakeModel::new(Script::Answer("ok")),
            ExchangeSettings::default(),
        );
        let session = manager.resolve_or_create(&fx.reader, fx.poem_id, false).await.unwrap();

        let err = manager.append(&fx.other, session.id, Role::User, "hi").await.unwrap_err();
        assert!(matches!(err, VersoError::NotFound(_)));
        let err = manager.list(&fx.other, session.id).await.unwrap_err();
        assert!(matches!(err, VersoError::NotFound(_)));

        let err = manager
            .append(&Caller::Anonymous, session.id, Role::User, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, VersoError::Unauthorized(_)));
        assert_eq!(fx.storage.counts().await.unwrap().turns, 0);
    }
}
