//! The poem collection. Anyone may read it; only administrators edit it.

use crate::error::Result;
use crate::model::{Caller, PinStatus, Poem, PoemInput, ReadStatus};
use crate::storage::SqliteStorage;

#[derive(Debug, Clone)]
pub struct PoemCatalog {
    storage: SqliteStorage,
}

impl PoemCatalog {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    pub async fn list_poems(&self) -> Result<Vec<Poem>> {
        self.storage.list_poems().await
    }

    pub async fn get_poem(&self, id: i64) -> Result<Poem> {
        self.storage.get_poem(id).await
    }

    pub async fn create_poem(&self, caller: &Caller, input: PoemInput) -> Result<Poem> {
        let admin = caller.require_admin()?;
        let input = input.validated()?;
        let poem = self.storage.insert_poem(&input).await?;
        tracing::info!(poem_id = poem.id, by = admin.id, title = %poem.title, "poem added");
        Ok(poem)
    }

    pub async fn update_poem(&self, caller: &Caller, id: i64, input: PoemInput) -> Result<Poem> {
        let admin = caller.require_admin()?;
        let input = input.validated()?;
        let poem = self.storage.update_poem(id, &input).await?;
        tracing::info!(poem_id = id, by = admin.id, "poem updated");
        Ok(poem)
    }

    /// Remove a poem along with every chat session about it.
    pub async fn delete_poem(&self, caller: &Caller, id: i64) -> Result<()> {
        let admin = caller.require_admin()?;
        self.storage.delete_poem(id).await?;
        tracing::info!(poem_id = id, by = admin.id, "poem deleted");
        Ok(())
    }

    /// Mark a poem read for the caller, or clear the mark if already set.
    pub async fn toggle_read(&self, caller: &Caller, poem_id: i64) -> Result<ReadStatus> {
        let user = caller.require_user()?;
        let status = self.storage.toggle_read(user.id, poem_id).await?;
        tracing::debug!(poem_id, user_id = user.id, ?status, "read mark toggled");
        Ok(status)
    }

    /// Pin a poem for the caller. Pinning the pinned poem again unpins it.
    pub async fn toggle_pin(&self, caller: &Caller, poem_id: i64) -> Result<PinStatus> {
        let user = caller.require_user()?;
        let status = self.storage.toggle_pin(user.id, poem_id).await?;
        tracing::debug!(poem_id, user_id = user.id, ?status, "pin toggled");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VersoError;

    async fn setup() -> (PoemCatalog, Caller, Caller) {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let admin = storage.insert_user("admin", "h").await.unwrap();
        let reader = storage.insert_user("reader", "h").await.unwrap();
        (PoemCatalog::new(storage), Caller::user(admin), Caller::user(reader))
    }

    fn sail() -> PoemInput {
        PoemInput::new(" The Sail ", " Lermontov ", "A lonely sail is gleaming white\n")
    }

    #[tokio::test]
    async fn admin_manages_poems() {
        let (catalog, admin, _) = setup().await;

        let poem = catalog.create_poem(&admin, sail()).await.unwrap();
        assert_eq!(poem.title, "The Sail");
        assert_eq!(poem.content, "A lonely sail is gleaming white\n");

        let edited = catalog
            .update_poem(&admin, poem.id, PoemInput::new("Sail", "M. Lermontov", "A lonely sail"))
            .await
            .unwrap();
        assert_eq!(edited.title, "Sail");
        assert_eq!(catalog.list_poems().await.unwrap().len(), 1);

        catalog.delete_poem(&admin, poem.id).await.unwrap();
        assert!(matches!(catalog.get_poem(poem.id).await, Err(VersoError::NotFound(_))));
    }

    #[tokio::test]
    async fn readers_and_anonymous_cannot_edit() {
        let (catalog, admin, reader) = setup().await;
        let poem = catalog.create_poem(&admin, sail()).await.unwrap();

        assert!(matches!(
            catalog.create_poem(&reader, sail()).await,
            Err(VersoError::Forbidden(_))
        ));
        assert!(matches!(
            catalog.delete_poem(&reader, poem.id).await,
            Err(VersoError::Forbidden(_))
        ));
        assert!(matches!(
            catalog.update_poem(&Caller::Anonymous, poem.id, sail()).await,
            Err(VersoError::Unauthorized(_))
        ));
        assert_eq!(catalog.list_poems().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let (catalog, admin, _) = setup().await;
        let err = catalog
            .create_poem(&admin, PoemInput::new("  ", "Pushkin", "text"))
            .await
            .unwrap_err();
        assert!(matches!(err, VersoError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn readers_mark_and_pin_poems() {
        let (catalog, admin, reader) = setup().await;
        let poem = catalog.create_poem(&admin, sail()).await.unwrap();

        assert_eq!(catalog.toggle_read(&reader, poem.id).await.unwrap(), ReadStatus::Marked);
        assert_eq!(catalog.toggle_read(&reader, poem.id).await.unwrap(), ReadStatus::Unmarked);
        assert_eq!(catalog.toggle_pin(&reader, poem.id).await.unwrap(), PinStatus::Pinned);

        assert!(matches!(
            catalog.toggle_read(&Caller::Anonymous, poem.id).await,
            Err(VersoError::Unauthorized(_))
        ));
        assert!(matches!(
            catalog.toggle_pin(&reader, poem.id + 1).await,
            Err(VersoError::NotFound(_))
        ));
    }
}
