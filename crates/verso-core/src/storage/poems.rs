use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{format_ts, parse_ts, storage_err, SqliteStorage};
use crate::error::{Result, VersoError};
use crate::model::{Poem, PoemInput};

const POEM_COLUMNS: &str = "id, title, author, content, created_at, updated_at";

fn row_to_poem(row: &Row<'_>) -> rusqlite::Result<Poem> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Poem {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

impl SqliteStorage {
    pub async fn insert_poem(&self, input: &PoemInput) -> Result<Poem> {
        let input = input.clone();
        self.with_conn(move |conn| {
            let now = format_ts(&Utc::now());
            conn.execute(
                "INSERT INTO poems (title, author, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![input.title, input.author, input.content, now],
            )
            .map_err(storage_err("failed to insert poem"))?;

            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {POEM_COLUMNS} FROM poems WHERE id = ?1"),
                params![id],
                row_to_poem,
            )
            .map_err(storage_err("failed to read new poem"))
        })
        .await
    }

    pub async fn get_poem(&self, id: i64) -> Result<Poem> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {POEM_COLUMNS} FROM poems WHERE id = ?1"),
                params![id],
                row_to_poem,
            )
            .optional()
            .map_err(storage_err("failed to load poem"))?
            .ok_or_else(|| VersoError::NotFound(format!("poem {id}")))
        })
        .await
    }

    /// All poems, ordered by author then title.
    pub async fn list_poems(&self) -> Result<Vec<Poem>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {POEM_COLUMNS} FROM poems ORDER BY author COLLATE NOCASE, title COLLATE NOCASE, id"
                ))
                .map_err(storage_err("failed to prepare poem listing"))?;
            let poems = stmt
                .query_map([], row_to_poem)
                .map_err(storage_err("failed to list poems"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err("failed to read poem row"))?;
            Ok(poems)
        })
        .await
    }

    pub async fn update_poem(&self, id: i64, input: &PoemInput) -> Result<Poem> {
        let input = input.clone();
        self.with_conn(move |conn| {
            let now = format_ts(&Utc::now());
            let changed = conn
                .execute(
                    "UPDATE poems SET title = ?1, author = ?2, content = ?3, updated_at = ?4
                     WHERE id = ?5",
                    params![input.title, input.author, input.content, now, id],
                )
                .map_err(storage_err("failed to update poem"))?;
            if changed == 0 {
                return Err(VersoError::NotFound(format!("poem {id}")));
            }
            conn.query_row(
                &format!("SELECT {POEM_COLUMNS} FROM poems WHERE id = ?1"),
                params![id],
                row_to_poem,
            )
            .map_err(storage_err("failed to reload poem"))
        })
        .await
    }

    /// Delete a poem together with every session and turn about it.
    pub async fn delete_poem(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM poems WHERE id = ?1", params![id])
                .map_err(storage_err("failed to delete poem"))?;
            if changed == 0 {
                return Err(VersoError::NotFound(format!("poem {id}")));
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn autumn() -> PoemInput {
        PoemInput::new("Autumn", "Pushkin", "October has come. The grove is shaking")
    }

    #[tokio::test]
    async fn poem_crud() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let poem = storage.insert_poem(&autumn()).await.unwrap();
        assert_eq!(storage.get_poem(poem.id).await.unwrap().title, "Autumn");

        let edited = storage
            .update_poem(
                poem.id,
                &PoemInput::new("Autumn (fragment)", "A. S. Pushkin", "October has come."),
            )
            .await
            .unwrap();
        assert_eq!(edited.author, "A. S. Pushkin");
        assert!(edited.updated_at >= poem.updated_at);

        storage.delete_poem(poem.id).await.unwrap();
        assert!(matches!(
            storage.get_poem(poem.id).await,
            Err(VersoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_poem_operations_are_not_found() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert!(matches!(
            storage.update_poem(12, &autumn()).await,
            Err(VersoError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete_poem(12).await,
            Err(VersoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_is_sorted_by_author_then_title() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .insert_poem(&PoemInput::new("Sail", "Lermontov", "A lonely sail"))
            .await
            .unwrap();
        storage.insert_poem(&autumn()).await.unwrap();
        storage
            .insert_poem(&PoemInput::new("Anchar", "Pushkin", "In the desert"))
            .await
            .unwrap();

        let titles: Vec<String> = storage
            .list_poems()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["Sail", "Anchar", "Autumn"]);
    }
}
