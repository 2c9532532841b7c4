use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};

use super::users::{row_to_user, USER_COLUMNS};
use super::{format_ts, storage_err, SqliteStorage};
use crate::error::{Result, VersoError};
use crate::model::{PinStatus, ProfileUpdate, ReadStatus, User};

fn ensure_poem(tx: &Transaction<'_>, poem_id: i64) -> Result<()> {
    let exists: bool = tx
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM poems WHERE id = ?1)",
            params![poem_id],
            |row| row.get(0),
        )
        .map_err(storage_err("failed to check poem"))?;
    if !exists {
        return Err(VersoError::NotFound(format!("poem {poem_id}")));
    }
    Ok(())
}

impl SqliteStorage {
    /// Change the profile fields that are present in `update`.
    pub async fn update_profile(&self, user_id: i64, update: &ProfileUpdate) -> Result<User> {
        let update = update.clone();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE users
                     SET about = COALESCE(?1, about),
                         show_all_tab = COALESCE(?2, show_all_tab)
                     WHERE id = ?3",
                    params![update.about, update.show_all_tab, user_id],
                )
                .map_err(storage_err("failed to update profile"))?;
            if changed == 0 {
                return Err(VersoError::NotFound(format!("user {user_id}")));
            }
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![user_id],
                row_to_user,
            )
            .map_err(storage_err("failed to reload user"))
        })
        .await
    }

    /// Flip the read mark of a poem for one reader.
    pub async fn toggle_read(&self, user_id: i64, poem_id: i64) -> Result<ReadStatus> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(storage_err("failed to begin transaction"))?;
            ensure_poem(&tx, poem_id)?;

            let removed = tx
                .execute(
                    "DELETE FROM poem_reads WHERE user_id = ?1 AND poem_id = ?2",
                    params![user_id, poem_id],
                )
                .map_err(storage_err("failed to clear read mark"))?;
            let status = if removed > 0 {
                ReadStatus::Unmarked
            } else {
                tx.execute(
                    "INSERT INTO poem_reads (user_id, poem_id, read_at) VALUES (?1, ?2, ?3)",
                    params![user_id, poem_id, format_ts(&Utc::now())],
                )
                .map_err(storage_err("failed to mark poem read"))?;
                ReadStatus::Marked
            };

            tx.commit().map_err(storage_err("failed to commit read mark"))?;
            Ok(status)
        })
        .await
    }

    pub async fn read_poem_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT poem_id FROM poem_reads WHERE user_id = ?1 ORDER BY poem_id")
                .map_err(storage_err("failed to prepare read listing"))?;
            let ids = stmt
                .query_map(params![user_id], |row| row.get(0))
                .map_err(storage_err("failed to list read poems"))?
                .collect::<rusqlite::Result<Vec<i64>>>()
                .map_err(storage_err("failed to read poem id"))?;
            Ok(ids)
        })
        .await
    }

    /// Pin a poem for one reader, replacing any earlier pin. Pinning the
    /// currently pinned poem unpins it.
    pub async fn toggle_pin(&self, user_id: i64, poem_id: i64) -> Result<PinStatus> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(storage_err("failed to begin transaction"))?;
            ensure_poem(&tx, poem_id)?;

            let current: Option<i64> = tx
                .query_row(
                    "SELECT pinned_poem_id FROM users WHERE id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err("failed to load pin"))?
                .ok_or_else(|| VersoError::NotFound(format!("user {user_id}")))?;

            let (pinned, status) = if current == Some(poem_id) {
                (None, PinStatus::Unpinned)
            } else {
                (Some(poem_id), PinStatus::Pinned)
            };
            tx.execute(
                "UPDATE users SET pinned_poem_id = ?1 WHERE id = ?2",
                params![pinned, user_id],
            )
            .map_err(storage_err("failed to update pin"))?;

            tx.commit().map_err(storage_err("failed to commit pin"))?;
            Ok(status)
        })
        .await
    }
}
