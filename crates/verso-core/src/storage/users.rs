use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{format_ts, is_unique_violation, parse_ts, storage_err, SqliteStorage};
use crate::error::{Result, VersoError};
use crate::model::User;

pub(crate) const USER_COLUMNS: &str =
    "id, username, password_hash, is_admin, created_at, about, show_all_tab, pinned_poem_id";

pub(crate) fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let created_at: String = row.get(4)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        is_admin: row.get(3)?,
        created_at: parse_ts(&created_at)?,
        about: row.get(5)?,
        show_all_tab: row.get(6)?,
        pinned_poem_id: row.get(7)?,
    })
}

impl SqliteStorage {
    /// Insert a user. The admin flag is decided inside the same statement:
    /// the account becomes administrator iff the table was empty.
    pub async fn insert_user(&self, username: &str, password_hash: &str) -> Result<User> {
        let username = username.to_string();
        let password_hash = password_hash.to_string();
        self.with_conn(move |conn| {
            let now = format_ts(&Utc::now());
            conn.execute(
                "INSERT INTO users (username, password_hash, is_admin, created_at)
                 SELECT ?1, ?2, NOT EXISTS (SELECT 1 FROM users), ?3",
                params![username, password_hash, now],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    VersoError::Conflict(format!("username '{username}' is already taken"))
                } else {
                    VersoError::Storage(format!("failed to insert user: {e}"))
                }
            })?;

            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .map_err(storage_err("failed to read new user"))
        })
        .await
    }

    pub async fn get_user(&self, id: i64) -> Result<User> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .optional()
            .map_err(storage_err("failed to load user"))?
            .ok_or_else(|| VersoError::NotFound(format!("user {id}")))
        })
        .await
    }

    pub async fn find_user_by_name(&self, username: &str) -> Result<Option<User>> {
        let username = username.trim().to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                row_to_user,
            )
            .optional()
            .map_err(storage_err("failed to look up user"))
        })
        .await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
                .map_err(storage_err("failed to prepare user listing"))?;
            let users = stmt
                .query_map([], row_to_user)
                .map_err(storage_err("failed to list users"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err("failed to read user row"))?;
            Ok(users)
        })
        .await
    }

    pub async fn update_password_hash(&self, id: i64, password_hash: &str) -> Result<()> {
        let password_hash = password_hash.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                    params![password_hash, id],
                )
                .map_err(storage_err("failed to update password"))?;
            if changed == 0 {
                return Err(VersoError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn set_admin(&self, id: i64, is_admin: bool) -> Result<User> {
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET is_admin = ?1 WHERE id = ?2",
                    params![is_admin, id],
                )
                .map_err(storage_err("failed to update admin flag"))?;
            if changed == 0 {
                return Err(VersoError::NotFound(format!("user {id}")));
            }
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .map_err(storage_err("failed to reload user"))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_user_becomes_admin() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let first = storage.insert_user("anna", "h1").await.unwrap();
        let second = storage.insert_user("boris", "h2").await.unwrap();
        assert!(first.is_admin);
        assert!(!second.is_admin);
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.insert_user("anna", "h1").await.unwrap();
        let err = storage.insert_user("anna", "h2").await.unwrap_err();
        assert!(matches!(err, VersoError::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn lookup_by_id_and_name() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let user = storage.insert_user("anna", "h1").await.unwrap();

        assert_eq!(storage.get_user(user.id).await.unwrap().username, "anna");
        assert!(storage.find_user_by_name("anna").await.unwrap().is_some());
        assert!(storage.find_user_by_name("nobody").await.unwrap().is_none());
        assert!(matches!(
            storage.get_user(999).await,
            Err(VersoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn password_and_admin_updates() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.insert_user("anna", "h1").await.unwrap();
        let boris = storage.insert_user("boris", "h2").await.unwrap();

        storage.update_password_hash(boris.id, "h3").await.unwrap();
        assert_eq!(storage.get_user(boris.id).await.unwrap().password_hash, "h3");

        let promoted = storage.set_admin(boris.id, true).await.unwrap();
        assert!(promoted.is_admin);

        assert!(matches!(
            storage.set_admin(404, true).await,
            Err(VersoError::NotFound(_))
        ));
        assert_eq!(storage.list_users().await.unwrap().len(), 2);
    }
}
