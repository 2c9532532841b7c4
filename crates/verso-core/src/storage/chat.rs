use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::{format_ts, parse_ts, storage_err, SqliteStorage};
use crate::error::{Result, VersoError};
use crate::model::{ChatSession, Role, Turn};

const SESSION_COLUMNS: &str = "id, user_id, poem_id, created_at";
const TURN_COLUMNS: &str = "id, session_id, role, content, created_at";

/// Row totals, reported by `verso status` and the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageCounts {
    pub users: i64,
    pub poems: i64,
    pub sessions: i64,
    pub turns: i64,
}

fn parse_uuid(raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<ChatSession> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(3)?;
    Ok(ChatSession {
        id: parse_uuid(&id)?,
        user_id: row.get(1)?,
        poem_id: row.get(2)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn row_to_turn(row: &Row<'_>) -> rusqlite::Result<Turn> {
    let session_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let created_at: String = row.get(4)?;
    Ok(Turn {
        id: row.get(0)?,
        session_id: parse_uuid(&session_id)?,
        role: role.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        content: row.get(3)?,
        created_at: parse_ts(&created_at)?,
    })
}

impl SqliteStorage {
    /// Return the newest session for `(user_id, poem_id)`, or create one.
    ///
    /// With `force_new` a fresh session is always inserted. Lookup and insert
    /// run under one connection lock, so two non-forced calls cannot both
    /// create a first session.
    pub async fn open_session(
        &self,
        user_id: i64,
        poem_id: i64,
        force_new: bool,
    ) -> Result<ChatSession> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(storage_err("failed to begin transaction"))?;

            let poem_exists: bool = tx
                .query_row(
                    "SELECT EXISTS (SELECT 1 FROM poems WHERE id = ?1)",
                    params![poem_id],
                    |row| row.get(0),
                )
                .map_err(storage_err("failed to check poem"))?;
            if !poem_exists {
                return Err(VersoError::NotFound(format!("poem {poem_id}")));
            }

            if !force_new {
                let latest = tx
                    .query_row(
                        &format!(
                            "SELECT {SESSION_COLUMNS} FROM chat_sessions
                             WHERE user_id = ?1 AND poem_id = ?2
                             ORDER BY created_at DESC, rowid DESC
                             LIMIT 1"
                        ),
                        params![user_id, poem_id],
                        row_to_session,
                    )
                    .optional()
                    .map_err(storage_err("failed to look up session"))?;
                if let Some(session) = latest {
                    return Ok(session);
                }
            }

            let session = ChatSession::new(user_id, poem_id);
            tx.execute(
                "INSERT INTO chat_sessions (id, user_id, poem_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.id.to_string(),
                    session.user_id,
                    session.poem_id,
                    format_ts(&session.created_at),
                ],
            )
            .map_err(storage_err("failed to insert session"))?;
            tx.commit()
                .map_err(storage_err("failed to commit session"))?;

            tracing::debug!(session_id = %session.id, user_id, poem_id, "created chat session");
            Ok(session)
        })
        .await
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?1"),
                params![id.to_string()],
                row_to_session,
            )
            .optional()
            .map_err(storage_err("failed to load session"))
        })
        .await
    }

    /// Sessions a user holds against one poem, newest first.
    pub async fn sessions_for(&self, user_id: i64, poem_id: Option<i64>) -> Result<Vec<ChatSession>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM chat_sessions
                     WHERE user_id = ?1 AND (?2 IS NULL OR poem_id = ?2)
                     ORDER BY created_at DESC, rowid DESC"
                ))
                .map_err(storage_err("failed to prepare session listing"))?;
            let sessions = stmt
                .query_map(params![user_id, poem_id], row_to_session)
                .map_err(storage_err("failed to list sessions"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err("failed to read session row"))?;
            Ok(sessions)
        })
        .await
    }

    /// Append one turn stamped with the current time.
    ///
    /// The stamp is taken while the connection is held and never precedes the
    /// session's latest turn, so listing order always matches append order.
    pub async fn append_turn(&self, session_id: Uuid, role: Role, content: &str) -> Result<Turn> {
        self.insert_turn(session_id, role, content, None).await
    }

    /// Append one turn with an explicit timestamp. The row id assigned here is
    /// the tie-break key when timestamps collide.
    pub async fn append_turn_at(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Turn> {
        self.insert_turn(session_id, role, content, Some(created_at)).await
    }

    async fn insert_turn(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Turn> {
        let content = content.to_string();
        self.with_conn(move |conn| {
            let session_exists: bool = conn
                .query_row(
                    "SELECT EXISTS (SELECT 1 FROM chat_sessions WHERE id = ?1)",
                    params![session_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(storage_err("failed to check session"))?;
            if !session_exists {
                return Err(VersoError::NotFound(format!("session {session_id}")));
            }

            let created_at = match created_at {
                Some(ts) => ts,
                None => {
                    let latest: Option<String> = conn
                        .query_row(
                            "SELECT MAX(created_at) FROM turns WHERE session_id = ?1",
                            params![session_id.to_string()],
                            |row| row.get(0),
                        )
                        .map_err(storage_err("failed to read latest turn"))?;
                    let now = Utc::now();
                    let latest = latest
                        .as_deref()
                        .map(parse_ts)
                        .transpose()
                        .map_err(storage_err("failed to parse turn timestamp"))?;
                    match latest {
                        Some(latest) if latest > now => latest,
                        _ => now,
                    }
                }
            };

            conn.execute(
                "INSERT INTO turns (session_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    session_id.to_string(),
                    role.to_string(),
                    content,
                    format_ts(&created_at),
                ],
            )
            .map_err(storage_err("failed to insert turn"))?;

            Ok(Turn {
                id: conn.last_insert_rowid(),
                session_id,
                role,
                content,
                created_at,
            })
        })
        .await
    }

    /// Every turn of a session in creation order, ties broken by row id.
    pub async fn list_turns(&self, session_id: Uuid) -> Result<Vec<Turn>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TURN_COLUMNS} FROM turns
                     WHERE session_id = ?1
                     ORDER BY created_at ASC, id ASC"
                ))
                .map_err(storage_err("failed to prepare turn listing"))?;
            let turns = stmt
                .query_map(params![session_id.to_string()], row_to_turn)
                .map_err(storage_err("failed to list turns"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err("failed to read turn row"))?;
            Ok(turns)
        })
        .await
    }

    pub async fn counts(&self) -> Result<StorageCounts> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM users),
                    (SELECT COUNT(*) FROM poems),
                    (SELECT COUNT(*) FROM chat_sessions),
                    (SELECT COUNT(*) FROM turns)",
                [],
                |row| {
                    Ok(StorageCounts {
                        users: row.get(0)?,
                        poems: row.get(1)?,
                        sessions: row.get(2)?,
                        turns: row.get(3)?,
                    })
                },
            )
            .map_err(storage_err("failed to count rows"))
        })
        .await
    }
}
