mod chat;
mod poems;
mod reader;
mod sqlite;
mod users;

pub use chat::StorageCounts;
pub use sqlite::{SqliteStorage, SCHEMA_VERSION};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::VersoConfig;
use crate::error::{Result, VersoError};

/// Open the SQLite database named by the configuration.
pub fn open_storage(config: &VersoConfig) -> Result<SqliteStorage> {
    let path = match &config.storage.path {
        Some(p) => std::path::PathBuf::from(p),
        None => default_sqlite_path()?,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VersoError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
    }
    SqliteStorage::open(&path)
}

/// Default SQLite path: `~/.config/verso/verso.db`
pub fn default_sqlite_path() -> Result<std::path::PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("verso").join("verso.db"))
        .ok_or_else(|| VersoError::Config("cannot determine config directory".to_string()))
}

// ── row helpers ────────────────────────────────────────────────────────

/// Timestamps are stored as fixed-width RFC 3339 strings (UTC, microseconds)
/// so that lexical order matches chronological order.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn storage_err(context: &'static str) -> impl Fn(rusqlite::Error) -> VersoError {
    move |e| VersoError::Storage(format!("{context}: {e}"))
}

/// `true` when the error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
