use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VersoError};

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 64;
pub const MIN_PASSWORD_LENGTH: usize = 4;
pub const MAX_ABOUT_LENGTH: usize = 2_000;

/// A registered reader. The first account ever created is an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    /// Free-form "about me" text shown on the profile.
    #[serde(default)]
    pub about: String,
    /// Display preference: list every poem instead of hiding read ones.
    #[serde(default)]
    pub show_all_tab: bool,
    /// At most one pinned poem per reader.
    #[serde(default)]
    pub pinned_poem_id: Option<i64>,
}

/// Who is making a call. Threaded explicitly through every operation that
/// reads or writes per-user state.
#[derive(Debug, Clone, Default)]
pub enum Caller {
    #[default]
    Anonymous,
    User(User),
}

impl Caller {
    pub fn user(user: User) -> Self {
        Self::User(user)
    }

    /// The authenticated user, or `Unauthorized` for anonymous callers.
    pub fn require_user(&self) -> Result<&User> {
        match self {
            Self::User(user) => Ok(user),
            Self::Anonymous => Err(VersoError::Unauthorized(
                "sign in to use the chat".into(),
            )),
        }
    }

    /// The authenticated administrator, `Unauthorized` or `Forbidden` otherwise.
    pub fn require_admin(&self) -> Result<&User> {
        let user = self.require_user()?;
        if !user.is_admin {
            return Err(VersoError::Forbidden(
                "administrator rights required".into(),
            ));
        }
        Ok(user)
    }

    pub fn as_user(&self) -> Option<&User> {
        match self {
            Self::User(user) => Some(user),
            Self::Anonymous => None,
        }
    }
}

/// Normalize and validate a username.
pub fn validate_username(username: &str) -> Result<String> {
    let trimmed = username.trim();
    let len = trimmed.chars().count();
    if len < MIN_USERNAME_LENGTH || len > MAX_USERNAME_LENGTH {
        return Err(VersoError::InvalidInput(format!(
            "username must be {MIN_USERNAME_LENGTH}-{MAX_USERNAME_LENGTH} characters"
        )));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(VersoError::InvalidInput(
            "username cannot contain whitespace".into(),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(VersoError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}
