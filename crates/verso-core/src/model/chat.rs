use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One conversation thread between a user and the model about one poem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub user_id: i64,
    pub poem_id: i64,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    /// A fresh thread with a random (non-sequential) identifier.
    pub fn new(user_id: i64, poem_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            poem_id,
            created_at: Utc::now(),
        }
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Model,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Model => write!(f, "model"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "model" | "assistant" => Ok(Self::Model),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// A single message in a session's ordered log.
///
/// `id` is a strictly increasing row id and breaks ties between turns that
/// share a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: i64,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
