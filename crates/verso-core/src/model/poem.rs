use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VersoError};

pub const MAX_TITLE_LENGTH: usize = 300;
pub const MAX_AUTHOR_LENGTH: usize = 200;
pub const MAX_POEM_LENGTH: usize = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poem {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields an administrator supplies when adding or editing a poem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoemInput {
    pub title: String,
    pub author: String,
    pub content: String,
}

impl PoemInput {
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            content: content.into(),
        }
    }

    /// Trim title and author and check lengths. The poem body is kept verbatim.
    pub fn validated(self) -> Result<Self> {
        let title = self.title.trim().to_string();
        let author = self.author.trim().to_string();

        if title.is_empty() {
            return Err(VersoError::InvalidInput("title cannot be empty".into()));
        }
        if title.len() > MAX_TITLE_LENGTH {
            return Err(VersoError::InvalidInput(format!(
                "title exceeds maximum length of {MAX_TITLE_LENGTH} characters"
            )));
        }
        if author.is_empty() {
            return Err(VersoError::InvalidInput("author cannot be empty".into()));
        }
        if author.len() > MAX_AUTHOR_LENGTH {
            return Err(VersoError::InvalidInput(format!(
                "author exceeds maximum length of {MAX_AUTHOR_LENGTH} characters"
            )));
        }
        if self.content.trim().is_empty() {
            return Err(VersoError::InvalidInput("poem text cannot be empty".into()));
        }
        if self.content.len() > MAX_POEM_LENGTH {
            return Err(VersoError::InvalidInput(format!(
                "poem text exceeds maximum length of {MAX_POEM_LENGTH} characters"
            )));
        }

        Ok(Self {
            title,
            author,
            content: self.content,
        })
    }
}
