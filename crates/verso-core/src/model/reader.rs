//! Per-reader state that sits next to the account: profile text, display
//! preference, read marks, and the pinned poem.

use serde::{Deserialize, Serialize};

use super::{User, MAX_ABOUT_LENGTH};
use crate::error::{Result, VersoError};

/// What a signed-in reader sees on their own profile.
#[derive(Debug, Clone, Serialize)]
pub struct ReaderProfile {
    #[serde(flatten)]
    pub user: User,
    /// Poems marked as read, in ascending id order.
    pub read_poem_ids: Vec<i64>,
}

/// Profile fields a reader may change. Absent fields stay as they are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub show_all_tab: Option<bool>,
}

impl ProfileUpdate {
    pub fn validated(self) -> Result<Self> {
        let about = self.about.map(|a| a.trim().to_string());
        if let Some(about) = &about {
            if about.chars().count() > MAX_ABOUT_LENGTH {
                return Err(VersoError::InvalidInput(format!(
                    "about text is limited to {MAX_ABOUT_LENGTH} characters"
                )));
            }
        }
        Ok(Self {
            about,
            show_all_tab: self.show_all_tab,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStatus {
    Marked,
    Unmarked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PinStatus {
    Pinned,
    Unpinned,
}
