//! Conversation transcript
//!
//! An append-only log of what was said, forwarded to the session owner as
//! it grows. Control logic never consults it; dropping every entry would
//! not change a single state transition.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::protocol::TranscriptRole;

/// Which participant produced a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    Assistant,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

impl From<TranscriptRole> for Origin {
    fn from(role: TranscriptRole) -> Self {
        match role {
            TranscriptRole::User => Self::User,
            TranscriptRole::Assistant => Self::Assistant,
        }
    }
}

/// One line of the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub origin: Origin,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Create an entry stamped with a fresh id and the current time
    #[must_use]
    pub fn new(origin: Origin, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only conversation log
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// Create an empty transcript
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a line and return a copy for notification
    pub fn append(&mut self, origin: Origin, text: &str) -> TranscriptEntry {
        let entry = TranscriptEntry::new(origin, text);
        self.entries.push(entry.clone());
        entry
    }

    /// All entries in append order
    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been said yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_append_order_with_unique_ids() {
        let mut transcript = Transcript::new();
        let first = transcript.append(Origin::User, "hello");
        let second = transcript.append(Origin::Assistant, "hi there");

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries()[0].text, "hello");
        assert_eq!(transcript.entries()[1].text, "hi there");
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn wire_roles_map_to_origins() {
        assert_eq!(Origin::from(TranscriptRole::User), Origin::User);
        assert_eq!(Origin::from(TranscriptRole::Assistant), Origin::Assistant);
    }
}
