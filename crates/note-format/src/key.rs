//! Note key scheme.
//!
//! Every live note is stored under `live/` with a key of the form
//! `YYYYMMDDTHHMMSS_<agent>_<category>_<8-hex>.md`. The timestamp gives a
//! stable chronological sort, the agent and category make keys filterable
//! without reading bodies, and the random suffix keeps two same-second writes
//! by the same agent from colliding.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::Category;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// A parsed live-note key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteKey {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub category: Category,
    /// Eight lowercase hex characters.
    pub suffix: String,
}

impl NoteKey {
    /// Compose a key from its parts. The suffix is supplied by the caller so
    /// that key construction stays deterministic and testable.
    pub fn compose(timestamp: DateTime<Utc>, agent: &str, category: Category, suffix: &str) -> String {
        format!(
            "{}_{}_{}_{}.md",
            timestamp.format(TIMESTAMP_FORMAT),
            agent,
            category,
            suffix
        )
    }

    /// Parse a bare file name (no directory prefix) back into its parts.
    ///
    /// The agent segment may itself contain underscores, so parsing anchors on
    /// the fixed-width timestamp at the front and the category + suffix at the
    /// back.
    pub fn parse(file_name: &str) -> Result<NoteKey, NoteKeyError> {
        let stem = file_name
            .strip_suffix(".md")
            .ok_or_else(|| NoteKeyError::new(file_name, "missing .md extension"))?;

        let (ts_part, rest) = stem
            .split_once('_')
            .ok_or_else(|| NoteKeyError::new(file_name, "missing timestamp segment"))?;
        let naive = NaiveDateTime::parse_from_str(ts_part, TIMESTAMP_FORMAT)
            .map_err(|_| NoteKeyError::new(file_name, "bad timestamp segment"))?;
        let timestamp = naive.and_utc();

        let (rest, suffix) = rest
            .rsplit_once('_')
            .ok_or_else(|| NoteKeyError::new(file_name, "missing suffix segment"))?;
        if suffix.len() != 8 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(NoteKeyError::new(file_name, "suffix is not 8 hex chars"));
        }

        let (agent, category_part) = rest
            .rsplit_once('_')
            .ok_or_else(|| NoteKeyError::new(file_name, "missing category segment"))?;
        let category = category_part
            .parse::<Category>()
            .map_err(|_| NoteKeyError::new(file_name, "unknown category segment"))?;
        if agent.is_empty() {
            return Err(NoteKeyError::new(file_name, "empty agent segment"));
        }

        Ok(NoteKey {
            timestamp,
            agent: agent.to_string(),
            category,
            suffix: suffix.to_lowercase(),
        })
    }
}

/// Error produced when a stored key does not match the note-key scheme.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid note key '{key}': {reason}")]
pub struct NoteKeyError {
    pub key: String,
    pub reason: &'static str,
}

impl NoteKeyError {
    fn new(key: &str, reason: &'static str) -> Self {
        Self {
            key: key.to_string(),
            reason,
        }
    }
}
