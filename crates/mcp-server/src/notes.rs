//! Live notes: append-only agent writes, filtered reads, substring search.
//!
//! Note writes take no locks. Uniqueness comes from the key itself: second
//! resolution timestamp, agent, category, and an 8-hex random suffix, so two
//! agents with the same name writing the same category in the same second
//! still produce distinct objects.

use chrono::{DateTime, Utc};
use note_format::{Category, FrontMatter, NoteKey};
use rand::RngCore;
use serde::Serialize;

use crate::error::ServiceError;
use crate::spaces::load_meta;
use crate::storage::{live_note_key, live_prefix, BucketStore, KEEP_SENTINEL};

#[derive(Clone)]
pub struct LiveNotes {
    store: BucketStore,
}

/// Result of a successful `live_note`.
#[derive(Debug, Serialize)]
pub struct WrittenNote {
    pub filename: String,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}

/// One note returned by `live_read` / `live_search`.
#[derive(Debug, Serialize)]
pub struct NoteEntry {
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub content: String,
}

/// Filters for `live_read`.
#[derive(Debug, Default)]
pub struct ReadFilter {
    pub category: Option<Category>,
    pub agent: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl LiveNotes {
    pub fn new(store: BucketStore) -> Self {
        Self { store }
    }

    /// Append one note. Validates inputs, composes the key and front-matter,
    /// and performs exactly one put.
    pub async fn note(
        &self,
        space_id: &str,
        category: Category,
        content: &str,
        agent: &str,
        tags: Vec<String>,
    ) -> Result<WrittenNote, ServiceError> {
        note_format::validate_space_id(space_id)?;
        note_format::validate_agent(agent)?;
        note_format::validate_content(content)?;
        load_meta(&self.store, space_id).await?;

        let timestamp = Utc::now();
        let mut suffix_bytes = [0u8; 4];
        rand::rng().fill_bytes(&mut suffix_bytes);
        let filename = NoteKey::compose(timestamp, agent, category, &hex::encode(suffix_bytes));

        let front = FrontMatter {
            timestamp,
            agent: agent.to_string(),
            category,
            tags,
            space: space_id.to_string(),
        };
        let stored = front
            .render(content)
            .map_err(|e| ServiceError::Validation(format!("invalid content: {e}")))?;

        let key = live_note_key(space_id, &filename);
        self.store.put_text(&key, &stored).await?;

        tracing::debug!(space = space_id, agent, category = %category, file = %filename, "note written");
        Ok(WrittenNote {
            filename,
            size: stored.len() as u64,
            timestamp,
        })
    }

    /// Newest-first read with optional category/agent/since filters.
    pub async fn read(
        &self,
        space_id: &str,
        limit: usize,
        filter: &ReadFilter,
    ) -> Result<Vec<NoteEntry>, ServiceError> {
        load_meta(&self.store, space_id).await?;
        let mut entries = self.load_all(space_id).await?;

        entries.retain(|e| {
            filter.category.is_none_or(|c| e.category == c)
                && filter.agent.as_deref().is_none_or(|a| e.agent == a)
                && filter.since.is_none_or(|s| e.timestamp >= s)
        });
        entries.sort_by(|a, b| b.filename.cmp(&a.filename));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Case-insensitive substring search over note bodies, newest first.
    pub async fn search(
        &self,
        space_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<NoteEntry>, ServiceError> {
        if query.trim().is_empty() {
            return Err(ServiceError::Validation(
                "invalid query: must not be empty".into(),
            ));
        }
        load_meta(&self.store, space_id).await?;
        let needle = query.to_lowercase();

        let mut entries = self.load_all(space_id).await?;
        entries.retain(|e| e.content.to_lowercase().contains(&needle));
        entries.sort_by(|a, b| b.filename.cmp(&a.filename));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Load and parse every note under `live/`. Notes that fail to parse are
    /// skipped with a warning; one damaged object must not hide the rest.
    async fn load_all(&self, space_id: &str) -> Result<Vec<NoteEntry>, ServiceError> {
        let mut entries = Vec::new();
        for obj in self.store.list(&live_prefix(space_id)).await? {
            let file_name = obj.key.rsplit('/').next().unwrap_or(&obj.key);
            if file_name == KEEP_SENTINEL {
                continue;
            }
            let Some(stored) = self.store.get_text(&obj.key).await? else {
                continue;
            };
            match FrontMatter::parse(&stored) {
                Ok((front, body)) => entries.push(NoteEntry {
                    filename: file_name.to_string(),
                    timestamp: front.timestamp,
                    agent: front.agent,
                    category: front.category,
                    tags: front.tags,
                    content: body,
                }),
                Err(e) => {
                    tracing::warn!(space = space_id, file = %file_name, error = %e, "skipping unparseable note");
                }
            }
        }
        Ok(entries)
    }
}
