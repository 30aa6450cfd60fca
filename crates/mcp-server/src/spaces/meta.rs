//! `_meta.json` shapes and helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::storage::{meta_key, BucketStore};

pub const META_VERSION: u32 = 1;

/// Mutable per-space metadata stored at `S/_meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceMeta {
    pub space_id: String,
    pub description: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub rules_size: u64,
    #[serde(default)]
    pub last_consolidation: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consolidation_count: u64,
    #[serde(default)]
    pub total_notes_processed: u64,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_memory: Option<GraphMemoryConfig>,
}

/// Configuration of the one-way knowledge-graph bridge, if connected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMemoryConfig {
    pub url: String,
    pub token: String,
    pub memory_id: String,
    pub ontology: String,
    pub connected_at: DateTime<Utc>,
    #[serde(default)]
    pub last_push_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub push_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stats: Option<serde_json::Value>,
}

/// Load a space's metadata, or `NotFound` if the space does not exist.
pub async fn load_meta(store: &BucketStore, space_id: &str) -> Result<SpaceMeta, ServiceError> {
    store
        .get_json::<SpaceMeta>(&meta_key(space_id))
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("space '{space_id}' not found")))
}

pub async fn save_meta(store: &BucketStore, meta: &SpaceMeta) -> Result<(), ServiceError> {
    Ok(store.put_json(&meta_key(&meta.space_id), meta).await?)
}
