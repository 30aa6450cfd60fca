//! Space lifecycle: create, list, info, export, delete.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use note_format::NoteKey;
use serde::Serialize;

use crate::auth::Identity;
use crate::error::ServiceError;
use crate::spaces::{load_meta, save_meta, SpaceMeta, META_VERSION};
use crate::storage::{
    bank_prefix, keep_key, live_prefix, meta_key, rules_key, space_prefix, synthesis_key,
    BucketStore, KEEP_SENTINEL,
};

#[derive(Clone)]
pub struct SpaceRepo {
    store: BucketStore,
}

/// One row of `space_list`.
#[derive(Debug, Serialize)]
pub struct SpaceListEntry {
    pub space_id: String,
    pub description: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub note_count: usize,
    pub bank_file_count: usize,
    pub last_consolidation: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct BankFileInfo {
    pub filename: String,
    pub size: u64,
}

/// Composite returned by `space_info`.
#[derive(Debug, Serialize)]
pub struct SpaceInfo {
    #[serde(flatten)]
    pub meta: SpaceMeta,
    pub note_count: usize,
    pub notes_bytes: u64,
    pub oldest_note: Option<DateTime<Utc>>,
    pub newest_note: Option<DateTime<Utc>>,
    pub bank_files: Vec<BankFileInfo>,
    pub synthesis_exists: bool,
}

#[derive(Debug, Serialize)]
pub struct SpaceExport {
    pub space_id: String,
    pub object_count: usize,
    /// gzip'd tar of the whole space prefix, base64 encoded.
    pub archive_base64: String,
}

impl SpaceRepo {
    pub fn new(store: BucketStore) -> Self {
        Self { store }
    }

    /// Create a space: metadata, immutable rules, and the two prefix
    /// sentinels. Fails with `already_exists` if `_meta.json` is present.
    pub async fn create(
        &self,
        space_id: &str,
        description: &str,
        rules: &str,
        owner: &str,
    ) -> Result<SpaceMeta, ServiceError> {
        note_format::validate_space_id(space_id)?;
        note_format::validate_description(description)?;
        note_format::validate_rules(rules)?;

        if self.store.head(&meta_key(space_id)).await?.is_some() {
            return Err(ServiceError::AlreadyExists(format!(
                "space '{space_id}' already exists"
            )));
        }

        let meta = SpaceMeta {
            space_id: space_id.to_string(),
            description: description.to_string(),
            owner: owner.to_string(),
            created_at: Utc::now(),
            rules_size: rules.len() as u64,
            last_consolidation: None,
            consolidation_count: 0,
            total_notes_processed: 0,
            version: META_VERSION,
            graph_memory: None,
        };

        save_meta(&self.store, &meta).await?;
        self.store.put_text(&rules_key(space_id), rules).await?;
        self.store
            .put_text(&keep_key(&live_prefix(space_id)), "")
            .await?;
        self.store
            .put_text(&keep_key(&bank_prefix(space_id)), "")
            .await?;

        tracing::info!(space = space_id, owner, "space created");
        Ok(meta)
    }

    /// Enumerate spaces visible to the identity. Spaces whose metadata is
    /// missing or unreadable are skipped with a warning rather than failing
    /// the whole listing.
    pub async fn list(&self, identity: &Identity) -> Result<Vec<SpaceListEntry>, ServiceError> {
        let mut entries = Vec::new();
        for name in self.store.list_prefixes(None).await? {
            if name.starts_with('_') {
                continue;
            }
            if identity.check_access(&name).is_err() {
                continue;
            }
            let meta = match self.store.get_json::<SpaceMeta>(&meta_key(&name)).await {
                Ok(Some(meta)) => meta,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(space = %name, error = %e, "skipping unreadable space metadata");
                    continue;
                }
            };
            let note_count = self.count_notes(&name).await?;
            let bank_file_count = self.bank_files(&name).await?.len();
            entries.push(SpaceListEntry {
                space_id: meta.space_id,
                description: meta.description,
                owner: meta.owner,
                created_at: meta.created_at,
                note_count,
                bank_file_count,
                last_consolidation: meta.last_consolidation,
            });
        }
        Ok(entries)
    }

    pub async fn info(&self, space_id: &str) -> Result<SpaceInfo, ServiceError> {
        let mut meta = load_meta(&self.store, space_id).await?;
        // The stored remote credential stays out of read-side views.
        if let Some(graph) = meta.graph_memory.as_mut() {
            graph.token = "***".to_string();
        }

        let mut note_count = 0;
        let mut notes_bytes = 0;
        let mut oldest_note = None;
        let mut newest_note = None;
        for entry in self.store.list(&live_prefix(space_id)).await? {
            let file_name = file_name_of(&entry.key);
            if file_name == KEEP_SENTINEL {
                continue;
            }
            note_count += 1;
            notes_bytes += entry.size;
            if let Ok(parsed) = NoteKey::parse(file_name) {
                let ts = parsed.timestamp;
                oldest_note = Some(oldest_note.map_or(ts, |o: DateTime<Utc>| o.min(ts)));
                newest_note = Some(newest_note.map_or(ts, |n: DateTime<Utc>| n.max(ts)));
            }
        }

        let bank_files = self.bank_files(space_id).await?;
        let synthesis_exists = self.store.head(&synthesis_key(space_id)).await?.is_some();

        Ok(SpaceInfo {
            meta,
            note_count,
            notes_bytes,
            oldest_note,
            newest_note,
            bank_files,
            synthesis_exists,
        })
    }

    /// Raw body of `_rules.md`. Written once at creation, never mutated.
    pub async fn rules(&self, space_id: &str) -> Result<String, ServiceError> {
        // Surface the missing space, not a missing rules object.
        load_meta(&self.store, space_id).await?;
        self.store
            .get_text(&rules_key(space_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("space '{space_id}' has no rules file")))
    }

    /// Full bank content as `(filename, body)` pairs, sorted by filename.
    pub async fn bank_contents(
        &self,
        space_id: &str,
    ) -> Result<Vec<(String, String)>, ServiceError> {
        let mut files = Vec::new();
        for entry in self.store.list(&bank_prefix(space_id)).await? {
            let file_name = file_name_of(&entry.key);
            if file_name == KEEP_SENTINEL {
                continue;
            }
            if let Some(body) = self.store.get_text(&entry.key).await? {
                files.push((file_name.to_string(), body));
            }
        }
        Ok(files)
    }

    /// Package every object under the space prefix into a tar.gz archive.
    pub async fn export(&self, space_id: &str) -> Result<SpaceExport, ServiceError> {
        load_meta(&self.store, space_id).await?;

        let entries = self.store.list(&space_prefix(space_id)).await?;
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut object_count = 0;
        for entry in &entries {
            let Some(bytes) = self.store.get(&entry.key).await? else {
                continue;
            };
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(entry.modified.timestamp().max(0) as u64);
            header.set_cksum();
            builder
                .append_data(&mut header, &entry.key, bytes.as_ref())
                .map_err(|e| ServiceError::Upstream(format!("archive write failed: {e}")))?;
            object_count += 1;
        }
        let encoder = builder
            .into_inner()
            .map_err(|e| ServiceError::Upstream(format!("archive finalize failed: {e}")))?;
        let archive = encoder
            .finish()
            .map_err(|e| ServiceError::Upstream(format!("archive compression failed: {e}")))?;

        Ok(SpaceExport {
            space_id: space_id.to_string(),
            object_count,
            archive_base64: BASE64.encode(archive),
        })
    }

    /// Recursively delete every object under the space prefix.
    pub async fn delete(&self, space_id: &str) -> Result<usize, ServiceError> {
        load_meta(&self.store, space_id).await?;
        let entries = self.store.list(&space_prefix(space_id)).await?;
        let mut deleted = 0;
        for entry in entries {
            self.store.delete(&entry.key).await?;
            deleted += 1;
        }
        tracing::info!(space = space_id, objects = deleted, "space deleted");
        Ok(deleted)
    }

    async fn count_notes(&self, space_id: &str) -> Result<usize, ServiceError> {
        Ok(self
            .store
            .list(&live_prefix(space_id))
            .await?
            .iter()
            .filter(|e| file_name_of(&e.key) != KEEP_SENTINEL)
            .count())
    }

    /// Bank file names and sizes, sentinel excluded.
    pub async fn bank_files(&self, space_id: &str) -> Result<Vec<BankFileInfo>, ServiceError> {
        Ok(self
            .store
            .list(&bank_prefix(space_id))
            .await?
            .into_iter()
            .filter(|e| file_name_of(&e.key) != KEEP_SENTINEL)
            .map(|e| BankFileInfo {
                filename: file_name_of(&e.key).to_string(),
                size: e.size,
            })
            .collect())
    }
}

fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
