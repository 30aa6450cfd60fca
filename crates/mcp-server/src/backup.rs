//! Space snapshots under the reserved `_backups/` prefix.
//!
//! A snapshot mirrors every object of the space, keyed relative to the space
//! root, plus a `_backup.json` descriptor. Restores refuse to overwrite a
//! live space; retention keeps the newest N snapshots per space, ties broken
//! by lexicographic key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::error::ServiceError;
use crate::storage::{backup_prefix, meta_key, space_prefix, BucketStore, BACKUPS_ROOT};

const DESCRIPTOR_NAME: &str = "_backup.json";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

#[derive(Clone)]
pub struct BackupService {
    store: BucketStore,
    retention: usize,
}

/// Descriptor stored next to each snapshot and returned by `backup_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDescriptor {
    pub backup_id: String,
    pub space_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub object_count: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct BackupArchive {
    pub backup_id: String,
    pub object_count: usize,
    pub archive_base64: String,
}

impl BackupService {
    pub fn new(store: BucketStore, retention: usize) -> Self {
        Self { store, retention }
    }

    /// Snapshot a space. Prunes old snapshots afterwards.
    pub async fn create(
        &self,
        space_id: &str,
        description: &str,
    ) -> Result<BackupDescriptor, ServiceError> {
        note_format::validate_space_id(space_id)?;
        note_format::validate_description(description)?;
        if self.store.head(&meta_key(space_id)).await?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "space '{space_id}' not found"
            )));
        }

        let timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let backup_id = format!("{space_id}/{timestamp}");
        let prefix = backup_prefix(space_id, &timestamp);
        let source = space_prefix(space_id);

        let mut object_count = 0;
        let mut total_bytes = 0u64;
        for entry in self.store.list(&source).await? {
            let Some(bytes) = self.store.get(&entry.key).await? else {
                continue;
            };
            let relative = entry.key.strip_prefix(&source).unwrap_or(&entry.key);
            total_bytes += bytes.len() as u64;
            object_count += 1;
            self.store
                .put(&format!("{prefix}{relative}"), bytes.to_vec())
                .await?;
        }

        let descriptor = BackupDescriptor {
            backup_id: backup_id.clone(),
            space_id: space_id.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            object_count,
            total_bytes,
        };
        self.store
            .put_json(&format!("{prefix}{DESCRIPTOR_NAME}"), &descriptor)
            .await?;

        self.prune(space_id).await?;
        tracing::info!(space = space_id, backup = %backup_id, objects = object_count, "backup created");
        Ok(descriptor)
    }

    /// Snapshots visible to the identity, newest first.
    pub async fn list(
        &self,
        identity: &Identity,
        space: Option<&str>,
    ) -> Result<Vec<BackupDescriptor>, ServiceError> {
        let spaces: Vec<String> = match space {
            Some(space_id) => {
                note_format::validate_space_id(space_id)?;
                vec![space_id.to_string()]
            }
            None => self
                .store
                .list_prefixes(Some(BACKUPS_ROOT))
                .await?
                .into_iter()
                .filter(|s| identity.check_access(s).is_ok())
                .collect(),
        };

        let mut descriptors = Vec::new();
        for space_id in spaces {
            let root = format!("{BACKUPS_ROOT}/{space_id}");
            for timestamp in self.store.list_prefixes(Some(&root)).await? {
                let key = format!("{}{DESCRIPTOR_NAME}", backup_prefix(&space_id, &timestamp));
                match self.store.get_json::<BackupDescriptor>(&key).await {
                    Ok(Some(d)) => descriptors.push(d),
                    Ok(None) => {
                        tracing::warn!(space = %space_id, timestamp = %timestamp, "snapshot without descriptor");
                    }
                    Err(e) => {
                        tracing::warn!(space = %space_id, timestamp = %timestamp, error = %e, "unreadable snapshot descriptor");
                    }
                }
            }
        }
        descriptors.sort_by(|a, b| b.backup_id.cmp(&a.backup_id));
        Ok(descriptors)
    }

    /// Copy a snapshot back into a fresh space. Refuses if the space exists.
    pub async fn restore(&self, backup_id: &str) -> Result<BackupDescriptor, ServiceError> {
        let (space_id, prefix) = self.resolve(backup_id)?;
        if self.store.head(&meta_key(&space_id)).await?.is_some() {
            return Err(ServiceError::AlreadyExists(format!(
                "space '{space_id}' already exists; delete it before restoring"
            )));
        }

        let descriptor = self.descriptor(backup_id, &prefix).await?;
        let target = space_prefix(&space_id);
        for entry in self.store.list(&prefix).await? {
            let relative = entry.key.strip_prefix(&prefix).unwrap_or(&entry.key);
            if relative == DESCRIPTOR_NAME {
                continue;
            }
            let Some(bytes) = self.store.get(&entry.key).await? else {
                continue;
            };
            self.store
                .put(&format!("{target}{relative}"), bytes.to_vec())
                .await?;
        }
        tracing::info!(space = %space_id, backup = backup_id, "backup restored");
        Ok(descriptor)
    }

    /// Package a snapshot as tar.gz, entries keyed as they were in the space.
    pub async fn download(&self, backup_id: &str) -> Result<BackupArchive, ServiceError> {
        let (space_id, prefix) = self.resolve(backup_id)?;
        self.descriptor(backup_id, &prefix).await?;

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut object_count = 0;
        for entry in self.store.list(&prefix).await? {
            let relative = entry.key.strip_prefix(&prefix).unwrap_or(&entry.key);
            if relative == DESCRIPTOR_NAME {
                continue;
            }
            let Some(bytes) = self.store.get(&entry.key).await? else {
                continue;
            };
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(entry.modified.timestamp().max(0) as u64);
            header.set_cksum();
            builder
                .append_data(
                    &mut header,
                    format!("{}{relative}", space_prefix(&space_id)),
                    bytes.as_ref(),
                )
                .map_err(|e| ServiceError::Upstream(format!("archive write failed: {e}")))?;
            object_count += 1;
        }
        let archive = builder
            .into_inner()
            .map_err(|e| ServiceError::Upstream(format!("archive finalize failed: {e}")))?
            .finish()
            .map_err(|e| ServiceError::Upstream(format!("archive compression failed: {e}")))?;

        Ok(BackupArchive {
            backup_id: backup_id.to_string(),
            object_count,
            archive_base64: BASE64.encode(archive),
        })
    }

    /// Remove one snapshot prefix entirely.
    pub async fn delete(&self, backup_id: &str) -> Result<usize, ServiceError> {
        let (_, prefix) = self.resolve(backup_id)?;
        let entries = self.store.list(&prefix).await?;
        if entries.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "backup '{backup_id}' not found"
            )));
        }
        let mut deleted = 0;
        for entry in entries {
            self.store.delete(&entry.key).await?;
            deleted += 1;
        }
        tracing::info!(backup = backup_id, objects = deleted, "backup deleted");
        Ok(deleted)
    }

    /// Keep the newest `retention` snapshots of a space; ties on the
    /// minute-level timestamp fall back to the lexicographic key order the
    /// sort already gives us.
    async fn prune(&self, space_id: &str) -> Result<(), ServiceError> {
        let root = format!("{BACKUPS_ROOT}/{space_id}");
        let mut timestamps = self.store.list_prefixes(Some(&root)).await?;
        timestamps.sort_by(|a, b| b.cmp(a));
        for stale in timestamps.iter().skip(self.retention) {
            let prefix = backup_prefix(space_id, stale);
            for entry in self.store.list(&prefix).await? {
                self.store.delete(&entry.key).await?;
            }
            tracing::info!(space = space_id, timestamp = %stale, "pruned old backup");
        }
        Ok(())
    }

    fn resolve(&self, backup_id: &str) -> Result<(String, String), ServiceError> {
        note_format::validate_backup_id(backup_id)?;
        let Some((space_id, timestamp)) = backup_id.split_once('/') else {
            return Err(ServiceError::Validation(format!(
                "invalid backup_id: '{backup_id}'"
            )));
        };
        Ok((space_id.to_string(), backup_prefix(space_id, timestamp)))
    }

    async fn descriptor(
        &self,
        backup_id: &str,
        prefix: &str,
    ) -> Result<BackupDescriptor, ServiceError> {
        self.store
            .get_json::<BackupDescriptor>(&format!("{prefix}{DESCRIPTOR_NAME}"))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("backup '{backup_id}' not found")))
    }
}
