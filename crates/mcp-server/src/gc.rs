//! Orphaned-note garbage collection.
//!
//! An orphan is a live note older than the age threshold, i.e. one that no
//! agent has consolidated for too long. The collector reports them, forces a
//! consolidation per `(space, agent)` with a synthetic trace note, or (the
//! explicit data-loss path) deletes them outright.

use chrono::{Duration, Utc};
use note_format::{Category, NoteKey};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::auth::Identity;
use crate::consolidate::Consolidator;
use crate::error::ServiceError;
use crate::notes::LiveNotes;
use crate::storage::{live_note_key, live_prefix, meta_key, BucketStore, KEEP_SENTINEL};

#[derive(Clone)]
pub struct GarbageCollector {
    store: BucketStore,
    notes: LiveNotes,
    consolidator: Consolidator,
    default_max_age_days: i64,
}

/// Dry-run report: orphan counts by space and agent.
#[derive(Debug, Serialize)]
pub struct GcScan {
    pub max_age_days: i64,
    pub total_orphans: usize,
    pub spaces: Vec<GcSpaceScan>,
}

#[derive(Debug, Serialize)]
pub struct GcSpaceScan {
    pub space_id: String,
    pub orphans: usize,
    pub by_agent: BTreeMap<String, usize>,
}

/// Result of a confirmed run.
#[derive(Debug, Serialize)]
pub struct GcOutcome {
    pub max_age_days: i64,
    pub total_orphans: usize,
    /// Only populated on the delete-only path.
    pub deleted: usize,
    /// One entry per forced consolidation.
    pub consolidations: Vec<GcConsolidation>,
}

#[derive(Debug, Serialize)]
pub struct GcConsolidation {
    pub space_id: String,
    pub agent: String,
    pub orphans: usize,
    pub notes_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GarbageCollector {
    pub fn new(
        store: BucketStore,
        notes: LiveNotes,
        consolidator: Consolidator,
        default_max_age_days: i64,
    ) -> Self {
        Self {
            store,
            notes,
            consolidator,
            default_max_age_days,
        }
    }

    /// Count orphans without touching anything.
    pub async fn scan(
        &self,
        identity: &Identity,
        space: Option<&str>,
        max_age_days: Option<i64>,
    ) -> Result<GcScan, ServiceError> {
        let max_age_days = max_age_days.unwrap_or(self.default_max_age_days);
        let mut spaces = Vec::new();
        let mut total = 0;
        for space_id in self.target_spaces(identity, space).await? {
            let orphans = self.orphans_of(&space_id, max_age_days).await?;
            if orphans.is_empty() {
                continue;
            }
            let mut by_agent: BTreeMap<String, usize> = BTreeMap::new();
            for (_, key) in &orphans {
                *by_agent.entry(key.agent.clone()).or_default() += 1;
            }
            total += orphans.len();
            spaces.push(GcSpaceScan {
                space_id,
                orphans: orphans.len(),
                by_agent,
            });
        }
        Ok(GcScan {
            max_age_days,
            total_orphans: total,
            spaces,
        })
    }

    /// Confirmed run. With `delete_only` the orphans are removed without the
    /// language model; otherwise each affected `(space, agent)` pair gets a
    /// synthetic trace note and a forced consolidation, so the event is
    /// visible in the resulting bank.
    pub async fn collect(
        &self,
        identity: &Identity,
        space: Option<&str>,
        max_age_days: Option<i64>,
        delete_only: bool,
    ) -> Result<GcOutcome, ServiceError> {
        let scan = self.scan(identity, space, max_age_days).await?;
        let mut outcome = GcOutcome {
            max_age_days: scan.max_age_days,
            total_orphans: scan.total_orphans,
            deleted: 0,
            consolidations: Vec::new(),
        };

        if delete_only {
            for space_scan in &scan.spaces {
                for (filename, _) in self
                    .orphans_of(&space_scan.space_id, scan.max_age_days)
                    .await?
                {
                    self.store
                        .delete(&live_note_key(&space_scan.space_id, &filename))
                        .await?;
                    outcome.deleted += 1;
                }
                tracing::info!(
                    space = %space_scan.space_id,
                    orphans = space_scan.orphans,
                    "gc deleted orphans without consolidation"
                );
            }
            return Ok(outcome);
        }

        for space_scan in &scan.spaces {
            for (agent, orphans) in &space_scan.by_agent {
                let trace = format!(
                    "The garbage collector forced a consolidation of {orphans} orphaned \
                     note(s) older than {} day(s) for agent '{agent}'.",
                    scan.max_age_days
                );
                let result = async {
                    self.notes
                        .note(
                            &space_scan.space_id,
                            Category::Observation,
                            &trace,
                            agent,
                            vec!["gc".to_string()],
                        )
                        .await?;
                    self.consolidator
                        .consolidate(&space_scan.space_id, Some(agent))
                        .await
                }
                .await;

                match result {
                    Ok(report) => outcome.consolidations.push(GcConsolidation {
                        space_id: space_scan.space_id.clone(),
                        agent: agent.clone(),
                        orphans: *orphans,
                        notes_processed: report.notes_processed,
                        error: None,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            space = %space_scan.space_id,
                            agent = %agent,
                            error = %e,
                            "gc consolidation failed; notes left in place"
                        );
                        outcome.consolidations.push(GcConsolidation {
                            space_id: space_scan.space_id.clone(),
                            agent: agent.clone(),
                            orphans: *orphans,
                            notes_processed: 0,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Spaces the run applies to: the named one, or every space the identity
    /// can access.
    async fn target_spaces(
        &self,
        identity: &Identity,
        space: Option<&str>,
    ) -> Result<Vec<String>, ServiceError> {
        if let Some(space_id) = space {
            note_format::validate_space_id(space_id)?;
            identity.check_access(space_id)?;
            if self.store.head(&meta_key(space_id)).await?.is_none() {
                return Err(ServiceError::NotFound(format!(
                    "space '{space_id}' not found"
                )));
            }
            return Ok(vec![space_id.to_string()]);
        }
        let mut spaces = Vec::new();
        for name in self.store.list_prefixes(None).await? {
            if name.starts_with('_') || identity.check_access(&name).is_err() {
                continue;
            }
            if self.store.head(&meta_key(&name)).await?.is_some() {
                spaces.push(name);
            }
        }
        Ok(spaces)
    }

    /// Note filenames older than the threshold, with their parsed keys.
    async fn orphans_of(
        &self,
        space_id: &str,
        max_age_days: i64,
    ) -> Result<Vec<(String, NoteKey)>, ServiceError> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let mut orphans = Vec::new();
        for obj in self.store.list(&live_prefix(space_id)).await? {
            let filename = obj.key.rsplit('/').next().unwrap_or(&obj.key);
            if filename == KEEP_SENTINEL {
                continue;
            }
            if let Ok(key) = NoteKey::parse(filename) {
                if key.timestamp < cutoff {
                    orphans.push((filename.to_string(), key));
                }
            }
        }
        Ok(orphans)
    }
}
