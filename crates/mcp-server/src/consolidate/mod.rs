//! The consolidation engine.
//!
//! One run drives the language model over the space rules, the previous
//! synthesis, and a snapshot of live notes, then commits the reply in a fixed
//! order: bank files, synthesis, metadata, and only then the deletion of the
//! snapshotted notes. Any failure before the delete phase leaves every note
//! in place; the next run simply retries. Notes written after the snapshot
//! are never touched.

mod llm;
mod prompt;

pub use llm::{HttpLlm, LanguageModel, LlmError, LlmReply, TokenUsage};
pub use prompt::{
    build_user_prompt, parse_reply, BankAction, BankFileUpdate, ConsolidationReply, NoteForPrompt,
    STRICT_RETRY_PROMPT, SYSTEM_PROMPT,
};

use note_format::FrontMatter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ServiceError;
use crate::locks::LockRegistry;
use crate::spaces::{load_meta, save_meta};
use crate::storage::{
    bank_file_key, bank_prefix, live_prefix, rules_key, synthesis_key, BucketStore, KEEP_SENTINEL,
};

/// Metrics returned by a completed run.
#[derive(Debug, Default, Serialize)]
pub struct ConsolidationReport {
    pub notes_processed: usize,
    /// Notes left behind because the run hit the per-run cap.
    pub notes_remaining: usize,
    pub bank_files_created: usize,
    pub bank_files_updated: usize,
    pub bank_files_unchanged: usize,
    pub synthesis_size: u64,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Clone)]
pub struct Consolidator {
    store: BucketStore,
    llm: Arc<dyn LanguageModel>,
    locks: Arc<LockRegistry>,
    max_notes: usize,
    timeout: Duration,
}

impl Consolidator {
    pub fn new(
        store: BucketStore,
        llm: Arc<dyn LanguageModel>,
        locks: Arc<LockRegistry>,
        max_notes: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            llm,
            locks,
            max_notes,
            timeout,
        }
    }

    /// Run one consolidation. `agent_filter` restricts the run to notes whose
    /// front-matter agent matches; authorization of that filter happens at
    /// the tool surface.
    pub async fn consolidate(
        &self,
        space_id: &str,
        agent_filter: Option<&str>,
    ) -> Result<ConsolidationReport, ServiceError> {
        let started = std::time::Instant::now();

        // Fail fast on contention; the second caller must not queue.
        let _guard = self.locks.try_consolidation(space_id).map_err(|_| {
            ServiceError::Conflict(format!(
                "consolidation already running for space '{space_id}'"
            ))
        })?;

        let mut meta = load_meta(&self.store, space_id).await?;
        let rules = self
            .store
            .get_text(&rules_key(space_id))
            .await?
            .ok_or_else(|| {
                ServiceError::Corrupt(format!("space '{space_id}' has no rules file"))
            })?;
        let synthesis = self.store.get_text(&synthesis_key(space_id)).await?;

        let mut notes = self.load_notes(space_id).await?;
        if let Some(agent) = agent_filter {
            notes.retain(|n| n.front.agent == agent);
        }

        if notes.is_empty() {
            return Ok(ConsolidationReport {
                duration_seconds: started.elapsed().as_secs_f64(),
                ..ConsolidationReport::default()
            });
        }

        let notes_remaining = notes.len().saturating_sub(self.max_notes);
        notes.truncate(self.max_notes);

        // The snapshot: exactly these keys are deleted on success, nothing
        // else, no matter what lands under live/ while the model runs.
        let snapshot: Vec<String> = notes.iter().map(|n| n.filename.clone()).collect();

        let bank = self.load_bank(space_id).await?;
        let user = build_user_prompt(&rules, synthesis.as_deref(), &notes, &bank);

        let mut usage = None;
        let reply = self.complete_with_retry(&user, &mut usage).await?;

        // Commit phase. Order matters: once all writes have landed we delete
        // the snapshot; before that, any failure aborts with notes intact.
        let existing: Vec<&str> = bank.iter().map(|(name, _)| name.as_str()).collect();
        let mut created = 0;
        let mut updated = 0;
        for file in &reply.bank_files {
            self.store
                .put_text(&bank_file_key(space_id, &file.filename), &file.content)
                .await?;
            let existed = existing.contains(&file.filename.as_str());
            if existed {
                updated += 1;
            } else {
                created += 1;
            }
            // The bank state, not the model's label, decides the metrics.
            if existed == (file.action == BankAction::Created) {
                tracing::debug!(file = %file.filename, claimed = ?file.action, "model mislabeled a bank action");
            }
        }
        self.store
            .put_text(&synthesis_key(space_id), &reply.synthesis)
            .await?;

        meta.consolidation_count += 1;
        meta.last_consolidation = Some(chrono::Utc::now());
        meta.total_notes_processed += snapshot.len() as u64;
        save_meta(&self.store, &meta).await?;

        for filename in &snapshot {
            self.store
                .delete(&format!("{}{}", live_prefix(space_id), filename))
                .await?;
        }

        let report = ConsolidationReport {
            notes_processed: snapshot.len(),
            notes_remaining,
            bank_files_created: created,
            bank_files_updated: updated,
            bank_files_unchanged: existing.len().saturating_sub(updated),
            synthesis_size: reply.synthesis.len() as u64,
            duration_seconds: started.elapsed().as_secs_f64(),
            usage,
        };
        tracing::info!(
            space = space_id,
            notes = report.notes_processed,
            remaining = report.notes_remaining,
            created = report.bank_files_created,
            updated = report.bank_files_updated,
            "consolidation committed"
        );
        Ok(report)
    }

    async fn complete_with_retry(
        &self,
        user: &str,
        usage: &mut Option<TokenUsage>,
    ) -> Result<ConsolidationReply, ServiceError> {
        let first = self.call_model(SYSTEM_PROMPT, user, usage).await?;
        match parse_reply(&first) {
            Ok(reply) => Ok(reply),
            Err(first_err) => {
                tracing::warn!(error = %first_err, "consolidation reply unparseable, retrying once");
                let strict = format!("{SYSTEM_PROMPT}\n\n{STRICT_RETRY_PROMPT}");
                let second = self.call_model(&strict, user, usage).await?;
                parse_reply(&second).map_err(|e| {
                    ServiceError::Upstream(format!(
                        "consolidation reply unparseable after retry: {e}"
                    ))
                })
            }
        }
    }

    async fn call_model(
        &self,
        system: &str,
        user: &str,
        usage: &mut Option<TokenUsage>,
    ) -> Result<String, ServiceError> {
        let reply = tokio::time::timeout(self.timeout, self.llm.complete(system, user))
            .await
            .map_err(|_| {
                ServiceError::Upstream(format!(
                    "language model call timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        if let Some(u) = reply.usage {
            let total = usage.get_or_insert(TokenUsage {
                prompt_tokens: 0,
                completion_tokens: 0,
            });
            total.prompt_tokens += u.prompt_tokens;
            total.completion_tokens += u.completion_tokens;
        }
        Ok(reply.text)
    }

    /// Live notes in chronological order (the key sorts by timestamp).
    async fn load_notes(&self, space_id: &str) -> Result<Vec<NoteForPrompt>, ServiceError> {
        let mut notes = Vec::new();
        for obj in self.store.list(&live_prefix(space_id)).await? {
            let filename = obj.key.rsplit('/').next().unwrap_or(&obj.key).to_string();
            if filename == KEEP_SENTINEL {
                continue;
            }
            let Some(stored) = self.store.get_text(&obj.key).await? else {
                continue;
            };
            match FrontMatter::parse(&stored) {
                Ok((front, body)) => notes.push(NoteForPrompt {
                    filename,
                    front,
                    body,
                }),
                Err(e) => {
                    tracing::warn!(space = space_id, file = %filename, error = %e, "skipping unparseable note");
                }
            }
        }
        Ok(notes)
    }

    async fn load_bank(&self, space_id: &str) -> Result<Vec<(String, String)>, ServiceError> {
        let mut files = Vec::new();
        for obj in self.store.list(&bank_prefix(space_id)).await? {
            let filename = obj.key.rsplit('/').next().unwrap_or(&obj.key).to_string();
            if filename == KEEP_SENTINEL {
                continue;
            }
            if let Some(content) = self.store.get_text(&obj.key).await? {
                files.push((filename, content));
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use futures::stream::BoxStream;
    use note_format::Category;
    use object_store::path::Path as StorePath;
    use object_store::{
        GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore as _,
        PutMultipartOpts, PutOptions, PutPayload, PutResult,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::notes::LiveNotes;
    use crate::spaces::SpaceRepo;

    const GOOD_REPLY: &str = r##"{"bank_files":[{"filename":"journal.md","content":"# Journal\n\nbuild ok; pick X; write tests","action":"created"}],"synthesis":"three notes folded"}"##;

    /// Scripted language model: pops canned replies, counts calls, and can
    /// write a late note into the store mid-call to exercise the snapshot.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
        calls: AtomicUsize,
        late_note: Option<(BucketStore, String)>,
    }

    impl ScriptedLlm {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
                late_note: None,
            })
        }

        fn with_late_note(store: BucketStore, key: &str, replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
                late_note: Some((store, key.to_string())),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<LlmReply, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((store, key)) = &self.late_note {
                let front = FrontMatter {
                    timestamp: Utc::now(),
                    agent: "late".into(),
                    category: Category::Observation,
                    tags: Vec::new(),
                    space: "demo".into(),
                };
                store
                    .put_text(key, &front.render("arrived mid-run").unwrap())
                    .await
                    .unwrap();
            }
            let text = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted model ran out of replies");
            Ok(LlmReply {
                text,
                usage: Some(TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                }),
            })
        }
    }

    /// Store wrapper that fails puts whose key contains a marker, to simulate
    /// a crash mid-commit.
    #[derive(Debug)]
    struct FailPuts {
        inner: Arc<dyn object_store::ObjectStore>,
        marker: String,
    }

    impl std::fmt::Display for FailPuts {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "FailPuts({})", self.marker)
        }
    }

    #[async_trait]
    impl object_store::ObjectStore for FailPuts {
        async fn put_opts(
            &self,
            location: &StorePath,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            if location.as_ref().contains(&self.marker) {
                return Err(object_store::Error::Generic {
                    store: "FailPuts",
                    source: "injected put failure".to_string().into(),
                });
            }
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &StorePath,
            opts: PutMultipartOpts,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            self.inner.put_multipart_opts(location, opts).await
        }

        async fn get_opts(
            &self,
            location: &StorePath,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn head(&self, location: &StorePath) -> object_store::Result<ObjectMeta> {
            self.inner.head(location).await
        }

        async fn delete(&self, location: &StorePath) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(
            &self,
            prefix: Option<&StorePath>,
        ) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&StorePath>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &StorePath, to: &StorePath) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(
            &self,
            from: &StorePath,
            to: &StorePath,
        ) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    async fn seeded_space() -> BucketStore {
        let store = BucketStore::in_memory();
        SpaceRepo::new(store.clone())
            .create("demo", "", "# One file: journal.md", "bootstrap")
            .await
            .unwrap();
        let notes = LiveNotes::new(store.clone());
        notes
            .note("demo", Category::Observation, "build ok", "ana", Vec::new())
            .await
            .unwrap();
        notes
            .note("demo", Category::Decision, "pick X", "ana", Vec::new())
            .await
            .unwrap();
        notes
            .note("demo", Category::Todo, "write tests", "bob", Vec::new())
            .await
            .unwrap();
        store
    }

    fn consolidator(store: &BucketStore, llm: Arc<dyn LanguageModel>) -> Consolidator {
        Consolidator::new(
            store.clone(),
            llm,
            Arc::new(LockRegistry::new()),
            500,
            Duration::from_secs(30),
        )
    }

    async fn live_note_count(store: &BucketStore) -> usize {
        store
            .list("demo/live/")
            .await
            .unwrap()
            .iter()
            .filter(|e| !e.key.ends_with(".keep"))
            .count()
    }

    #[tokio::test]
    async fn happy_path_writes_bank_and_deletes_snapshot() {
        let store = seeded_space().await;
        let llm = ScriptedLlm::new(&[GOOD_REPLY]);
        let report = consolidator(&store, llm.clone())
            .consolidate("demo", None)
            .await
            .unwrap();

        assert_eq!(report.notes_processed, 3);
        assert_eq!(report.notes_remaining, 0);
        assert_eq!(report.bank_files_created, 1);
        assert_eq!(report.bank_files_updated, 0);
        assert_eq!(llm.call_count(), 1);
        assert_eq!(report.usage.unwrap().completion_tokens, 50);

        let bank = store.get_text("demo/bank/journal.md").await.unwrap().unwrap();
        assert!(bank.contains("build ok"));
        assert_eq!(
            store.get_text("demo/_synthesis.md").await.unwrap().unwrap(),
            "three notes folded"
        );
        assert_eq!(live_note_count(&store).await, 0);

        let meta = load_meta(&store, "demo").await.unwrap();
        assert_eq!(meta.consolidation_count, 1);
        assert_eq!(meta.total_notes_processed, 3);
        assert!(meta.last_consolidation.is_some());
    }

    #[tokio::test]
    async fn empty_space_short_circuits_without_calling_the_model() {
        let store = BucketStore::in_memory();
        SpaceRepo::new(store.clone())
            .create("demo", "", "rules", "o")
            .await
            .unwrap();
        let llm = ScriptedLlm::new(&[]);
        let report = consolidator(&store, llm.clone())
            .consolidate("demo", None)
            .await
            .unwrap();
        assert_eq!(report.notes_processed, 0);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn agent_filter_leaves_other_agents_notes() {
        let store = seeded_space().await;
        let llm = ScriptedLlm::new(&[GOOD_REPLY]);
        let report = consolidator(&store, llm)
            .consolidate("demo", Some("ana"))
            .await
            .unwrap();
        assert_eq!(report.notes_processed, 2);
        // bob's note survives.
        assert_eq!(live_note_count(&store).await, 1);
    }

    #[tokio::test]
    async fn cap_reports_remaining_and_consumes_oldest() {
        let store = seeded_space().await;
        let llm = ScriptedLlm::new(&[GOOD_REPLY]);
        let mut c = consolidator(&store, llm);
        c.max_notes = 2;
        let report = c.consolidate("demo", None).await.unwrap();
        assert_eq!(report.notes_processed, 2);
        assert_eq!(report.notes_remaining, 1);
        assert_eq!(live_note_count(&store).await, 1);
    }

    #[tokio::test]
    async fn unparseable_reply_retries_once_then_succeeds() {
        let store = seeded_space().await;
        let llm = ScriptedLlm::new(&["this is not json", GOOD_REPLY]);
        let report = consolidator(&store, llm.clone())
            .consolidate("demo", None)
            .await
            .unwrap();
        assert_eq!(report.notes_processed, 3);
        assert_eq!(llm.call_count(), 2);
        // Usage accumulates across both calls.
        assert_eq!(report.usage.unwrap().prompt_tokens, 200);
    }

    #[tokio::test]
    async fn two_bad_replies_abort_without_deleting_notes() {
        let store = seeded_space().await;
        let llm = ScriptedLlm::new(&["nope", "still nope"]);
        let err = consolidator(&store, llm.clone())
            .consolidate("demo", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Upstream(_)));
        assert_eq!(llm.call_count(), 2);
        assert_eq!(live_note_count(&store).await, 3);
        assert!(store.get_text("demo/_synthesis.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn contended_lock_fails_fast_with_conflict() {
        let store = seeded_space().await;
        let locks = Arc::new(LockRegistry::new());
        let c = Consolidator::new(
            store.clone(),
            ScriptedLlm::new(&[GOOD_REPLY]),
            locks.clone(),
            500,
            Duration::from_secs(30),
        );
        let _held = locks.try_consolidation("demo").unwrap();
        let err = c.consolidate("demo", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(live_note_count(&store).await, 3);
    }

    #[tokio::test]
    async fn note_written_after_snapshot_survives_the_delete_phase() {
        let store = seeded_space().await;
        let late_key = "demo/live/20990101T000000_late_observation_cafecafe.md";
        let llm = ScriptedLlm::with_late_note(store.clone(), late_key, &[GOOD_REPLY]);
        let report = consolidator(&store, llm)
            .consolidate("demo", None)
            .await
            .unwrap();
        assert_eq!(report.notes_processed, 3);
        assert_eq!(live_note_count(&store).await, 1);
        assert!(store.get_text(late_key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn store_failure_during_commit_leaves_notes_intact() {
        let seeded = seeded_space().await;
        // Rebuild the same objects behind a put-failing wrapper.
        let failing = BucketStore::with_client(Arc::new(FailPuts {
            inner: raw_client(&seeded),
            marker: "_synthesis".into(),
        }));

        let llm = ScriptedLlm::new(&[GOOD_REPLY]);
        let err = consolidator(&failing, llm)
            .consolidate("demo", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Upstream(_)));

        // Bank write before the failure may be present, but nothing else
        // moved: no synthesis, meta unchanged, all notes intact.
        assert!(seeded.get_text("demo/_synthesis.md").await.unwrap().is_none());
        let meta = load_meta(&seeded, "demo").await.unwrap();
        assert_eq!(meta.consolidation_count, 0);
        assert_eq!(live_note_count(&seeded).await, 3);
    }

    /// Share the inner client of an in-memory store so a wrapper sees the
    /// same objects.
    fn raw_client(store: &BucketStore) -> Arc<dyn object_store::ObjectStore> {
        store.client()
    }
}
