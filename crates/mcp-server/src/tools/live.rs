//! Live-note tools: write, read, search.

use chrono::DateTime;
use rmcp::model::{CallToolResult, ErrorData};
use serde_json::json;

use super::{envelope, payload};
use crate::auth::AuthGate;
use crate::error::ServiceError;
use crate::notes::{LiveNotes, ReadFilter};

const DEFAULT_LIMIT: usize = 50;

pub async fn note(
    gate: &AuthGate,
    notes: &LiveNotes,
    space_id: &str,
    category: &str,
    content: &str,
    agent: Option<&str>,
    tags: Option<&str>,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("live_note", Some(space_id)).await?;
        identity.check_access(space_id)?;
        identity.check_write()?;

        let category = category
            .parse()
            .map_err(|e| ServiceError::Validation(format!("invalid category: {e}")))?;
        let agent = agent.unwrap_or(&identity.name);
        let tags: Vec<String> = tags
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();

        let written = notes.note(space_id, category, content, agent, tags).await?;
        payload(&written)
    }
    .await;
    envelope("created", result)
}

pub async fn read(
    gate: &AuthGate,
    notes: &LiveNotes,
    space_id: &str,
    limit: Option<usize>,
    category: Option<&str>,
    agent: Option<&str>,
    since: Option<&str>,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("live_read", Some(space_id)).await?;
        identity.check_access(space_id)?;

        let filter = ReadFilter {
            category: category
                .map(str::parse)
                .transpose()
                .map_err(|e| ServiceError::Validation(format!("invalid category: {e}")))?,
            agent: agent.map(String::from),
            since: since
                .map(DateTime::parse_from_rfc3339)
                .transpose()
                .map_err(|e| ServiceError::Validation(format!("invalid since: {e}")))?
                .map(|dt| dt.to_utc()),
        };
        let entries = notes
            .read(space_id, limit.unwrap_or(DEFAULT_LIMIT), &filter)
            .await?;
        Ok(json!({
            "count": entries.len(),
            "notes": payload(&entries)?,
        }))
    }
    .await;
    envelope("ok", result)
}

pub async fn search(
    gate: &AuthGate,
    notes: &LiveNotes,
    space_id: &str,
    query: &str,
    limit: Option<usize>,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("live_search", Some(space_id)).await?;
        identity.check_access(space_id)?;
        let hits = notes
            .search(space_id, query, limit.unwrap_or(DEFAULT_LIMIT))
            .await?;
        Ok(json!({
            "query": query,
            "count": hits.len(),
            "notes": payload(&hits)?,
        }))
    }
    .await;
    envelope("ok", result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::auth::{Permission, TokenRegistry};
    use crate::locks::LockRegistry;
    use crate::spaces::SpaceRepo;
    use crate::storage::BucketStore;
    use crate::tools::envelope_json;

    const BOOT: &str = "lm_bootstrap_secret";

    async fn create_test_env() -> (AuthGate, LiveNotes, Arc<TokenRegistry>, BucketStore) {
        let store = BucketStore::in_memory();
        SpaceRepo::new(store.clone())
            .create("demo", "", "# rules", "bootstrap")
            .await
            .unwrap();
        let registry = Arc::new(TokenRegistry::new(store.clone(), &LockRegistry::new()));
        let gate = AuthGate::new(registry.clone(), BOOT.into());
        (gate, LiveNotes::new(store.clone()), registry, store)
    }

    #[tokio::test]
    async fn note_defaults_agent_to_the_identity() {
        let (gate, notes, registry, _) = create_test_env().await;
        let (cred, _) = registry
            .create("builder-1", vec![Permission::Write], vec![], None)
            .await
            .unwrap();

        AuthGate::with_bearer(Some(cred), async {
            let body = envelope_json(
                &note(&gate, &notes, "demo", "observation", "build ok", None, Some("ci, build"))
                    .await
                    .unwrap(),
            );
            assert_eq!(body["status"], "created");
            assert!(body["filename"]
                .as_str()
                .unwrap()
                .contains("_builder-1_observation_"));
        })
        .await;

        AuthGate::with_bearer(Some(BOOT.into()), async {
            let body = envelope_json(
                &read(&gate, &notes, "demo", None, None, None, None).await.unwrap(),
            );
            assert_eq!(body["count"], 1);
            assert_eq!(body["notes"][0]["agent"], "builder-1");
            assert_eq!(body["notes"][0]["tags"][0], "ci");
            assert_eq!(body["notes"][0]["tags"][1], "build");
        })
        .await;
    }

    #[tokio::test]
    async fn scope_violation_writes_nothing() {
        let (gate, notes, registry, store) = create_test_env().await;
        let (cred, _) = registry
            .create("t1", vec![Permission::Write], vec!["a".into()], None)
            .await
            .unwrap();

        AuthGate::with_bearer(Some(cred), async {
            let body = envelope_json(
                &note(&gate, &notes, "demo", "todo", "sneaky", None, None)
                    .await
                    .unwrap(),
            );
            assert_eq!(body["status"], "forbidden");
        })
        .await;
        // Only the sentinel is under live/.
        assert_eq!(store.list("demo/live/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_only_token_cannot_write() {
        let (gate, notes, registry, _) = create_test_env().await;
        let (cred, _) = registry
            .create("reader", vec![Permission::Read], vec![], None)
            .await
            .unwrap();
        AuthGate::with_bearer(Some(cred), async {
            let body = envelope_json(
                &note(&gate, &notes, "demo", "todo", "x", None, None).await.unwrap(),
            );
            assert_eq!(body["status"], "forbidden");
        })
        .await;
    }

    #[tokio::test]
    async fn bad_category_and_bad_since_are_validation_errors() {
        let (gate, notes, _, _) = create_test_env().await;
        AuthGate::with_bearer(Some(BOOT.into()), async {
            let body = envelope_json(
                &note(&gate, &notes, "demo", "remark", "x", None, None).await.unwrap(),
            );
            assert_eq!(body["status"], "error");
            assert!(body["message"].as_str().unwrap().contains("category"));

            let body = envelope_json(
                &read(&gate, &notes, "demo", None, None, None, Some("yesterday"))
                    .await
                    .unwrap(),
            );
            assert_eq!(body["status"], "error");
            assert!(body["message"].as_str().unwrap().contains("since"));
        })
        .await;
    }

    #[tokio::test]
    async fn search_returns_matching_notes() {
        let (gate, notes, _, _) = create_test_env().await;
        AuthGate::with_bearer(Some(BOOT.into()), async {
            note(&gate, &notes, "demo", "insight", "the cache is cold", Some("ana"), None)
                .await
                .unwrap();
            note(&gate, &notes, "demo", "insight", "unrelated", Some("ana"), None)
                .await
                .unwrap();

            let body = envelope_json(
                &search(&gate, &notes, "demo", "CACHE", None).await.unwrap(),
            );
            assert_eq!(body["status"], "ok");
            assert_eq!(body["count"], 1);
        })
        .await;
    }
}
