//! One-way bridge into an external knowledge-graph service.
//!
//! The bridge stores its configuration inside the space's `_meta.json` and
//! republishes bank files with delete-then-reingest semantics: entity
//! extraction and graph building happen entirely on the remote side. The
//! local space is never mutated beyond `_meta.json`.

mod client;

pub use client::{BridgeError, GraphRemote, HttpGraphRemote, HttpRemoteConnector, RemoteConnector};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ServiceError;
use crate::spaces::{load_meta, save_meta, GraphMemoryConfig};
use crate::storage::{bank_prefix, BucketStore, KEEP_SENTINEL};

/// Ontology labels the remote extractor understands.
pub const ALLOWED_ONTOLOGIES: [&str; 5] =
    ["general", "legal", "cloud", "managed-services", "presales"];

#[derive(Clone)]
pub struct GraphBridge {
    store: BucketStore,
    connector: Arc<dyn RemoteConnector>,
}

#[derive(Debug, Serialize)]
pub struct PushReport {
    pub pushed: usize,
    pub orphans_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct GraphStatus {
    pub config: GraphMemoryConfig,
    pub stats: Value,
}

impl GraphBridge {
    pub fn new(store: BucketStore, connector: Arc<dyn RemoteConnector>) -> Self {
        Self { store, connector }
    }

    /// Probe the remote and persist the connection on the space.
    ///
    /// The remote has no explicit create operation; a missing memory is fine
    /// here because it materializes on the first ingest.
    pub async fn connect(
        &self,
        space_id: &str,
        url: &str,
        token: &str,
        memory_id: &str,
        ontology: &str,
    ) -> Result<GraphMemoryConfig, ServiceError> {
        let mut meta = load_meta(&self.store, space_id).await?;
        if !ALLOWED_ONTOLOGIES.contains(&ontology) {
            return Err(ServiceError::Validation(format!(
                "invalid ontology '{ontology}' (expected one of: {})",
                ALLOWED_ONTOLOGIES.join(", ")
            )));
        }
        if url.trim().is_empty() || memory_id.trim().is_empty() {
            return Err(ServiceError::Validation(
                "invalid url or memory_id: must not be empty".into(),
            ));
        }

        let remote = self.connector.open(url, token);
        remote
            .handshake()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;
        match remote
            .call("document_list", json!({"memory_id": memory_id}))
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(space = space_id, memory_id, "remote memory absent; created on first push");
            }
            Err(e) => return Err(ServiceError::Upstream(e.to_string())),
        }

        let config = GraphMemoryConfig {
            url: url.to_string(),
            token: token.to_string(),
            memory_id: memory_id.to_string(),
            ontology: ontology.to_string(),
            connected_at: Utc::now(),
            last_push_at: None,
            push_count: 0,
            last_stats: None,
        };
        meta.graph_memory = Some(config.clone());
        save_meta(&self.store, &meta).await?;
        tracing::info!(space = space_id, memory_id, ontology, "graph bridge connected");
        Ok(config)
    }

    /// Republish the bank: delete-then-reingest each file, then remove
    /// remote documents that no longer exist locally.
    pub async fn push(&self, space_id: &str) -> Result<PushReport, ServiceError> {
        let mut meta = load_meta(&self.store, space_id).await?;
        let config = meta.graph_memory.clone().ok_or_else(|| {
            ServiceError::NotFound(format!("space '{space_id}' has no graph connection"))
        })?;
        let remote = self.connector.open(&config.url, &config.token);

        let bank = self.bank_files(space_id).await?;
        let mut pushed = 0;
        for (filename, content) in &bank {
            match remote
                .call(
                    "document_delete",
                    json!({"memory_id": config.memory_id, "name": filename}),
                )
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(ServiceError::Upstream(e.to_string())),
            }
            remote
                .call(
                    "memory_ingest",
                    json!({
                        "memory_id": config.memory_id,
                        "name": filename,
                        "content": content,
                        "ontology": config.ontology,
                    }),
                )
                .await
                .map_err(|e| ServiceError::Upstream(e.to_string()))?;
            pushed += 1;
        }

        // Orphan cleanup: anything remote that is not in the current bank.
        let remote_docs = remote
            .call("document_list", json!({"memory_id": config.memory_id}))
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;
        let local: Vec<&str> = bank.iter().map(|(name, _)| name.as_str()).collect();
        let mut orphans_removed = 0;
        for name in document_names(&remote_docs) {
            if local.contains(&name.as_str()) {
                continue;
            }
            match remote
                .call(
                    "document_delete",
                    json!({"memory_id": config.memory_id, "name": name}),
                )
                .await
            {
                Ok(_) => orphans_removed += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(ServiceError::Upstream(e.to_string())),
            }
        }

        let stats = remote
            .call("memory_stats", json!({"memory_id": config.memory_id}))
            .await
            .ok();

        let mut config = config;
        config.last_push_at = Some(Utc::now());
        config.push_count += 1;
        config.last_stats = stats.clone();
        meta.graph_memory = Some(config);
        save_meta(&self.store, &meta).await?;

        tracing::info!(space = space_id, pushed, orphans_removed, "graph push complete");
        Ok(PushReport {
            pushed,
            orphans_removed,
            stats,
        })
    }

    /// Local configuration plus live remote statistics.
    pub async fn status(&self, space_id: &str) -> Result<GraphStatus, ServiceError> {
        let meta = load_meta(&self.store, space_id).await?;
        let config = meta.graph_memory.ok_or_else(|| {
            ServiceError::NotFound(format!("space '{space_id}' has no graph connection"))
        })?;
        let remote = self.connector.open(&config.url, &config.token);
        let stats = remote
            .call("memory_stats", json!({"memory_id": config.memory_id}))
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;
        Ok(GraphStatus { config, stats })
    }

    /// Drop the local configuration; remote data stays where it is.
    pub async fn disconnect(&self, space_id: &str) -> Result<(), ServiceError> {
        let mut meta = load_meta(&self.store, space_id).await?;
        if meta.graph_memory.take().is_none() {
            return Err(ServiceError::NotFound(format!(
                "space '{space_id}' has no graph connection"
            )));
        }
        save_meta(&self.store, &meta).await?;
        tracing::info!(space = space_id, "graph bridge disconnected");
        Ok(())
    }

    async fn bank_files(&self, space_id: &str) -> Result<Vec<(String, String)>, ServiceError> {
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

/// Pull document names out of a `document_list` payload; tolerates both
/// plain string arrays and `{name: …}` objects.
fn document_names(payload: &Value) -> Vec<String> {
    payload
        .get("documents")
        .and_then(Value::as_array)
        .map(|docs| {
            docs.iter()
                .filter_map(|d| {
                    d.as_str()
                        .map(String::from)
                        .or_else(|| d.get("name").and_then(Value::as_str).map(String::from))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use crate::spaces::SpaceRepo;

    /// In-memory stand-in for the remote graph service. Records every call.
    struct MockRemote {
        docs: Mutex<BTreeMap<String, String>>,
        log: Mutex<Vec<String>>,
        fail_ingest: bool,
    }

    impl MockRemote {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                docs: Mutex::new(BTreeMap::new()),
                log: Mutex::new(Vec::new()),
                fail_ingest: false,
            })
        }

        fn log_entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn doc_names(&self) -> Vec<String> {
            self.docs.lock().unwrap().keys().cloned().collect()
        }
    }

    #[async_trait]
    impl GraphRemote for MockRemote {
        async fn handshake(&self) -> Result<(), BridgeError> {
            self.log.lock().unwrap().push("handshake".into());
            Ok(())
        }

        async fn call(&self, tool: &str, args: Value) -> Result<Value, BridgeError> {
            let name = args.get("name").and_then(Value::as_str).unwrap_or("-");
            self.log.lock().unwrap().push(format!("{tool}:{name}"));
            match tool {
                "document_list" => Ok(json!({"documents": self.doc_names()})),
                "document_delete" => {
                    if self.docs.lock().unwrap().remove(name).is_none() {
                        return Err(BridgeError::Remote(format!("document '{name}' not found")));
                    }
                    Ok(json!({"deleted": name}))
                }
                "memory_ingest" => {
                    if self.fail_ingest {
                        return Err(BridgeError::Remote("extractor unavailable".into()));
                    }
                    let content = args
                        .get("content")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    self.docs
                        .lock()
                        .unwrap()
                        .insert(name.to_string(), content.to_string());
                    Ok(json!({"ingested": name}))
                }
                "memory_stats" => Ok(json!({
                    "documents": self.docs.lock().unwrap().len(),
                    "entities": 12,
                    "relations": 4,
                })),
                other => Err(BridgeError::Remote(format!("unknown tool '{other}'"))),
            }
        }
    }

    struct MockConnector {
        remote: Arc<MockRemote>,
    }

    impl RemoteConnector for MockConnector {
        fn open(&self, _url: &str, _token: &str) -> Arc<dyn GraphRemote> {
            self.remote.clone()
        }
    }

    async fn create_test_env(remote: Arc<MockRemote>) -> (BucketStore, GraphBridge) {
        let store = BucketStore::in_memory();
        SpaceRepo::new(store.clone())
            .create("demo", "", "# rules", "bootstrap")
            .await
            .unwrap();
        let bridge = GraphBridge::new(store.clone(), Arc::new(MockConnector { remote }));
        (store, bridge)
    }

    async fn connect(bridge: &GraphBridge) -> GraphMemoryConfig {
        bridge
            .connect("demo", "https://graph.internal/mcp", "gr_token", "mem-1", "general")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connect_probes_and_persists_config() {
        let remote = MockRemote::new();
        let (store, bridge) = create_test_env(remote.clone()).await;
        let config = connect(&bridge).await;
        assert_eq!(config.memory_id, "mem-1");
        assert_eq!(config.push_count, 0);

        let meta = load_meta(&store, "demo").await.unwrap();
        let stored = meta.graph_memory.unwrap();
        assert_eq!(stored.url, "https://graph.internal/mcp");
        assert_eq!(stored.ontology, "general");
        assert!(remote.log_entries().starts_with(&["handshake".to_string()]));
    }

    #[tokio::test]
    async fn connect_rejects_unknown_ontology() {
        let (_, bridge) = create_test_env(MockRemote::new()).await;
        let err = bridge
            .connect("demo", "https://graph.internal", "t", "mem-1", "folklore")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn push_reingests_bank_and_removes_stale_remote_docs() {
        let remote = MockRemote::new();
        let (store, bridge) = create_test_env(remote.clone()).await;
        connect(&bridge).await;

        store.put_text("demo/bank/A.md", "alpha").await.unwrap();
        store.put_text("demo/bank/B.md", "beta").await.unwrap();
        remote
            .docs
            .lock()
            .unwrap()
            .insert("C.md".into(), "stale".into());

        let report = bridge.push("demo").await.unwrap();
        assert_eq!(report.pushed, 2);
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(remote.doc_names(), vec!["A.md", "B.md"]);

        // Each ingest is preceded by a delete of the same name.
        let log = remote.log_entries();
        let del_a = log.iter().position(|l| l == "document_delete:A.md").unwrap();
        let ing_a = log.iter().position(|l| l == "memory_ingest:A.md").unwrap();
        assert!(del_a < ing_a);

        let meta = load_meta(&store, "demo").await.unwrap();
        let config = meta.graph_memory.unwrap();
        assert_eq!(config.push_count, 1);
        assert!(config.last_push_at.is_some());
        assert_eq!(config.last_stats.unwrap()["documents"], 2);
    }

    #[tokio::test]
    async fn push_is_idempotent_on_the_remote_document_set() {
        let remote = MockRemote::new();
        let (store, bridge) = create_test_env(remote.clone()).await;
        connect(&bridge).await;
        store.put_text("demo/bank/A.md", "alpha").await.unwrap();

        bridge.push("demo").await.unwrap();
        bridge.push("demo").await.unwrap();
        assert_eq!(remote.doc_names(), vec!["A.md"]);

        let meta = load_meta(&store, "demo").await.unwrap();
        assert_eq!(meta.graph_memory.unwrap().push_count, 2);
    }

    #[tokio::test]
    async fn push_without_connection_is_not_found() {
        let (_, bridge) = create_test_env(MockRemote::new()).await;
        assert!(matches!(
            bridge.push("demo").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remote_failure_surfaces_and_leaves_meta_unchanged() {
        let remote = Arc::new(MockRemote {
            docs: Mutex::new(BTreeMap::new()),
            log: Mutex::new(Vec::new()),
            fail_ingest: true,
        });
        let (store, bridge) = create_test_env(remote).await;
        connect(&bridge).await;
        store.put_text("demo/bank/A.md", "alpha").await.unwrap();

        let err = bridge.push("demo").await.unwrap_err();
        assert!(err.to_string().contains("extractor unavailable"));

        let meta = load_meta(&store, "demo").await.unwrap();
        assert_eq!(meta.graph_memory.unwrap().push_count, 0);
    }

    #[tokio::test]
    async fn status_returns_config_and_remote_stats() {
        let remote = MockRemote::new();
        let (_, bridge) = create_test_env(remote).await;
        connect(&bridge).await;

        let status = bridge.status("demo").await.unwrap();
        assert_eq!(status.config.memory_id, "mem-1");
        assert_eq!(status.stats["entities"], 12);
    }

    #[tokio::test]
    async fn disconnect_drops_config_but_not_remote_data() {
        let remote = MockRemote::new();
        let (store, bridge) = create_test_env(remote.clone()).await;
        connect(&bridge).await;
        remote
            .docs
            .lock()
            .unwrap()
            .insert("A.md".into(), "kept".into());

        bridge.disconnect("demo").await.unwrap();
        let meta = load_meta(&store, "demo").await.unwrap();
        assert!(meta.graph_memory.is_none());
        assert_eq!(remote.doc_names(), vec!["A.md"]);

        assert!(matches!(
            bridge.disconnect("demo").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
