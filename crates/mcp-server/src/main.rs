use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::stdio,
    ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod auth;
mod backup;
mod bridge;
mod config;
mod consolidate;
mod error;
mod gc;
mod locks;
mod notes;
mod spaces;
mod storage;
mod tools;

use auth::{AuthGate, TokenRegistry};
use backup::BackupService;
use bridge::{GraphBridge, HttpRemoteConnector};
use config::Config;
use consolidate::{Consolidator, HttpLlm};
use gc::GarbageCollector;
use locks::LockRegistry;
use notes::LiveNotes;
use spaces::SpaceRepo;
use storage::BucketStore;

/// Number of tools in the catalogue, reported by `system_about`.
const TOOL_COUNT: usize = 30;

/// Parameters for the SpaceCreate tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SpaceCreateParams {
    /// Space id: starts with a letter or digit, up to 64 chars of [A-Za-z0-9_-]
    pub space_id: String,
    /// Human-readable description (max 500 chars)
    #[serde(default)]
    pub description: String,
    /// Consolidation rules in Markdown: which bank files exist and what belongs in each. Written once at creation, immutable afterwards. Max 50000 chars.
    pub rules: String,
}

/// Parameters for tools addressing one space
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SpaceIdParams {
    /// The space id
    pub space_id: String,
}

/// Parameters for the SpaceDelete tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SpaceDeleteParams {
    /// The space id
    pub space_id: String,
    /// Must be true; space deletion is destructive and irreversible
    #[serde(default)]
    pub confirm: bool,
}

/// Parameters for the LiveNote tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct LiveNoteParams {
    /// The space id
    pub space_id: String,
    /// Note category: observation, decision, todo, insight, question, progress, or issue
    pub category: String,
    /// Markdown note content (max 100000 chars)
    pub content: String,
    /// Authoring agent name; defaults to the token name when omitted
    #[serde(default)]
    pub agent: Option<String>,
    /// Comma-separated tags, e.g. "ci, build"
    #[serde(default)]
    pub tags: Option<String>,
}

/// Parameters for the LiveRead tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct LiveReadParams {
    /// The space id
    pub space_id: String,
    /// Maximum notes to return (newest first, default 50)
    #[serde(default)]
    pub limit: Option<usize>,
    /// Only notes with this category
    #[serde(default)]
    pub category: Option<String>,
    /// Only notes written by this agent
    #[serde(default)]
    pub agent: Option<String>,
    /// Only notes at or after this RFC 3339 timestamp
    #[serde(default)]
    pub since: Option<String>,
}

/// Parameters for the LiveSearch tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct LiveSearchParams {
    /// The space id
    pub space_id: String,
    /// Case-insensitive substring to look for in note bodies
    pub query: String,
    /// Maximum notes to return (default 50)
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Parameters for the BankRead tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BankReadParams {
    /// The space id
    pub space_id: String,
    /// Bank file name as listed by bank_list, e.g. "journal.md"
    pub filename: String,
}

/// Parameters for the BankConsolidate tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BankConsolidateParams {
    /// The space id
    pub space_id: String,
    /// Restrict the run to one agent's notes. Non-admin tokens may only name themselves (or omit this); admin tokens may name any agent or omit it to consolidate everything.
    #[serde(default)]
    pub agent: Option<String>,
}

/// Parameters for the GraphConnect tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GraphConnectParams {
    /// The space id
    pub space_id: String,
    /// Base URL of the remote knowledge-graph tool endpoint
    pub url: String,
    /// Bearer token for the remote service
    pub token: String,
    /// Remote memory id the bank is published into
    pub memory_id: String,
    /// Extraction ontology: general, legal, cloud, managed-services, or presales (default general)
    #[serde(default)]
    pub ontology: Option<String>,
}

/// Parameters for the BackupCreate tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BackupCreateParams {
    /// The space id
    pub space_id: String,
    /// What this snapshot captures (max 500 chars)
    #[serde(default)]
    pub description: String,
}

/// Parameters for the BackupList tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BackupListParams {
    /// Restrict the listing to one space
    #[serde(default)]
    pub space: Option<String>,
}

/// Parameters for the BackupDownload tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BackupDownloadParams {
    /// Backup id as returned by backup_create, shaped <space>/<YYYY-MM-DDTHH-MM-SS>
    pub backup_id: String,
}

/// Parameters for the BackupRestore tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BackupRestoreParams {
    /// Backup id as returned by backup_create
    pub backup_id: String,
    /// Must be true; restore recreates the space from the snapshot
    #[serde(default)]
    pub confirm: bool,
}

/// Parameters for the BackupDelete tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BackupDeleteParams {
    /// Backup id as returned by backup_create
    pub backup_id: String,
    /// Must be true; snapshot deletion is destructive
    #[serde(default)]
    pub confirm: bool,
}

/// Parameters for the AdminCreateToken tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TokenCreateParams {
    /// Unique token name, e.g. "ci-writer"
    pub name: String,
    /// Permission levels: any of "read", "write", "admin"
    pub permissions: Vec<String>,
    /// Space ids the token is limited to; empty or omitted means universal
    #[serde(default)]
    pub space_ids: Option<Vec<String>>,
    /// Days until expiry; omitted means the token never expires
    #[serde(default)]
    pub expires_days: Option<i64>,
}

/// Parameters for the AdminRevokeToken tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TokenNameParams {
    /// Name of the token
    pub name: String,
}

/// Parameters for the AdminUpdateToken tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TokenUpdateParams {
    /// Name of the token
    pub name: String,
    /// Replacement permission levels
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    /// Replacement space scope; empty list means universal
    #[serde(default)]
    pub space_ids: Option<Vec<String>>,
}

/// Parameters for the AdminGcNotes tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GcParams {
    /// Restrict collection to one space; omitted means every accessible space
    #[serde(default)]
    pub space: Option<String>,
    /// Age threshold in days (default from configuration)
    #[serde(default)]
    pub max_age_days: Option<i64>,
    /// false = dry run reporting orphan counts; true = act on them
    #[serde(default)]
    pub confirm: bool,
    /// With confirm=true: delete orphans outright instead of consolidating them. This loses note content.
    #[serde(default)]
    pub delete_only: bool,
}

/// The MCP server: injected dependencies plus the tool router.
#[derive(Clone)]
pub struct LiveMemoryServer {
    store: BucketStore,
    gate: AuthGate,
    spaces: SpaceRepo,
    notes: LiveNotes,
    consolidator: Consolidator,
    gc: GarbageCollector,
    backups: BackupService,
    bridge: GraphBridge,
    tokens: Arc<TokenRegistry>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl LiveMemoryServer {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let store = BucketStore::open(config)?;
        let locks = Arc::new(LockRegistry::new());
        let tokens = Arc::new(TokenRegistry::new(store.clone(), &locks));
        let gate = AuthGate::new(tokens.clone(), config.bootstrap_token.clone())
            .with_default_bearer(Some(config.bootstrap_token.clone()));

        let spaces = SpaceRepo::new(store.clone());
        let notes = LiveNotes::new(store.clone());
        let consolidator = Consolidator::new(
            store.clone(),
            Arc::new(HttpLlm::new(config)),
            locks,
            config.consolidation_max_notes,
            config.consolidation_timeout,
        );
        let gc = GarbageCollector::new(
            store.clone(),
            notes.clone(),
            consolidator.clone(),
            config.gc_max_age_days,
        );
        let backups = BackupService::new(store.clone(), config.backup_retention);
        let bridge = GraphBridge::new(store.clone(), Arc::new(HttpRemoteConnector));

        Ok(Self {
            store,
            gate,
            spaces,
            notes,
            consolidator,
            gc,
            backups,
            bridge,
            tokens,
            tool_router: Self::tool_router(),
        })
    }

    // -- system ------------------------------------------------------------

    #[tool(description = "Service health: object-store reachability and server version. Anonymous.")]
    async fn system_health(&self) -> Result<CallToolResult, ErrorData> {
        tools::system::health(&self.store).await
    }

    #[tool(description = "What this service is and how many tools it exposes. Anonymous.")]
    async fn system_about(&self) -> Result<CallToolResult, ErrorData> {
        tools::system::about(TOOL_COUNT)
    }

    // -- spaces ------------------------------------------------------------

    #[tool(description = "Create a memory space with immutable consolidation rules. The rules tell the consolidation model which bank files to maintain and what belongs in each.")]
    async fn space_create(&self, params: Parameters<SpaceCreateParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::space::create(&self.gate, &self.spaces, &p.space_id, &p.description, &p.rules).await
    }

    #[tool(description = "List the spaces visible to this token, with note and bank-file counts.")]
    async fn space_list(&self) -> Result<CallToolResult, ErrorData> {
        tools::space::list(&self.gate, &self.spaces).await
    }

    #[tool(description = "Metadata, counts, size totals, note timestamps, and bank file list for one space.")]
    async fn space_info(&self, params: Parameters<SpaceIdParams>) -> Result<CallToolResult, ErrorData> {
        tools::space::info(&self.gate, &self.spaces, &params.0.space_id).await
    }

    #[tool(description = "The space's consolidation rules, exactly as written at creation.")]
    async fn space_rules(&self, params: Parameters<SpaceIdParams>) -> Result<CallToolResult, ErrorData> {
        tools::space::rules(&self.gate, &self.spaces, &params.0.space_id).await
    }

    #[tool(description = "Composite view of one space: info, rules, and full bank content. Use this to load a space's whole memory at session start.")]
    async fn space_summary(&self, params: Parameters<SpaceIdParams>) -> Result<CallToolResult, ErrorData> {
        tools::space::summary(&self.gate, &self.spaces, &params.0.space_id).await
    }

    #[tool(description = "Export the whole space as a base64 tar.gz archive. Read-only.")]
    async fn space_export(&self, params: Parameters<SpaceIdParams>) -> Result<CallToolResult, ErrorData> {
        tools::space::export(&self.gate, &self.spaces, &params.0.space_id).await
    }

    #[tool(description = "Delete a space and everything in it. Admin only; requires confirm=true.")]
    async fn space_delete(&self, params: Parameters<SpaceDeleteParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::space::delete(&self.gate, &self.spaces, &p.space_id, p.confirm).await
    }

    // -- live notes --------------------------------------------------------

    #[tool(description = "Append a timestamped note to a space's working memory. Notes are append-only and immutable; consolidation folds them into the bank later.")]
    async fn live_note(&self, params: Parameters<LiveNoteParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::live::note(
            &self.gate,
            &self.notes,
            &p.space_id,
            &p.category,
            &p.content,
            p.agent.as_deref(),
            p.tags.as_deref(),
        )
        .await
    }

    #[tool(description = "Read live notes, newest first, optionally filtered by category, agent, or timestamp.")]
    async fn live_read(&self, params: Parameters<LiveReadParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::live::read(
            &self.gate,
            &self.notes,
            &p.space_id,
            p.limit,
            p.category.as_deref(),
            p.agent.as_deref(),
            p.since.as_deref(),
        )
        .await
    }

    #[tool(description = "Case-insensitive substring search over live note bodies.")]
    async fn live_search(&self, params: Parameters<LiveSearchParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::live::search(&self.gate, &self.notes, &p.space_id, &p.query, p.limit).await
    }

    // -- bank --------------------------------------------------------------

    #[tool(description = "Read one bank file.")]
    async fn bank_read(&self, params: Parameters<BankReadParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::bank::read(&self.gate, &self.store, &self.spaces, &p.space_id, &p.filename).await
    }

    #[tool(description = "Read every bank file of a space.")]
    async fn bank_read_all(&self, params: Parameters<SpaceIdParams>) -> Result<CallToolResult, ErrorData> {
        tools::bank::read_all(&self.gate, &self.spaces, &params.0.space_id).await
    }

    #[tool(description = "List bank file names and sizes.")]
    async fn bank_list(&self, params: Parameters<SpaceIdParams>) -> Result<CallToolResult, ErrorData> {
        tools::bank::list(&self.gate, &self.spaces, &params.0.space_id).await
    }

    #[tool(description = "Fold live notes into the bank via the language model, then delete the consumed notes. Serialized per space: a concurrent call returns status=conflict. Notes written during the run survive untouched.")]
    async fn bank_consolidate(&self, params: Parameters<BankConsolidateParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::bank::consolidate(&self.gate, &self.consolidator, &p.space_id, p.agent.as_deref()).await
    }

    // -- graph bridge ------------------------------------------------------

    #[tool(description = "Connect this space to an external knowledge-graph service. Stores the target on the space; bank files are pushed with graph_push.")]
    async fn graph_connect(&self, params: Parameters<GraphConnectParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::graph::connect(
            &self.gate,
            &self.bridge,
            &p.space_id,
            &p.url,
            &p.token,
            &p.memory_id,
            p.ontology.as_deref().unwrap_or("general"),
        )
        .await
    }

    #[tool(description = "Republish the bank into the connected graph service: delete-then-reingest per file, then remove remote documents that no longer exist locally.")]
    async fn graph_push(&self, params: Parameters<SpaceIdParams>) -> Result<CallToolResult, ErrorData> {
        tools::graph::push(&self.gate, &self.bridge, &params.0.space_id).await
    }

    #[tool(description = "Graph connection settings plus live remote statistics (documents, entities, relations).")]
    async fn graph_status(&self, params: Parameters<SpaceIdParams>) -> Result<CallToolResult, ErrorData> {
        tools::graph::status(&self.gate, &self.bridge, &params.0.space_id).await
    }

    #[tool(description = "Forget the graph connection. Remote data is left intact.")]
    async fn graph_disconnect(&self, params: Parameters<SpaceIdParams>) -> Result<CallToolResult, ErrorData> {
        tools::graph::disconnect(&self.gate, &self.bridge, &params.0.space_id).await
    }

    // -- backups -----------------------------------------------------------

    #[tool(description = "Snapshot a space under the reserved backup prefix. Old snapshots beyond the retention count are pruned.")]
    async fn backup_create(&self, params: Parameters<BackupCreateParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::backup::create(&self.gate, &self.backups, &p.space_id, &p.description).await
    }

    #[tool(description = "List snapshots, newest first, optionally for one space.")]
    async fn backup_list(&self, params: Parameters<BackupListParams>) -> Result<CallToolResult, ErrorData> {
        tools::backup::list(&self.gate, &self.backups, params.0.space.as_deref()).await
    }

    #[tool(description = "Download a snapshot as a base64 tar.gz archive.")]
    async fn backup_download(&self, params: Parameters<BackupDownloadParams>) -> Result<CallToolResult, ErrorData> {
        tools::backup::download(&self.gate, &self.backups, &params.0.backup_id).await
    }

    #[tool(description = "Recreate a space from a snapshot. Admin only; refuses if the space still exists; requires confirm=true.")]
    async fn backup_restore(&self, params: Parameters<BackupRestoreParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::backup::restore(&self.gate, &self.backups, &p.backup_id, p.confirm).await
    }

    #[tool(description = "Delete a snapshot. Admin only; requires confirm=true.")]
    async fn backup_delete(&self, params: Parameters<BackupDeleteParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::backup::delete(&self.gate, &self.backups, &p.backup_id, p.confirm).await
    }

    // -- admin -------------------------------------------------------------

    #[tool(description = "Create a bearer token. The plain credential is shown exactly once, in this response; only its hash is stored.")]
    async fn admin_create_token(&self, params: Parameters<TokenCreateParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::admin::create_token(
            &self.gate,
            &self.tokens,
            &p.name,
            &p.permissions,
            p.space_ids.unwrap_or_default(),
            p.expires_days,
        )
        .await
    }

    #[tool(description = "List registered tokens: names, permissions, scopes, usage timestamps. Credentials and full hashes are never shown.")]
    async fn admin_list_tokens(&self) -> Result<CallToolResult, ErrorData> {
        tools::admin::list_tokens(&self.gate, &self.tokens).await
    }

    #[tool(description = "Revoke a token. The record is kept for audit; the credential stops working immediately.")]
    async fn admin_revoke_token(&self, params: Parameters<TokenNameParams>) -> Result<CallToolResult, ErrorData> {
        tools::admin::revoke_token(&self.gate, &self.tokens, &params.0.name).await
    }

    #[tool(description = "Change a token's permissions or space scope.")]
    async fn admin_update_token(&self, params: Parameters<TokenUpdateParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::admin::update_token(&self.gate, &self.tokens, &p.name, p.permissions, p.space_ids).await
    }

    #[tool(description = "Garbage-collect notes older than the age threshold. Dry run by default; with confirm=true each affected agent's notes are force-consolidated (or deleted outright with delete_only=true).")]
    async fn admin_gc_notes(&self, params: Parameters<GcParams>) -> Result<CallToolResult, ErrorData> {
        let p = params.0;
        tools::admin::gc_notes(
            &self.gate,
            &self.gc,
            p.space.as_deref(),
            p.max_age_days,
            p.confirm,
            p.delete_only,
        )
        .await
    }
}

#[tool_handler]
impl rmcp::ServerHandler for LiveMemoryServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "live-memory".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Live Memory MCP server - shared working memory for collaborative agents. \
                 Write notes with live_note, read a space's memory with space_summary, and \
                 fold notes into the bank with bank_consolidate."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    // Load configuration from environment
    let config = Config::from_env()?;
    config.banner();

    let server = LiveMemoryServer::new(&config)?;

    // Run the server with STDIO transport. The single local client acts as
    // the operator; remote deployments bind the HTTP transport instead and
    // scope each request's Authorization header through AuthGate.
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("Error starting server: {}", e);
    })?;

    tracing::info!("live-memory MCP server started");
    service.waiting().await?;

    Ok(())
}
