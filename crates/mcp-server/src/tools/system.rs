//! Anonymous system tools.

use rmcp::model::{CallToolResult, ErrorData};
use serde_json::json;

use super::envelope;
use crate::error::ServiceError;
use crate::storage::{BucketStore, TOKENS_KEY};

/// `system_health`: probe the object store and report reachability.
pub async fn health(store: &BucketStore) -> Result<CallToolResult, ErrorData> {
    let result = match store.head(TOKENS_KEY).await {
        Ok(_) => Ok(json!({
            "object_store": "reachable",
            "version": env!("CARGO_PKG_VERSION"),
        })),
        Err(e) => Err(ServiceError::Upstream(format!(
            "object store unreachable: {e}"
        ))),
    };
    envelope("ok", result)
}

/// `system_about`: static service description.
pub fn about(tool_count: usize) -> Result<CallToolResult, ErrorData> {
    envelope(
        "ok",
        Ok(json!({
            "name": "live-memory",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Shared working memory for collaborative agents: append-only notes, \
                            LLM-driven consolidation into a per-space memory bank, object-store \
                            persistence.",
            "tool_count": tool_count,
        })),
    )
}
