//! Graph-bridge tools: connect, push, status, disconnect.

use rmcp::model::{CallToolResult, ErrorData};
use serde_json::json;

use super::{envelope, payload};
use crate::auth::AuthGate;
use crate::bridge::GraphBridge;

pub async fn connect(
    gate: &AuthGate,
    bridge: &GraphBridge,
    space_id: &str,
    url: &str,
    token: &str,
    memory_id: &str,
    ontology: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("graph_connect", Some(space_id)).await?;
        identity.check_access(space_id)?;
        identity.check_write()?;
        let config = bridge
            .connect(space_id, url, token, memory_id, ontology)
            .await?;
        Ok(json!({
            "space_id": space_id,
            "memory_id": config.memory_id,
            "ontology": config.ontology,
            "connected_at": config.connected_at,
        }))
    }
    .await;
    envelope("ok", result)
}

pub async fn push(
    gate: &AuthGate,
    bridge: &GraphBridge,
    space_id: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("graph_push", Some(space_id)).await?;
        identity.check_access(space_id)?;
        identity.check_write()?;
        payload(&bridge.push(space_id).await?)
    }
    .await;
    envelope("ok", result)
}

pub async fn status(
    gate: &AuthGate,
    bridge: &GraphBridge,
    space_id: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("graph_status", Some(space_id)).await?;
        identity.check_access(space_id)?;
        let status = bridge.status(space_id).await?;
        // The stored remote token stays out of tool output.
        Ok(json!({
            "space_id": space_id,
            "url": status.config.url,
            "memory_id": status.config.memory_id,
            "ontology": status.config.ontology,
            "connected_at": status.config.connected_at,
            "last_push_at": status.config.last_push_at,
            "push_count": status.config.push_count,
            "stats": status.stats,
        }))
    }
    .await;
    envelope("ok", result)
}

pub async fn disconnect(
    gate: &AuthGate,
    bridge: &GraphBridge,
    space_id: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("graph_disconnect", Some(space_id)).await?;
        identity.check_access(space_id)?;
        identity.check_write()?;
        bridge.disconnect(space_id).await?;
        Ok(json!({ "space_id": space_id, "disconnected": true }))
    }
    .await;
    envelope("ok", result)
}
