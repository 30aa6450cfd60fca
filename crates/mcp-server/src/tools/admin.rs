//! Admin tools: token CRUD and garbage collection.

use rmcp::model::{CallToolResult, ErrorData};
use serde_json::json;

use super::{envelope, payload};
use crate::auth::{AuthGate, Permission, TokenRecord, TokenRegistry};
use crate::error::ServiceError;
use crate::gc::GarbageCollector;

fn parse_permissions(raw: &[String]) -> Result<Vec<Permission>, ServiceError> {
    raw.iter().map(|p| p.parse()).collect()
}

/// Listing view of a token: everything except the full hash.
fn token_view(record: &TokenRecord) -> serde_json::Value {
    json!({
        "name": record.name,
        "hash_prefix": record.hash.chars().take(15).collect::<String>(),
        "permissions": record.permissions,
        "space_ids": record.space_ids,
        "created_at": record.created_at,
        "expires_at": record.expires_at,
        "last_used_at": record.last_used_at,
        "revoked": record.revoked,
    })
}

pub async fn create_token(
    gate: &AuthGate,
    registry: &TokenRegistry,
    name: &str,
    permissions: &[String],
    space_ids: Vec<String>,
    expires_days: Option<i64>,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("admin_create_token", None).await?;
        identity.check_admin()?;
        let permissions = parse_permissions(permissions)?;
        let (credential, record) = registry
            .create(name, permissions, space_ids, expires_days)
            .await?;
        // The only time the plain credential ever leaves the server.
        Ok(json!({
            "token": credential,
            "name": record.name,
            "permissions": record.permissions,
            "space_ids": record.space_ids,
            "expires_at": record.expires_at,
            "note": "store this credential now; it is not retrievable later",
        }))
    }
    .await;
    envelope("created", result)
}

pub async fn list_tokens(
    gate: &AuthGate,
    registry: &TokenRegistry,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("admin_list_tokens", None).await?;
        identity.check_admin()?;
        let tokens: Vec<_> = registry.list().await?.iter().map(token_view).collect();
        Ok(json!({ "count": tokens.len(), "tokens": tokens }))
    }
    .await;
    envelope("ok", result)
}

pub async fn revoke_token(
    gate: &AuthGate,
    registry: &TokenRegistry,
    name: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("admin_revoke_token", None).await?;
        identity.check_admin()?;
        registry.revoke(name).await?;
        Ok(json!({ "name": name, "revoked": true }))
    }
    .await;
    envelope("deleted", result)
}

pub async fn update_token(
    gate: &AuthGate,
    registry: &TokenRegistry,
    name: &str,
    permissions: Option<Vec<String>>,
    space_ids: Option<Vec<String>>,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("admin_update_token", None).await?;
        identity.check_admin()?;
        let permissions = permissions.as_deref().map(parse_permissions).transpose()?;
        let record = registry.update(name, permissions, space_ids).await?;
        Ok(token_view(&record))
    }
    .await;
    envelope("ok", result)
}

pub async fn gc_notes(
    gate: &AuthGate,
    gc: &GarbageCollector,
    space: Option<&str>,
    max_age_days: Option<i64>,
    confirm: bool,
    delete_only: bool,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("admin_gc_notes", space).await?;
        identity.check_admin()?;
        if !confirm {
            let scan = gc.scan(&identity, space, max_age_days).await?;
            let mut body = payload(&scan)?;
            if let Some(map) = body.as_object_mut() {
                map.insert("dry_run".into(), json!(true));
            }
            return Ok(body);
        }
        payload(&gc.collect(&identity, space, max_age_days, delete_only).await?)
    }
    .await;
    envelope("ok", result)
}
