//! Space tools: create, list, info, rules, summary, export, delete.

use rmcp::model::{CallToolResult, ErrorData};
use serde_json::json;

use super::{envelope, payload};
use crate::auth::AuthGate;
use crate::error::ServiceError;
use crate::spaces::SpaceRepo;

pub async fn create(
    gate: &AuthGate,
    spaces: &SpaceRepo,
    space_id: &str,
    description: &str,
    rules: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("space_create", Some(space_id)).await?;
        identity.check_write()?;
        let meta = spaces.create(space_id, description, rules, &identity.name).await?;
        Ok(json!({
            "space_id": meta.space_id,
            "owner": meta.owner,
            "created_at": meta.created_at,
            "rules_size": meta.rules_size,
        }))
    }
    .await;
    envelope("created", result)
}

pub async fn list(gate: &AuthGate, spaces: &SpaceRepo) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("space_list", None).await?;
        let entries = spaces.list(&identity).await?;
        Ok(json!({
            "count": entries.len(),
            "spaces": payload(&entries)?,
        }))
    }
    .await;
    envelope("ok", result)
}

pub async fn info(
    gate: &AuthGate,
    spaces: &SpaceRepo,
    space_id: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("space_info", Some(space_id)).await?;
        identity.check_access(space_id)?;
        payload(&spaces.info(space_id).await?)
    }
    .await;
    envelope("ok", result)
}

pub async fn rules(
    gate: &AuthGate,
    spaces: &SpaceRepo,
    space_id: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("space_rules", Some(space_id)).await?;
        identity.check_access(space_id)?;
        let rules = spaces.rules(space_id).await?;
        Ok(json!({ "space_id": space_id, "rules": rules }))
    }
    .await;
    envelope("ok", result)
}

pub async fn summary(
    gate: &AuthGate,
    spaces: &SpaceRepo,
    space_id: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("space_summary", Some(space_id)).await?;
        identity.check_access(space_id)?;
        let info = spaces.info(space_id).await?;
        let rules = spaces.rules(space_id).await?;
        let bank: Vec<_> = spaces
            .bank_contents(space_id)
            .await?
            .into_iter()
            .map(|(filename, content)| json!({ "filename": filename, "content": content }))
            .collect();
        Ok(json!({
            "info": payload(&info)?,
            "rules": rules,
            "bank": bank,
        }))
    }
    .await;
    envelope("ok", result)
}

pub async fn export(
    gate: &AuthGate,
    spaces: &SpaceRepo,
    space_id: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("space_export", Some(space_id)).await?;
        identity.check_access(space_id)?;
        payload(&spaces.export(space_id).await?)
    }
    .await;
    envelope("ok", result)
}

pub async fn delete(
    gate: &AuthGate,
    spaces: &SpaceRepo,
    space_id: &str,
    confirm: bool,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("space_delete", Some(space_id)).await?;
        identity.check_admin()?;
        identity.check_access(space_id)?;
        if !confirm {
            return Err(ServiceError::Validation(
                "space_delete is destructive; pass confirm=true to proceed".into(),
            ));
        }
        let deleted = spaces.delete(space_id).await?;
        Ok(json!({ "space_id": space_id, "objects_deleted": deleted }))
    }
    .await;
    envelope("deleted", result)
}
