//! Bank tools: read, read_all, list, consolidate.

use rmcp::model::{CallToolResult, ErrorData};
use serde_json::json;

use super::{envelope, payload};
use crate::auth::AuthGate;
use crate::consolidate::Consolidator;
use crate::error::ServiceError;
use crate::spaces::SpaceRepo;
use crate::storage::{bank_file_key, BucketStore};

pub async fn read(
    gate: &AuthGate,
    store: &BucketStore,
    spaces: &SpaceRepo,
    space_id: &str,
    filename: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("bank_read", Some(space_id)).await?;
        identity.check_access(space_id)?;
        note_format::validate_bank_filename(filename)?;
        // Resolve the space first so a missing space reads as such.
        spaces.info(space_id).await?;
        let content = store
            .get_text(&bank_file_key(space_id, filename))
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "bank file '{filename}' not found in space '{space_id}'"
                ))
            })?;
        Ok(json!({
            "filename": filename,
            "size": content.len(),
            "content": content,
        }))
    }
    .await;
    envelope("ok", result)
}

pub async fn read_all(
    gate: &AuthGate,
    spaces: &SpaceRepo,
    space_id: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("bank_read_all", Some(space_id)).await?;
        identity.check_access(space_id)?;
        spaces.info(space_id).await?;
        let files: Vec<_> = spaces
            .bank_contents(space_id)
            .await?
            .into_iter()
            .map(|(filename, content)| json!({ "filename": filename, "content": content }))
            .collect();
        Ok(json!({ "count": files.len(), "files": files }))
    }
    .await;
    envelope("ok", result)
}

pub async fn list(
    gate: &AuthGate,
    spaces: &SpaceRepo,
    space_id: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("bank_list", Some(space_id)).await?;
        identity.check_access(space_id)?;
        spaces.info(space_id).await?;
        let files = spaces.bank_files(space_id).await?;
        Ok(json!({ "count": files.len(), "files": payload(&files)? }))
    }
    .await;
    envelope("ok", result)
}

/// `bank_consolidate`. Non-admin identities may only consolidate their own
/// notes: an omitted agent defaults to the identity name, and any other value
/// is rejected. Admin and bootstrap may target any agent or all notes.
pub async fn consolidate(
    gate: &AuthGate,
    consolidator: &Consolidator,
    space_id: &str,
    agent: Option<&str>,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("bank_consolidate", Some(space_id)).await?;
        identity.check_access(space_id)?;
        identity.check_write()?;

        let agent_filter: Option<String> = if identity.is_admin() {
            agent.filter(|a| !a.is_empty()).map(String::from)
        } else {
            match agent.filter(|a| !a.is_empty()) {
                None => Some(identity.name.clone()),
                Some(a) if a == identity.name => Some(a.to_string()),
                Some(other) => {
                    return Err(ServiceError::Forbidden(format!(
                        "token '{}' may only consolidate its own notes, not agent '{other}'",
                        identity.name
                    )))
                }
            }
        };

        let report = consolidator
            .consolidate(space_id, agent_filter.as_deref())
            .await?;
        payload(&report)
    }
    .await;
    envelope("ok", result)
}
