//! Backup tools: create, list, download, restore, delete.

use rmcp::model::{CallToolResult, ErrorData};
use serde_json::json;

use super::{envelope, payload};
use crate::auth::AuthGate;
use crate::backup::BackupService;
use crate::error::ServiceError;

/// The space id a backup id refers to, for scope checks before resolution.
fn space_of(backup_id: &str) -> Result<&str, ServiceError> {
    note_format::validate_backup_id(backup_id)?;
    backup_id
        .split_once('/')
        .map(|(space_id, _)| space_id)
        .ok_or_else(|| ServiceError::Validation(format!("invalid backup_id: '{backup_id}'")))
}

pub async fn create(
    gate: &AuthGate,
    backups: &BackupService,
    space_id: &str,
    description: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("backup_create", Some(space_id)).await?;
        identity.check_access(space_id)?;
        identity.check_write()?;
        payload(&backups.create(space_id, description).await?)
    }
    .await;
    envelope("created", result)
}

pub async fn list(
    gate: &AuthGate,
    backups: &BackupService,
    space: Option<&str>,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let identity = gate.authenticate("backup_list", space).await?;
        if let Some(space_id) = space {
            identity.check_access(space_id)?;
        }
        let descriptors = backups.list(&identity, space).await?;
        Ok(json!({
            "count": descriptors.len(),
            "backups": payload(&descriptors)?,
        }))
    }
    .await;
    envelope("ok", result)
}

pub async fn download(
    gate: &AuthGate,
    backups: &BackupService,
    backup_id: &str,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let space_id = space_of(backup_id)?;
        let identity = gate.authenticate("backup_download", Some(space_id)).await?;
        identity.check_access(space_id)?;
        payload(&backups.download(backup_id).await?)
    }
    .await;
    envelope("ok", result)
}

pub async fn restore(
    gate: &AuthGate,
    backups: &BackupService,
    backup_id: &str,
    confirm: bool,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let space_id = space_of(backup_id)?;
        let identity = gate.authenticate("backup_restore", Some(space_id)).await?;
        identity.check_admin()?;
        identity.check_access(space_id)?;
        if !confirm {
            return Err(ServiceError::Validation(
                "backup_restore recreates a space; pass confirm=true to proceed".into(),
            ));
        }
        let descriptor = backups.restore(backup_id).await?;
        payload(&descriptor)
    }
    .await;
    envelope("created", result)
}

pub async fn delete(
    gate: &AuthGate,
    backups: &BackupService,
    backup_id: &str,
    confirm: bool,
) -> Result<CallToolResult, ErrorData> {
    let result = async {
        let space_id = space_of(backup_id)?;
        let identity = gate.authenticate("backup_delete", Some(space_id)).await?;
        identity.check_admin()?;
        identity.check_access(space_id)?;
        if !confirm {
            return Err(ServiceError::Validation(
                "backup_delete is destructive; pass confirm=true to proceed".into(),
            ));
        }
        let deleted = backups.delete(backup_id).await?;
        Ok(json!({ "backup_id": backup_id, "objects_deleted": deleted }))
    }
    .await;
    envelope("deleted", result)
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

    async fn create_test_env() -> (AuthGate, BackupService, SpaceRepo, Arc<TokenRegistry>) {
        let store = BucketStore::in_memory();
        let spaces = SpaceRepo::new(store.clone());
        spaces.create("demo", "", "# rules", "bootstrap").await.unwrap();
        let registry = Arc::new(TokenRegistry::new(store.clone(), &LockRegistry::new()));
        let gate = AuthGate::new(registry.clone(), BOOT.into());
        (gate, BackupService::new(store, 5), spaces, registry)
    }

    #[tokio::test]
    async fn create_list_download_round_trip() {
        let (gate, backups, _, _) = create_test_env().await;
        AuthGate::with_bearer(Some(BOOT.into()), async {
            let body =
                envelope_json(&create(&gate, &backups, "demo", "nightly").await.unwrap());
            assert_eq!(body["status"], "created");
            let backup_id = body["backup_id"].as_str().unwrap().to_string();

            let body = envelope_json(&list(&gate, &backups, Some("demo")).await.unwrap());
            assert_eq!(body["count"], 1);

            let body = envelope_json(&download(&gate, &backups, &backup_id).await.unwrap());
            assert_eq!(body["status"], "ok");
            assert!(body["archive_base64"].as_str().unwrap().len() > 0);
        })
        .await;
    }

    #[tokio::test]
    async fn restore_needs_admin_and_confirm() {
        let (gate, backups, spaces, registry) = create_test_env().await;
        let backup_id = AuthGate::with_bearer(Some(BOOT.into()), async {
            let body = envelope_json(&create(&gate, &backups, "demo", "").await.unwrap());
            body["backup_id"].as_str().unwrap().to_string()
        })
        .await;

        let (cred, _) = registry
            .create("writer", vec![Permission::Write], vec![], None)
            .await
            .unwrap();
        AuthGate::with_bearer(Some(cred), async {
            let body =
                envelope_json(&restore(&gate, &backups, &backup_id, true).await.unwrap());
            assert_eq!(body["status"], "forbidden");
        })
        .await;

        AuthGate::with_bearer(Some(BOOT.into()), async {
            let body =
                envelope_json(&restore(&gate, &backups, &backup_id, false).await.unwrap());
            assert_eq!(body["status"], "error");

            // Space still exists, so a confirmed restore conflicts.
            let body =
                envelope_json(&restore(&gate, &backups, &backup_id, true).await.unwrap());
            assert_eq!(body["status"], "already_exists");

            spaces.delete("demo").await.unwrap();
            let body =
                envelope_json(&restore(&gate, &backups, &backup_id, true).await.unwrap());
            assert_eq!(body["status"], "created");
        })
        .await;
    }

    #[tokio::test]
    async fn scoped_token_cannot_download_foreign_backups() {
        let (gate, backups, _, registry) = create_test_env().await;
        let backup_id = AuthGate::with_bearer(Some(BOOT.into()), async {
            let body = envelope_json(&create(&gate, &backups, "demo", "").await.unwrap());
            body["backup_id"].as_str().unwrap().to_string()
        })
        .await;

        let (cred, _) = registry
            .create("t1", vec![Permission::Read], vec!["other".into()], None)
            .await
            .unwrap();
        AuthGate::with_bearer(Some(cred), async {
            let body = envelope_json(&download(&gate, &backups, &backup_id).await.unwrap());
            assert_eq!(body["status"], "forbidden");
        })
        .await;
    }

    #[tokio::test]
    async fn delete_requires_confirm() {
        let (gate, backups, _, _) = create_test_env().await;
        AuthGate::with_bearer(Some(BOOT.into()), async {
            let body = envelope_json(&create(&gate, &backups, "demo", "").await.unwrap());
            let backup_id = body["backup_id"].as_str().unwrap().to_string();

            let body =
                envelope_json(&delete(&gate, &backups, &backup_id, false).await.unwrap());
            assert_eq!(body["status"], "error");

            let body =
                envelope_json(&delete(&gate, &backups, &backup_id, true).await.unwrap());
            assert_eq!(body["status"], "deleted");
        })
        .await;
    }
}
