//! Hashed-credential registry persisted as `_system/tokens.json`.
//!
//! The plain credential exists exactly once on the wire: in the response of
//! `admin_create_token`. Everything at rest is `sha256:<hex>`. All mutations
//! run the full read-modify-write cycle under the global tokens mutex; the
//! read path takes the mutex only around the load step.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::Permission;
use crate::error::ServiceError;
use crate::locks::LockRegistry;
use crate::storage::{BucketStore, TOKENS_KEY};

const TOKEN_FILE_VERSION: u32 = 1;
const CREDENTIAL_PREFIX: &str = "lm_";

/// One registered credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub hash: String,
    pub name: String,
    pub permissions: Vec<Permission>,
    /// Empty means universal scope.
    #[serde(default)]
    pub space_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
}

impl TokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFile {
    version: u32,
    tokens: Vec<TokenRecord>,
}

impl Default for TokenFile {
    fn default() -> Self {
        Self {
            version: TOKEN_FILE_VERSION,
            tokens: Vec::new(),
        }
    }
}

/// Generate a fresh opaque credential: `lm_` + 43 url-safe base64 chars
/// (32 random bytes).
pub fn generate_credential() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!("{CREDENTIAL_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Storage key for a credential: `sha256:` + hex digest.
pub fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[derive(Clone)]
pub struct TokenRegistry {
    store: BucketStore,
    lock: Arc<Mutex<()>>,
}

impl TokenRegistry {
    pub fn new(store: BucketStore, locks: &LockRegistry) -> Self {
        Self {
            store,
            lock: locks.tokens(),
        }
    }

    /// Load the registry file. A missing file is an empty registry; a
    /// corrupt one is surfaced, never rewritten.
    async fn load(&self) -> Result<TokenFile, ServiceError> {
        Ok(self
            .store
            .get_json::<TokenFile>(TOKENS_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, file: &TokenFile) -> Result<(), ServiceError> {
        Ok(self.store.put_json(TOKENS_KEY, file).await?)
    }

    /// Create a token. Returns the plain credential (shown once) and the
    /// stored record.
    pub async fn create(
        &self,
        name: &str,
        permissions: Vec<Permission>,
        space_ids: Vec<String>,
        expires_days: Option<i64>,
    ) -> Result<(String, TokenRecord), ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::Validation("invalid name: must not be empty".into()));
        }
        if permissions.is_empty() {
            return Err(ServiceError::Validation(
                "invalid permissions: must not be empty".into(),
            ));
        }
        for space_id in &space_ids {
            note_format::validate_space_id(space_id)?;
        }

        let credential = generate_credential();
        let now = Utc::now();
        let record = TokenRecord {
            hash: hash_credential(&credential),
            name: name.to_string(),
            permissions,
            space_ids,
            created_at: now,
            expires_at: expires_days.map(|d| now + Duration::days(d)),
            last_used_at: None,
            revoked: false,
        };

        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        if file.tokens.iter().any(|t| t.name == name && !t.revoked) {
            return Err(ServiceError::AlreadyExists(format!(
                "token '{name}' already exists"
            )));
        }
        file.tokens.push(record.clone());
        self.save(&file).await?;
        Ok((credential, record))
    }

    pub async fn list(&self) -> Result<Vec<TokenRecord>, ServiceError> {
        let file = {
            let _guard = self.lock.lock().await;
            self.load().await?
        };
        Ok(file.tokens)
    }

    /// Change a token's scope and/or permissions.
    pub async fn update(
        &self,
        name: &str,
        permissions: Option<Vec<Permission>>,
        space_ids: Option<Vec<String>>,
    ) -> Result<TokenRecord, ServiceError> {
        if let Some(ids) = &space_ids {
            for space_id in ids {
                note_format::validate_space_id(space_id)?;
            }
        }
        if permissions.as_ref().is_some_and(|p| p.is_empty()) {
            return Err(ServiceError::Validation(
                "invalid permissions: must not be empty".into(),
            ));
        }

        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let record = file
            .tokens
            .iter_mut()
            .find(|t| t.name == name && !t.revoked)
            .ok_or_else(|| ServiceError::NotFound(format!("token '{name}' not found")))?;
        if let Some(p) = permissions {
            record.permissions = p;
        }
        if let Some(ids) = space_ids {
            record.space_ids = ids;
        }
        let updated = record.clone();
        self.save(&file).await?;
        Ok(updated)
    }

    /// Soft delete: the record stays for audit, the hash stops resolving.
    pub async fn revoke(&self, name: &str) -> Result<(), ServiceError> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let record = file
            .tokens
            .iter_mut()
            .find(|t| t.name == name && !t.revoked)
            .ok_or_else(|| ServiceError::NotFound(format!("token '{name}' not found")))?;
        record.revoked = true;
        self.save(&file).await?;
        Ok(())
    }

    /// Resolve a plain credential to its record, rejecting missing, revoked,
    /// and expired tokens.
    pub async fn lookup(&self, credential: &str) -> Result<TokenRecord, ServiceError> {
        let hash = hash_credential(credential);
        let file = {
            let _guard = self.lock.lock().await;
            self.load().await?
        };
        let record = file
            .tokens
            .into_iter()
            .find(|t| t.hash == hash)
            .ok_or_else(|| ServiceError::Forbidden("unknown credential".into()))?;
        if record.revoked {
            return Err(ServiceError::Forbidden("credential has been revoked".into()));
        }
        if record.is_expired(Utc::now()) {
            return Err(ServiceError::Forbidden("credential has expired".into()));
        }
        Ok(record)
    }

    /// Record a use of the token. Runs out of band; the request does not wait
    /// for the registry write.
    pub fn touch(&self, hash: String) {
        let registry = self.clone();
        tokio::spawn(async move {
            let _guard = registry.lock.lock().await;
            let mut file = match registry.load().await {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load token registry for last_used_at");
                    return;
                }
            };
            if let Some(record) = file.tokens.iter_mut().find(|t| t.hash == hash) {
                record.last_used_at = Some(Utc::now());
                if let Err(e) = registry.save(&file).await {
                    tracing::warn!(error = %e, "failed to persist last_used_at");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TokenRegistry {
        TokenRegistry::new(BucketStore::in_memory(), &LockRegistry::new())
    }

    #[test]
    fn credentials_have_the_documented_shape() {
        let cred = generate_credential();
        assert!(cred.starts_with("lm_"));
        assert_eq!(cred.len(), "lm_".len() + 43);
        assert!(cred["lm_".len()..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(cred, generate_credential());
    }

    #[test]
    fn hashing_is_stable_and_prefixed() {
        let h = hash_credential("lm_abc");
        assert!(h.starts_with("sha256:"));
        assert_eq!(h.len(), "sha256:".len() + 64);
        assert_eq!(h, hash_credential("lm_abc"));
    }

    #[tokio::test]
    async fn create_then_lookup_round_trips() {
        let reg = registry();
        let (cred, record) = reg
            .create("t1", vec![Permission::Read, Permission::Write], vec!["a".into()], None)
            .await
            .unwrap();
        assert_eq!(record.hash, hash_credential(&cred));

        let found = reg.lookup(&cred).await.unwrap();
        assert_eq!(found.name, "t1");
        assert_eq!(found.space_ids, vec!["a"]);
        // The plain credential is never stored.
        let raw = reg.store.get_text(TOKENS_KEY).await.unwrap().unwrap();
        assert!(!raw.contains(&cred));
        assert!(raw.contains(&record.hash));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let reg = registry();
        reg.create("t1", vec![Permission::Read], vec![], None)
            .await
            .unwrap();
        let err = reg
            .create("t1", vec![Permission::Read], vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn revoked_tokens_stop_resolving_but_stay_listed() {
        let reg = registry();
        let (cred, _) = reg
            .create("t1", vec![Permission::Read], vec![], None)
            .await
            .unwrap();
        reg.revoke("t1").await.unwrap();

        assert!(matches!(
            reg.lookup(&cred).await,
            Err(ServiceError::Forbidden(_))
        ));
        let listed = reg.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].revoked);
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected() {
        let reg = registry();
        let (cred, _) = reg
            .create("t1", vec![Permission::Read], vec![], Some(0))
            .await
            .unwrap();
        assert!(matches!(
            reg.lookup(&cred).await,
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn update_changes_scope() {
        let reg = registry();
        let (cred, _) = reg
            .create("t1", vec![Permission::Write], vec!["a".into()], None)
            .await
            .unwrap();
        reg.update("t1", None, Some(vec!["a".into(), "b".into()]))
            .await
            .unwrap();
        let found = reg.lookup(&cred).await.unwrap();
        assert_eq!(found.space_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn corrupt_registry_is_surfaced_not_rewritten() {
        let reg = registry();
        reg.store.put_text(TOKENS_KEY, "{broken").await.unwrap();
        let err = reg.list().await.unwrap_err();
        assert!(matches!(err, ServiceError::Corrupt(_)));
        assert_eq!(
            reg.store.get_text(TOKENS_KEY).await.unwrap().unwrap(),
            "{broken"
        );
    }

    #[tokio::test]
    async fn unknown_credential_is_forbidden() {
        let reg = registry();
        assert!(matches!(
            reg.lookup("lm_nope").await,
            Err(ServiceError::Forbidden(_))
        ));
    }
}
