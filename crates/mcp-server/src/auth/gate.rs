//! Request-scoped bearer resolution.
//!
//! The transport binding owns header parsing and wraps each call in
//! [`AuthGate::with_bearer`]; tools then call [`AuthGate::authenticate`] to
//! get the caller's [`Identity`]. The bearer travels in a task-local so the
//! server core stays transport-agnostic.

use std::sync::Arc;

use crate::auth::{Identity, TokenRegistry};
use crate::error::ServiceError;

tokio::task_local! {
    static BEARER: Option<String>;
}

#[derive(Clone)]
pub struct AuthGate {
    registry: Arc<TokenRegistry>,
    bootstrap_token: String,
    /// Credential assumed when no request scope is active. Set by the stdio
    /// binding, where the single local client is the operator; the HTTP
    /// binding leaves it unset and scopes every request explicitly.
    default_bearer: Option<String>,
}

impl AuthGate {
    pub fn new(registry: Arc<TokenRegistry>, bootstrap_token: String) -> Self {
        Self {
            registry,
            bootstrap_token,
            default_bearer: None,
        }
    }

    pub fn with_default_bearer(mut self, bearer: Option<String>) -> Self {
        self.default_bearer = bearer;
        self
    }

    /// Run a future with the given bearer value in scope. One value per
    /// in-flight request; nested scopes shadow the outer one.
    pub async fn with_bearer<F>(bearer: Option<String>, fut: F) -> F::Output
    where
        F: std::future::Future,
    {
        BEARER.scope(bearer, fut).await
    }

    /// Resolve the current request's credential to an identity and emit the
    /// audit line. `tool` and `space` are only used for that line.
    pub async fn authenticate(
        &self,
        tool: &str,
        space: Option<&str>,
    ) -> Result<Identity, ServiceError> {
        let raw = BEARER
            .try_with(|b| b.clone())
            .ok()
            .flatten()
            .or_else(|| self.default_bearer.clone())
            .ok_or_else(|| ServiceError::Forbidden("missing bearer credential".into()))?;
        let credential = raw.strip_prefix("Bearer ").unwrap_or(&raw).trim();
        if credential.is_empty() {
            return Err(ServiceError::Forbidden("missing bearer credential".into()));
        }

        let identity = if credential == self.bootstrap_token {
            Identity::bootstrap()
        } else {
            let record = self.registry.lookup(credential).await?;
            self.registry.touch(record.hash.clone());
            Identity {
                name: record.name,
                permissions: record.permissions,
                space_ids: record.space_ids,
                hash_prefix: record.hash.chars().take(15).collect(),
            }
        };

        tracing::info!(
            identity = %identity.name,
            hash = %identity.hash_prefix,
            tool,
            space = space.unwrap_or("-"),
            "authenticated call"
        );
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Permission;
    use crate::locks::LockRegistry;
    use crate::storage::BucketStore;

    fn gate_with_registry() -> (AuthGate, Arc<TokenRegistry>) {
        let registry = Arc::new(TokenRegistry::new(
            BucketStore::in_memory(),
            &LockRegistry::new(),
        ));
        let gate = AuthGate::new(registry.clone(), "lm_bootstrap_secret".into());
        (gate, registry)
    }

    #[tokio::test]
    async fn bootstrap_credential_resolves_to_universal_admin() {
        let (gate, _) = gate_with_registry();
        let identity = AuthGate::with_bearer(Some("Bearer lm_bootstrap_secret".into()), async {
            gate.authenticate("system_health", None).await
        })
        .await
        .unwrap();
        assert_eq!(identity.name, "bootstrap");
        assert!(identity.check_admin().is_ok());
        assert!(identity.space_ids.is_empty());
    }

    #[tokio::test]
    async fn registered_credential_resolves_to_its_record() {
        let (gate, registry) = gate_with_registry();
        let (cred, _) = registry
            .create("t1", vec![Permission::Write], vec!["a".into()], None)
            .await
            .unwrap();

        let identity = AuthGate::with_bearer(Some(cred), async {
            gate.authenticate("live_note", Some("a")).await
        })
        .await
        .unwrap();
        assert_eq!(identity.name, "t1");
        assert_eq!(identity.space_ids, vec!["a"]);
        assert!(identity.check_write().is_ok());
        assert!(identity.check_admin().is_err());
    }

    #[tokio::test]
    async fn missing_bearer_is_forbidden() {
        let (gate, _) = gate_with_registry();
        let err = AuthGate::with_bearer(None, async { gate.authenticate("space_list", None).await })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn outside_any_scope_is_forbidden() {
        let (gate, _) = gate_with_registry();
        let err = gate.authenticate("space_list", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn default_bearer_covers_unscoped_callers() {
        let (gate, _) = gate_with_registry();
        let gate = gate.with_default_bearer(Some("lm_bootstrap_secret".into()));
        let identity = gate.authenticate("system_health", None).await.unwrap();
        assert_eq!(identity.name, "bootstrap");

        // An explicit request scope still wins over the default.
        let err = AuthGate::with_bearer(Some("lm_wrong".into()), async {
            gate.authenticate("space_list", None).await
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn unknown_credential_is_forbidden() {
        let (gate, _) = gate_with_registry();
        let err = AuthGate::with_bearer(Some("lm_not_registered".into()), async {
            gate.authenticate("space_list", None).await
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }
}
