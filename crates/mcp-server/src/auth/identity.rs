//! Request-scoped identity and capability checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ServiceError;

/// Permission levels a token can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Admin => "admin",
        })
    }
}

impl FromStr for Permission {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "admin" => Ok(Permission::Admin),
            other => Err(ServiceError::Validation(format!(
                "invalid permission '{other}' (expected read, write, or admin)"
            ))),
        }
    }
}

/// The authenticated caller of one in-flight request.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub permissions: Vec<Permission>,
    /// Spaces this identity may touch; empty means universal (I8).
    pub space_ids: Vec<String>,
    /// Leading bytes of the credential hash, for audit lines only.
    pub hash_prefix: String,
}

impl Identity {
    /// The synthetic universal admin behind the bootstrap credential.
    pub fn bootstrap() -> Self {
        Self {
            name: "bootstrap".to_string(),
            permissions: vec![Permission::Admin],
            space_ids: Vec::new(),
            hash_prefix: "bootstrap".to_string(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.permissions.contains(&Permission::Admin)
    }

    /// Scope containment: pass iff `space_ids` is empty or contains the space.
    pub fn check_access(&self, space_id: &str) -> Result<(), ServiceError> {
        if self.space_ids.is_empty() || self.space_ids.iter().any(|s| s == space_id) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "token '{}' is not scoped to space '{space_id}'",
                self.name
            )))
        }
    }

    pub fn check_write(&self) -> Result<(), ServiceError> {
        if self
            .permissions
            .iter()
            .any(|p| matches!(p, Permission::Write | Permission::Admin))
        {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "token '{}' has no write permission",
                self.name
            )))
        }
    }

    pub fn check_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "token '{}' has no admin permission",
                self.name
            )))
        }
    }
}
