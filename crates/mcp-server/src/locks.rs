//! Process-local named locks.
//!
//! One lazily-created mutex per space serializes consolidation; a single
//! global mutex guards the read-modify-write cycle of the token registry.
//! Both are plain `tokio::sync::Mutex` values held across suspension points.
//! Cross-process coordination is out of scope: the bucket has exactly one
//! server process in front of it.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, TryLockError};

#[derive(Default)]
pub struct LockRegistry {
    consolidation: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    tokens: Arc<Mutex<()>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The consolidation mutex for a space, created on first use.
    pub fn consolidation(&self, space_id: &str) -> Arc<Mutex<()>> {
        let mut map = self
            .consolidation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.entry(space_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fail-fast acquisition: a second concurrent consolidation on the same
    /// space must not queue behind the first.
    pub fn try_consolidation(
        &self,
        space_id: &str,
    ) -> Result<OwnedMutexGuard<()>, TryLockError> {
        self.consolidation(space_id).try_lock_owned()
    }

    /// The global token-registry mutex.
    pub fn tokens(&self) -> Arc<Mutex<()>> {
        self.tokens.clone()
    }
}
