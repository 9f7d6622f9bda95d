//! Per-key async mutexes serializing mutations of one subscription (or one user's
//! subscription set, or one webhook event) while leaving unrelated keys independent.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::payment_provider::PaymentProvider,
};

/// Prune idle entries once the registry grows past this many keys.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Guards creation of a user's subscriptions (single-live invariant).
    User(Uuid),
    Subscription(Uuid),
    WebhookEvent(PaymentProvider, String),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::User(id) => write!(f, "user:{}", id),
            LockKey::Subscription(id) => write!(f, "subscription:{}", id),
            LockKey::WebhookEvent(provider, id) => write!(f, "webhook:{}:{}", provider, id),
        }
    }
}

/// Held while the key is locked; dropping it releases the lock on every exit path.
#[derive(Debug)]
pub struct KeyedLockGuard {
    _guard: OwnedMutexGuard<()>,
}

pub struct KeyedLocks {
    entries: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
}

impl KeyedLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Waits up to the configured timeout for `key`. Fails with `LockTimeout`, which is
    /// retryable, rather than blocking a webhook response.
    pub async fn acquire(&self, key: LockKey) -> AppResult<KeyedLockGuard> {
        let lock = self.entry(&key)?;

        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(KeyedLockGuard { _guard: guard }),
            Err(_) => {
                tracing::warn!(key = %key, timeout_ms = self.timeout.as_millis() as u64, "Lock acquisition timed out");
                Err(AppError::LockTimeout(key.to_string()))
            }
        }
    }

    fn entry(&self, key: &LockKey) -> AppResult<Arc<AsyncMutex<()>>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("Lock registry poisoned".into()))?;

        if entries.len() >= PRUNE_THRESHOLD {
            // Only the map holds an idle entry.
            entries.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        Ok(Arc::clone(
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        ))
    }
}
