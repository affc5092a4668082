use std::{future::Future, sync::Arc, time::Duration};

use types::{RuntimeError, SessionLock};

/// Serializes turns per session through a [`SessionLock`] with expiry.
///
/// The expiry only exists so a crashed holder cannot wedge the session.
/// A turn that outlives it loses exclusivity.
#[derive(Clone)]
pub struct SessionMutex {
    lock: Arc<dyn SessionLock>,
    ttl: Duration,
}

impl SessionMutex {
    pub fn new(lock: Arc<dyn SessionLock>, ttl: Duration) -> Self {
        Self { lock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Runs `body` while holding the session lock and releases it on every
    /// exit path. Fails fast with [`RuntimeError::SessionBusy`] when another
    /// holder is live; `body` is not polled in that case.
    pub async fn with_lock<Fut, T>(&self, session_id: &str, body: Fut) -> Result<T, RuntimeError>
    where
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        let key = lock_key(session_id);
        let Some(token) = self.lock.try_acquire(&key, self.ttl).await? else {
            tracing::debug!(session_id, "session lock held elsewhere");
            return Err(RuntimeError::SessionBusy {
                session_id: session_id.to_owned(),
                retry_after: self.ttl,
            });
        };
        tracing::debug!(session_id, "session lock acquired");

        let outcome = body.await;

        if let Err(error) = self.lock.release(&token).await {
            tracing::warn!(session_id, %error, "failed to release session lock");
        }
        outcome
    }
}

pub fn lock_key(session_id: &str) -> String {
    format!("lock:{session_id}")
}
