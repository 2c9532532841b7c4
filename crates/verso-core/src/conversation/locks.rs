use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per chat session, created on demand.
///
/// Exchanges on the same session queue up behind each other; different
/// sessions never contend. Entries whose lock is no longer held or awaited
/// are pruned on the next acquisition.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionLocks {
    inner: Arc<Mutex<HashMap<Uuid, Weak<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    pub(crate) async fn acquire(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, weak| weak.strong_count() > 0);
            match map.get(&session_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    map.insert(session_id, Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, weak| weak.strong_count() > 0);
        map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_session_waits_for_holder() {
        let locks = SessionLocks::default();
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;
        let pending = tokio::time::timeout(Duration::from_millis(50), locks.acquire(id)).await;
        assert!(pending.is_err(), "second acquire must block while the first is held");

        drop(guard);
        let again = tokio::time::timeout(Duration::from_millis(500), locks.acquire(id)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn different_sessions_do_not_contend() {
        let locks = SessionLocks::default();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_locks_are_pruned() {
        let locks = SessionLocks::default();
        {
            let _g = locks.acquire(Uuid::new_v4()).await;
            assert_eq!(locks.tracked(), 1);
        }
        assert_eq!(locks.tracked(), 0);
    }
}
