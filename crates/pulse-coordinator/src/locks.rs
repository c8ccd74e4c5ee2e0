use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One logical lock per aggregate key. Units of work targeting the same poll
/// or chat thread serialize here; unrelated keys stay fully concurrent.
///
/// Entries are never removed: keys are poll/room ids, which are bounded by
/// the content of the blog platform, and rooms are never destroyed anyway.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = KeyedLocks::new();
        let key = Uuid::new_v4();
        let busy = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let busy = busy.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(key).await;
                // While the guard is held nobody else may be inside.
                assert!(!busy.swap(true, Ordering::SeqCst));
                tokio::task::yield_now().await;
                busy.store(false, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let a = locks.acquire(Uuid::new_v4()).await;
        // A second, unrelated key must be acquirable while `a` is held.
        let b = locks.acquire(Uuid::new_v4()).await;
        drop(a);
        drop(b);
    }
}
