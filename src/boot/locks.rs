//! Named job locks. Each name admits one holder; later callers queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::ui::prelude::*;

pub const ATTACH_LOCK: &str = "attach-lock";
pub const SCRUB_LOCK: &str = "scrub-lock";

#[derive(Clone, Default)]
pub struct JobLocks {
    table: Arc<Mutex<HashMap<&'static str, Arc<AsyncMutex<()>>>>>,
}

impl JobLocks {
    fn entry(&self, name: &'static str) -> Arc<AsyncMutex<()>> {
        let mut table = match self.table.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.entry(name).or_default().clone()
    }

    /// Wait for `name` to be free and hold it until the guard drops.
    pub async fn acquire(&self, name: &'static str) -> OwnedMutexGuard<()> {
        let lock = self.entry(name);
        if let Ok(guard) = lock.clone().try_lock_owned() {
            return guard;
        }
        emit(
            Level::Debug,
            "lock.wait",
            &format!("waiting for {} held by another job", name),
            None,
        );
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub fn is_held(&self, name: &'static str) -> bool {
        self.entry(name).try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_holder_waits_for_release() {
        let locks = JobLocks::default();
        let guard = locks.acquire(ATTACH_LOCK).await;
        assert!(locks.is_held(ATTACH_LOCK));

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(ATTACH_LOCK).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_held(ATTACH_LOCK));
    }

    #[tokio::test]
    async fn names_are_independent() {
        let locks = JobLocks::default();
        let _attach = locks.acquire(ATTACH_LOCK).await;
        assert!(!locks.is_held(SCRUB_LOCK));
        let _scrub = locks.acquire(SCRUB_LOCK).await;
        assert!(locks.is_held(SCRUB_LOCK));
    }
}
