//! Per-user mutual exclusion for read-modify-write commands.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hands out one async lock per user id.
///
/// Commands for different users run concurrently; commands for the same user
/// are serialised across the whole load → mutate → save sequence.
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(user_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_user_is_serialised() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.acquire("amy").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.acquire("amy").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_users_do_not_block() {
        let locks = UserLocks::new();
        let _amy = locks.acquire("amy").await;
        let bob = tokio::time::timeout(Duration::from_millis(50), locks.acquire("bob")).await;
        assert!(bob.is_ok());
    }
}
