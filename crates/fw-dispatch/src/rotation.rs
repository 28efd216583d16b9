//! On-call rotation and the broadcast debounce.

use dashmap::DashMap;
use fw_core::{PermissionTier, RecordStore, Result, UserId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Bounded, most-recently-active-first queue of operators per forum.
/// Seeded lazily from the record store's operator list.
pub struct OnCallRotation {
    store: Arc<dyn RecordStore>,
    capacity: usize,
    queues: DashMap<String, VecDeque<UserId>>,
}

impl OnCallRotation {
    pub fn new(store: Arc<dyn RecordStore>, capacity: usize) -> Self {
        Self { store, capacity: capacity.max(1), queues: DashMap::new() }
    }

    async fn ensure_seeded(&self, forum: &str) -> Result<()> {
        if self.queues.contains_key(forum) {
            return Ok(());
        }
        let operators = self.store.operators(forum, PermissionTier::Tier2, self.capacity).await?;
        self.queues.entry(forum.to_string()).or_insert_with(|| operators.into_iter().collect());
        Ok(())
    }

    /// Moves `user` to the front of the forum's queue.
    pub async fn register(&self, forum: &str, user: UserId) -> Result<()> {
        self.ensure_seeded(forum).await?;
        let mut queue = self.queues.entry(forum.to_string()).or_default();
        queue.retain(|u| *u != user);
        queue.push_front(user);
        queue.truncate(self.capacity);
        Ok(())
    }

    /// The first `n` operators of the queue.
    pub async fn front(&self, forum: &str, n: usize) -> Result<Vec<UserId>> {
        self.ensure_seeded(forum).await?;
        Ok(self
            .queues
            .get(forum)
            .map(|q| q.iter().take(n).copied().collect())
            .unwrap_or_default())
    }
}

/// Process-wide debounce: at most one broadcast per interval.
pub struct BroadcastCooldown {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl BroadcastCooldown {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: Mutex::new(None) }
    }

    /// True while the last recorded broadcast is younger than the interval.
    pub fn is_cooling(&self) -> bool {
        matches!(*self.lock(), Some(at) if at.elapsed() < self.interval)
    }

    /// Starts the cooldown. Call only once the broadcast went out.
    pub fn mark(&self) {
        *self.lock() = Some(Instant::now());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_core::TrustRegistry;
    use fw_store::MemoryStore;

    #[tokio::test]
    async fn test_register_moves_to_front() {
        let store = MemoryStore::new();
        store.set_user_trust("f", UserId(1), PermissionTier::Tier2, "").await.unwrap();
        store.set_user_trust("f", UserId(2), PermissionTier::Tier3, "").await.unwrap();
        store.set_user_trust("f", UserId(3), PermissionTier::Tier1, "").await.unwrap();

        let rotation = OnCallRotation::new(Arc::new(store), 3);
        // Most recently recorded first; tier1 is not on call.
        assert_eq!(rotation.front("f", 4).await.unwrap(), vec![UserId(2), UserId(1)]);

        rotation.register("f", UserId(1)).await.unwrap();
        assert_eq!(rotation.front("f", 4).await.unwrap(), vec![UserId(1), UserId(2)]);

        rotation.register("f", UserId(7)).await.unwrap();
        rotation.register("f", UserId(8)).await.unwrap();
        assert_eq!(rotation.front("f", 4).await.unwrap(), vec![UserId(8), UserId(7), UserId(1)]);
    }

    #[tokio::test]
    async fn test_forums_are_separate() {
        let rotation = OnCallRotation::new(Arc::new(MemoryStore::new()), 4);
        rotation.register("a", UserId(1)).await.unwrap();
        assert!(rotation.front("b", 4).await.unwrap().is_empty());
    }

    #[test]
    fn test_cooldown_debounces() {
        let cooldown = BroadcastCooldown::new(Duration::from_secs(3600));
        assert!(!cooldown.is_cooling());
        // Checking alone never starts the cooldown.
        assert!(!cooldown.is_cooling());
        cooldown.mark();
        assert!(cooldown.is_cooling());

        let open = BroadcastCooldown::new(Duration::ZERO);
        open.mark();
        assert!(!open.is_cooling());
    }
}
