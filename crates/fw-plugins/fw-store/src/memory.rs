//! In-memory record store for development and testing.
//!
//! Not suitable for production use: nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fw_core::{
    ContentId, EditMarker, ImageBlacklist, ImageHash, PermissionTier, RestoreQueue, Result,
    ReviewLedger, TrustRegistry, UserId, UserTrust, WardenError,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type Key = (String, u64);

fn key(forum: &str, id: u64) -> Key {
    (forum.to_string(), id)
}

/// DashMap-backed implementation of every record namespace.
#[derive(Clone)]
pub struct MemoryStore {
    reviewed: Arc<DashMap<Key, (EditMarker, DateTime<Utc>)>>,
    /// Trust rows carry a write sequence so that ties in `recorded_at` still order.
    trust: Arc<DashMap<Key, (UserTrust, u64)>>,
    images: Arc<DashMap<Key, String>>,
    pending: Arc<DashMap<Key, DateTime<Utc>>>,
    sequence: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
    writable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            reviewed: Arc::new(DashMap::new()),
            trust: Arc::new(DashMap::new()),
            images: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            sequence: Arc::new(AtomicU64::new(0)),
            available: Arc::new(AtomicBool::new(true)),
            writable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates losing (or regaining) the backing store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulates a store that still answers reads but refuses writes.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    /// Number of review records across all forums.
    pub fn reviewed_count(&self) -> usize {
        self.reviewed.len()
    }

    /// Backdates a review record, for sweep tests.
    pub fn backdate_reviewed(&self, forum: &str, id: ContentId, age: Duration) {
        if let Some(mut entry) = self.reviewed.get_mut(&key(forum, id.0)) {
            entry.1 = Utc::now() - age;
        }
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WardenError::StoreUnavailable("memory store offline".into()))
        }
    }

    fn check_write(&self) -> Result<()> {
        self.check()?;
        if self.writable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WardenError::StoreUnavailable("memory store read-only".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReviewLedger for MemoryStore {
    async fn reviewed(&self, forum: &str, id: ContentId) -> Result<Option<EditMarker>> {
        self.check()?;
        Ok(self.reviewed.get(&key(forum, id.0)).map(|e| e.0))
    }

    async fn mark_reviewed(&self, forum: &str, id: ContentId, marker: EditMarker) -> Result<()> {
        self.check_write()?;
        self.reviewed.insert(key(forum, id.0), (marker, Utc::now()));
        Ok(())
    }

    async fn sweep_reviewed(&self, max_age: Duration) -> Result<u64> {
        self.check_write()?;
        let cutoff = Utc::now() - max_age;
        let before = self.reviewed.len();
        self.reviewed.retain(|_, (_, recorded_at)| *recorded_at >= cutoff);
        Ok(before.saturating_sub(self.reviewed.len()) as u64)
    }
}

#[async_trait]
impl TrustRegistry for MemoryStore {
    async fn user_trust(&self, forum: &str, user_id: UserId) -> Result<Option<UserTrust>> {
        self.check()?;
        Ok(self.trust.get(&key(forum, user_id.0)).map(|e| e.0.clone()))
    }

    async fn set_user_trust(&self, forum: &str, user_id: UserId, tier: PermissionTier, note: &str) -> Result<()> {
        self.check_write()?;
        if tier == PermissionTier::Neutral {
            self.trust.remove(&key(forum, user_id.0));
            return Ok(());
        }
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let row = UserTrust { user_id, tier, note: note.to_string(), recorded_at: Utc::now() };
        self.trust.insert(key(forum, user_id.0), (row, seq));
        Ok(())
    }

    async fn clear_user_trust(&self, forum: &str, user_id: UserId) -> Result<()> {
        self.check_write()?;
        self.trust.remove(&key(forum, user_id.0));
        Ok(())
    }

    async fn operators(&self, forum: &str, min_tier: PermissionTier, limit: usize) -> Result<Vec<UserId>> {
        self.check()?;
        let floor = min_tier.max(PermissionTier::Tier1);
        let mut rows: Vec<(DateTime<Utc>, u64, UserId)> = self
            .trust
            .iter()
            .filter(|e| e.key().0 == forum && e.value().0.tier >= floor)
            .map(|e| (e.value().0.recorded_at, e.value().1, e.value().0.user_id))
            .collect();
        rows.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        Ok(rows.into_iter().take(limit).map(|r| r.2).collect())
    }
}

#[async_trait]
impl ImageBlacklist for MemoryStore {
    async fn image_banned(&self, forum: &str, hash: ImageHash) -> Result<bool> {
        self.check()?;
        Ok(self.images.contains_key(&key(forum, hash.0)))
    }

    async fn ban_image(&self, forum: &str, hash: ImageHash, source_ref: &str) -> Result<()> {
        self.check_write()?;
        self.images.insert(key(forum, hash.0), source_ref.to_string());
        Ok(())
    }

    async fn unban_image(&self, forum: &str, hash: ImageHash) -> Result<()> {
        self.check_write()?;
        self.images.remove(&key(forum, hash.0));
        Ok(())
    }
}

#[async_trait]
impl RestoreQueue for MemoryStore {
    async fn pending_restores(&self, forum: &str) -> Result<Vec<ContentId>> {
        self.check()?;
        let mut rows: Vec<(DateTime<Utc>, ContentId)> = self
            .pending
            .iter()
            .filter(|e| e.key().0 == forum)
            .map(|e| (*e.value(), ContentId(e.key().1)))
            .collect();
        rows.sort();
        Ok(rows.into_iter().map(|r| r.1).collect())
    }

    async fn add_pending(&self, forum: &str, thread_id: ContentId) -> Result<()> {
        self.check_write()?;
        self.pending.insert(key(forum, thread_id.0), Utc::now());
        Ok(())
    }

    async fn remove_pending(&self, forum: &str, thread_id: ContentId) -> Result<()> {
        self.check_write()?;
        self.pending.remove(&key(forum, thread_id.0));
        Ok(())
    }
}
