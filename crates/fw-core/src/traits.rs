//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.
//! Handles are built once at startup and shared as `Arc<dyn ...>`.

use crate::error::Result;
use crate::models::{
    ActionScope, ContentId, ContentItem, EditMarker, ImageHash, MentionEvent, Page, PermissionTier,
    UserId, UserProfile, UserTrust,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;

/// How a command argument names a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    /// `#123#`: the public, platform-wide uid.
    PlatformUid(u64),
    /// `/123/`: the internal user id.
    Id(UserId),
    /// Anything else is a user name.
    Name(String),
}

/// Read and write access to the forum service.
///
/// `Ok(false)` means the service answered but did not apply the action;
/// `Err(ActionRejected)` means it refused outright.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ForumClient: Send + Sync {
    /// Mentions of the bot account, newest first.
    async fn list_mentions(&self) -> Result<Vec<MentionEvent>>;
    async fn list_threads(&self, forum: &str, page: u32) -> Result<Page<ContentItem>>;
    async fn list_posts(&self, forum: &str, thread_id: ContentId, page: u32) -> Result<Page<ContentItem>>;
    async fn list_comments(
        &self,
        forum: &str,
        thread_id: ContentId,
        post_id: ContentId,
        page: u32,
    ) -> Result<Page<ContentItem>>;
    async fn fetch_image(&self, locator: &str) -> Result<Bytes>;

    async fn delete_content(&self, forum: &str, id: ContentId, scope: ActionScope) -> Result<bool>;
    async fn hide_thread(&self, forum: &str, thread_id: ContentId) -> Result<bool>;
    async fn unhide_thread(&self, forum: &str, thread_id: ContentId) -> Result<bool>;
    async fn block_user(&self, forum: &str, user_id: UserId, days: u32, reason: &str) -> Result<bool>;
    async fn unblock_user(&self, forum: &str, user_id: UserId) -> Result<bool>;
    async fn add_to_blacklist(&self, forum: &str, user_id: UserId) -> Result<bool>;
    async fn remove_from_blacklist(&self, forum: &str, user_id: UserId) -> Result<bool>;

    /// Posts a reply in a thread with the speaker account.
    async fn reply(&self, forum: &str, thread_id: ContentId, content: &str) -> Result<bool>;
    async fn resolve_user(&self, query: &UserQuery) -> Result<Option<UserProfile>>;
}

/// Already-reviewed content ids with their edit markers.
#[async_trait]
pub trait ReviewLedger: Send + Sync {
    async fn reviewed(&self, forum: &str, id: ContentId) -> Result<Option<EditMarker>>;
    async fn mark_reviewed(&self, forum: &str, id: ContentId, marker: EditMarker) -> Result<()>;
    /// Removes records older than `max_age`, returning how many went.
    async fn sweep_reviewed(&self, max_age: Duration) -> Result<u64>;
}

/// Per-user allow/deny status. A missing row means neutral.
#[async_trait]
pub trait TrustRegistry: Send + Sync {
    async fn user_trust(&self, forum: &str, user_id: UserId) -> Result<Option<UserTrust>>;
    /// Setting `PermissionTier::Neutral` removes the row.
    async fn set_user_trust(&self, forum: &str, user_id: UserId, tier: PermissionTier, note: &str) -> Result<()>;
    async fn clear_user_trust(&self, forum: &str, user_id: UserId) -> Result<()>;
    /// Users at or above `min_tier`, most recently recorded first.
    async fn operators(&self, forum: &str, min_tier: PermissionTier, limit: usize) -> Result<Vec<UserId>>;
}

/// Perceptual hashes of banned images.
#[async_trait]
pub trait ImageBlacklist: Send + Sync {
    async fn image_banned(&self, forum: &str, hash: ImageHash) -> Result<bool>;
    async fn ban_image(&self, forum: &str, hash: ImageHash, source_ref: &str) -> Result<()>;
    async fn unban_image(&self, forum: &str, hash: ImageHash) -> Result<()>;
}

/// Threads hidden temporarily and waiting for restoration.
#[async_trait]
pub trait RestoreQueue: Send + Sync {
    async fn pending_restores(&self, forum: &str) -> Result<Vec<ContentId>>;
    async fn add_pending(&self, forum: &str, thread_id: ContentId) -> Result<()>;
    async fn remove_pending(&self, forum: &str, thread_id: ContentId) -> Result<()>;
}

/// Combined storage trait
pub trait RecordStore: ReviewLedger + TrustRegistry + ImageBlacklist + RestoreQueue {}

impl<T> RecordStore for T where T: ReviewLedger + TrustRegistry + ImageBlacklist + RestoreQueue {}

/// Opaque image primitives. CPU bound, so callers may run them off the runtime.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ImageInspector: Send + Sync {
    fn fingerprint(&self, image: &[u8]) -> Result<ImageHash>;
    /// The payload of the first QR code found, if any.
    fn decode_qr(&self, image: &[u8]) -> Option<String>;
}
