//! # Domain Models
//!
//! These structs represent the entities the warden reasons about.
//! Content is built once from a poll response and never mutated afterwards;
//! only ids and edit markers outlive a tick (see the record types below).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque content identifier, unique within its forum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ContentId(pub u64);

impl ContentId {
    /// The "no parent" id used by threads.
    pub const NONE: ContentId = ContentId(0);
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Forum-assigned user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotone-ish marker telling whether content changed since the last review
/// (last reply time for a thread, comment count for a post).
pub type EditMarker = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Thread,
    Post,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Unknown,
    Male,
    Female,
}

/// The author of a content item or a mention, as reported by the forum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Author {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub nickname: String,
    /// Platform reputation level, higher = more trusted.
    pub level: u8,
    #[serde(default)]
    pub gender: Gender,
}

/// Raw fields of a thread, post or comment as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentParts {
    pub kind: ContentKind,
    pub forum: String,
    pub id: ContentId,
    /// Thread id for a post, post id for a comment, `ContentId::NONE` for a thread.
    pub parent_id: ContentId,
    pub thread_id: ContentId,
    pub author: Author,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fragments: Vec<String>,
    #[serde(default)]
    pub image_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edit_marker: EditMarker,
    #[serde(default)]
    pub reply_count: u32,
    /// True when the author also started the enclosing thread.
    #[serde(default)]
    pub by_thread_author: bool,
}

/// The unit the classifier inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentItem {
    pub kind: ContentKind,
    pub forum: String,
    pub id: ContentId,
    pub parent_id: ContentId,
    pub thread_id: ContentId,
    pub author: Author,
    /// Denormalized visible text: title and every text fragment.
    pub text: String,
    pub image_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub edit_marker: EditMarker,
    pub reply_count: u32,
    pub by_thread_author: bool,
}

impl ContentItem {
    /// Builds the immutable item, computing the denormalized text once.
    pub fn from_parts(parts: ContentParts) -> Self {
        let mut text = parts.title.trim().to_string();
        for fragment in parts.fragments.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(fragment);
        }

        // A thread is its own thread.
        let thread_id = match parts.kind {
            ContentKind::Thread => parts.id,
            _ => parts.thread_id,
        };

        Self {
            kind: parts.kind,
            forum: parts.forum,
            id: parts.id,
            parent_id: parts.parent_id,
            thread_id,
            author: parts.author,
            text,
            image_refs: parts.image_refs,
            created_at: parts.created_at,
            edit_marker: parts.edit_marker,
            reply_count: parts.reply_count,
            by_thread_author: parts.by_thread_author,
        }
    }

    pub fn is_thread(&self) -> bool {
        self.kind == ContentKind::Thread
    }

    /// True when there is nothing a text or image rule could look at.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.image_refs.is_empty()
    }
}

/// What a rejection removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionScope {
    /// Just the offending item.
    Item,
    /// The thread enclosing the offending item.
    WholeThread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Disposition {
    Allow,
    RejectContent { scope: ActionScope },
    /// Ban the author, then remove the item or its whole thread.
    RejectAuthor { ban_days: u32, scope: ActionScope },
}

/// Classifier output plus the rule that produced it, for the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub disposition: Disposition,
    pub rule: String,
}

impl Verdict {
    pub fn allow(rule: impl Into<String>) -> Self {
        Self { disposition: Disposition::Allow, rule: rule.into() }
    }

    pub fn reject_content(scope: ActionScope, rule: impl Into<String>) -> Self {
        Self { disposition: Disposition::RejectContent { scope }, rule: rule.into() }
    }

    pub fn reject_author(ban_days: u32, rule: impl Into<String>) -> Self {
        Self::reject_author_in(ActionScope::Item, ban_days, rule)
    }

    pub fn reject_author_in(scope: ActionScope, ban_days: u32, rule: impl Into<String>) -> Self {
        Self { disposition: Disposition::RejectAuthor { ban_days, scope }, rule: rule.into() }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self.disposition, Disposition::Allow)
    }
}

/// Memoization entry: the content was judged benign at this edit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: ContentId,
    pub edit_marker: EditMarker,
    pub recorded_at: DateTime<Utc>,
}

/// Operator-assigned automation status. The ordering is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionTier {
    Blacklisted,
    #[default]
    Neutral,
    Tier1,
    Tier2,
    Tier3,
}

impl PermissionTier {
    /// Column value. Neutral users have no row, so it never hits the table.
    pub fn as_stored(self) -> i64 {
        match self {
            PermissionTier::Blacklisted => 0,
            PermissionTier::Neutral => -1,
            PermissionTier::Tier1 => 1,
            PermissionTier::Tier2 => 2,
            PermissionTier::Tier3 => 3,
        }
    }

    pub fn from_stored(value: i64) -> Self {
        match value {
            0 => PermissionTier::Blacklisted,
            1 => PermissionTier::Tier1,
            2 => PermissionTier::Tier2,
            v if v >= 3 => PermissionTier::Tier3,
            _ => PermissionTier::Neutral,
        }
    }

    /// Parses the numeric form used in commands (`-1` blacklisted .. `3`).
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            -1 => Some(PermissionTier::Blacklisted),
            0 => Some(PermissionTier::Neutral),
            1 => Some(PermissionTier::Tier1),
            2 => Some(PermissionTier::Tier2),
            3 => Some(PermissionTier::Tier3),
            _ => None,
        }
    }

    pub fn is_whitelisted(self) -> bool {
        self >= PermissionTier::Tier1
    }
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionTier::Blacklisted => "blacklisted",
            PermissionTier::Neutral => "neutral",
            PermissionTier::Tier1 => "tier1",
            PermissionTier::Tier2 => "tier2",
            PermissionTier::Tier3 => "tier3",
        };
        f.write_str(name)
    }
}

/// Persisted per-user status row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTrust {
    pub user_id: UserId,
    pub tier: PermissionTier,
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}

/// Allow/deny status as seen by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthorStatus {
    Blacklisted,
    Neutral,
    Whitelisted,
}

impl AuthorStatus {
    pub fn from_trust(trust: Option<&UserTrust>) -> Self {
        match trust.map(|t| t.tier) {
            Some(PermissionTier::Blacklisted) => AuthorStatus::Blacklisted,
            Some(tier) if tier.is_whitelisted() => AuthorStatus::Whitelisted,
            _ => AuthorStatus::Neutral,
        }
    }
}

/// Fixed-width perceptual fingerprint, compared by exact match only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHash(pub u64);

impl ImageHash {
    pub fn parse_hex(raw: &str) -> Option<Self> {
        u64::from_str_radix(raw, 16).ok().map(ImageHash)
    }
}

impl fmt::Display for ImageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBanRecord {
    pub hash: ImageHash,
    pub source_ref: String,
}

/// A thread hidden by `tmphide` and waiting to be shown again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRestoreRecord {
    pub thread_id: ContentId,
    pub flag: bool,
    pub recorded_at: DateTime<Utc>,
}

/// An at-mention of the bot account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionEvent {
    pub forum: String,
    pub thread_id: ContentId,
    /// The post or comment carrying the mention.
    pub post_id: ContentId,
    /// For a comment, the post it hangs under.
    #[serde(default)]
    pub parent_id: ContentId,
    pub author: Author,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_comment: bool,
}

/// Minimal identity returned by user lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self { items: Vec::new(), has_more: false }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::empty()
    }
}
