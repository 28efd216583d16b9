//! # Enforcement executor
//!
//! Turns verdicts into remote actions and store writes. Each accepted remote
//! step is remembered in an in-process ledger, so replaying the same
//! `(item, verdict)` never issues the same ban or deletion twice.

use dashmap::DashMap;
use fw_config::ReviewConfig;
use fw_core::{
    ActionScope, ContentId, ContentItem, Disposition, ForumClient, MentionEvent, RecordStore,
    Result, UserId, Verdict, WardenError,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct EnforcerSettings {
    /// Extra attempts after a transport failure.
    pub action_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for EnforcerSettings {
    fn default() -> Self {
        Self { action_retries: 2, retry_backoff: Duration::from_millis(500) }
    }
}

impl From<&ReviewConfig> for EnforcerSettings {
    fn from(config: &ReviewConfig) -> Self {
        Self { action_retries: config.action_retries, ..Self::default() }
    }
}

/// How one step of an execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StepOutcome {
    /// The verdict did not call for this step.
    #[default]
    Skipped,
    Applied,
    /// An earlier invocation already got this step accepted.
    AlreadyApplied,
    /// The service answered but did not apply the action.
    NotApplied,
    /// The service refused; terminal.
    Rejected(String),
    Failed(WardenError),
}

impl StepOutcome {
    /// Settled steps are never attempted again for the same verdict.
    pub fn is_settled(&self) -> bool {
        matches!(self, StepOutcome::Skipped | StepOutcome::Applied | StepOutcome::AlreadyApplied | StepOutcome::Rejected(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub ban: StepOutcome,
    pub removal: StepOutcome,
    pub memo: StepOutcome,
    /// Deletion of the command post that triggered the action.
    pub artifact: StepOutcome,
}

impl ExecutionResult {
    pub fn is_settled(&self) -> bool {
        self.ban.is_settled() && self.removal.is_settled() && self.memo.is_settled() && self.artifact.is_settled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StepKind {
    Ban,
    Remove,
}

type LedgerKey = (String, u64, StepKind);

pub struct Enforcer {
    client: Arc<dyn ForumClient>,
    store: Arc<dyn RecordStore>,
    ledger: DashMap<LedgerKey, Instant>,
    settings: EnforcerSettings,
}

impl Enforcer {
    pub fn new(client: Arc<dyn ForumClient>, store: Arc<dyn RecordStore>, settings: EnforcerSettings) -> Self {
        Self { client, store, ledger: DashMap::new(), settings }
    }

    /// Applies `verdict` to `item`. Never fails as a whole; each step reports
    /// its own outcome.
    pub async fn apply(&self, item: &ContentItem, verdict: &Verdict) -> ExecutionResult {
        let mut result = ExecutionResult::default();

        match verdict.disposition {
            Disposition::Allow => {
                result.memo = match self.store.mark_reviewed(&item.forum, item.id, item.edit_marker).await {
                    Ok(()) => StepOutcome::Applied,
                    Err(e) => {
                        // The next poll re-observes the item, so this is not retried.
                        tracing::warn!(forum = %item.forum, content_id = %item.id, error = %e, "Failed to record review");
                        StepOutcome::Failed(e)
                    }
                };
            }
            Disposition::RejectContent { scope } => {
                result.removal = self.remove(&item.forum, removal_target(item, scope), scope, &verdict.rule).await;
            }
            Disposition::RejectAuthor { ban_days, scope } => {
                // Ban first so the author cannot re-post before the deletion lands.
                result.ban = self.ban(&item.forum, item.id, item.author.id, ban_days, &verdict.rule).await;
                result.removal = self.remove(&item.forum, removal_target(item, scope), scope, &verdict.rule).await;
            }
        }

        result
    }

    /// Like [`apply`](Self::apply), then deletes the command post that asked for it.
    pub async fn apply_on_behalf(&self, item: &ContentItem, verdict: &Verdict, artifact: &MentionEvent) -> ExecutionResult {
        let mut result = self.apply(item, verdict).await;
        result.artifact = self.remove_artifact(artifact).await;
        result
    }

    /// Best-effort removal of a command post.
    pub async fn remove_artifact(&self, artifact: &MentionEvent) -> StepOutcome {
        self.remove(&artifact.forum, artifact.post_id, ActionScope::Item, "command-artifact").await
    }

    async fn ban(&self, forum: &str, content: ContentId, user: UserId, days: u32, rule: &str) -> StepOutcome {
        let key = (forum.to_string(), content.0, StepKind::Ban);
        let outcome = self
            .step(key, || self.client.block_user(forum, user, days, rule))
            .await;
        if outcome == StepOutcome::Applied {
            tracing::info!(forum, user_id = %user, content_id = %content, days, rule, "Blocked author");
        }
        outcome
    }

    async fn remove(&self, forum: &str, target: ContentId, scope: ActionScope, rule: &str) -> StepOutcome {
        let key = (forum.to_string(), target.0, StepKind::Remove);
        let outcome = self
            .step(key, || self.client.delete_content(forum, target, scope))
            .await;
        if outcome == StepOutcome::Applied {
            tracing::info!(forum, content_id = %target, ?scope, rule, "Deleted content");
        }
        outcome
    }

    async fn step<F, Fut>(&self, key: LedgerKey, mut call: F) -> StepOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        if self.ledger.contains_key(&key) {
            tracing::debug!(forum = %key.0, content_id = key.1, step = ?key.2, "Step already accepted, skipping");
            return StepOutcome::AlreadyApplied;
        }

        let mut attempt = 0;
        loop {
            match call().await {
                Ok(true) => {
                    self.ledger.insert(key, Instant::now());
                    return StepOutcome::Applied;
                }
                Ok(false) => {
                    tracing::warn!(forum = %key.0, content_id = key.1, step = ?key.2, "Action not applied");
                    return StepOutcome::NotApplied;
                }
                Err(WardenError::ActionRejected(reason)) => {
                    tracing::warn!(forum = %key.0, content_id = key.1, step = ?key.2, %reason, "Action rejected");
                    self.ledger.insert(key, Instant::now());
                    return StepOutcome::Rejected(reason);
                }
                Err(e) if e.is_transient() && attempt < self.settings.action_retries => {
                    attempt += 1;
                    tracing::debug!(forum = %key.0, content_id = key.1, attempt, error = %e, "Retrying action");
                    tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::warn!(forum = %key.0, content_id = key.1, step = ?key.2, error = %e, "Action failed");
                    return StepOutcome::Failed(e);
                }
            }
        }
    }

    /// Forgets ledger entries older than `max_age`, returning how many went.
    pub fn prune_ledger(&self, max_age: Duration) -> usize {
        let before = self.ledger.len();
        self.ledger.retain(|_, at| at.elapsed() < max_age);
        before.saturating_sub(self.ledger.len())
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }
}

fn removal_target(item: &ContentItem, scope: ActionScope) -> ContentId {
    match scope {
        ActionScope::Item => item.id,
        ActionScope::WholeThread => item.thread_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fw_core::{Author, ContentKind, ContentParts, MockForumClient, ReviewLedger};
    use fw_store::MemoryStore;

    fn item() -> ContentItem {
        ContentItem::from_parts(ContentParts {
            kind: ContentKind::Post,
            forum: "f".into(),
            id: ContentId(50),
            parent_id: ContentId(7),
            thread_id: ContentId(7),
            author: Author { id: UserId(9), name: "spammer".into(), level: 1, ..Author::default() },
            title: String::new(),
            fragments: vec!["spam".into()],
            image_refs: vec![],
            created_at: Utc::now(),
            edit_marker: 3,
            reply_count: 0,
            by_thread_author: false,
        })
    }

    fn settings() -> EnforcerSettings {
        EnforcerSettings { action_retries: 2, retry_backoff: Duration::from_millis(1) }
    }

    fn enforcer(client: MockForumClient, store: MemoryStore) -> Enforcer {
        Enforcer::new(Arc::new(client), Arc::new(store), settings())
    }

    #[tokio::test]
    async fn test_allow_only_marks_reviewed() {
        let store = MemoryStore::new();
        let enforcer = enforcer(MockForumClient::new(), store.clone());

        let result = enforcer.apply(&item(), &Verdict::allow("no-match")).await;
        assert_eq!(result.memo, StepOutcome::Applied);
        assert_eq!(store.reviewed("f", ContentId(50)).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_reject_author_bans_then_deletes_once() {
        let mut client = MockForumClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_block_user()
            .withf(|forum, user, days, _| forum == "f" && *user == UserId(9) && *days == 10)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(true));
        client
            .expect_delete_content()
            .withf(|_, id, scope| *id == ContentId(50) && *scope == ActionScope::Item)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(true));

        let enforcer = enforcer(client, MemoryStore::new());
        let verdict = Verdict::reject_author(10, "job-solicit");

        let first = enforcer.apply(&item(), &verdict).await;
        assert_eq!(first.ban, StepOutcome::Applied);
        assert_eq!(first.removal, StepOutcome::Applied);

        let replay = enforcer.apply(&item(), &verdict).await;
        assert_eq!(replay.ban, StepOutcome::AlreadyApplied);
        assert_eq!(replay.removal, StepOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn test_failed_ban_still_deletes() {
        let mut client = MockForumClient::new();
        client
            .expect_block_user()
            .times(3)
            .returning(|_, _, _, _| Err(WardenError::Transport("timeout".into())));
        client.expect_delete_content().times(1).returning(|_, _, _| Ok(true));

        let enforcer = enforcer(client, MemoryStore::new());
        let result = enforcer.apply(&item(), &Verdict::reject_author(10, "r")).await;
        assert!(matches!(result.ban, StepOutcome::Failed(WardenError::Transport(_))));
        assert_eq!(result.removal, StepOutcome::Applied);
        assert!(!result.is_settled());
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let mut client = MockForumClient::new();
        client
            .expect_delete_content()
            .times(1)
            .returning(|_, _, _| Err(WardenError::ActionRejected("already deleted".into())));

        let enforcer = enforcer(client, MemoryStore::new());
        let verdict = Verdict::reject_content(ActionScope::Item, "r");
        let first = enforcer.apply(&item(), &verdict).await;
        assert_eq!(first.removal, StepOutcome::Rejected("already deleted".into()));

        let second = enforcer.apply(&item(), &verdict).await;
        assert_eq!(second.removal, StepOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn test_not_applied_is_retried_on_replay() {
        let mut client = MockForumClient::new();
        client.expect_delete_content().times(2).returning(|_, _, _| Ok(false));

        let enforcer = enforcer(client, MemoryStore::new());
        let verdict = Verdict::reject_content(ActionScope::Item, "r");
        assert_eq!(enforcer.apply(&item(), &verdict).await.removal, StepOutcome::NotApplied);
        assert_eq!(enforcer.apply(&item(), &verdict).await.removal, StepOutcome::NotApplied);
        assert_eq!(enforcer.ledger_len(), 0);
    }

    #[tokio::test]
    async fn test_whole_thread_targets_thread() {
        let mut client = MockForumClient::new();
        client
            .expect_delete_content()
            .withf(|_, id, scope| *id == ContentId(7) && *scope == ActionScope::WholeThread)
            .times(1)
            .returning(|_, _, _| Ok(true));

        let enforcer = enforcer(client, MemoryStore::new());
        let result = enforcer.apply(&item(), &Verdict::reject_content(ActionScope::WholeThread, "thread-kill")).await;
        assert_eq!(result.removal, StepOutcome::Applied);
    }

    #[tokio::test]
    async fn test_prune_ledger() {
        let mut client = MockForumClient::new();
        client.expect_delete_content().returning(|_, _, _| Ok(true));
        let enforcer = enforcer(client, MemoryStore::new());
        enforcer.apply(&item(), &Verdict::reject_content(ActionScope::Item, "r")).await;
        assert_eq!(enforcer.ledger_len(), 1);
        assert_eq!(enforcer.prune_ledger(Duration::from_secs(3600)), 0);
        assert_eq!(enforcer.prune_ledger(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_thread_kill_bans_then_removes_thread() {
        let mut client = MockForumClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_block_user()
            .withf(|_, user, days, rule| *user == UserId(9) && *days == 10 && rule == "thread-kill")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(true));
        client
            .expect_delete_content()
            .withf(|_, id, scope| *id == ContentId(7) && *scope == ActionScope::WholeThread)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(true));

        let enforcer = enforcer(client, MemoryStore::new());
        let verdict = Verdict::reject_author_in(ActionScope::WholeThread, 10, "thread-kill");
        let result = enforcer.apply(&item(), &verdict).await;
        assert_eq!(result.ban, StepOutcome::Applied);
        assert_eq!(result.removal, StepOutcome::Applied);
    }
}
