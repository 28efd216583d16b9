//! # Review loop
//!
//! Walks the newest threads of each forum, descending into posts and
//! comments only where the edit markers say something changed, and feeds
//! every verdict to the [`Enforcer`].

use crate::classifier::{Classifier, Decision, ImageFinding, ReviewContext};
use crate::executor::Enforcer;
use crate::restore::RestoreSchedule;
use chrono::Timelike;
use fw_config::BusyHours;
use fw_core::{
    AuthorStatus, ContentItem, ContentKind, ForumClient, ImageInspector, RecordStore, Result,
    Verdict, WardenError,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Per-tick counters, logged at debug level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReviewStats {
    pub examined: usize,
    pub unchanged: usize,
    pub rejected: usize,
    /// Items whose evaluation was abandoned this tick.
    pub aborted: usize,
}

enum Judgement {
    Unchanged,
    Allowed { verdict: Verdict, status: AuthorStatus },
    Rejected,
}

pub struct Reviewer {
    client: Arc<dyn ForumClient>,
    store: Arc<dyn RecordStore>,
    inspector: Arc<dyn ImageInspector>,
    classifier: Arc<Classifier>,
    enforcer: Arc<Enforcer>,
}

impl Reviewer {
    pub fn new(
        client: Arc<dyn ForumClient>,
        store: Arc<dyn RecordStore>,
        inspector: Arc<dyn ImageInspector>,
        classifier: Arc<Classifier>,
        enforcer: Arc<Enforcer>,
    ) -> Self {
        Self { client, store, inspector, classifier, enforcer }
    }

    /// One pass over the first page of threads. A failed listing fails the
    /// pass; a failed item only counts as aborted.
    pub async fn review_forum(&self, forum: &str) -> Result<ReviewStats> {
        let threads = self.client.list_threads(forum, 1).await?;
        let mut stats = ReviewStats::default();

        for thread in &threads.items {
            if let Err(e) = self.review_thread(thread, &mut stats).await {
                stats.aborted += 1;
                tracing::warn!(forum, content_id = %thread.id, error = %e, "Thread review aborted");
            }
        }

        tracing::debug!(forum, ?stats, "Review pass finished");
        Ok(stats)
    }

    async fn review_thread(&self, thread: &ContentItem, stats: &mut ReviewStats) -> Result<()> {
        let (verdict, status) = match self.judge(thread, stats).await? {
            Judgement::Allowed { verdict, status } => (verdict, status),
            _ => return Ok(()),
        };

        let posts = self.client.list_posts(&thread.forum, thread.id, 1).await?;
        let mut walked = HashSet::new();
        let mut clean = true;

        for post in &posts.items {
            match self.review_post(post, stats).await {
                Ok(true) => {
                    walked.insert(post.id);
                }
                Ok(false) => {}
                Err(e) => {
                    clean = false;
                    stats.aborted += 1;
                    tracing::warn!(forum = %post.forum, content_id = %post.id, error = %e, "Post review aborted");
                }
            }
        }

        // Position 0 is the opening post; the first reply sits right after it.
        if self.classifier.wants_nested_peek(thread, status) {
            if let Some(reply) = posts.items.get(1) {
                if self.classifier.is_engaged(reply.reply_count) && !walked.contains(&reply.id) {
                    tracing::debug!(forum = %thread.forum, content_id = %reply.id, "Peeking at first reply");
                    if let Err(e) = self.review_comments(reply, stats).await {
                        clean = false;
                        tracing::warn!(forum = %thread.forum, content_id = %reply.id, error = %e, "Nested peek aborted");
                    }
                }
            }
        }

        // Unmarked threads are walked again next tick.
        if clean {
            self.enforcer.apply(thread, &verdict).await;
        }
        Ok(())
    }

    /// Returns whether the post's comments were walked.
    async fn review_post(&self, post: &ContentItem, stats: &mut ReviewStats) -> Result<bool> {
        let verdict = match self.judge(post, stats).await? {
            Judgement::Allowed { verdict, .. } => verdict,
            _ => return Ok(false),
        };

        let walked = post.reply_count > 0;
        if walked {
            self.review_comments(post, stats).await?;
        }
        self.enforcer.apply(post, &verdict).await;
        Ok(walked)
    }

    async fn review_comments(&self, post: &ContentItem, stats: &mut ReviewStats) -> Result<()> {
        let comments = self.client.list_comments(&post.forum, post.thread_id, post.id, 1).await?;
        let mut failure = None;

        for comment in &comments.items {
            match self.judge(comment, stats).await {
                Ok(Judgement::Allowed { verdict, .. }) => {
                    self.enforcer.apply(comment, &verdict).await;
                }
                Ok(_) => {}
                Err(e) => {
                    stats.aborted += 1;
                    tracing::warn!(forum = %comment.forum, content_id = %comment.id, error = %e, "Comment review aborted");
                    failure = Some(e);
                }
            }
        }

        failure.map_or(Ok(()), Err)
    }

    /// Looks up the item's context, classifies it and enforces rejections.
    /// Allowed items are returned unmarked so the caller can walk children first.
    async fn judge(&self, item: &ContentItem, stats: &mut ReviewStats) -> Result<Judgement> {
        stats.examined += 1;

        let recorded = self.store.reviewed(&item.forum, item.id).await?;
        match recorded {
            Some(marker) if marker == item.edit_marker => {
                stats.unchanged += 1;
                return Ok(Judgement::Unchanged);
            }
            // Comments were removed; nothing new to read.
            Some(marker) if item.kind == ContentKind::Post && marker > item.edit_marker => {
                self.store.mark_reviewed(&item.forum, item.id, item.edit_marker).await?;
                stats.unchanged += 1;
                return Ok(Judgement::Unchanged);
            }
            _ => {}
        }

        let trust = self.store.user_trust(&item.forum, item.author.id).await?;
        let status = AuthorStatus::from_trust(trust.as_ref());

        let verdict = match self.classifier.classify(item, ReviewContext::fresh(status)) {
            Decision::Final(verdict) => verdict,
            Decision::Defer => {
                let findings = self.inspect_images(item).await?;
                self.classifier.classify_images(item, &findings)
            }
        };

        if verdict.is_allow() {
            return Ok(Judgement::Allowed { verdict, status });
        }

        tracing::info!(
            forum = %item.forum,
            content_id = %item.id,
            user_id = %item.author.id,
            rule = %verdict.rule,
            "Content rejected"
        );
        stats.rejected += 1;
        self.enforcer.apply(item, &verdict).await;
        Ok(Judgement::Rejected)
    }

    /// Fetches and inspects every attached image, stopping at the first
    /// banned one. Images that cannot be fetched or decoded are skipped.
    async fn inspect_images(&self, item: &ContentItem) -> Result<Vec<ImageFinding>> {
        let mut findings = Vec::with_capacity(item.image_refs.len());

        for locator in &item.image_refs {
            let bytes = match self.client.fetch_image(locator).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(content_id = %item.id, locator, error = %e, "Image fetch failed");
                    continue;
                }
            };

            let inspector = Arc::clone(&self.inspector);
            let (hash, qr_payload) =
                tokio::task::spawn_blocking(move || (inspector.fingerprint(&bytes), inspector.decode_qr(&bytes)))
                    .await
                    .map_err(|e| WardenError::InvalidData(format!("image inspection panicked: {e}")))?;

            let banned_hash = match hash {
                Ok(hash) => self.store.image_banned(&item.forum, hash).await?,
                Err(e) => {
                    tracing::debug!(content_id = %item.id, locator, error = %e, "Image not hashable");
                    false
                }
            };

            findings.push(ImageFinding { qr_payload, banned_hash });
            if banned_hash {
                break;
            }
        }

        Ok(findings)
    }
}

/// One forum the review loop watches.
#[derive(Debug, Clone)]
pub struct WatchedForum {
    pub name: String,
    pub busy_hours: Option<BusyHours>,
}

#[derive(Debug, Clone)]
pub struct ReviewLoopSettings {
    pub interval: Duration,
    pub sweep_interval: Duration,
    pub retention: chrono::Duration,
}

/// Drives the reviewer, the restore schedule and the record sweep until shutdown.
pub struct ReviewLoop {
    reviewer: Arc<Reviewer>,
    restore: Arc<RestoreSchedule>,
    store: Arc<dyn RecordStore>,
    enforcer: Arc<Enforcer>,
    forums: Vec<WatchedForum>,
    settings: ReviewLoopSettings,
}

impl ReviewLoop {
    pub fn new(
        reviewer: Arc<Reviewer>,
        restore: Arc<RestoreSchedule>,
        store: Arc<dyn RecordStore>,
        enforcer: Arc<Enforcer>,
        forums: Vec<WatchedForum>,
        settings: ReviewLoopSettings,
    ) -> Self {
        Self { reviewer, restore, store, enforcer, forums, settings }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut review_tick = tokio::time::interval(self.settings.interval);
        let mut sweep_tick = tokio::time::interval(self.settings.sweep_interval);
        review_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(forums = self.forums.len(), "Review loop started");

        loop {
            tokio::select! {
                _ = review_tick.tick() => self.tick().await,
                _ = sweep_tick.tick() => self.sweep().await,
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Review loop stopped");
    }

    /// Reviews every forum once, then restores whatever is due.
    pub async fn tick(&self) {
        let hour = chrono::Local::now().hour() as u8;

        for forum in &self.forums {
            if let Err(e) = self.reviewer.review_forum(&forum.name).await {
                tracing::error!(forum = %forum.name, error = %e, "Review pass failed");
            }

            match self.restore.restore_due(&forum.name, forum.busy_hours, hour).await {
                Ok(0) => {}
                Ok(restored) => tracing::info!(forum = %forum.name, restored, "Restored hidden threads"),
                Err(e) => tracing::error!(forum = %forum.name, error = %e, "Restore pass failed"),
            }
        }
    }

    pub async fn sweep(&self) {
        match self.store.sweep_reviewed(self.settings.retention).await {
            Ok(removed) => tracing::debug!(removed, "Swept review records"),
            Err(e) => tracing::error!(error = %e, "Review record sweep failed"),
        }

        // Ledger entries only need to outlive the retention window.
        let max_age = self.settings.retention.to_std().unwrap_or(Duration::ZERO);
        let pruned = self.enforcer.prune_ledger(max_age);
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned enforcement ledger");
        }
    }
}
