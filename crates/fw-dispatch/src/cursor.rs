//! Look-back window over the mention feed.

use chrono::{DateTime, Duration, Utc};
use fw_core::{ContentId, MentionEvent};
use std::collections::HashMap;

/// Keeps a lower time bound that only moves forward, plus the ids already
/// handled at or after it. Mentions older than the bound, or handled
/// already, are not returned again.
#[derive(Debug)]
pub struct MentionCursor {
    lower: DateTime<Utc>,
    handled: HashMap<(String, ContentId), DateTime<Utc>>,
}

impl MentionCursor {
    /// Starts `lookback` before `now`, so mentions posted shortly before a
    /// restart are still picked up.
    pub fn new(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self { lower: now - lookback, handled: HashMap::new() }
    }

    pub fn lower_bound(&self) -> DateTime<Utc> {
        self.lower
    }

    /// Mentions still to process, oldest first.
    pub fn select(&self, mut batch: Vec<MentionEvent>) -> Vec<MentionEvent> {
        batch.retain(|m| m.created_at >= self.lower && !self.handled.contains_key(&key(m)));
        batch.sort_by_key(|m| m.created_at);
        batch
    }

    /// Records the outcome of a processed batch. `retry` holds the mentions
    /// that failed transiently; the bound stops at the earliest of them.
    pub fn commit(&mut self, done: &[MentionEvent], retry: &[MentionEvent]) {
        for mention in done {
            self.handled.insert(key(mention), mention.created_at);
        }

        let target = match retry.iter().map(|m| m.created_at).min() {
            Some(earliest) => Some(earliest),
            None => done.iter().map(|m| m.created_at).max(),
        };
        if let Some(target) = target {
            if target > self.lower {
                self.lower = target;
            }
        }

        let lower = self.lower;
        self.handled.retain(|_, at| *at >= lower);
    }
}

fn key(mention: &MentionEvent) -> (String, ContentId) {
    (mention.forum.clone(), mention.post_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_core::Author;

    fn mention(id: u64, at: DateTime<Utc>) -> MentionEvent {
        MentionEvent {
            forum: "f".into(),
            thread_id: ContentId(1),
            post_id: ContentId(id),
            parent_id: ContentId::NONE,
            author: Author::default(),
            text: "@bot ping".into(),
            created_at: at,
            is_comment: false,
        }
    }

    #[test]
    fn test_select_orders_and_filters() {
        let now = Utc::now();
        let cursor = MentionCursor::new(now, Duration::seconds(60));
        let batch = vec![
            mention(3, now),
            mention(1, now - Duration::seconds(120)),
            mention(2, now - Duration::seconds(30)),
        ];
        let ids: Vec<_> = cursor.select(batch).iter().map(|m| m.post_id.0).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_commit_advances_and_never_replays() {
        let now = Utc::now();
        let mut cursor = MentionCursor::new(now, Duration::seconds(60));
        let batch = vec![mention(1, now - Duration::seconds(10)), mention(2, now)];

        let fresh = cursor.select(batch.clone());
        cursor.commit(&fresh, &[]);
        assert_eq!(cursor.lower_bound(), now);
        assert!(cursor.select(batch).is_empty());
    }

    #[test]
    fn test_transient_failure_holds_bound_back() {
        let now = Utc::now();
        let mut cursor = MentionCursor::new(now, Duration::seconds(60));
        let early = mention(1, now - Duration::seconds(20));
        let late = mention(2, now);

        cursor.commit(&[late.clone()], &[early.clone()]);
        assert_eq!(cursor.lower_bound(), early.created_at);

        let again = cursor.select(vec![early.clone(), late]);
        assert_eq!(again, vec![early]);
    }

    #[test]
    fn test_bound_only_moves_forward() {
        let now = Utc::now();
        let mut cursor = MentionCursor::new(now, Duration::zero());
        cursor.commit(&[], &[mention(1, now - Duration::seconds(5))]);
        assert_eq!(cursor.lower_bound(), now);
    }
}
