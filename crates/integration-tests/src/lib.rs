//! Fixtures shared by the scenario tests under `tests/`.

use chrono::Utc;
use fw_config::{CommandConfig, ForumConfig};
use fw_core::{
    Author, ContentId, ContentItem, ContentKind, ContentParts, ForumClient, MentionEvent, MockImageInspector,
    RecordStore, UserId,
};
use fw_dispatch::Dispatcher;
use fw_engine::{Enforcer, EnforcerSettings};
use fw_store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

pub const FORUM: &str = "soulknight";
pub const CONTROL_THREAD: u64 = 1000;
pub const SPAM: &str = "加我微信 123456 做兼职日结";

pub fn post(id: u64, text: &str, level: u8) -> ContentItem {
    ContentItem::from_parts(ContentParts {
        kind: ContentKind::Post,
        forum: FORUM.into(),
        id: ContentId(id),
        parent_id: ContentId(1),
        thread_id: ContentId(1),
        author: Author { id: UserId(500), name: "poster".into(), level, ..Author::default() },
        title: String::new(),
        fragments: vec![text.to_string()],
        image_refs: vec![],
        created_at: Utc::now(),
        edit_marker: 4,
        reply_count: 0,
        by_thread_author: false,
    })
}

pub fn mention(text: &str, thread: u64, author: UserId) -> MentionEvent {
    MentionEvent {
        forum: FORUM.into(),
        thread_id: ContentId(thread),
        post_id: ContentId(9000),
        parent_id: ContentId::NONE,
        author: Author { id: author, name: "operator".into(), level: 10, ..Author::default() },
        text: text.into(),
        created_at: Utc::now(),
        is_comment: false,
    }
}

pub fn fast_retries() -> EnforcerSettings {
    EnforcerSettings { action_retries: 1, retry_backoff: Duration::from_millis(1) }
}

pub fn enforcer(client: Arc<dyn ForumClient>, store: &MemoryStore) -> Enforcer {
    Enforcer::new(client, Arc::new(store.clone()), fast_retries())
}

pub fn dispatcher(client: Arc<dyn ForumClient>, store: &MemoryStore) -> Dispatcher {
    let records: Arc<dyn RecordStore> = Arc::new(store.clone());
    let enforcer = Arc::new(Enforcer::new(client.clone(), records.clone(), fast_retries()));
    let forums = vec![ForumConfig {
        name: FORUM.into(),
        control_thread: Some(CONTROL_THREAD),
        busy_hours: None,
        operators: vec![],
    }];
    Dispatcher::new(
        client,
        records,
        Arc::new(MockImageInspector::new()),
        enforcer,
        &forums,
        &CommandConfig::default(),
    )
}
