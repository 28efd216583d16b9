//! # Command dispatcher
//!
//! Parses one mention, authorizes it against the command table and runs the
//! matching operation. Denials and unknown commands are silent.

use crate::parser::{parse_command, parse_user_arg, ParsedCommand};
use crate::rotation::{BroadcastCooldown, OnCallRotation};
use crate::table::{CommandKind, CommandSpec, CommandTable};
use fw_config::{CommandConfig, ForumConfig};
use fw_core::{
    ActionScope, ContentId, ContentItem, ContentKind, ForumClient, ImageInspector, MentionEvent,
    PermissionTier, RecordStore, Result, UserId, UserQuery, Verdict, WardenError,
};
use fw_engine::{Enforcer, RestoreSchedule, StepOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// What became of one mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Executed,
    /// Unknown, unauthorized, or nothing to do. Never retried.
    Ignored,
    /// Failed transiently; the cursor should come back to it.
    Retry(WardenError),
}

/// How a handler finished.
enum Completion {
    /// The command post still needs deleting.
    Done,
    /// The command post was already dealt with.
    DoneWithArtifact,
    NotDone,
}

struct Invocation<'a> {
    mention: &'a MentionEvent,
    command: ParsedCommand<'a>,
    tier: PermissionTier,
}

impl Invocation<'_> {
    fn forum(&self) -> &str {
        &self.mention.forum
    }

    /// Audit note used when the invoker gave none.
    fn default_note(&self) -> String {
        format!("cmd_{}_by_{}", self.command.name, self.mention.author.id)
    }

    /// The argument word at `index`, or the default note.
    fn note_at(&self, index: usize) -> String {
        self.command
            .words()
            .nth(index)
            .map(str::to_string)
            .unwrap_or_else(|| self.default_note())
    }
}

pub struct Dispatcher {
    client: Arc<dyn ForumClient>,
    store: Arc<dyn RecordStore>,
    inspector: Arc<dyn ImageInspector>,
    enforcer: Arc<Enforcer>,
    restore: RestoreSchedule,
    rotation: OnCallRotation,
    cooldown: BroadcastCooldown,
    table: CommandTable,
    control_threads: HashMap<String, Option<u64>>,
    broadcast_size: usize,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn ForumClient>,
        store: Arc<dyn RecordStore>,
        inspector: Arc<dyn ImageInspector>,
        enforcer: Arc<Enforcer>,
        forums: &[ForumConfig],
        config: &CommandConfig,
    ) -> Self {
        Self {
            restore: RestoreSchedule::new(client.clone(), store.clone()),
            rotation: OnCallRotation::new(store.clone(), config.rotation_capacity),
            cooldown: BroadcastCooldown::new(Duration::from_secs(config.broadcast_cooldown_secs)),
            table: CommandTable::new(),
            control_threads: forums.iter().map(|f| (f.name.clone(), f.control_thread)).collect(),
            broadcast_size: config.broadcast_size,
            client,
            store,
            inspector,
            enforcer,
        }
    }

    pub async fn dispatch(&self, mention: &MentionEvent) -> CommandOutcome {
        let Some(control) = self.control_threads.get(&mention.forum).copied() else {
            tracing::debug!(forum = %mention.forum, "Mention from unmanaged forum");
            return CommandOutcome::Ignored;
        };

        let command = parse_command(&mention.text);
        let spec = self.table.lookup(command.name);
        if spec.kind == CommandKind::Noop {
            return CommandOutcome::Ignored;
        }

        let tier = match self.authorize(mention, spec, control).await {
            Ok(Some(tier)) => tier,
            Ok(None) => return CommandOutcome::Ignored,
            Err(e) => return Self::failed(mention, spec, e),
        };

        tracing::info!(
            forum = %mention.forum,
            command = spec.name,
            user_id = %mention.author.id,
            arg = command.arg,
            "Executing command"
        );

        let invocation = Invocation { mention, command, tier };
        match self.execute(spec, &invocation).await {
            Ok(Completion::Done) => {
                self.enforcer.remove_artifact(mention).await;
                CommandOutcome::Executed
            }
            Ok(Completion::DoneWithArtifact) => CommandOutcome::Executed,
            Ok(Completion::NotDone) => CommandOutcome::Ignored,
            Err(e) => Self::failed(mention, spec, e),
        }
    }

    fn failed(mention: &MentionEvent, spec: &CommandSpec, e: WardenError) -> CommandOutcome {
        if e.is_transient() {
            tracing::warn!(forum = %mention.forum, command = spec.name, error = %e, "Command failed, will retry");
            CommandOutcome::Retry(e)
        } else {
            tracing::warn!(forum = %mention.forum, command = spec.name, error = %e, "Command failed");
            CommandOutcome::Ignored
        }
    }

    /// Re-checked on every invocation. `None` means denied.
    async fn authorize(
        &self,
        mention: &MentionEvent,
        spec: &CommandSpec,
        control: Option<u64>,
    ) -> Result<Option<PermissionTier>> {
        let tier = self
            .store
            .user_trust(&mention.forum, mention.author.id)
            .await?
            .map(|t| t.tier)
            .unwrap_or_default();

        if tier < spec.min_tier || !spec.scope.permits(mention.thread_id.0, control) {
            tracing::debug!(
                forum = %mention.forum,
                command = spec.name,
                user_id = %mention.author.id,
                %tier,
                "Command not authorized"
            );
            return Ok(None);
        }
        Ok(Some(tier))
    }

    async fn execute(&self, spec: &CommandSpec, inv: &Invocation<'_>) -> Result<Completion> {
        let forum = inv.forum();
        let thread = inv.mention.thread_id;

        match spec.kind {
            CommandKind::Ping => Ok(Completion::Done),
            CommandKind::Drop { days } => {
                let Some(target) = self.drop_target(inv).await? else {
                    return Ok(Completion::NotDone);
                };
                self.drop_content(inv, &target, days, &inv.note_at(0)).await?;
                Ok(Completion::DoneWithArtifact)
            }
            CommandKind::ExDrop => {
                let Some(target) = self.drop_target(inv).await? else {
                    return Ok(Completion::NotDone);
                };
                let note = inv.note_at(0);
                // The tier write is idempotent; once the post is gone a retry could not find its author.
                self.set_tier(inv, target.author.id, PermissionTier::Blacklisted, &note).await?;
                self.drop_content(inv, &target, 10, &note).await?;
                Ok(Completion::DoneWithArtifact)
            }
            CommandKind::Hide => Self::done_if(self.client.hide_thread(forum, thread).await?),
            CommandKind::Unhide => Self::done_if(self.client.unhide_thread(forum, thread).await?),
            CommandKind::TmpHide => Self::done_if(self.restore.hide_temporarily(forum, thread).await?),
            CommandKind::TmpUnhide => {
                let restored = self.restore.restore_all(forum).await?;
                tracing::info!(forum, restored, "Restored hidden threads on request");
                Ok(Completion::Done)
            }
            CommandKind::Block { days } => {
                let Some(user) = self.user_from_arg(inv).await? else {
                    return Ok(Completion::NotDone);
                };
                let note = inv.note_at(1);
                Self::done_if(self.client.block_user(forum, user, days, &note).await?)
            }
            CommandKind::Unblock => match self.user_from_arg(inv).await? {
                Some(user) => Self::done_if(self.client.unblock_user(forum, user).await?),
                None => Ok(Completion::NotDone),
            },
            CommandKind::ForumBlacklist => match self.user_from_arg(inv).await? {
                Some(user) => Self::done_if(self.client.add_to_blacklist(forum, user).await?),
                None => Ok(Completion::NotDone),
            },
            CommandKind::ForumUnblacklist => match self.user_from_arg(inv).await? {
                Some(user) => Self::done_if(self.client.remove_from_blacklist(forum, user).await?),
                None => Ok(Completion::NotDone),
            },
            CommandKind::SetTier(fixed) => {
                // `set <user> <level> [note]`, the others take `<user> [note]`.
                let (new_tier, note_index) = match fixed {
                    Some(tier) => (Some(tier), 1),
                    None => (
                        inv.command
                            .words()
                            .nth(1)
                            .and_then(|raw| raw.parse::<i64>().ok())
                            .and_then(PermissionTier::from_level),
                        2,
                    ),
                };
                let Some(new_tier) = new_tier else {
                    tracing::debug!(forum, arg = inv.command.arg, "Unparsable tier");
                    return Ok(Completion::NotDone);
                };
                let Some(user) = self.user_from_arg(inv).await? else {
                    return Ok(Completion::NotDone);
                };
                let note = inv.note_at(note_index);
                Self::done_if(self.set_tier(inv, user, new_tier, &note).await?)
            }
            CommandKind::ImageBan => self.mark_images(inv, true).await,
            CommandKind::ImageUnban => self.mark_images(inv, false).await,
            CommandKind::Register => {
                let invoker = inv.mention.author.id;
                self.rotation.register(forum, invoker).await?;
                tracing::info!(forum, user_id = %invoker, "Operator registered on call");
                Ok(Completion::Done)
            }
            CommandKind::Broadcast => self.broadcast(inv).await,
            CommandKind::Noop => Ok(Completion::NotDone),
        }
    }

    fn done_if(applied: bool) -> Result<Completion> {
        Ok(if applied { Completion::Done } else { Completion::NotDone })
    }

    /// The content a mention points at: the post a comment hangs under, or
    /// otherwise the thread itself (carrying its opening post's author and images).
    async fn resolve_target(&self, mention: &MentionEvent) -> Result<Option<ContentItem>> {
        let posts = self.client.list_posts(&mention.forum, mention.thread_id, 1).await?;

        if mention.is_comment {
            return Ok(posts.items.into_iter().find(|p| p.id == mention.parent_id));
        }

        Ok(posts.items.into_iter().next().map(|opening| ContentItem {
            kind: ContentKind::Thread,
            id: opening.thread_id,
            parent_id: ContentId::NONE,
            ..opening
        }))
    }

    async fn drop_target(&self, inv: &Invocation<'_>) -> Result<Option<ContentItem>> {
        let target = self.resolve_target(inv.mention).await?;
        if target.is_none() {
            tracing::debug!(forum = inv.forum(), thread_id = %inv.mention.thread_id, "Drop target not found");
        }
        Ok(target)
    }

    /// Deletes the target and, for `days > 0`, bans its author first.
    async fn drop_content(&self, inv: &Invocation<'_>, target: &ContentItem, days: u32, note: &str) -> Result<()> {
        let verdict = if days == 0 {
            Verdict::reject_content(ActionScope::Item, note)
        } else {
            Verdict::reject_author(days, note)
        };

        let result = self.enforcer.apply_on_behalf(target, &verdict, inv.mention).await;
        if let StepOutcome::Failed(e) = result.removal {
            return Err(e);
        }
        Ok(())
    }

    /// Changes a user's tier when the invoker outranks both the old and the new tier.
    async fn set_tier(&self, inv: &Invocation<'_>, user: UserId, tier: PermissionTier, note: &str) -> Result<bool> {
        let forum = inv.forum();
        let old = self.store.user_trust(forum, user).await?.map(|t| t.tier).unwrap_or_default();

        if old >= inv.tier || tier >= inv.tier {
            tracing::debug!(forum, user_id = %user, %old, new = %tier, invoker = %inv.tier, "Tier change not permitted");
            return Ok(false);
        }

        self.store.set_user_trust(forum, user, tier, note).await?;
        tracing::info!(forum, user_id = %user, %old, new = %tier, note, "Changed user tier");
        Ok(true)
    }

    async fn user_from_arg(&self, inv: &Invocation<'_>) -> Result<Option<UserId>> {
        let Some(query) = inv.command.words().next().and_then(parse_user_arg) else {
            return Ok(None);
        };
        let user = self.client.resolve_user(&query).await?;
        if user.is_none() {
            tracing::debug!(forum = inv.forum(), ?query, "User not found");
        }
        Ok(user.map(|u| u.id))
    }

    /// Bans or unbans the fingerprint of every image on the target.
    async fn mark_images(&self, inv: &Invocation<'_>, ban: bool) -> Result<Completion> {
        let forum = inv.forum();
        let Some(target) = self.resolve_target(inv.mention).await? else {
            return Ok(Completion::NotDone);
        };

        for locator in &target.image_refs {
            let bytes = match self.client.fetch_image(locator).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(forum, locator, error = %e, "Image fetch failed");
                    continue;
                }
            };
            let inspector = Arc::clone(&self.inspector);
            let hash = tokio::task::spawn_blocking(move || inspector.fingerprint(&bytes))
                .await
                .map_err(|e| WardenError::InvalidData(format!("image inspection panicked: {e}")))?;
            let hash = match hash {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::debug!(forum, locator, error = %e, "Image not hashable");
                    continue;
                }
            };

            if ban {
                self.store.ban_image(forum, hash, locator).await?;
            } else {
                self.store.unban_image(forum, hash).await?;
            }
            tracing::info!(forum, %hash, ban, "Updated image ban");
        }

        Ok(Completion::Done)
    }

    async fn broadcast(&self, inv: &Invocation<'_>) -> Result<Completion> {
        let forum = inv.forum();
        if self.cooldown.is_cooling() {
            tracing::debug!(forum, "Broadcast cooling down");
            return Ok(Completion::NotDone);
        }

        let mut names = Vec::new();
        for user in self.rotation.front(forum, self.broadcast_size).await? {
            if let Some(profile) = self.client.resolve_user(&UserQuery::Id(user)).await? {
                names.push(format!("@{}", profile.name));
            }
        }

        let request = if inv.command.arg.is_empty() { "none" } else { inv.command.arg };
        let content = format!(
            "Operator call from {}\nRequest: {}\n{}",
            inv.mention.author.name,
            request,
            names.join(" ")
        );
        let sent = self.client.reply(forum, inv.mention.thread_id, &content).await?;
        if sent {
            self.cooldown.mark();
        }
        Self::done_if(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use bytes::Bytes;
    use fw_core::{
        Author, ContentParts, ImageBlacklist, ImageHash, MockForumClient, MockImageInspector, Page, RestoreQueue,
        TrustRegistry, UserProfile,
    };
    use fw_engine::EnforcerSettings;
    use fw_store::MemoryStore;

    const CONTROL: u64 = 100;
    const INVOKER: UserId = UserId(7);

    fn dispatcher(client: MockForumClient, store: &MemoryStore) -> Dispatcher {
        dispatcher_with(client, MockImageInspector::new(), store)
    }

    fn dispatcher_with(client: MockForumClient, inspector: MockImageInspector, store: &MemoryStore) -> Dispatcher {
        let client: Arc<dyn ForumClient> = Arc::new(client);
        let store: Arc<dyn RecordStore> = Arc::new(store.clone());
        let settings = EnforcerSettings { action_retries: 0, retry_backoff: Duration::from_millis(1) };
        let enforcer = Arc::new(Enforcer::new(client.clone(), store.clone(), settings));
        let forums = vec![ForumConfig {
            name: "f".into(),
            control_thread: Some(CONTROL),
            busy_hours: None,
            operators: vec![],
        }];
        Dispatcher::new(
            client,
            store,
            Arc::new(inspector),
            enforcer,
            &forums,
            &CommandConfig::default(),
        )
    }

    fn mention(text: &str, thread: u64) -> MentionEvent {
        MentionEvent {
            forum: "f".into(),
            thread_id: ContentId(thread),
            post_id: ContentId(900),
            parent_id: ContentId::NONE,
            author: Author { id: INVOKER, name: "mod".into(), level: 9, ..Author::default() },
            text: text.into(),
            created_at: Utc::now(),
            is_comment: false,
        }
    }

    fn post(id: u64, thread: u64, author: u64) -> ContentItem {
        ContentItem::from_parts(ContentParts {
            kind: ContentKind::Post,
            forum: "f".into(),
            id: ContentId(id),
            parent_id: ContentId(thread),
            thread_id: ContentId(thread),
            author: Author { id: UserId(author), name: "target".into(), level: 1, ..Author::default() },
            title: String::new(),
            fragments: vec!["text".into()],
            image_refs: vec![],
            created_at: Utc::now(),
            edit_marker: 0,
            reply_count: 0,
            by_thread_author: false,
        })
    }

    async fn with_tier(store: &MemoryStore, tier: PermissionTier) {
        store.set_user_trust("f", INVOKER, tier, "").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_command_does_nothing() {
        let store = MemoryStore::new();
        let outcome = dispatcher(MockForumClient::new(), &store).dispatch(&mention("@bot frobnicate xyz", 5)).await;
        assert_eq!(outcome, CommandOutcome::Ignored);
        assert!(store.user_trust("f", INVOKER).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_neutral_invoker_cannot_block() {
        let store = MemoryStore::new();
        let outcome = dispatcher(MockForumClient::new(), &store)
            .dispatch(&mention("@bot block #42#", CONTROL))
            .await;
        assert_eq!(outcome, CommandOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_block_in_control_thread() {
        let store = MemoryStore::new();
        with_tier(&store, PermissionTier::Tier2).await;

        let mut client = MockForumClient::new();
        client
            .expect_resolve_user()
            .withf(|q| *q == UserQuery::PlatformUid(42))
            .times(1)
            .returning(|_| Ok(Some(UserProfile { id: UserId(4200), name: "spammer".into() })));
        client
            .expect_block_user()
            .withf(|_, user, days, reason| *user == UserId(4200) && *days == 3 && reason == "ads")
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        client
            .expect_delete_content()
            .withf(|_, id, _| *id == ContentId(900))
            .times(1)
            .returning(|_, _, _| Ok(true));

        let outcome = dispatcher(client, &store).dispatch(&mention("@bot block3 #42# ads", CONTROL)).await;
        assert_eq!(outcome, CommandOutcome::Executed);
    }

    #[tokio::test]
    async fn test_block_outside_control_thread_is_ignored() {
        let store = MemoryStore::new();
        with_tier(&store, PermissionTier::Tier3).await;
        let outcome = dispatcher(MockForumClient::new(), &store).dispatch(&mention("@bot block #42#", 5)).await;
        assert_eq!(outcome, CommandOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_drop_on_comment_bans_parent_author() {
        let store = MemoryStore::new();
        with_tier(&store, PermissionTier::Tier2).await;

        let mut client = MockForumClient::new();
        client
            .expect_list_posts()
            .returning(|_, _, _| Ok(Page { items: vec![post(10, 5, 1), post(11, 5, 66)], has_more: false }));
        client
            .expect_block_user()
            .withf(|_, user, days, _| *user == UserId(66) && *days == 10)
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        client
            .expect_delete_content()
            .withf(|_, id, scope| *id == ContentId(11) && *scope == ActionScope::Item)
            .times(1)
            .returning(|_, _, _| Ok(true));
        client
            .expect_delete_content()
            .withf(|_, id, _| *id == ContentId(900))
            .times(1)
            .returning(|_, _, _| Ok(true));

        let mut m = mention("@bot drop", 5);
        m.is_comment = true;
        m.parent_id = ContentId(11);
        assert_eq!(dispatcher(client, &store).dispatch(&m).await, CommandOutcome::Executed);
    }

    #[tokio::test]
    async fn test_delete_on_thread_targets_thread() {
        let store = MemoryStore::new();
        with_tier(&store, PermissionTier::Tier2).await;

        let mut client = MockForumClient::new();
        client
            .expect_list_posts()
            .returning(|_, _, _| Ok(Page { items: vec![post(10, 5, 1)], has_more: false }));
        client
            .expect_delete_content()
            .withf(|_, id, _| *id == ContentId(5))
            .times(1)
            .returning(|_, _, _| Ok(true));
        client
            .expect_delete_content()
            .withf(|_, id, _| *id == ContentId(900))
            .times(1)
            .returning(|_, _, _| Ok(true));

        assert_eq!(
            dispatcher(client, &store).dispatch(&mention("@bot delete", 5)).await,
            CommandOutcome::Executed
        );
    }

    #[tokio::test]
    async fn test_tier_change_needs_to_outrank() {
        let store = MemoryStore::new();
        with_tier(&store, PermissionTier::Tier3).await;
        store.set_user_trust("f", UserId(8), PermissionTier::Tier3, "peer").await.unwrap();

        let mut client = MockForumClient::new();
        client
            .expect_resolve_user()
            .returning(|q| match q {
                UserQuery::Id(id) => Ok(Some(UserProfile { id: *id, name: "u".into() })),
                _ => Ok(None),
            });
        client.expect_delete_content().times(1).returning(|_, _, _| Ok(true));

        let d = dispatcher(client, &store);
        // A peer cannot be demoted.
        assert_eq!(d.dispatch(&mention("@bot black /8/", CONTROL)).await, CommandOutcome::Ignored);
        // Nobody can be raised to the invoker's own tier.
        assert_eq!(d.dispatch(&mention("@bot set /9/ 3", CONTROL)).await, CommandOutcome::Ignored);

        assert_eq!(d.dispatch(&mention("@bot white /9/ helper", CONTROL)).await, CommandOutcome::Executed);
        let row = store.user_trust("f", UserId(9)).await.unwrap().unwrap();
        assert_eq!(row.tier, PermissionTier::Tier1);
        assert_eq!(row.note, "helper");
    }

    #[tokio::test]
    async fn test_store_outage_is_retried() {
        let store = MemoryStore::new();
        store.set_available(false);
        let outcome = dispatcher(MockForumClient::new(), &store).dispatch(&mention("@bot ping", 5)).await;
        assert!(matches!(outcome, CommandOutcome::Retry(WardenError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_tmphide_then_tmpunhide() {
        let store = MemoryStore::new();
        with_tier(&store, PermissionTier::Tier2).await;

        let mut client = MockForumClient::new();
        client.expect_hide_thread().times(1).returning(|_, _| Ok(true));
        client
            .expect_unhide_thread()
            .withf(|_, tid| *tid == ContentId(42))
            .times(1)
            .returning(|_, _| Ok(true));
        client.expect_delete_content().returning(|_, _, _| Ok(true));

        let d = dispatcher(client, &store);
        assert_eq!(d.dispatch(&mention("@bot tmphide", 42)).await, CommandOutcome::Executed);
        assert_eq!(store.pending_restores("f").await.unwrap(), vec![ContentId(42)]);

        // Both mentions share a post id, so the second artifact removal is a no-op.
        assert_eq!(d.dispatch(&mention("@bot tmpunhide", CONTROL)).await, CommandOutcome::Executed);
        assert!(store.pending_restores("f").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_is_debounced() {
        let store = MemoryStore::new();
        store.set_user_trust("f", UserId(50), PermissionTier::Tier2, "").await.unwrap();

        let mut client = MockForumClient::new();
        client
            .expect_resolve_user()
            .returning(|_| Ok(Some(UserProfile { id: UserId(50), name: "oncall".into() })));
        client
            .expect_reply()
            .withf(|_, tid, content| *tid == ContentId(5) && content.contains("@oncall") && content.contains("raid"))
            .times(1)
            .returning(|_, _, _| Ok(true));
        client.expect_delete_content().times(1).returning(|_, _, _| Ok(true));

        let d = dispatcher(client, &store);
        assert_eq!(d.dispatch(&mention("@bot holyshit raid", 5)).await, CommandOutcome::Executed);
        assert_eq!(d.dispatch(&mention("@bot holyshit again", 5)).await, CommandOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_register_moves_invoker_to_front() {
        let store = MemoryStore::new();
        store.set_user_trust("f", INVOKER, PermissionTier::Tier2, "granted").await.unwrap();
        store.set_user_trust("f", UserId(50), PermissionTier::Tier2, "").await.unwrap();

        let mut client = MockForumClient::new();
        client.expect_delete_content().returning(|_, _, _| Ok(true));

        let d = dispatcher(client, &store);
        assert_eq!(d.rotation.front("f", 2).await.unwrap(), vec![UserId(50), INVOKER]);
        assert_eq!(d.dispatch(&mention("@bot register", 5)).await, CommandOutcome::Executed);
        assert_eq!(d.rotation.front("f", 2).await.unwrap(), vec![INVOKER, UserId(50)]);

        // The trust row keeps the note it was granted with.
        let row = store.user_trust("f", INVOKER).await.unwrap().unwrap();
        assert_eq!(row.note, "granted");
        assert_eq!(row.tier, PermissionTier::Tier2);
    }

    #[tokio::test]
    async fn test_broadcast_retried_after_transport_error() {
        let store = MemoryStore::new();
        store.set_user_trust("f", UserId(50), PermissionTier::Tier2, "").await.unwrap();

        let mut client = MockForumClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_resolve_user()
            .returning(|_| Ok(Some(UserProfile { id: UserId(50), name: "oncall".into() })));
        client
            .expect_reply()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(WardenError::Transport("reset".into())));
        client
            .expect_reply()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(true));
        client.expect_delete_content().times(1).returning(|_, _, _| Ok(true));

        let d = dispatcher(client, &store);
        let raid = mention("@bot holyshit raid", 5);
        assert!(matches!(d.dispatch(&raid).await, CommandOutcome::Retry(WardenError::Transport(_))));
        assert_eq!(d.dispatch(&raid).await, CommandOutcome::Executed);
        // Only a delivered call starts the cooldown.
        assert_eq!(d.dispatch(&mention("@bot holyshit again", 5)).await, CommandOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_exdrop_blacklists_before_deleting() {
        let store = MemoryStore::new();
        with_tier(&store, PermissionTier::Tier3).await;

        let mut client = MockForumClient::new();
        client
            .expect_list_posts()
            .returning(|_, _, _| Ok(Page { items: vec![post(10, 5, 66)], has_more: false }));
        client
            .expect_block_user()
            .withf(|_, user, days, _| *user == UserId(66) && *days == 10)
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        client
            .expect_delete_content()
            .withf(|_, id, _| *id == ContentId(5))
            .times(1)
            .returning(|_, _, _| Ok(true));
        client
            .expect_delete_content()
            .withf(|_, id, _| *id == ContentId(900))
            .times(1)
            .returning(|_, _, _| Ok(true));

        let d = dispatcher(client, &store);
        let exdrop = mention("@bot exdrop", 5);

        // Reads still work, the blacklist write does not: nothing is deleted yet.
        store.set_writable(false);
        assert!(matches!(d.dispatch(&exdrop).await, CommandOutcome::Retry(WardenError::StoreUnavailable(_))));

        store.set_writable(true);
        assert_eq!(d.dispatch(&exdrop).await, CommandOutcome::Executed);
        let row = store.user_trust("f", UserId(66)).await.unwrap().unwrap();
        assert_eq!(row.tier, PermissionTier::Blacklisted);
    }

    #[tokio::test]
    async fn test_img_ban_records_every_image_hash() {
        let store = MemoryStore::new();
        with_tier(&store, PermissionTier::Tier3).await;

        let mut client = MockForumClient::new();
        client.expect_list_posts().returning(|_, _, _| {
            let mut opening = post(10, 5, 66);
            opening.image_refs = vec!["img/a".into(), "img/b".into()];
            Ok(Page { items: vec![opening], has_more: false })
        });
        client
            .expect_fetch_image()
            .times(2)
            .returning(|locator| Ok(Bytes::from(locator.to_string())));
        client.expect_delete_content().times(1).returning(|_, _, _| Ok(true));

        let mut inspector = MockImageInspector::new();
        inspector
            .expect_fingerprint()
            .returning(|image| Ok(ImageHash(if image == b"img/a" { 1 } else { 2 })));

        let d = dispatcher_with(client, inspector, &store);
        assert_eq!(d.dispatch(&mention("@bot img_ban", 5)).await, CommandOutcome::Executed);

        for hash in [ImageHash(1), ImageHash(2)] {
            let banned = tokio_test::assert_ok!(store.image_banned("f", hash).await);
            assert!(banned);
        }
    }
}
