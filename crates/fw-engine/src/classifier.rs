//! # Classifier
//!
//! Pure decision function from a content item and its lookup context to a
//! verdict. Lookups and side effects belong to the caller; the classifier
//! only reads its arguments.

use crate::rules::{self, Category, Condition, Outcome, Patterns, Rule, CATALOG, FLOOD_LINE_BREAKS};
use fw_config::ReviewConfig;
use fw_core::{ActionScope, AuthorStatus, ContentItem, Result, Verdict};
use regex::Regex;
use std::collections::HashMap;

/// Tunables that come from configuration.
#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// Authors strictly above this level skip the rule chain.
    pub trusted_level: u8,
    /// Ban length for `RejectAuthor` outcomes and blacklisted authors.
    pub ban_days: u32,
    /// A thread's first reply is peeked at when its reply count exceeds this.
    pub nested_reply_threshold: u32,
    /// Rules flagged exemptible do not fire when the text matches this.
    pub exempt_pattern: Option<String>,
    /// Per-category pattern overrides.
    pub patterns: HashMap<String, String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            trusted_level: 4,
            ban_days: 10,
            nested_reply_threshold: 0,
            exempt_pattern: None,
            patterns: HashMap::new(),
        }
    }
}

impl From<&ReviewConfig> for ClassifierSettings {
    fn from(config: &ReviewConfig) -> Self {
        Self {
            trusted_level: config.trusted_level,
            ban_days: config.ban_days,
            nested_reply_threshold: config.nested_reply_threshold,
            exempt_pattern: config.exempt_pattern.clone(),
            patterns: config.patterns.clone(),
        }
    }
}

/// The two external lookups the classifier depends on.
#[derive(Debug, Clone, Copy)]
pub struct ReviewContext {
    /// A review record exists for this item and its edit marker is unchanged.
    pub already_reviewed: bool,
    pub author_status: AuthorStatus,
}

impl ReviewContext {
    pub fn fresh(author_status: AuthorStatus) -> Self {
        Self { already_reviewed: false, author_status }
    }
}

/// Result of the text pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Final(Verdict),
    /// Nothing matched but the item carries images; inspect them and call
    /// [`Classifier::classify_images`].
    Defer,
}

/// What the caller learned about one attached image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFinding {
    pub qr_payload: Option<String>,
    pub banned_hash: bool,
}

pub struct Classifier {
    patterns: Patterns,
    exempt: Option<Regex>,
    settings: ClassifierSettings,
}

impl Classifier {
    pub fn new(settings: ClassifierSettings) -> Result<Self> {
        let patterns = Patterns::new(&settings.patterns)?;
        let exempt = settings
            .exempt_pattern
            .as_deref()
            .map(|source| rules::compile("exempt_pattern", source))
            .transpose()?;
        Ok(Self { patterns, exempt, settings })
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Text pass. Early exits, in order: memoized, author status, trusted
    /// level, blank item, first matching rule.
    pub fn classify(&self, item: &ContentItem, ctx: ReviewContext) -> Decision {
        if ctx.already_reviewed {
            return Decision::Final(Verdict::allow("memoized"));
        }

        match ctx.author_status {
            AuthorStatus::Blacklisted => {
                return Decision::Final(Verdict::reject_author(self.settings.ban_days, "author-blacklisted"));
            }
            AuthorStatus::Whitelisted => return Decision::Final(Verdict::allow("author-whitelisted")),
            AuthorStatus::Neutral => {}
        }

        if item.author.level > self.settings.trusted_level {
            return Decision::Final(Verdict::allow("trusted-level"));
        }

        if item.is_blank() {
            return Decision::Final(Verdict::allow("blank"));
        }

        if let Some(rule) = self.first_match(item) {
            return Decision::Final(self.verdict_for(rule));
        }

        if item.image_refs.is_empty() {
            Decision::Final(Verdict::allow("no-match"))
        } else {
            Decision::Defer
        }
    }

    /// Image pass for an item the text pass deferred.
    pub fn classify_images(&self, item: &ContentItem, findings: &[ImageFinding]) -> Verdict {
        if findings.iter().any(|f| f.banned_hash) {
            tracing::debug!(content_id = %item.id, "Banned image hash");
            return Verdict::reject_content(ActionScope::Item, "image-banned");
        }

        let linked = findings
            .iter()
            .filter_map(|f| f.qr_payload.as_deref())
            .any(|payload| payload.trim_start().to_ascii_lowercase().starts_with("http"));
        if linked {
            return Verdict::reject_content(ActionScope::Item, "image-qr-link");
        }

        Verdict::allow("no-match")
    }

    /// True when the first reply of this thread deserves an extra look.
    pub fn wants_nested_peek(&self, thread: &ContentItem, status: AuthorStatus) -> bool {
        thread.is_thread()
            && status == AuthorStatus::Neutral
            && thread.author.level <= self.settings.trusted_level
    }

    /// Whether a reply with `reply_count` comments is engaged enough to peek at.
    pub fn is_engaged(&self, reply_count: u32) -> bool {
        reply_count > self.settings.nested_reply_threshold
    }

    /// Every rule that applies to an author at `level`, in chain order.
    pub fn rules_for_level(level: u8) -> impl Iterator<Item = &'static Rule> {
        CATALOG.iter().filter(move |r| level < r.below_level)
    }

    fn first_match(&self, item: &ContentItem) -> Option<&'static Rule> {
        let exempt = self.exempt.as_ref().is_some_and(|re| re.is_match(&item.text));
        Self::rules_for_level(item.author.level)
            .filter(|r| !(r.exemptible && exempt))
            .find(|r| self.holds(r.condition, item))
    }

    fn holds(&self, condition: Condition, item: &ContentItem) -> bool {
        let text = item.text.as_str();
        match condition {
            Condition::Text(category) => self.patterns.matches(category, text),
            Condition::TextWith(primary, corroborators) => {
                self.patterns.matches(primary, text)
                    && corroborators.iter().any(|c| self.patterns.matches(*c, text))
            }
            Condition::AuthorName(category) => self.name_matches(item, category),
            Condition::AuthorNameWith(primary, corroborators) => {
                self.name_matches(item, primary) && corroborators.iter().any(|c| self.name_matches(item, *c))
            }
            Condition::GenderedText(gender, category) => {
                item.author.gender == gender && self.patterns.matches(category, text)
            }
            Condition::ThreadAuthorText(category) => {
                item.by_thread_author && !item.is_thread() && self.patterns.matches(category, text)
            }
            Condition::Flood => text.matches('\n').count() > FLOOD_LINE_BREAKS,
        }
    }

    fn name_matches(&self, item: &ContentItem, category: Category) -> bool {
        self.patterns.matches(category, &item.author.name) || self.patterns.matches(category, &item.author.nickname)
    }

    fn verdict_for(&self, rule: &Rule) -> Verdict {
        match rule.outcome {
            Outcome::RejectContent(scope) => Verdict::reject_content(scope, rule.id),
            Outcome::RejectAuthor(scope) => Verdict::reject_author_in(scope, self.settings.ban_days, rule.id),
        }
    }
}
