//! # Rule catalog
//!
//! Pattern categories and the ordered rule chain evaluated by the classifier.
//! A rule applies to authors whose platform level is strictly below its
//! `below_level`, so lower levels always see a superset of rules.

use fw_core::{ActionScope, Gender, Result, WardenError};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

/// Named regular-expression categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Contact,
    JobSolicit,
    JobTerms,
    JobRecruit,
    AppPromo,
    App,
    AppCheck,
    GamePromo,
    Game,
    GameCheck,
    GameCheat,
    AdultRedirect,
    Business,
    Course,
    CourseCheck,
    Medical,
    NamePromo,
    NameBait,
    NameCheck,
    FemaleBait,
    FreshAccount,
    ThreadKill,
}

impl Category {
    pub const ALL: [Category; 22] = [
        Category::Contact,
        Category::JobSolicit,
        Category::JobTerms,
        Category::JobRecruit,
        Category::AppPromo,
        Category::App,
        Category::AppCheck,
        Category::GamePromo,
        Category::Game,
        Category::GameCheck,
        Category::GameCheat,
        Category::AdultRedirect,
        Category::Business,
        Category::Course,
        Category::CourseCheck,
        Category::Medical,
        Category::NamePromo,
        Category::NameBait,
        Category::NameCheck,
        Category::FemaleBait,
        Category::FreshAccount,
        Category::ThreadKill,
    ];

    /// Key used in `review.patterns`.
    pub fn key(self) -> &'static str {
        match self {
            Category::Contact => "contact",
            Category::JobSolicit => "job_solicit",
            Category::JobTerms => "job_terms",
            Category::JobRecruit => "job_recruit",
            Category::AppPromo => "app_promo",
            Category::App => "app",
            Category::AppCheck => "app_check",
            Category::GamePromo => "game_promo",
            Category::Game => "game",
            Category::GameCheck => "game_check",
            Category::GameCheat => "game_cheat",
            Category::AdultRedirect => "adult_redirect",
            Category::Business => "business",
            Category::Course => "course",
            Category::CourseCheck => "course_check",
            Category::Medical => "medical",
            Category::NamePromo => "name_promo",
            Category::NameBait => "name_bait",
            Category::NameCheck => "name_check",
            Category::FemaleBait => "female_bait",
            Category::FreshAccount => "fresh_account",
            Category::ThreadKill => "thread_kill",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }

    fn default_pattern(self) -> &'static str {
        match self {
            Category::Contact => {
                r"(\+|加|联系|私|找|十|＋).{0,2}(我|微信|威|薇|wx|vx|v|q|企鹅|扣扣)|(私|s)(信|聊)|滴滴|威(信|辛)|v信|q.?\d{6,11}|(主页|签名|简介|头像)(有|安排|上车)"
            }
            Category::JobSolicit => {
                r"成立工作室|宝妈[^妈]|(跟着|动手指).{0,2}赚钱|免费入职|(招|收).{0,4}(临时工|徒|代理)|时间自由|不收.?任何费用|包食宿|手工活|(刷|做)(单|销量)"
            }
            Category::JobTerms => {
                r"佣金|押金|会费|结算|(日|立)结|高佣|(急|长期|大量)招|招(募|聘)|稳赚|(日|月)(入|进).{0,2}(元|块|百|千|万|w)|(工资|收入|待遇)(高|好|\d{3,})"
            }
            Category::JobRecruit => {
                r"(暑假|临时|短期)工|兼职|主播|陪玩|接单|工作室|副业|代理|想(赚|挣)钱|微商|打字员|点赞员"
            }
            Category::AppPromo => r"tb口令|(淘宝|抖音).{0,2}号|赛事预测|解封微信|扫码.{0,3}送红包|帮注册|口令打开淘宝",
            Category::App => r"拼(夕夕|多多|dd)|京东|抖音|支付宝|淘.?宝|饿.?了.?么|美.?团|快手|app.{0,4}下载|需要.{0,2}app",
            Category::AppCheck => r"点一下|点赞|任务|复制|开店|店铺|红.?包|推广|免费|邀请码|佣.?金|变现",
            Category::GamePromo => {
                r"(招|找).{0,4}(托|内部|体验员)|(手游|游戏|内部).?(托|资格|号)|上线就送|(本吧|本帖|本贴).{0,2}推荐|特权礼包|霸服|(送|领|免费).{0,2}(648|元宝)|手游官网"
            }
            Category::Game => r"手游|游戏|玩家|仙侠|国战|新区",
            Category::GameCheck => r"神豪|托|充值|试玩|内玩|限时|速来|开服|内测|福利|扶持|内部号",
            Category::GameCheat => r"破解版|(ios|苹果).{0,3}(存档|白嫖|福利)|(卖|分享|求).{0,4}存档|内购免费|福利群|变态版",
            Category::AdultRedirect => r"(下|↓).{0,3}有惊喜|浮力车|成人看的|看偏神器|推荐.{0,3}资源|都有.*看我关注的人|\.xyz",
            Category::Business => {
                r"(^|[^\d])1[3-9]\d{9}([^\d]|$)|(高仿|复刻).{0,3}(鞋|包|表)|莆田|工厂直供|本店主营|厂家货源|网赌|借贷|区块链|有限公司|公司.{0,2}注册"
            }
            Category::Course => r"摄影|视频(剪辑|特效)|后期|CAD|素描|板绘|(^|[^a-z])ps([^a-z]|$)|美术|英语口语|声乐|学历",
            Category::CourseCheck => r"交流群|课程|素材|教(程|学)|(想|要)学|提升|领取",
            Category::Medical => r"医院.*好不好|狐臭|痔疮|阳痿|早泄|不孕不育|前列腺|妇科",
            Category::NamePromo => r"引流|推广|赚钱|手游|(提|变)现|电商|平台|(头|投)(像|象)|(主|煮)页|资(源|料)",
            Category::NameBait => r"😍|☜|☞|💌|💋",
            Category::NameCheck => r"wx|\d{6,}|企鹅",
            Category::FemaleBait => r"(盆|朋|交|处).?友|有人聊|好孤单|单身|睡不着|奔现|网恋|约会|陪我|认识一下",
            Category::FreshAccount => r"公众号|传媒|新媒体|婚恋|出租|塔罗|问卷调查|有意者|急需.{0,10}钱|(免费|资源)分享|懂(的|得)来|代练",
            Category::ThreadKill => r"地祉|特价版",
        }
    }
}

/// Compiled patterns, one per category.
#[derive(Debug, Clone)]
pub struct Patterns {
    compiled: HashMap<Category, Regex>,
}

impl Patterns {
    /// Built-in patterns with `overrides` (category key to regex) applied.
    pub fn new(overrides: &HashMap<String, String>) -> Result<Self> {
        for key in overrides.keys() {
            if Category::from_key(key).is_none() {
                return Err(WardenError::Config(format!("unknown pattern category: {key}")));
            }
        }

        let mut compiled = HashMap::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let source = overrides
                .get(category.key())
                .map(String::as_str)
                .unwrap_or_else(|| category.default_pattern());
            compiled.insert(category, compile(category.key(), source)?);
        }
        Ok(Self { compiled })
    }

    /// Built-in patterns only.
    pub fn builtin() -> Result<Self> {
        Self::new(&HashMap::new())
    }

    pub fn matches(&self, category: Category, text: &str) -> bool {
        !text.is_empty() && self.compiled.get(&category).is_some_and(|re| re.is_match(text))
    }
}


pub(crate) fn compile(name: &str, source: &str) -> Result<Regex> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .build()
        .map_err(|e| WardenError::Config(format!("pattern {name}: {e}")))
}

/// What a rule inspects.
#[derive(Debug, Clone, Copy)]
pub enum Condition {
    /// The item text matches the category.
    Text(Category),
    /// The text matches the primary category and at least one corroborator.
    TextWith(Category, &'static [Category]),
    /// The author's name or nickname matches.
    AuthorName(Category),
    /// The author's name or nickname matches and so does a corroborator.
    AuthorNameWith(Category, &'static [Category]),
    /// The text matches and the author declares the given gender.
    GenderedText(Gender, Category),
    /// The thread author posting a thread-kill keyword under their own thread.
    ThreadAuthorText(Category),
    /// More line breaks than allowed.
    Flood,
}

/// What a match turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    RejectContent(ActionScope),
    /// Ban for the configured number of days, then remove with the given scope.
    RejectAuthor(ActionScope),
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub id: &'static str,
    pub below_level: u8,
    pub condition: Condition,
    /// Skipped when the text hits the exempt pattern.
    pub exemptible: bool,
    pub outcome: Outcome,
}

/// Line breaks above which a text counts as flooding.
pub const FLOOD_LINE_BREAKS: usize = 128;

const fn rule(id: &'static str, below_level: u8, condition: Condition, exemptible: bool, outcome: Outcome) -> Rule {
    Rule { id, below_level, condition, exemptible, outcome }
}

const ITEM: Outcome = Outcome::RejectContent(ActionScope::Item);
const BAN: Outcome = Outcome::RejectAuthor(ActionScope::Item);

/// The chain, in evaluation order. First match wins.
pub const CATALOG: &[Rule] = &[
    rule("flood-text", 5, Condition::Flood, false, ITEM),
    rule(
        "thread-kill",
        5,
        Condition::ThreadAuthorText(Category::ThreadKill),
        false,
        Outcome::RejectAuthor(ActionScope::WholeThread),
    ),
    rule("job-solicit", 5, Condition::Text(Category::JobSolicit), false, BAN),
    rule("app-promo", 5, Condition::Text(Category::AppPromo), false, BAN),
    rule("game-promo", 5, Condition::Text(Category::GamePromo), false, BAN),
    rule(
        "game-cheat-contact",
        5,
        Condition::TextWith(Category::GameCheat, &[Category::Contact]),
        true,
        BAN,
    ),
    rule(
        "adult-redirect-contact",
        4,
        Condition::TextWith(Category::AdultRedirect, &[Category::Contact]),
        true,
        BAN,
    ),
    rule("adult-redirect", 3, Condition::Text(Category::AdultRedirect), true, BAN),
    rule("game-cheat", 3, Condition::Text(Category::GameCheat), false, BAN),
    rule("business-ad", 3, Condition::Text(Category::Business), false, ITEM),
    rule(
        "job-recruit",
        3,
        Condition::TextWith(Category::JobRecruit, &[Category::JobTerms, Category::Contact]),
        true,
        ITEM,
    ),
    rule(
        "app-ad",
        3,
        Condition::TextWith(Category::App, &[Category::AppCheck, Category::Contact]),
        true,
        ITEM,
    ),
    rule("course-ad", 3, Condition::TextWith(Category::Course, &[Category::CourseCheck]), true, ITEM),
    rule("game-ad", 3, Condition::TextWith(Category::Game, &[Category::GameCheck]), true, ITEM),
    rule("medical-ad", 3, Condition::Text(Category::Medical), true, ITEM),
    rule("job-terms-fresh", 2, Condition::Text(Category::JobTerms), true, ITEM),
    rule("female-bait", 2, Condition::GenderedText(Gender::Female, Category::FemaleBait), false, ITEM),
    rule("brand-impersonation", 2, Condition::AuthorName(Category::NamePromo), false, ITEM),
    rule(
        "name-bait",
        2,
        Condition::AuthorNameWith(Category::NameBait, &[Category::NameCheck]),
        true,
        ITEM,
    ),
    rule("fresh-account", 2, Condition::Text(Category::FreshAccount), false, ITEM),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_default_pattern_compiles() {
        for category in Category::ALL {
            assert!(compile(category.key(), category.default_pattern()).is_ok(), "{}", category.key());
        }
    }

    #[test]
    fn test_builtin_covers_every_category() {
        let patterns = Patterns::builtin().unwrap();
        assert_eq!(patterns.compiled.len(), Category::ALL.len());
    }

    #[test]
    fn test_override_replaces_builtin() {
        let overrides = HashMap::from([("thread_kill".to_string(), "^nuke$".to_string())]);
        let patterns = Patterns::new(&overrides).unwrap();
        assert!(patterns.matches(Category::ThreadKill, "NUKE"));
        assert!(!patterns.matches(Category::ThreadKill, "特价版"));
    }

    #[test]
    fn test_unknown_override_is_rejected() {
        let overrides = HashMap::from([("spam".to_string(), "x".to_string())]);
        assert!(matches!(Patterns::new(&overrides), Err(WardenError::Config(_))));
    }

    #[test]
    fn test_empty_text_never_matches() {
        let patterns = Patterns::builtin().unwrap();
        for category in Category::ALL {
            assert!(!patterns.matches(category, ""));
        }
    }

    #[test]
    fn test_rule_ids_are_unique() {
        let mut ids: Vec<_> = CATALOG.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), CATALOG.len());
    }

    #[test]
    fn test_recruitment_sample_hits_only_conjunctive_rules() {
        let patterns = Patterns::builtin().unwrap();
        let text = "加我微信 123456 做兼职日结";
        assert!(patterns.matches(Category::Contact, text));
        assert!(patterns.matches(Category::JobRecruit, text));
        assert!(patterns.matches(Category::JobTerms, text));
        assert!(!patterns.matches(Category::JobSolicit, text));
        assert!(!patterns.matches(Category::Business, text));
        assert!(!patterns.matches(Category::App, text));
    }
}
