//! Precedence, band and memoization properties of the classifier.

use fw_core::{AuthorStatus, Disposition, MockForumClient, ReviewLedger, Verdict};
use fw_engine::{Classifier, ClassifierSettings, Decision, ReviewContext};
use fw_store::MemoryStore;
use integration_tests::{enforcer, post, FORUM, SPAM};
use std::sync::Arc;

/// One sample per broad spam family.
const SAMPLES: &[&str] = &[
    SPAM,
    "宝妈在家动手指赚钱",
    "破解版 福利群 加q 12345678",
    "下面有惊喜 浮力车",
    "狐臭 痔疮 医院哪家好不好",
    "公众号 有意者私聊",
];

fn classifier() -> Classifier {
    Classifier::new(ClassifierSettings::default()).unwrap()
}

fn is_reject(decision: &Decision) -> bool {
    matches!(decision, Decision::Final(v) if !v.is_allow())
}

#[test]
fn whitelist_wins_over_every_rule() {
    let c = classifier();
    for text in SAMPLES {
        for level in 0..=4 {
            let decision = c.classify(&post(1, text, level), ReviewContext::fresh(AuthorStatus::Whitelisted));
            assert_eq!(decision, Decision::Final(Verdict::allow("author-whitelisted")), "{text} at {level}");
        }
    }
}

#[test]
fn blacklist_wins_over_clean_trusted_text() {
    let c = classifier();
    let decision = c.classify(&post(1, "good morning everyone", 15), ReviewContext::fresh(AuthorStatus::Blacklisted));
    assert!(matches!(
        decision,
        Decision::Final(Verdict { disposition: Disposition::RejectAuthor { .. }, .. })
    ));
}

#[test]
fn lower_trust_is_never_treated_more_leniently() {
    let c = classifier();
    for text in SAMPLES {
        for level in 0..12u8 {
            let higher = c.classify(&post(1, text, level + 1), ReviewContext::fresh(AuthorStatus::Neutral));
            let lower = c.classify(&post(1, text, level), ReviewContext::fresh(AuthorStatus::Neutral));
            if is_reject(&higher) {
                assert!(is_reject(&lower), "{text}: rejected at {} but not at {level}", level + 1);
            }
        }

        let lower: Vec<_> = Classifier::rules_for_level(0).map(|r| r.id).collect();
        let higher: Vec<_> = Classifier::rules_for_level(4).map(|r| r.id).collect();
        assert!(higher.iter().all(|id| lower.contains(id)));
    }
}

#[test]
fn every_sample_is_caught_at_level_zero() {
    let c = classifier();
    for text in SAMPLES {
        let decision = c.classify(&post(1, text, 0), ReviewContext::fresh(AuthorStatus::Neutral));
        assert!(is_reject(&decision), "{text} slipped through");
    }
}

#[test]
fn empty_item_is_allowed() {
    let decision = classifier().classify(&post(1, "", 0), ReviewContext::fresh(AuthorStatus::Neutral));
    assert_eq!(decision, Decision::Final(Verdict::allow("blank")));
}

#[tokio::test]
async fn memoized_item_is_allowed_on_second_look() {
    let store = MemoryStore::new();
    // Allow verdicts touch nothing remote.
    let enforcer = enforcer(Arc::new(MockForumClient::new()), &store);
    let c = classifier();
    let item = post(77, "a perfectly ordinary post", 2);

    let Decision::Final(first) = c.classify(&item, ReviewContext::fresh(AuthorStatus::Neutral)) else {
        panic!("text-only item deferred");
    };
    assert!(first.is_allow());
    enforcer.apply(&item, &first).await;

    let recorded = store.reviewed(FORUM, item.id).await.unwrap();
    let ctx = ReviewContext { already_reviewed: recorded == Some(item.edit_marker), author_status: AuthorStatus::Neutral };
    assert_eq!(c.classify(&item, ctx), Decision::Final(Verdict::allow("memoized")));
}
