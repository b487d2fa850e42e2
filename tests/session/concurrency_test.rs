//! Interleavings and partial failures across concurrent session events.

use std::sync::Arc;
use std::time::Duration;

use tetatet::notify::Notice;
use tetatet::policy::PolicyError;
use tetatet::session::{MatchOutcome, SessionError};
use tetatet::store::UserStore;
use tetatet::types::{BanDuration, SessionState, UserId};

use crate::support::{flaky_harness, MODERATOR};

const ALICE: UserId = UserId(71);
const BOB: UserId = UserId(72);

const STALL: Duration = Duration::from_millis(200);
const HEAD_START: Duration = Duration::from_millis(20);

#[tokio::test]
async fn failed_report_teardown_files_nothing() {
    let h = flaky_harness().await;
    h.pair(ALICE, BOB).await;
    h.engine.request_report(ALICE).await.expect("report");

    h.store.set_failing_batches(true);
    let err = h
        .engine
        .submit_report(ALICE, "spam")
        .await
        .expect_err("teardown should fail");
    assert!(matches!(
        err,
        SessionError::Policy(PolicyError::Store(_))
    ));
    assert_eq!(h.store.count_reports(BOB).await.expect("count"), 0);
    assert_eq!(h.user(ALICE).await.state, SessionState::Reporting);
    assert_eq!(h.user(ALICE).await.partner_id, Some(BOB));

    h.store.set_failing_batches(false);
    h.engine
        .submit_report(ALICE, "spam")
        .await
        .expect("retry succeeds");
    assert_eq!(h.store.count_reports(BOB).await.expect("count"), 1);
    assert_eq!(h.user(ALICE).await.state, SessionState::Menu);
    assert_eq!(h.user(BOB).await.state, SessionState::Menu);
}

#[tokio::test]
async fn menu_refresh_does_not_requeue_a_matched_user() {
    let h = flaky_harness().await;
    h.engine.request_search(ALICE).await.expect("search a");
    h.engine.request_search(BOB).await.expect("search b");
    let (a, b) = h.queue.try_match().expect("two waiting");

    // The menu reads Alice as searching, then stalls before re-enqueueing.
    h.store.stall_next_user_read(ALICE, STALL);
    let menu = tokio::spawn({
        let engine = Arc::clone(&h.engine);
        async move { engine.main_menu(ALICE).await }
    });
    tokio::time::sleep(HEAD_START).await;

    let outcome = h.engine.commit_match(a, b).await.expect("commit");
    assert_eq!(outcome, MatchOutcome::Paired(a, b));
    let shown = menu.await.expect("menu task").expect("menu");
    assert_eq!(shown, Notice::AlreadySearching);

    let alice = h.user(ALICE).await;
    assert_eq!(alice.state, SessionState::Chatting);
    assert_eq!(alice.partner_id, Some(BOB));
    assert!(!h.queue.contains(ALICE), "a paired user must not stay queued");
    assert!(!h.queue.contains(BOB));
}

#[tokio::test]
async fn ban_during_search_request_wins() {
    let h = flaky_harness().await;
    h.engine.start(ALICE).await.expect("start");

    // The search request sees no ban, then stalls before writing.
    h.store.stall_next_ban_check(ALICE, STALL);
    let search = tokio::spawn({
        let engine = Arc::clone(&h.engine);
        async move { engine.request_search(ALICE).await }
    });
    tokio::time::sleep(HEAD_START).await;

    h.engine
        .ban(MODERATOR, ALICE, BanDuration::Permanent)
        .await
        .expect("ban");
    let _ = search.await.expect("search task");

    assert_eq!(h.user(ALICE).await.state, SessionState::Menu);
    assert!(!h.queue.contains(ALICE), "a banned user must not stay queued");
    assert!(matches!(
        h.engine.request_search(ALICE).await,
        Err(SessionError::Banned { until: None })
    ));
}
