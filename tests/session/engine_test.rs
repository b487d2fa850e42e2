//! Tests for `src/session/mod.rs`: the conversation state machine.

use std::sync::Arc;

use chrono::Duration;

use tetatet::config::PolicyConfig;
use tetatet::notify::{Notice, Notifier};
use tetatet::pairing::PairingQueue;
use tetatet::policy::{ModeratorGate, PolicyError};
use tetatet::session::{MatchOutcome, SessionEngine, SessionError};
use tetatet::store::UserStore;
use tetatet::types::{BanDuration, MediaKind, Payload, SessionState, UserId};

use crate::support::{harness, memory_store, FlakyStore, RecordingNotifier, MODERATOR};

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const CAROL: UserId = UserId(3);

// ---------------------------------------------------------------------------
// Menu and searching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_registers_user_in_menu() {
    let h = harness().await;
    let notice = h.engine.start(ALICE).await.expect("start");
    assert_eq!(notice, Notice::Welcome);
    h.assert_idle(ALICE).await;
}

#[tokio::test]
async fn start_while_searching_keeps_search_alive() {
    let h = harness().await;
    h.engine.request_search(ALICE).await.expect("search");
    // Simulate a restart that lost the in-memory queue.
    h.queue.dequeue(ALICE);

    let notice = h.engine.start(ALICE).await.expect("start");
    assert_eq!(notice, Notice::AlreadySearching);
    assert!(h.queue.contains(ALICE));
    assert_eq!(h.user(ALICE).await.state, SessionState::Searching);
}

#[tokio::test]
async fn start_while_chatting_keeps_session() {
    let h = harness().await;
    h.pair(ALICE, BOB).await;
    let notice = h.engine.start(ALICE).await.expect("start");
    assert_eq!(notice, Notice::StillChatting);
    h.assert_partnered(ALICE, BOB).await;
}

#[tokio::test]
async fn request_search_persists_then_enqueues() {
    let h = harness().await;
    let notice = h.engine.request_search(ALICE).await.expect("search");
    assert_eq!(notice, Notice::Searching);
    assert!(h.queue.contains(ALICE));
    assert_eq!(h.user(ALICE).await.state, SessionState::Searching);
}

#[tokio::test]
async fn repeated_search_is_idempotent() {
    let h = harness().await;
    h.engine.request_search(ALICE).await.expect("search");
    let notice = h.engine.request_search(ALICE).await.expect("search again");
    assert_eq!(notice, Notice::AlreadySearching);
    assert_eq!(h.queue.len(), 1);
}

#[tokio::test]
async fn cancel_search_returns_to_menu() {
    let h = harness().await;
    h.engine.request_search(ALICE).await.expect("search");
    let notice = h.engine.cancel_search(ALICE).await.expect("cancel");
    assert_eq!(notice, Notice::SearchCancelled);
    h.assert_idle(ALICE).await;

    // Cancelling again from the menu is harmless.
    let notice = h.engine.cancel_search(ALICE).await.expect("cancel again");
    assert_eq!(notice, Notice::SearchCancelled);
    h.assert_idle(ALICE).await;
}

#[tokio::test]
async fn search_while_chatting_is_rejected() {
    let h = harness().await;
    h.pair(ALICE, BOB).await;
    let err = h
        .engine
        .request_search(ALICE)
        .await
        .expect_err("should reject");
    assert!(matches!(
        err,
        SessionError::InvalidTransition {
            state: SessionState::Chatting,
            ..
        }
    ));
    h.assert_partnered(ALICE, BOB).await;
}

#[tokio::test]
async fn banned_user_is_rejected_before_any_transition() {
    let h = harness().await;
    h.engine.start(ALICE).await.expect("start");
    h.engine
        .ban(MODERATOR, ALICE, BanDuration::hours(1))
        .await
        .expect("ban");

    let err = h.engine.request_search(ALICE).await.expect_err("banned");
    match err {
        SessionError::Banned { until } => assert!(until.is_some()),
        other => panic!("expected Banned, got {other:?}"),
    }
    assert!(!h.queue.contains(ALICE));
    assert!(matches!(
        h.engine.start(ALICE).await,
        Err(SessionError::Banned { .. })
    ));
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn match_links_both_sides_and_notifies() {
    let h = harness().await;
    h.engine.request_search(ALICE).await.expect("search a");
    h.engine.request_search(BOB).await.expect("search b");

    let (a, b) = h.queue.try_match().expect("two waiting");
    let outcome = h.engine.commit_match(a, b).await.expect("commit");
    assert_eq!(outcome, MatchOutcome::Paired(a, b));

    h.assert_partnered(ALICE, BOB).await;
    let alice = h.user(ALICE).await;
    let bob = h.user(BOB).await;
    assert_eq!(alice.state, SessionState::Chatting);
    assert!(alice.chat_start.is_some());
    assert_eq!(alice.chat_start, bob.chat_start);
    assert_eq!(h.notifier.notices_for(ALICE), vec![Notice::Matched]);
    assert_eq!(h.notifier.notices_for(BOB), vec![Notice::Matched]);
}

#[tokio::test]
async fn stale_pair_is_abandoned_and_survivor_requeued() {
    let h = harness().await;
    h.engine.request_search(ALICE).await.expect("search a");
    h.engine.request_search(BOB).await.expect("search b");
    let (a, b) = h.queue.try_match().expect("two waiting");

    // Bob cancels after selection but before the commit.
    h.engine.cancel_search(BOB).await.expect("cancel");

    let outcome = h.engine.commit_match(a, b).await.expect("commit");
    assert_eq!(
        outcome,
        MatchOutcome::Abandoned {
            requeued: vec![ALICE]
        }
    );
    assert!(h.queue.contains(ALICE));
    assert_eq!(h.user(ALICE).await.state, SessionState::Searching);
    h.assert_idle(BOB).await;
    assert!(h.notifier.notices_for(ALICE).is_empty());
}

#[tokio::test]
async fn banned_candidate_is_not_matched() {
    let h = harness().await;
    h.engine.request_search(ALICE).await.expect("search a");
    h.engine.request_search(BOB).await.expect("search b");
    h.queue.dequeue(ALICE);
    h.queue.dequeue(BOB);
    // Ban row written directly, bypassing teardown.
    h.store.ban(BOB, None).await.expect("ban");

    let outcome = h.engine.commit_match(ALICE, BOB).await.expect("commit");
    assert_eq!(
        outcome,
        MatchOutcome::Abandoned {
            requeued: vec![ALICE]
        }
    );
    assert!(!h.queue.contains(BOB));
}

#[tokio::test]
async fn cancel_racing_a_match_leaves_consistent_state() {
    for _ in 0..20 {
        let h = harness().await;
        h.engine.request_search(ALICE).await.expect("search a");
        h.engine.request_search(BOB).await.expect("search b");
        let (a, b) = h.queue.try_match().expect("two waiting");

        let engine = Arc::clone(&h.engine);
        let cancel = tokio::spawn(async move { engine.cancel_search(ALICE).await });
        let commit = h.engine.commit_match(a, b).await.expect("commit");
        let cancelled = cancel.await.expect("task");

        let alice = h.user(ALICE).await;
        match commit {
            MatchOutcome::Paired(..) => {
                // Cancel lost the race and must have been rejected.
                assert!(matches!(
                    cancelled,
                    Err(SessionError::InvalidTransition { .. })
                ));
                h.assert_partnered(ALICE, BOB).await;
            }
            MatchOutcome::Abandoned { requeued } => {
                assert_eq!(cancelled.expect("cancel ok"), Notice::SearchCancelled);
                h.assert_idle(ALICE).await;
                assert_eq!(alice.partner_id, None);
                assert_eq!(requeued, vec![BOB]);
                assert!(h.queue.contains(BOB));
                assert_eq!(h.user(BOB).await.partner_id, None);
            }
        }
    }
}

#[tokio::test]
async fn failed_commit_requeues_both() {
    let sqlite = memory_store().await;
    let store = Arc::new(FlakyStore::new(sqlite));
    let queue = Arc::new(PairingQueue::new());
    let engine = SessionEngine::new(
        Arc::clone(&store) as Arc<dyn UserStore>,
        Arc::clone(&queue),
        Arc::new(RecordingNotifier::default()) as Arc<dyn Notifier>,
        PolicyConfig::default(),
        ModeratorGate::new(MODERATOR, None),
    );
    engine.request_search(ALICE).await.expect("search a");
    engine.request_search(BOB).await.expect("search b");
    let (a, b) = queue.try_match().expect("two waiting");

    store.set_failing(true);
    let err = engine.commit_match(a, b).await.expect_err("should fail");
    assert!(matches!(err, SessionError::Store(_)));
    assert!(queue.contains(ALICE));
    assert!(queue.contains(BOB));

    let alice = store.get_user(ALICE).await.expect("read").expect("row");
    assert_eq!(alice.state, SessionState::Searching);
    assert_eq!(alice.partner_id, None);
}

#[tokio::test]
async fn failed_search_write_does_not_enqueue() {
    let sqlite = memory_store().await;
    let store = Arc::new(FlakyStore::new(sqlite));
    let queue = Arc::new(PairingQueue::new());
    let engine = SessionEngine::new(
        Arc::clone(&store) as Arc<dyn UserStore>,
        Arc::clone(&queue),
        Arc::new(RecordingNotifier::default()) as Arc<dyn Notifier>,
        PolicyConfig::default(),
        ModeratorGate::new(MODERATOR, None),
    );
    engine.start(ALICE).await.expect("start");

    store.set_failing(true);
    let err = engine.request_search(ALICE).await.expect_err("should fail");
    assert!(matches!(err, SessionError::Store(_)));
    assert!(queue.is_empty());

    store.set_failing(false);
    engine.request_search(ALICE).await.expect("retry succeeds");
    assert!(queue.contains(ALICE));
}

#[tokio::test]
async fn expired_search_returns_user_to_menu() {
    let h = harness().await;
    h.engine.request_search(ALICE).await.expect("search");

    let none = h
        .engine
        .expire_searches(Duration::hours(1))
        .await
        .expect("sweep");
    assert_eq!(none, 0);
    assert!(h.queue.contains(ALICE));

    let expired = h
        .engine
        .expire_searches(Duration::zero())
        .await
        .expect("sweep");
    assert_eq!(expired, 1);
    h.assert_idle(ALICE).await;
    assert_eq!(h.notifier.notices_for(ALICE), vec![Notice::NobodyFound]);
}

// ---------------------------------------------------------------------------
// Stop / next
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_frees_both_and_notifies_partner() {
    let h = harness().await;
    h.pair(ALICE, BOB).await;
    h.notifier.clear();

    let notice = h.engine.stop(ALICE).await.expect("stop");
    assert_eq!(notice, Notice::ChatEnded);
    h.assert_idle(ALICE).await;
    h.assert_idle(BOB).await;
    assert_eq!(h.notifier.notices_for(BOB), vec![Notice::PartnerLeft]);
    assert!(h.notifier.notices_for(ALICE).is_empty());

    let stats = h.store.aggregate_stats(chrono::Utc::now()).await.expect("stats");
    assert_eq!(stats.completed_sessions, 1);
    assert_eq!(stats.active_chats, 0);
}

#[tokio::test]
async fn stop_outside_chat_is_rejected() {
    let h = harness().await;
    h.engine.start(ALICE).await.expect("start");
    let err = h.engine.stop(ALICE).await.expect_err("not chatting");
    assert!(matches!(
        err,
        SessionError::InvalidTransition {
            state: SessionState::Menu,
            ..
        }
    ));
}

#[tokio::test]
async fn simultaneous_stop_from_both_sides_is_symmetric() {
    let h = harness().await;
    h.pair(ALICE, BOB).await;

    let ea = Arc::clone(&h.engine);
    let eb = Arc::clone(&h.engine);
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { ea.stop(ALICE).await }),
        tokio::spawn(async move { eb.stop(BOB).await }),
    );
    let ok = [ra.expect("task a"), rb.expect("task b")]
        .into_iter()
        .filter(Result::is_ok)
        .count();
    assert!(ok >= 1);
    h.assert_idle(ALICE).await;
    h.assert_idle(BOB).await;
}

#[tokio::test]
async fn next_requeues_initiator_and_frees_partner() {
    let h = harness().await;
    h.pair(ALICE, BOB).await;
    h.notifier.clear();

    let notice = h.engine.next(ALICE).await.expect("next");
    assert_eq!(notice, Notice::Searching);

    let alice = h.user(ALICE).await;
    assert_eq!(alice.state, SessionState::Searching);
    assert_eq!(alice.partner_id, None);
    assert!(h.queue.contains(ALICE));
    h.assert_idle(BOB).await;
    assert_eq!(h.notifier.notices_for(BOB), vec![Notice::PartnerLeft]);
}

#[tokio::test]
async fn next_then_new_match_links_fresh_pair() {
    let h = harness().await;
    h.pair(ALICE, BOB).await;
    h.engine.next(ALICE).await.expect("next");
    h.engine.request_search(CAROL).await.expect("search c");

    let (a, b) = h.queue.try_match().expect("two waiting");
    let outcome = h.engine.commit_match(a, b).await.expect("commit");
    assert!(matches!(outcome, MatchOutcome::Paired(..)));
    h.assert_partnered(ALICE, CAROL).await;
    h.assert_idle(BOB).await;
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn report_request_and_cancel_round_trip() {
    let h = harness().await;
    h.pair(ALICE, BOB).await;

    let notice = h.engine.request_report(ALICE).await.expect("report");
    assert_eq!(notice, Notice::ReportPrompt);
    assert_eq!(h.user(ALICE).await.state, SessionState::Reporting);
    h.assert_partnered(ALICE, BOB).await;

    let notice = h.engine.cancel_report(ALICE).await.expect("cancel");
    assert_eq!(notice, Notice::ReportCancelled);
    assert_eq!(h.user(ALICE).await.state, SessionState::Chatting);
    h.assert_partnered(ALICE, BOB).await;
}

#[tokio::test]
async fn invalid_reason_keeps_user_reporting() {
    let h = harness().await;
    h.pair(ALICE, BOB).await;
    h.engine.request_report(ALICE).await.expect("report");

    let err = h.engine.submit_report(ALICE, "   ").await.expect_err("empty");
    assert!(matches!(
        err,
        SessionError::Policy(PolicyError::ReasonLength { chars: 0, max: 100 })
    ));

    let long = "x".repeat(101);
    let err = h.engine.submit_report(ALICE, &long).await.expect_err("long");
    assert!(matches!(
        err,
        SessionError::Policy(PolicyError::ReasonLength { chars: 101, .. })
    ));

    assert_eq!(h.user(ALICE).await.state, SessionState::Reporting);
    h.assert_partnered(ALICE, BOB).await;
    assert_eq!(h.store.count_reports(BOB).await.expect("count"), 0);
}

#[tokio::test]
async fn submitted_report_ends_session_and_alerts_moderator() {
    let h = harness().await;
    h.pair(ALICE, BOB).await;
    h.engine.request_report(ALICE).await.expect("report");
    h.notifier.clear();

    let notice = h
        .engine
        .submit_report(ALICE, "  spam  ")
        .await
        .expect("submit");
    assert_eq!(notice, Notice::ReportFiled);
    h.assert_idle(ALICE).await;
    h.assert_idle(BOB).await;
    assert_eq!(h.notifier.notices_for(BOB), vec![Notice::PartnerLeft]);
    assert_eq!(
        h.notifier.notices_for(MODERATOR),
        vec![Notice::ReportAlert {
            reporter: ALICE,
            reported: BOB,
            total: 1,
            banned: false,
        }]
    );

    let reports = h.store.recent_reports(10).await.expect("reports");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].reason, "spam");
    assert_eq!(reports[0].reporter_id, ALICE);
    assert_eq!(reports[0].reported_id, BOB);
}

#[tokio::test]
async fn third_report_bans_temporarily() {
    let h = harness().await;
    let target = UserId(50);
    for reporter in [UserId(51), UserId(52), UserId(53)] {
        h.pair(reporter, target).await;
        h.engine.request_report(reporter).await.expect("report");
        h.engine
            .submit_report(reporter, "rude")
            .await
            .expect("submit");
        h.assert_idle(reporter).await;
    }

    let ban = h
        .store
        .active_ban(target, chrono::Utc::now())
        .await
        .expect("read")
        .expect("target should be banned");
    assert!(!ban.is_permanent());
    h.assert_idle(target).await;
    assert!(h
        .notifier
        .notices_for(target)
        .iter()
        .any(|n| matches!(n, Notice::Banned { until: Some(_) })));
    assert!(h.notifier.notices_for(MODERATOR).contains(&Notice::ReportAlert {
        reporter: UserId(53),
        reported: target,
        total: 3,
        banned: true,
    }));
    assert!(matches!(
        h.engine.request_search(target).await,
        Err(SessionError::Banned { .. })
    ));
}

#[tokio::test]
async fn fifth_report_bans_permanently() {
    let h = harness().await;
    let target = UserId(60);
    for n in 0..4 {
        h.store
            .add_report(UserId(70 + n), target, "earlier")
            .await
            .expect("seed report");
    }

    h.pair(UserId(61), target).await;
    h.engine.request_report(UserId(61)).await.expect("report");
    h.engine
        .submit_report(UserId(61), "abuse")
        .await
        .expect("submit");

    let ban = h
        .store
        .active_ban(target, chrono::Utc::now())
        .await
        .expect("read")
        .expect("banned");
    assert!(ban.is_permanent());
    assert!(h
        .notifier
        .notices_for(target)
        .contains(&Notice::Banned { until: None }));
}

#[tokio::test]
async fn concurrent_reports_are_all_counted() {
    let h = harness().await;
    let mut tasks = Vec::new();
    for n in 0..8 {
        let store = Arc::clone(&h.store);
        tasks.push(tokio::spawn(async move {
            store
                .add_report(UserId(200 + n), UserId(7), "spam")
                .await
                .expect("insert");
        }));
    }
    for task in tasks {
        task.await.expect("task");
    }
    assert_eq!(h.store.count_reports(UserId(7)).await.expect("count"), 8);
}

// ---------------------------------------------------------------------------
// Message routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn message_in_menu_is_not_relayed() {
    let h = harness().await;
    h.engine.start(ALICE).await.expect("start");
    let notice = h
        .engine
        .handle_message(ALICE, Payload::Text("hello?".to_owned()))
        .await
        .expect("handled");
    assert_eq!(notice, Some(Notice::NotInChat));
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn text_while_reporting_is_the_reason() {
    let h = harness().await;
    h.pair(ALICE, BOB).await;
    h.engine.request_report(ALICE).await.expect("report");

    let notice = h
        .engine
        .handle_message(
            ALICE,
            Payload::Media {
                message_id: 9,
                kind: MediaKind::Photo,
            },
        )
        .await
        .expect("handled");
    assert_eq!(notice, Some(Notice::TextRequired));
    assert_eq!(h.user(ALICE).await.state, SessionState::Reporting);

    let notice = h
        .engine
        .handle_message(ALICE, Payload::Text("insults".to_owned()))
        .await
        .expect("handled");
    assert_eq!(notice, Some(Notice::ReportFiled));
    assert_eq!(h.store.count_reports(BOB).await.expect("count"), 1);
    assert!(h.notifier.relays_for(BOB).is_empty());
}
