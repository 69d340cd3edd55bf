mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use roam_cache::LocalCache;
use roam_crypto::{encrypt, looks_encrypted};
use roam_session::{Composer, RetryPolicy, SessionNotice, SessionState, SubmitOutcome};
use roam_store::ConversationStore;
use roam_types::{ChatError, UserId};

use common::{ScriptedStore, bodies, controller, drain, next_received};

#[tokio::test]
async fn happy_path_open_and_send() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");

    alice.open("bob").await.unwrap();
    assert_eq!(alice.state(), SessionState::Ready);
    assert!(!alice.is_loading());
    assert!(!alice.has_connection_error());
    assert!(alice.messages().is_empty());
    assert!(alice.has_live_channel().await);

    assert!(alice.send("hi").await);
    assert_eq!(bodies(&alice.messages()), vec!["hi"]);
    assert_eq!(alice.state(), SessionState::Ready);

    let cid = alice.conversation_id().unwrap();
    let participants = store.inner.participants(&cid).await;
    assert_eq!(participants.len(), 2);
}

#[tokio::test]
async fn both_sides_resolve_the_same_conversation() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");
    let bob = controller(&store, "bob");

    alice.open("bob").await.unwrap();
    bob.open("alice").await.unwrap();
    let first = alice.conversation_id().unwrap();
    assert_eq!(bob.conversation_id().unwrap(), first);

    alice.open("bob").await.unwrap();
    assert_eq!(alice.conversation_id().unwrap(), first);
}

#[tokio::test]
async fn history_is_loaded_in_send_order() {
    let store = ScriptedStore::new();
    let cid = store
        .inner
        .resolve_private_conversation(&UserId::from("alice"), &UserId::from("bob"))
        .await
        .unwrap();
    for body in ["one", "two", "three"] {
        store
            .inner
            .insert_message(&cid, &UserId::from("bob"), body)
            .await
            .unwrap();
    }

    let alice = controller(&store, "alice");
    alice.open("bob").await.unwrap();

    assert_eq!(bodies(&alice.messages()), vec!["one", "two", "three"]);
}

#[tokio::test(start_paused = true)]
async fn store_down_then_recovers() {
    let store = ScriptedStore::new();
    ScriptedStore::fail_next(&store.fail_probes, 2);
    let alice = controller(&store, "alice");
    let mut notices = alice.notices();

    let start = Instant::now();
    alice.open("bob").await.unwrap();
    let waited = start.elapsed();

    // 1s after the first failure, 2s after the second
    assert!(waited >= Duration::from_secs(3) && waited < Duration::from_millis(3_010));
    assert_eq!(store.probe_calls.load(Ordering::SeqCst), 3);
    assert_eq!(alice.state(), SessionState::Ready);
    assert_eq!(alice.attempts(), 2);
    assert!(!alice.has_connection_error());
    assert!(
        !drain(&mut notices)
            .iter()
            .any(|n| matches!(n, SessionNotice::InitializationFailed { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_bootstrap_fails_until_retried() {
    let store = ScriptedStore::new();
    ScriptedStore::fail_next(&store.fail_resolves, 3);
    let alice = controller(&store, "alice");
    let mut notices = alice.notices();

    let err = alice.open("bob").await.unwrap_err();
    assert!(matches!(err, ChatError::StoreUnavailable(_)));
    assert_eq!(alice.state(), SessionState::Failed);
    assert!(alice.has_connection_error());
    assert!(!alice.is_loading());
    assert_eq!(alice.attempts(), 3);
    assert!(alice.conversation_id().is_none());
    assert!(
        drain(&mut notices)
            .iter()
            .any(|n| matches!(n, SessionNotice::InitializationFailed { .. }))
    );
    assert!(!alice.send("hi").await);

    alice.retry().await.unwrap();
    assert_eq!(alice.state(), SessionState::Ready);
    assert_eq!(alice.attempts(), 0);
    assert!(!alice.has_connection_error());
    assert_eq!(alice.counterpart_id(), Some(UserId::from("bob")));
}

#[tokio::test]
async fn retry_is_only_valid_after_failure() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");

    assert!(matches!(alice.retry().await, Err(ChatError::InvalidArgument(_))));
    alice.open("bob").await.unwrap();
    assert!(matches!(alice.retry().await, Err(ChatError::InvalidArgument(_))));
}

#[tokio::test]
async fn invalid_counterparts_are_rejected_up_front() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");

    assert!(matches!(alice.open("  ").await, Err(ChatError::InvalidArgument(_))));
    assert!(matches!(alice.open("alice").await, Err(ChatError::InvalidArgument(_))));
    assert_eq!(alice.state(), SessionState::Idle);
    assert_eq!(store.probe_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn opening_another_conversation_releases_the_first_channel() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");

    alice.open("bob").await.unwrap();
    let x = alice.conversation_id().unwrap();
    assert_eq!(store.inner.live_channels(&x).await, 1);

    alice.open("carol").await.unwrap();
    let y = alice.conversation_id().unwrap();
    assert_ne!(x, y);
    assert_eq!(store.inner.live_channels(&x).await, 0);
    assert_eq!(store.inner.live_channels(&y).await, 1);
}

#[tokio::test]
async fn own_echo_is_dropped_and_counterpart_messages_arrive_once() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");
    let mut notices = alice.notices();
    alice.open("bob").await.unwrap();
    let cid = alice.conversation_id().unwrap();

    assert!(alice.send("hi").await);
    store
        .inner
        .insert_message(&cid, &UserId::from("bob"), "hey alice")
        .await
        .unwrap();

    // The push feed is ordered, so the echo of "hi" was handled before this.
    let received = next_received(&mut notices).await;
    assert_eq!(received.body, "hey alice");
    assert_eq!(bodies(&alice.messages()), vec!["hi", "hey alice"]);

    // A refresh sees both messages again but adds neither.
    assert_eq!(alice.refresh().await.unwrap(), 0);
    assert_eq!(alice.messages().len(), 2);
}

#[tokio::test]
async fn blank_sends_never_reach_the_store() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");

    assert!(!alice.send("hi").await, "nothing is open yet");
    alice.open("bob").await.unwrap();
    assert!(!alice.send("").await);
    assert!(!alice.send(" \n ").await);

    assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
    assert!(alice.messages().is_empty());
}

#[tokio::test]
async fn failed_send_leaves_the_list_untouched() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");
    alice.open("bob").await.unwrap();
    ScriptedStore::fail_next(&store.fail_inserts, 1);

    let err = alice.try_send("hi").await.unwrap_err();
    assert!(matches!(err, ChatError::SendFailed(_)));
    assert!(alice.messages().is_empty());
    assert_eq!(alice.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn composer_recovers_on_third_attempt() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");
    alice.open("bob").await.unwrap();
    ScriptedStore::fail_next(&store.fail_inserts, 2);

    let mut composer = Composer::new();
    composer.set_draft("hi");
    let start = Instant::now();
    let outcome = composer.submit(&alice).await;

    assert_eq!(outcome, SubmitOutcome::Sent { attempts: 3 });
    assert_eq!(composer.draft(), "");
    assert_eq!(bodies(&alice.messages()), vec!["hi"]);
    assert!(start.elapsed() >= Duration::from_millis(750));
}

#[tokio::test(start_paused = true)]
async fn composer_keeps_draft_after_exhaustion() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");
    alice.open("bob").await.unwrap();
    let mut notices = alice.notices();
    ScriptedStore::fail_next(&store.fail_inserts, 3);

    let mut composer = Composer::new();
    composer.set_draft("hi");
    let outcome = composer.submit(&alice).await;

    assert_eq!(outcome, SubmitOutcome::Failed { attempts: 3 });
    assert_eq!(composer.draft(), "hi");
    assert!(alice.messages().is_empty());
    assert_eq!(store.insert_calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        drain(&mut notices),
        vec![SessionNotice::SendFailed {
            attempts: 3,
            draft: "hi".into()
        }]
    );
}

#[tokio::test]
async fn composer_ignores_blank_drafts() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");
    alice.open("bob").await.unwrap();

    let mut composer = Composer::with_policy(RetryPolicy::new(3, Duration::from_millis(1)));
    composer.set_draft("   ");
    assert_eq!(composer.submit(&alice).await, SubmitOutcome::Empty);
    assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn closed_session_ignores_everything() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");
    alice.open("bob").await.unwrap();
    let cid = alice.conversation_id().unwrap();

    alice.close().await;
    assert_eq!(alice.state(), SessionState::Closed);
    assert!(!alice.has_live_channel().await);
    assert_eq!(store.inner.live_channels(&cid).await, 0);

    assert!(!alice.send("hi").await);
    assert!(matches!(alice.try_send("hi").await, Err(ChatError::SessionClosed)));
    assert!(matches!(alice.open("carol").await, Err(ChatError::SessionClosed)));
    assert!(matches!(alice.refresh().await, Err(ChatError::SessionClosed)));
    assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);

    // Closing twice is harmless.
    alice.close().await;
}

#[tokio::test]
async fn history_failure_falls_back_to_the_local_cache() {
    let store = ScriptedStore::new();
    let cache = Arc::new(LocalCache::open_in_memory().unwrap());

    let first = controller(&store, "alice").with_cache(cache.clone());
    first.open("bob").await.unwrap();
    assert!(first.send("cached hello").await);
    first.close().await;

    ScriptedStore::fail_next(&store.fail_history, 1);
    let second = controller(&store, "alice").with_cache(cache.clone());
    let mut notices = second.notices();
    second.open("bob").await.unwrap();

    assert_eq!(second.state(), SessionState::Ready);
    assert_eq!(bodies(&second.messages()), vec!["cached hello"]);
    assert!(
        drain(&mut notices)
            .iter()
            .any(|n| matches!(n, SessionNotice::HistoryFailed { .. }))
    );
}

#[tokio::test]
async fn pushed_messages_are_written_through_to_the_cache() {
    let store = ScriptedStore::new();
    let cache = Arc::new(LocalCache::open_in_memory().unwrap());
    let alice = controller(&store, "alice").with_cache(cache.clone());
    let mut notices = alice.notices();
    alice.open("bob").await.unwrap();
    let cid = alice.conversation_id().unwrap();

    store
        .inner
        .insert_message(&cid, &UserId::from("bob"), "ping")
        .await
        .unwrap();
    next_received(&mut notices).await;

    let cached = cache.load_bucket(&UserId::from("alice"), &cid).unwrap();
    assert_eq!(bodies(&cached), vec!["ping"]);
}

#[tokio::test]
async fn subscribe_failure_degrades_to_manual_refresh() {
    let store = ScriptedStore::new();
    ScriptedStore::fail_next(&store.fail_subscribes, 1);
    let alice = controller(&store, "alice");
    let mut notices = alice.notices();

    alice.open("bob").await.unwrap();
    assert_eq!(alice.state(), SessionState::Ready);
    assert!(!alice.has_live_channel().await);
    assert!(
        drain(&mut notices)
            .iter()
            .any(|n| matches!(n, SessionNotice::SubscribeFailed { .. }))
    );

    let cid = alice.conversation_id().unwrap();
    store
        .inner
        .insert_message(&cid, &UserId::from("bob"), "are you there?")
        .await
        .unwrap();
    assert!(alice.messages().is_empty());

    assert_eq!(alice.refresh().await.unwrap(), 1);
    assert_eq!(bodies(&alice.messages()), vec!["are you there?"]);
}

#[tokio::test]
async fn cache_actions_need_a_cache() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");

    assert!(matches!(alice.purge_local_cache(), Err(ChatError::Cache(_))));
    assert!(matches!(alice.storage_preferences(), Err(ChatError::Cache(_))));
}

#[tokio::test]
async fn disabling_local_storage_stops_write_through() {
    let store = ScriptedStore::new();
    let cache = Arc::new(LocalCache::open_in_memory().unwrap());
    let alice = controller(&store, "alice").with_cache(cache.clone());

    let mut prefs = alice.storage_preferences().unwrap();
    assert!(prefs.use_local_storage);
    prefs.use_local_storage = false;
    alice.set_storage_preferences(&prefs).unwrap();

    alice.open("bob").await.unwrap();
    assert!(alice.send("not kept").await);

    let cid = alice.conversation_id().unwrap();
    assert!(cache.load_bucket(&UserId::from("alice"), &cid).unwrap().is_empty());
    assert_eq!(alice.purge_local_cache().unwrap().messages_removed, 0);
}

#[tokio::test]
async fn bodies_travel_encrypted_and_arrive_readable() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");
    let mut notices = alice.notices();
    alice.open("bob").await.unwrap();
    let cid = alice.conversation_id().unwrap();

    assert!(alice.send("secret plan").await);
    assert_eq!(bodies(&alice.messages()), vec!["secret plan"]);

    let stored = store.inner.fetch_messages(&cid).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_ne!(stored[0].body, "secret plan");
    assert!(looks_encrypted(&stored[0].body));

    let bob_id = UserId::from("bob");
    let sealed = encrypt("hello alice", &bob_id).unwrap();
    store.inner.insert_message(&cid, &bob_id, &sealed).await.unwrap();
    assert_eq!(next_received(&mut notices).await.body, "hello alice");
    assert_eq!(bodies(&alice.messages()), vec!["secret plan", "hello alice"]);

    // The counterpart reads both from history.
    let bob = controller(&store, "bob");
    bob.open("alice").await.unwrap();
    assert_eq!(bodies(&bob.messages()), vec!["secret plan", "hello alice"]);
}

#[tokio::test]
async fn messages_from_own_identity_elsewhere_are_not_pushed() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");
    let mut notices = alice.notices();
    alice.open("bob").await.unwrap();
    let cid = alice.conversation_id().unwrap();

    // Fresh id, same sender: only the sender filter can drop it.
    store
        .inner
        .insert_message(&cid, &UserId::from("alice"), "from other device")
        .await
        .unwrap();
    store
        .inner
        .insert_message(&cid, &UserId::from("bob"), "hi")
        .await
        .unwrap();

    // Pushes arrive in order, so the first notice would be the own message.
    assert_eq!(next_received(&mut notices).await.body, "hi");
    assert_eq!(bodies(&alice.messages()), vec!["hi"]);
    assert!(
        !drain(&mut notices)
            .iter()
            .any(|n| matches!(n, SessionNotice::MessageReceived(_)))
    );
}

#[tokio::test]
async fn surrounding_whitespace_is_sent_as_typed() {
    let store = ScriptedStore::new();
    let alice = controller(&store, "alice");
    alice.open("bob").await.unwrap();

    let sent = alice.try_send("  indented\n").await.unwrap();
    assert_eq!(sent.body, "  indented\n");
    assert_eq!(bodies(&alice.messages()), vec!["  indented\n"]);
}
