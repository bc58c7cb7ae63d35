use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use contactlog::{
    contact::Contact,
    core::store::ContactStore,
    persist::{ContactSink, PersistError, PersistResult},
    runtime::{
        events::ContactEvent,
        handle::{ContactStoreHandle, RuntimeConfig, RuntimeError, spawn_contact_store},
        wait::WakeReason,
    },
};

fn al() -> Contact {
    Contact::new("Al", "a@x.com", "hi")
}

#[derive(Clone, Default)]
struct MemorySink {
    writes: Arc<Mutex<Vec<String>>>,
}

impl ContactSink for MemorySink {
    fn load(&self) -> PersistResult<Option<Vec<Contact>>> {
        Ok(None)
    }

    fn write_all(&mut self, json: &str) -> PersistResult<()> {
        self.writes.lock().expect("lock").push(json.to_string());
        Ok(())
    }
}

struct FailingSink;

impl ContactSink for FailingSink {
    fn load(&self) -> PersistResult<Option<Vec<Contact>>> {
        Ok(None)
    }

    fn write_all(&mut self, _json: &str) -> PersistResult<()> {
        Err(PersistError::Message("disk unplugged".to_string()))
    }
}

struct SlowSink {
    delay: Duration,
    writes: Arc<Mutex<Vec<String>>>,
}

impl ContactSink for SlowSink {
    fn load(&self) -> PersistResult<Option<Vec<Contact>>> {
        Ok(None)
    }

    fn write_all(&mut self, json: &str) -> PersistResult<()> {
        std::thread::sleep(self.delay);
        self.writes.lock().expect("lock").push(json.to_string());
        Ok(())
    }
}

fn in_memory() -> ContactStoreHandle {
    spawn_contact_store(
        ContactStore::empty().expect("empty"),
        None,
        RuntimeConfig::default(),
    )
}

async fn until_parked(handle: &ContactStoreHandle, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while handle.pending_waiters().await.expect("pending") < count {
        assert!(Instant::now() < deadline, "waiters never parked");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn store_then_get_all_returns_the_contact() {
    let handle = in_memory();

    let json = handle.store_contact(al()).await.expect("store");

    let expected = r#"[{"name":"Al","email":"a@x.com","message":"hi"}]"#;
    assert_eq!(json, expected);
    assert_eq!(handle.get_all(), expected);
    assert_eq!(handle.get_all(), expected);
    assert_eq!(handle.version(), 2);
}

#[tokio::test]
async fn parked_wait_is_released_by_store() {
    let handle = in_memory();
    let since = handle.version();

    let waiter = handle.clone();
    let started = Instant::now();
    let poll = tokio::spawn(async move {
        waiter
            .wait_for_changes(since, Duration::from_secs(5), &CancellationToken::new())
            .await
    });
    until_parked(&handle, 1).await;

    handle.store_contact(al()).await.expect("store");
    let outcome = poll.await.expect("join").expect("wait");

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome.reason, WakeReason::Changed);
    assert_eq!(outcome.version, since + 1);
    assert_eq!(outcome.json, handle.get_all());
    assert_eq!(handle.pending_waiters().await.expect("pending"), 0);
}

#[tokio::test]
async fn many_waiters_all_see_one_commit() {
    let handle = in_memory();
    let since = handle.version();

    let mut polls = Vec::new();
    for _ in 0..8 {
        let waiter = handle.clone();
        polls.push(tokio::spawn(async move {
            waiter
                .wait_for_changes(since, Duration::from_secs(5), &CancellationToken::new())
                .await
        }));
    }
    until_parked(&handle, 8).await;

    handle.store_contact(al()).await.expect("store");

    for poll in polls {
        let outcome = poll.await.expect("join").expect("wait");
        assert_eq!(outcome.version, since + 1);
        assert_eq!(outcome.reason, WakeReason::Changed);
    }
}

#[tokio::test]
async fn stale_version_returns_without_parking() {
    let handle = in_memory();
    handle.store_contact(al()).await.expect("store");

    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        handle.wait_for_changes(1, Duration::from_secs(30), &CancellationToken::new()),
    )
    .await
    .expect("fast path")
    .expect("wait");

    assert_eq!(outcome.reason, WakeReason::Changed);
    assert_eq!(outcome.version, 2);
    assert_eq!(handle.pending_waiters().await.expect("pending"), 0);
}

#[tokio::test]
async fn wait_times_out_with_unchanged_snapshot() {
    let handle = in_memory();
    let since = handle.version();

    let started = Instant::now();
    let outcome = handle
        .wait_for_changes(since, Duration::from_millis(200), &CancellationToken::new())
        .await
        .expect("wait");

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(outcome.reason, WakeReason::TimedOut);
    assert_eq!(outcome.version, since);
    assert_eq!(outcome.json, "[]");

    let deadline = Instant::now() + Duration::from_secs(2);
    while handle.pending_waiters().await.expect("pending") != 0 {
        assert!(Instant::now() < deadline, "timed-out waiter was not removed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn cancellation_ends_the_wait() {
    let handle = in_memory();
    let cancel = CancellationToken::new();

    let waiter = handle.clone();
    let token = cancel.clone();
    let poll = tokio::spawn(async move {
        waiter
            .wait_for_changes(1, Duration::from_secs(30), &token)
            .await
    });
    until_parked(&handle, 1).await;

    cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(1), poll)
        .await
        .expect("cancelled promptly")
        .expect("join")
        .expect("wait");

    assert_eq!(outcome.reason, WakeReason::Cancelled);
    assert_eq!(outcome.version, 1);
}

#[tokio::test]
async fn already_cancelled_token_returns_immediately() {
    let handle = in_memory();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = handle
        .wait_for_changes(1, Duration::from_secs(30), &cancel)
        .await
        .expect("wait");

    assert_eq!(outcome.reason, WakeReason::Cancelled);
    assert_eq!(handle.pending_waiters().await.expect("pending"), 0);
}

#[tokio::test]
async fn dropped_wait_future_unregisters_its_waiter() {
    let handle = in_memory();

    let waiter = handle.clone();
    let poll = tokio::spawn(async move {
        waiter
            .wait_for_changes(1, Duration::from_secs(30), &CancellationToken::new())
            .await
    });
    until_parked(&handle, 1).await;

    poll.abort();
    let _ = poll.await;

    let deadline = Instant::now() + Duration::from_secs(2);
    while handle.pending_waiters().await.expect("pending") != 0 {
        assert!(Instant::now() < deadline, "abandoned waiter was not removed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let json = handle.store_contact(al()).await.expect("store");
    assert_eq!(json, handle.get_all());
}

#[tokio::test]
async fn persistence_failure_is_reported_but_commit_stands() {
    let handle = spawn_contact_store(
        ContactStore::empty().expect("empty"),
        Some(Box::new(FailingSink)),
        RuntimeConfig::default(),
    );
    let mut events = handle.subscribe();

    let err = handle.store_contact(al()).await.expect_err("sink fails");

    assert!(matches!(err, RuntimeError::Persist(_)));
    assert_eq!(err.to_string(), "could not store contact");
    assert_eq!(handle.version(), 2);
    assert!(handle.get_all().contains("\"Al\""));

    let mut saw_failure = false;
    for _ in 0..4 {
        let evt = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event")
            .expect("recv");
        if let ContactEvent::PersistFailed { version, reason } = evt {
            assert_eq!(version, 2);
            assert!(reason.contains("disk unplugged"));
            saw_failure = true;
            break;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn events_follow_commit_order() {
    let sink = MemorySink::default();
    let writes = Arc::clone(&sink.writes);
    let handle = spawn_contact_store(
        ContactStore::empty().expect("empty"),
        Some(Box::new(sink)),
        RuntimeConfig::default(),
    );
    let mut events = handle.subscribe();

    handle.store_contact(al()).await.expect("store");
    handle
        .store_contact(Contact::new("Bo", "b@x.com", "yo"))
        .await
        .expect("store");

    let mut stored = Vec::new();
    while stored.len() < 2 {
        let evt = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event")
            .expect("recv");
        if let ContactEvent::Stored { version, .. } = evt {
            stored.push(version);
        }
    }
    assert_eq!(stored, vec![2, 3]);

    assert_eq!(handle.flush().await.expect("flush"), 3);
    let writes = writes.lock().expect("lock");
    assert_eq!(writes.last().map(String::as_str), Some(handle.get_all().as_str()));
}

#[tokio::test]
async fn queued_writes_are_coalesced_and_every_caller_answered() {
    let writes = Arc::new(Mutex::new(Vec::new()));
    let handle = spawn_contact_store(
        ContactStore::empty().expect("empty"),
        Some(Box::new(SlowSink {
            delay: Duration::from_millis(50),
            writes: Arc::clone(&writes),
        })),
        RuntimeConfig::default(),
    );

    let mut stores = Vec::new();
    for i in 0..10 {
        let h = handle.clone();
        stores.push(tokio::spawn(async move {
            h.store_contact(Contact::new(format!("N{i}"), "n@x.com", "m")).await
        }));
    }
    for store in stores {
        store.await.expect("join").expect("store");
    }

    assert_eq!(handle.version(), 11);
    assert_eq!(handle.flush().await.expect("flush"), 11);
    let writes = writes.lock().expect("lock");
    assert!(writes.len() <= 10);
    assert_eq!(writes.last().map(String::as_str), Some(handle.get_all().as_str()));
}

#[tokio::test]
async fn full_persist_queue_fails_the_store() {
    let writes = Arc::new(Mutex::new(Vec::new()));
    let handle = spawn_contact_store(
        ContactStore::empty().expect("empty"),
        Some(Box::new(SlowSink {
            delay: Duration::from_millis(300),
            writes,
        })),
        RuntimeConfig {
            persist_queue_bound: 1,
            batch_max_writes: 1,
            ..RuntimeConfig::default()
        },
    );

    let mut stores = Vec::new();
    for i in 0..6 {
        let h = handle.clone();
        stores.push(tokio::spawn(async move {
            h.store_contact(Contact::new(format!("N{i}"), "n@x.com", "m")).await
        }));
    }

    let mut queue_full = 0;
    for store in stores {
        if let Err(RuntimeError::Persist(err)) = store.await.expect("join") {
            assert!(matches!(*err, PersistError::QueueFull));
            queue_full += 1;
        }
    }

    assert!(queue_full > 0);
    assert_eq!(handle.version(), 7);
}

#[tokio::test]
async fn external_change_wakes_waiters() {
    let handle = in_memory();
    let since = handle.version();

    let waiter = handle.clone();
    let poll = tokio::spawn(async move {
        waiter
            .wait_for_changes(since, Duration::from_secs(5), &CancellationToken::new())
            .await
    });
    until_parked(&handle, 1).await;

    let version = handle.apply_external(vec![al()]).await.expect("apply");
    assert_eq!(version, Some(2));
    assert_eq!(handle.apply_external(vec![al()]).await.expect("apply"), None);

    let outcome = poll.await.expect("join").expect("wait");
    assert_eq!(outcome.version, 2);
}

#[tokio::test]
async fn shutdown_stops_the_runtime() {
    let handle = in_memory();
    handle.store_contact(al()).await.expect("store");

    handle.shutdown().await.expect("shutdown");

    let err = handle.store_contact(al()).await.expect_err("stopped");
    assert!(matches!(err, RuntimeError::ChannelClosed));
    assert_eq!(handle.version(), 2);
}

#[tokio::test]
async fn shutdown_releases_parked_waiters_with_an_error() {
    let handle = in_memory();

    let waiter = handle.clone();
    let poll = tokio::spawn(async move {
        waiter
            .wait_for_changes(1, Duration::from_secs(30), &CancellationToken::new())
            .await
    });
    until_parked(&handle, 1).await;

    handle.shutdown().await.expect("shutdown");

    let result = tokio::time::timeout(Duration::from_secs(1), poll)
        .await
        .expect("released promptly")
        .expect("join");
    assert!(matches!(result, Err(RuntimeError::ChannelClosed)));
}

#[tokio::test]
async fn external_list_is_ignored_while_memory_is_ahead_of_the_file() {
    let handle = spawn_contact_store(
        ContactStore::empty().expect("empty"),
        Some(Box::new(FailingSink)),
        RuntimeConfig::default(),
    );

    handle.store_contact(al()).await.expect_err("sink fails");
    assert_eq!(handle.version(), 2);
    assert_eq!(handle.durable_version(), 1);

    // the file still holds the empty list it started with
    let folded = handle.apply_external(Vec::new()).await.expect("apply");

    assert_eq!(folded, None);
    assert_eq!(handle.version(), 2);
    assert!(handle.get_all().contains("\"Al\""));
}

#[tokio::test]
async fn external_list_is_folded_once_writes_have_landed() {
    let sink = MemorySink::default();
    let handle = spawn_contact_store(
        ContactStore::empty().expect("empty"),
        Some(Box::new(sink)),
        RuntimeConfig::default(),
    );

    handle.store_contact(al()).await.expect("store");
    assert_eq!(handle.durable_version(), 2);
    assert_eq!(handle.flush().await.expect("flush"), 2);

    let bo = Contact::new("Bo", "b@x.com", "yo");
    let folded = handle
        .apply_external(vec![al(), bo.clone()])
        .await
        .expect("apply");

    assert_eq!(folded, Some(3));
    assert_eq!(handle.durable_version(), 3);
    assert_eq!(handle.snapshot().contacts(), &[al(), bo]);
}

#[tokio::test]
async fn in_memory_runtime_is_always_durable() {
    let handle = in_memory();

    handle.store_contact(al()).await.expect("store");

    assert_eq!(handle.durable_version(), handle.version());
}
