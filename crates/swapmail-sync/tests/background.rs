//! Background view loops against a shared store.
//!
//! Uses short poll intervals and real threads; every wait is bounded.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use common::{client, context, direct, setup};
use swapmail_core::{
    Message, MessageId, ReadReceipt, Result, SyncSettings, ThreadKey, ThreadSummary, UserId,
};
use swapmail_store::MessageStore;
use swapmail_sync::{
    AppendRequest, InlineExecutor, LocalTransport, RenderedEntry, SyncContext, SyncTransport,
    ViewSnapshot, WorkerExecutor,
};

/// Transport whose first list call does not return until released.
struct StallingTransport {
    inner: LocalTransport,
    lists: AtomicU32,
    released: AtomicBool,
}

impl StallingTransport {
    fn new(store: Arc<MessageStore>) -> Self {
        Self {
            inner: LocalTransport::new(store),
            lists: AtomicU32::new(0),
            released: AtomicBool::new(false),
        }
    }

    fn lists(&self) -> u32 {
        self.lists.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl SyncTransport for StallingTransport {
    fn list(&self, key: &ThreadKey) -> Result<Vec<Message>> {
        if self.lists.fetch_add(1, Ordering::SeqCst) == 0 {
            while !self.released.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        }
        self.inner.list(key)
    }

    fn append(&self, request: &AppendRequest) -> Result<Message> {
        self.inner.append(request)
    }

    fn mark_read(&self, message_id: MessageId, reader: &UserId) -> Result<ReadReceipt> {
        self.inner.mark_read(message_id, reader)
    }

    fn inbox(&self, user: &UserId) -> Result<Vec<ThreadSummary>> {
        self.inner.inbox(user)
    }

    fn unread_count(&self, user: &UserId) -> Result<usize> {
        self.inner.unread_count(user)
    }
}

fn wait_for(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

fn confirmed(snapshot: &ViewSnapshot) -> Vec<(String, bool)> {
    snapshot
        .entries
        .iter()
        .filter_map(|e| match e {
            RenderedEntry::Confirmed(m) => Some((m.content.clone(), m.is_read)),
            RenderedEntry::Pending(_) => None,
        })
        .collect()
}

#[test]
fn two_live_views_converge() {
    let (store, transport) = setup();
    let executor = Arc::new(WorkerExecutor::spawn("swapmail-worker").expect("spawn worker"));
    let settings = SyncSettings::default().with_poll_interval(Duration::from_millis(50));
    let ctx = context(&transport, executor, settings);
    let alice = client("u1", &ctx);
    let bob = client("u2", &ctx);

    let mut alice_view = alice.open_thread(direct("u1", "u2"), None).unwrap();
    let mut bob_view = bob.open_thread(direct("u1", "u2"), None).unwrap();
    alice_view.start().unwrap();
    bob_view.start().unwrap();
    assert!(alice_view.is_running());

    alice.send_message(&"u2".into(), None, "Hello").unwrap();

    assert!(
        wait_for(Duration::from_secs(5), || {
            confirmed(&bob_view.snapshot()) == vec![("Hello".to_string(), true)]
        }),
        "bob never saw the message as read: {:?}",
        bob_view.snapshot()
    );
    assert!(
        wait_for(Duration::from_secs(5), || {
            confirmed(&alice_view.snapshot()) == vec![("Hello".to_string(), true)]
        }),
        "alice never saw the receipt: {:?}",
        alice_view.snapshot()
    );
    assert_eq!(alice_view.snapshot().pending(), 0);
    assert_eq!(store.message_count(), 1);

    alice_view.stop();
    alice_view.stop();
    bob_view.signal_stop();
    bob_view.join();
    assert!(!alice_view.is_running());
}

#[test]
fn dropping_handle_stops_loop() {
    let (_store, transport) = setup();
    let settings = SyncSettings::default().with_poll_interval(Duration::from_millis(20));
    let ctx = context(&transport, Arc::new(InlineExecutor), settings);
    let alice = client("u1", &ctx);

    let started = Instant::now();
    {
        let mut view = alice.open_thread(direct("u1", "u2"), None).unwrap();
        view.start().unwrap();
        thread::sleep(Duration::from_millis(60));
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    // With no view left, sends go out detached.
    let entry = alice.send_message(&"u2".into(), None, "after close").unwrap();
    assert_eq!(entry.content, "after close");
}

#[test]
fn hung_poll_neither_blocks_later_polls_nor_stop() {
    let store = Arc::new(MessageStore::in_memory());
    let transport = Arc::new(StallingTransport::new(Arc::clone(&store)));
    // Supersession follows at twice the interval.
    let settings = SyncSettings::default().with_poll_interval(Duration::from_millis(50));
    let ctx = SyncContext::new(
        Arc::clone(&transport) as Arc<dyn SyncTransport>,
        Arc::new(InlineExecutor),
        settings,
    );
    let alice = client("u1", &ctx);
    let bob = client("u2", &ctx);
    alice.send_now(&"u2".into(), None, "Hello").unwrap();

    let mut view = bob.open_thread(direct("u1", "u2"), None).unwrap();
    view.start().unwrap();

    assert!(
        wait_for(Duration::from_secs(5), || transport.lists() >= 2),
        "no poll after the hung one: {} list calls",
        transport.lists()
    );
    assert!(
        wait_for(Duration::from_secs(5), || {
            confirmed(&view.snapshot()) == vec![("Hello".to_string(), true)]
        }),
        "view never caught up: {:?}",
        view.snapshot()
    );

    let stopping = Instant::now();
    view.stop();
    assert!(
        stopping.elapsed() < Duration::from_millis(500),
        "stop waited {:?}",
        stopping.elapsed()
    );
    assert!(!view.is_running());

    // The late answer to the abandoned request changes nothing.
    transport.release();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(confirmed(&view.snapshot()).len(), 1);
}
