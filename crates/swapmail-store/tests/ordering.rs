//! Ordering and durability tests for the message store under concurrent load.
//!
//! - Concurrent writers on one thread never produce out-of-order logs
//! - Readers racing writers only ever see fully ordered prefixes
//! - A reopened journal reproduces the same logs, ids and read flags

#![allow(clippy::cast_possible_truncation)]

use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;
use swapmail_core::{Message, MessageId, ProjectId, ThreadKey, UserId, resolve};
use swapmail_store::MessageStore;

fn u(s: &str) -> UserId {
    UserId::from(s)
}

fn direct(a: &str, b: &str) -> ThreadKey {
    resolve(None, Some(&u(a)), Some(&u(b))).expect("valid pair")
}

fn assert_ordered(messages: &[Message]) {
    for pair in messages.windows(2) {
        assert!(
            pair[0].order_key() < pair[1].order_key(),
            "out of order: {:?} then {:?}",
            pair[0].order_key(),
            pair[1].order_key()
        );
    }
}

#[test]
fn concurrent_appends_stay_totally_ordered() {
    const WRITERS: usize = 8;
    const PER_WRITER: usize = 50;

    let store = Arc::new(MessageStore::in_memory());
    let barrier = Arc::new(Barrier::new(WRITERS + 1));

    let mut handles = Vec::new();
    for w in 0..WRITERS {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let (from, to) = if w % 2 == 0 { ("u1", "u2") } else { ("u2", "u1") };
            for i in 0..PER_WRITER {
                store
                    .append(&u(from), &u(to), None, &format!("w{w}-{i}"))
                    .expect("append");
            }
        }));
    }

    let reader = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let key = direct("u1", "u2");
            let mut last_len = 0;
            while last_len < WRITERS * PER_WRITER {
                let snapshot = store.list(&key);
                assert!(snapshot.len() >= last_len, "snapshot shrank");
                assert_ordered(&snapshot);
                last_len = snapshot.len();
                thread::yield_now();
            }
        })
    };

    for h in handles {
        h.join().expect("writer");
    }
    reader.join().expect("reader");

    let all = store.list(&direct("u2", "u1"));
    assert_eq!(all.len(), WRITERS * PER_WRITER);
    assert_ordered(&all);

    let mut ids: Vec<MessageId> = all.iter().map(|m| m.id).collect();
    ids.dedup();
    assert_eq!(ids.len(), WRITERS * PER_WRITER, "duplicate ids assigned");
}

#[test]
fn independent_threads_do_not_interfere() {
    let store = Arc::new(MessageStore::in_memory());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let project = ProjectId::from(format!("p{t}").as_str());
                for i in 0..25 {
                    store
                        .append(&u("buyer"), &u("seller"), Some(&project), &format!("{i}"))
                        .expect("append");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer");
    }
    for t in 0..4 {
        let key = resolve(Some(&ProjectId::from(format!("p{t}").as_str())), None, None).unwrap();
        let log = store.list(&key);
        assert_eq!(log.len(), 25);
        assert_ordered(&log);
        let contents: Vec<&str> = log.iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
        assert_eq!(contents, expected);
    }
}

#[test]
fn append_then_list_contains_exactly_one_copy() {
    let store = MessageStore::in_memory();
    let project = ProjectId::from("swap-42");
    store
        .append(&u("u1"), &u("u2"), Some(&project), "earlier")
        .unwrap();
    let appended = store
        .append(&u("u1"), &u("u2"), Some(&project), "Is the bike still available?")
        .unwrap();

    let key = resolve(Some(&project), None, None).unwrap();
    let matching: Vec<_> = store
        .list(&key)
        .into_iter()
        .filter(|m| {
            m.sender_id == u("u1")
                && m.content == "Is the bike still available?"
                && m.project_id.as_ref() == Some(&project)
        })
        .collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].id, appended.id);
}

#[test]
fn journal_replay_restores_logs_and_sequence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("messages.jsonl");

    let (first_id, before) = {
        let store = MessageStore::open(&path, true).expect("open");
        let m1 = store.append(&u("u1"), &u("u2"), None, "Hello").unwrap();
        store.append(&u("u2"), &u("u1"), None, "Hi!").unwrap();
        store.mark_read(m1.id, &u("u2")).unwrap();
        (m1.id, store.list(&direct("u1", "u2")))
    };

    let store = MessageStore::open(&path, false).expect("reopen");
    let after = store.list(&direct("u1", "u2"));
    assert_eq!(before, after);
    assert!(store.get(first_id).unwrap().is_read);

    let next = store.append(&u("u1"), &u("u2"), None, "after restart").unwrap();
    assert_eq!(next.id, MessageId::new(3));
    assert!(next.created_at > after[1].created_at);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_append_sequence_lists_in_order(
        ops in proptest::collection::vec((any::<bool>(), "[a-z ]{1,16}"), 1..40)
    ) {
        let store = MessageStore::in_memory();
        for (forward, content) in &ops {
            let (from, to) = if *forward { ("a", "b") } else { ("b", "a") };
            if content.trim().is_empty() {
                prop_assert!(store.append(&u(from), &u(to), None, content).is_err());
            } else {
                store.append(&u(from), &u(to), None, content).unwrap();
            }
        }
        let listed = store.list(&direct("a", "b"));
        let expected = ops.iter().filter(|(_, c)| !c.trim().is_empty()).count();
        prop_assert_eq!(listed.len(), expected);
        for pair in listed.windows(2) {
            prop_assert!(pair[0].order_key() < pair[1].order_key());
        }
    }
}
