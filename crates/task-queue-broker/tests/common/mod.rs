// Shared fixtures for the broker integration tests
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use task_queue_broker::{Rdb, RdbConfig};
use task_queue_core::{keys, Payload, TaskMessage};
use task_queue_store::MemoryStore;

pub fn setup() -> (Arc<MemoryStore>, Rdb) {
    setup_with_config(RdbConfig::default())
}

pub fn setup_with_config(config: RdbConfig) -> (Arc<MemoryStore>, Rdb) {
    let store = Arc::new(MemoryStore::new());
    let rdb = Rdb::with_config(store.clone(), config);
    (store, rdb)
}

pub fn task(task_type: &str) -> TaskMessage {
    TaskMessage::new(task_type, Payload::new().with("user_id", 42))
}

pub fn task_on(task_type: &str, queue: &str) -> TaskMessage {
    task(task_type).queue(queue)
}

/// Seed `queue` so that `msgs[0]` is the next one dequeued
pub fn seed_queue(store: &MemoryStore, queue: &str, msgs: &[&TaskMessage]) {
    store.with_keyspace(|ks| {
        for msg in msgs {
            ks.lpush(&keys::queue_key(queue), &msg.encode().unwrap()).unwrap();
        }
        ks.sadd(keys::ALL_QUEUES, queue).unwrap();
    });
}

pub fn seed_in_progress(store: &MemoryStore, msgs: &[&TaskMessage]) {
    store.with_keyspace(|ks| {
        for msg in msgs {
            ks.lpush(keys::IN_PROGRESS, &msg.encode().unwrap()).unwrap();
        }
    });
}

pub fn seed_zset(store: &MemoryStore, key: &str, entries: &[(&TaskMessage, DateTime<Utc>)]) {
    store.with_keyspace(|ks| {
        for (msg, at) in entries {
            ks.zadd(key, at.timestamp() as f64, &msg.encode().unwrap()).unwrap();
        }
    });
}

fn decode_all(raw: Vec<String>) -> Vec<TaskMessage> {
    raw.iter().map(|m| TaskMessage::decode(m).unwrap()).collect()
}

/// Pending tasks of `queue`, next-to-dequeue first
pub fn queue_contents(store: &MemoryStore, queue: &str) -> Vec<TaskMessage> {
    let mut msgs = decode_all(store.with_keyspace(|ks| ks.lrange(&keys::queue_key(queue)).unwrap()));
    msgs.reverse();
    msgs
}

pub fn in_progress(store: &MemoryStore) -> Vec<TaskMessage> {
    decode_all(store.with_keyspace(|ks| ks.lrange(keys::IN_PROGRESS).unwrap()))
}

/// Entries of a sorted set with their scores, lowest first
pub fn zset_contents(store: &MemoryStore, key: &str) -> Vec<(TaskMessage, i64)> {
    store.with_keyspace(|ks| ks.zrange_with_scores(key).unwrap())
        .into_iter()
        .map(|(m, score)| (TaskMessage::decode(&m).unwrap(), score as i64))
        .collect()
}

pub fn counter(store: &MemoryStore, key: &str) -> Option<i64> {
    store
        .with_keyspace(|ks| ks.get(key).unwrap())
        .map(|v| v.parse().unwrap())
}

pub fn ttl(store: &MemoryStore, key: &str) -> Option<Duration> {
    store.with_keyspace(|ks| ks.ttl(key))
}

/// `actual` is at most `expected` and trails it by less than two seconds,
/// allowing for expiries stored with whole-second precision
pub fn assert_ttl_close(actual: Option<Duration>, expected: Duration) {
    let actual = actual.expect("key has no TTL");
    assert!(
        actual <= expected && actual + Duration::from_secs(2) >= expected,
        "TTL {:?} not within 2s of {:?}",
        actual,
        expected
    );
}

pub fn assert_ids(msgs: &[TaskMessage], expected: &[&TaskMessage]) {
    let got: Vec<_> = msgs.iter().map(|m| m.id).collect();
    let want: Vec<_> = expected.iter().map(|m| m.id).collect();
    assert_eq!(got, want);
}
