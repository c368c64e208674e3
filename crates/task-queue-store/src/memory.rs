use crate::{Keyspace, Result, Script, Store, Subscription};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use redis::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct Subscriber {
    tx: mpsc::UnboundedSender<String>,
    token: CancellationToken,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.tx.is_closed()
    }
}

/// Store kept entirely in process memory.
///
/// Every script runs to completion under one lock, so concurrent callers
/// observe each script as a single atomic step, the way Redis runs them.
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    channels: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            keyspace: Mutex::new(Keyspace::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` against the current keyspace, with expired keys already evicted
    pub fn with_keyspace<R>(&self, f: impl FnOnce(&mut Keyspace) -> R) -> R {
        let mut keyspace = self.keyspace.lock();
        keyspace.tick(Utc::now());
        f(&mut keyspace)
    }

    /// Number of open subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, |subs| subs.iter().filter(|s| s.is_live()).count())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn eval(&self, script: &Script, keys: &[String], args: &[String]) -> Result<Value> {
        trace!(script = script.name(), keys = keys.len(), "Running script");
        self.with_keyspace(|keyspace| script.run_native(keyspace, keys, args))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize> {
        let mut channels = self.channels.lock();
        let Some(subscribers) = channels.get_mut(channel) else {
            return Ok(0);
        };

        subscribers.retain(|s| s.is_live() && s.tx.send(message.to_string()).is_ok());
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                tx,
                token: token.clone(),
            });

        Ok(Subscription::new(channel, rx, token, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptArgs;
    use std::sync::Arc;

    fn push_and_count(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> Result<Value> {
        let key = call.key(0)?;
        ks.lpush(key, call.arg(0)?)?;
        Ok(Value::Int(ks.llen(key)? as i64))
    }

    static PUSH: Script = Script::new("push", "", push_and_count);

    #[tokio::test]
    async fn test_eval_runs_native_body() {
        let store = MemoryStore::new();
        let keys = vec!["list".to_string()];

        let first = store.eval(&PUSH, &keys, &["a".to_string()]).await.unwrap();
        let second = store.eval(&PUSH, &keys, &["b".to_string()]).await.unwrap();

        assert_eq!(first, Value::Int(1));
        assert_eq!(second, Value::Int(2));
        store.with_keyspace(|ks| assert_eq!(ks.lrange("list").unwrap(), vec!["b", "a"]));
    }

    #[tokio::test]
    async fn test_eval_reports_missing_arguments() {
        let store = MemoryStore::new();
        let err = store.eval(&PUSH, &[], &[]).await.unwrap_err();
        assert!(err.to_string().contains("push"));
    }

    #[tokio::test]
    async fn test_publish_counts_receivers() {
        let store = MemoryStore::new();
        assert_eq!(store.publish("chan", "hello").await.unwrap(), 0);

        let mut first = store.subscribe("chan").await.unwrap();
        let mut second = store.subscribe("chan").await.unwrap();
        assert_eq!(store.publish("chan", "hello").await.unwrap(), 2);
        assert_eq!(first.recv().await.as_deref(), Some("hello"));
        assert_eq!(second.recv().await.as_deref(), Some("hello"));

        drop(second);
        assert_eq!(store.publish("chan", "again").await.unwrap(), 1);
        assert_eq!(store.subscriber_count("chan"), 1);
    }

    #[tokio::test]
    async fn test_closer_ends_pending_recv() {
        let store = Arc::new(MemoryStore::new());
        let mut sub = store.subscribe("chan").await.unwrap();
        let closer = sub.closer();

        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        closer.close();

        assert_eq!(waiter.await.unwrap(), None);
        assert_eq!(store.publish("chan", "late").await.unwrap(), 0);
    }
}
