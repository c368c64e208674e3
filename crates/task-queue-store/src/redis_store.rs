use crate::{Result, Script, Store, Subscription};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Store backed by a Redis server.
///
/// Scripts are loaded lazily and invoked by SHA, falling back to a full
/// EVAL when the server does not know the script yet.
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    scripts: DashMap<&'static str, redis::Script>,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        info!("Connected to Redis");

        Ok(RedisStore {
            client,
            conn,
            scripts: DashMap::new(),
        })
    }

    fn compiled(&self, script: &Script) -> redis::Script {
        self.scripts
            .entry(script.name())
            .or_insert_with(|| redis::Script::new(script.source()))
            .clone()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn eval(&self, script: &Script, keys: &[String], args: &[String]) -> Result<Value> {
        let compiled = self.compiled(script);
        let mut invocation = compiled.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        let mut conn = self.conn.clone();
        let value: Value = invocation.invoke_async(&mut conn).await?;
        Ok(value)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(channel, message).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(channel).await?;
        debug!("Subscribed to {}", channel);

        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let name = channel.to_string();

        let forwarder = tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    msg = messages.next() => {
                        let Some(msg) = msg else {
                            warn!("Pub/sub connection for {} closed", name);
                            cancelled.cancel();
                            break;
                        };
                        match msg.get_payload::<String>() {
                            Ok(payload) => {
                                if tx.send(payload).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Dropping undecodable message on {}: {}", name, e),
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(channel, rx, token, Some(forwarder)))
    }
}
