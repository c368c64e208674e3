//! Storage adapter for the task broker.
//!
//! The broker talks to its backing store only through [`Store`]: atomic
//! scripts plus pub/sub. [`RedisStore`] is the production backend and
//! [`MemoryStore`] runs the same scripts in process.

mod error;
mod keyspace;
mod memory;
mod redis_store;
mod script;
mod subscription;

pub use error::{Result, StoreError};
pub use keyspace::Keyspace;
pub use memory::MemoryStore;
pub use redis::{FromRedisValue, Value};
pub use redis_store::RedisStore;
pub use script::{NativeFn, Script, ScriptArgs};
pub use subscription::{Subscription, SubscriptionCloser};

use async_trait::async_trait;

/// Convert a script reply into a Rust value
pub fn from_value<T: FromRedisValue>(value: &Value) -> Result<T> {
    Ok(redis::from_redis_value(value)?)
}

/// A backing store able to run scripts atomically and relay pub/sub messages
#[async_trait]
pub trait Store: Send + Sync {
    /// Run `script` as one atomic unit over `keys` and `args`
    async fn eval(&self, script: &Script, keys: &[String], args: &[String]) -> Result<Value>;

    /// Publish `message` on `channel`, returning how many subscribers got it
    async fn publish(&self, channel: &str, message: &str) -> Result<usize>;

    /// Subscribe to `channel`; the subscription is active once this returns
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}
