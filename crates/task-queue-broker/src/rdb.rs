use crate::{RdbConfig, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use task_queue_store::{Keyspace, Script, ScriptArgs, Store, Value};

/// Client of the shared store holding all broker state.
///
/// `Rdb` keeps no state of its own between calls: every operation is one
/// atomic script run by the store, so any number of processes can share
/// the same keyspace through their own `Rdb`.
#[derive(Clone)]
pub struct Rdb {
    store: Arc<dyn Store>,
    config: RdbConfig,
}

impl Rdb {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, RdbConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: RdbConfig) -> Self {
        Rdb { store, config }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &RdbConfig {
        &self.config
    }

    pub(crate) async fn run(
        &self,
        script: &Script,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> Result<Value> {
        Ok(self.store.eval(script, &keys, &args).await?)
    }

    /// Absolute expiry given to a stats counter created at `now`
    pub(crate) fn stats_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.config.stats_ttl()
    }
}

impl std::fmt::Debug for Rdb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rdb").field("config", &self.config).finish()
    }
}

/// Score and argument form of a point in time
pub(crate) fn unix(at: DateTime<Utc>) -> String {
    at.timestamp().to_string()
}

/// INCR a stats counter, giving it an absolute expiry when it is created
pub(crate) fn bump_stat(ks: &mut Keyspace, key: &str, expire_at: i64) -> task_queue_store::Result<()> {
    if ks.incr(key)? == 1 {
        if let Some(at) = DateTime::from_timestamp(expire_at, 0) {
            ks.expire_at(key, at);
        }
    }
    Ok(())
}

/// Destination queue recorded in an encoded message, like `cjson.decode(msg)["queue"]`
pub(crate) fn queue_of(call: &ScriptArgs<'_>, msg: &str) -> task_queue_store::Result<String> {
    #[derive(Deserialize)]
    struct Route {
        queue: String,
    }

    serde_json::from_str::<Route>(msg)
        .map(|r| r.queue)
        .map_err(|e| call.fail(format!("cannot decode message: {}", e)))
}

pub(crate) fn ok() -> task_queue_store::Result<Value> {
    Ok(Value::Okay)
}

pub(crate) fn bulk(data: String) -> Value {
    Value::Data(data.into_bytes())
}

/// Lock TTL in milliseconds, as `SET ... PX` expects; never zero
pub(crate) fn ttl_millis(ttl: std::time::Duration) -> String {
    ttl.as_millis().max(1).to_string()
}
