use crate::rdb::{ok, ttl_millis, unix, Rdb};
use crate::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use task_queue_core::{keys, ServerState, TaskError};
use task_queue_store::{Keyspace, Script, ScriptArgs, Value};
use tracing::debug;

// KEYS[1] -> tq:servers:{<host:pid:sid>}
// KEYS[2] -> tq:workers:{<host:pid:sid>}
// KEYS[3] -> tq:servers
// KEYS[4] -> tq:workers
// ARGV[1] -> TTL in milliseconds
// ARGV[2] -> expiry unix time
// ARGV[3] -> index entries scored at or below this are stale
// ARGV[4] -> encoded server info
// ARGV[5..] -> task id, encoded worker info pairs
static WRITE_SERVER_STATE: Script = Script::new(
    "write_server_state",
    r#"
redis.call("SET", KEYS[1], ARGV[4], "PX", ARGV[1])
redis.call("ZREMRANGEBYSCORE", KEYS[3], "-inf", ARGV[3])
redis.call("ZADD", KEYS[3], ARGV[2], KEYS[1])
redis.call("DEL", KEYS[2])
for i = 5, #ARGV, 2 do
  redis.call("HSET", KEYS[2], ARGV[i], ARGV[i + 1])
end
redis.call("PEXPIRE", KEYS[2], ARGV[1])
redis.call("ZREMRANGEBYSCORE", KEYS[4], "-inf", ARGV[3])
redis.call("ZADD", KEYS[4], ARGV[2], KEYS[2])
return redis.status_reply("OK")
"#,
    run_write_server_state,
);

fn run_write_server_state(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    let server_key = call.key(0)?;
    let workers_key = call.key(1)?;
    let all_servers = call.key(2)?;
    let all_workers = call.key(3)?;
    let ttl = Duration::from_millis(call.parse(0)?);
    let expiry: f64 = call.parse(1)?;
    let stale: f64 = call.parse(2)?;

    let workers = call.args().get(4..).unwrap_or_default();
    if workers.len() % 2 != 0 {
        return Err(call.fail("worker entries must come in pairs"));
    }

    ks.set(server_key, call.arg(3)?, Some(ttl));
    ks.zrem_range_by_score(all_servers, stale)?;
    ks.zadd(all_servers, expiry, server_key)?;
    ks.del(workers_key);
    for pair in workers.chunks(2) {
        ks.hset(workers_key, &pair[0], &pair[1])?;
    }
    ks.expire(workers_key, ttl);
    ks.zrem_range_by_score(all_workers, stale)?;
    ks.zadd(all_workers, expiry, workers_key)?;
    ok()
}

// KEYS[1] -> tq:servers:{<host:pid:sid>}
// KEYS[2] -> tq:workers:{<host:pid:sid>}
// KEYS[3] -> tq:servers
// KEYS[4] -> tq:workers
static CLEAR_SERVER_STATE: Script = Script::new(
    "clear_server_state",
    r#"
redis.call("DEL", KEYS[1])
redis.call("DEL", KEYS[2])
redis.call("ZREM", KEYS[3], KEYS[1])
redis.call("ZREM", KEYS[4], KEYS[2])
return redis.status_reply("OK")
"#,
    run_clear_server_state,
);

fn run_clear_server_state(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    let server_key = call.key(0)?;
    let workers_key = call.key(1)?;

    ks.del(server_key);
    ks.del(workers_key);
    ks.zrem(call.key(2)?, server_key)?;
    ks.zrem(call.key(3)?, workers_key)?;
    ok()
}

fn expiry_of(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn server_keys(state: &ServerState) -> Vec<String> {
    vec![
        state.server_key(),
        state.workers_key(),
        keys::ALL_SERVERS.to_string(),
        keys::ALL_WORKERS.to_string(),
    ]
}

impl Rdb {
    /// Publish a heartbeat of `state` and its active workers, both living for `ttl`.
    ///
    /// Each call replaces the previous snapshot, and stale entries of
    /// processes that stopped heartbeating are pruned from the indexes.
    pub async fn write_server_state(&self, state: &ServerState, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        let workers = state.workers();

        let mut args = Vec::with_capacity(4 + workers.len() * 2);
        args.push(ttl_millis(ttl));
        args.push(unix(expiry_of(now, ttl)));
        args.push((now.timestamp() - 1).to_string());
        args.push(serde_json::to_string(&state.info()).map_err(TaskError::from)?);
        for worker in &workers {
            args.push(worker.id.to_string());
            args.push(serde_json::to_string(worker).map_err(TaskError::from)?);
        }

        self.run(&WRITE_SERVER_STATE, server_keys(state), args).await?;

        debug!(
            "Wrote state of server {} with {} active workers",
            state.server_id(),
            workers.len()
        );
        Ok(())
    }

    /// Remove this server's heartbeat records. Calling it again is a no-op.
    pub async fn clear_server_state(&self, state: &ServerState) -> Result<()> {
        self.run(&CLEAR_SERVER_STATE, server_keys(state), Vec::new()).await?;

        debug!("Cleared state of server {}", state.server_id());
        Ok(())
    }
}
