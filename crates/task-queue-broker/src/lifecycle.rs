use crate::rdb::{bump_stat, unix, Rdb};
use crate::{BrokerError, Result};
use chrono::{DateTime, Utc};
use task_queue_core::{keys, TaskMessage};
use task_queue_store::{from_value, Keyspace, Script, ScriptArgs, Value};
use tracing::debug;

// Each script below returns 0 and changes nothing when ARGV[1] is not in
// tq:in_progress, and 1 once the transition is applied.

// KEYS[1] -> tq:in_progress
// KEYS[2] -> tq:processed:<yyyy-mm-dd>
// KEYS[3] -> unique lock, only for unique tasks
// ARGV[1] -> encoded message
// ARGV[2] -> stats expiry unix time
// ARGV[3] -> task id
static DONE: Script = Script::new(
    "done",
    r#"
if redis.call("LREM", KEYS[1], 0, ARGV[1]) == 0 then
  return 0
end
local n = redis.call("INCR", KEYS[2])
if tonumber(n) == 1 then
  redis.call("EXPIREAT", KEYS[2], ARGV[2])
end
if #KEYS == 3 and redis.call("GET", KEYS[3]) == ARGV[3] then
  redis.call("DEL", KEYS[3])
end
return 1
"#,
    run_done,
);

fn run_done(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    if ks.lrem(call.key(0)?, call.arg(0)?)? == 0 {
        return Ok(Value::Int(0));
    }
    bump_stat(ks, call.key(1)?, call.parse(1)?)?;
    if call.keys().len() == 3 {
        let lock = call.key(2)?;
        if ks.get(lock)?.as_deref() == Some(call.arg(2)?) {
            ks.del(lock);
        }
    }
    Ok(Value::Int(1))
}

// KEYS[1] -> tq:in_progress
// KEYS[2] -> tq:queues:<qname>
// KEYS[3] -> tq:queues
// ARGV[1] -> encoded message
// ARGV[2] -> queue name
static REQUEUE: Script = Script::new(
    "requeue",
    r#"
if redis.call("LREM", KEYS[1], 0, ARGV[1]) == 0 then
  return 0
end
redis.call("RPUSH", KEYS[2], ARGV[1])
redis.call("SADD", KEYS[3], ARGV[2])
return 1
"#,
    run_requeue,
);

fn run_requeue(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    let msg = call.arg(0)?;
    if ks.lrem(call.key(0)?, msg)? == 0 {
        return Ok(Value::Int(0));
    }
    ks.rpush(call.key(1)?, msg)?;
    ks.sadd(call.key(2)?, call.arg(1)?)?;
    Ok(Value::Int(1))
}

// KEYS[1] -> tq:in_progress
// KEYS[2] -> tq:retry
// KEYS[3] -> tq:processed:<yyyy-mm-dd>
// KEYS[4] -> tq:failure:<yyyy-mm-dd>
// ARGV[1] -> encoded message to remove
// ARGV[2] -> encoded message to add
// ARGV[3] -> retry-at unix time
// ARGV[4] -> stats expiry unix time
static RETRY: Script = Script::new(
    "retry",
    r#"
if redis.call("LREM", KEYS[1], 0, ARGV[1]) == 0 then
  return 0
end
redis.call("ZADD", KEYS[2], ARGV[3], ARGV[2])
for i = 3, 4 do
  local n = redis.call("INCR", KEYS[i])
  if tonumber(n) == 1 then
    redis.call("EXPIREAT", KEYS[i], ARGV[4])
  end
end
return 1
"#,
    run_retry,
);

fn run_retry(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    let score: f64 = call.parse(2)?;
    let stats_expiry: i64 = call.parse(3)?;

    if ks.lrem(call.key(0)?, call.arg(0)?)? == 0 {
        return Ok(Value::Int(0));
    }
    ks.zadd(call.key(1)?, score, call.arg(1)?)?;
    bump_stat(ks, call.key(2)?, stats_expiry)?;
    bump_stat(ks, call.key(3)?, stats_expiry)?;
    Ok(Value::Int(1))
}

// KEYS[1] -> tq:in_progress
// KEYS[2] -> tq:dead
// KEYS[3] -> tq:processed:<yyyy-mm-dd>
// KEYS[4] -> tq:failure:<yyyy-mm-dd>
// ARGV[1] -> encoded message to remove
// ARGV[2] -> encoded message to add
// ARGV[3] -> current unix time
// ARGV[4] -> dead tasks scored at or below this are dropped
// ARGV[5] -> max number of dead tasks kept
// ARGV[6] -> stats expiry unix time
static KILL: Script = Script::new(
    "kill",
    r#"
if redis.call("LREM", KEYS[1], 0, ARGV[1]) == 0 then
  return 0
end
redis.call("ZADD", KEYS[2], ARGV[3], ARGV[2])
redis.call("ZREMRANGEBYSCORE", KEYS[2], "-inf", ARGV[4])
redis.call("ZREMRANGEBYRANK", KEYS[2], 0, -(math.max(tonumber(ARGV[5]), 1) + 1))
for i = 3, 4 do
  local n = redis.call("INCR", KEYS[i])
  if tonumber(n) == 1 then
    redis.call("EXPIREAT", KEYS[i], ARGV[6])
  end
end
return 1
"#,
    run_kill,
);

fn run_kill(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    let now: f64 = call.parse(2)?;
    let cutoff: f64 = call.parse(3)?;
    let max_dead = call.parse::<i64>(4)?.max(1);
    let stats_expiry: i64 = call.parse(5)?;
    let dead = call.key(1)?;

    if ks.lrem(call.key(0)?, call.arg(0)?)? == 0 {
        return Ok(Value::Int(0));
    }
    ks.zadd(dead, now, call.arg(1)?)?;
    ks.zrem_range_by_score(dead, cutoff)?;
    ks.zrem_range_by_rank(dead, 0, -(max_dead + 1))?;
    bump_stat(ks, call.key(2)?, stats_expiry)?;
    bump_stat(ks, call.key(3)?, stats_expiry)?;
    Ok(Value::Int(1))
}

impl Rdb {
    /// Finish a task: drop it from in-progress, count it, release its lock.
    ///
    /// Like every transition in this module it fails with
    /// `BrokerError::NotInProgress`, and leaves the store untouched, when the
    /// message is no longer claimed.
    ///
    /// The unique lock is only deleted while it still names this task, so a
    /// newer task that took over an expired lock keeps it.
    pub async fn done(&self, msg: &TaskMessage) -> Result<()> {
        let now = Utc::now();
        let mut script_keys = vec![keys::IN_PROGRESS.to_string(), keys::processed_key(now)];
        if let Some(lock) = &msg.unique_key {
            script_keys.push(lock.clone());
        }

        let reply = self
            .run(
                &DONE,
                script_keys,
                vec![msg.encode()?, unix(self.stats_expiry(now)), msg.id.to_string()],
            )
            .await?;
        ensure_applied(msg, &reply)?;

        debug!("Task {} done", msg.id);
        Ok(())
    }

    /// Give a claimed task back to the head of its queue, unchanged
    pub async fn requeue(&self, msg: &TaskMessage) -> Result<()> {
        let reply = self
            .run(
                &REQUEUE,
                vec![
                    keys::IN_PROGRESS.to_string(),
                    keys::queue_key(&msg.queue),
                    keys::ALL_QUEUES.to_string(),
                ],
                vec![msg.encode()?, msg.queue.clone()],
            )
            .await?;
        ensure_applied(msg, &reply)?;

        debug!("Requeued task {} on queue {}", msg.id, msg.queue);
        Ok(())
    }

    /// Move a failed task to the retry set, due at `process_at`.
    ///
    /// The stored copy has `retried` bumped and `error_message` set. Whether
    /// the task still has attempts left is for the caller to decide.
    pub async fn retry(
        &self,
        msg: &TaskMessage,
        process_at: DateTime<Utc>,
        err_msg: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let updated = msg.retried_with(err_msg);

        let reply = self
            .run(
                &RETRY,
                vec![
                    keys::IN_PROGRESS.to_string(),
                    keys::RETRY.to_string(),
                    keys::processed_key(now),
                    keys::failure_key(now),
                ],
                vec![
                    msg.encode()?,
                    updated.encode()?,
                    unix(process_at),
                    unix(self.stats_expiry(now)),
                ],
            )
            .await?;
        ensure_applied(msg, &reply)?;

        debug!(
            "Task {} failed (attempt {}), retrying at {}",
            msg.id, updated.retried, process_at
        );
        Ok(())
    }

    /// Move a failed task to the dead set and trim it.
    ///
    /// Dead tasks older than the configured age are dropped, then only the
    /// newest `max_dead_tasks` are kept. The task being killed always stays,
    /// even with a cap of zero.
    pub async fn kill(&self, msg: &TaskMessage, err_msg: &str) -> Result<()> {
        let now = Utc::now();
        let updated = msg.killed_with(err_msg);
        let cutoff = now - self.config().dead_task_max_age();

        let reply = self
            .run(
                &KILL,
                vec![
                    keys::IN_PROGRESS.to_string(),
                    keys::DEAD.to_string(),
                    keys::processed_key(now),
                    keys::failure_key(now),
                ],
                vec![
                    msg.encode()?,
                    updated.encode()?,
                    unix(now),
                    unix(cutoff),
                    self.config().max_dead_tasks.max(1).to_string(),
                    unix(self.stats_expiry(now)),
                ],
            )
            .await?;
        ensure_applied(msg, &reply)?;

        debug!("Task {} killed: {}", msg.id, err_msg);
        Ok(())
    }
}

/// Map a transition script's 0 reply to `NotInProgress`
fn ensure_applied(msg: &TaskMessage, reply: &Value) -> Result<()> {
    if from_value::<i64>(reply)? == 0 {
        return Err(BrokerError::NotInProgress(msg.id.to_string()));
    }
    Ok(())
}
