use crate::queue::lock_key;
use crate::rdb::{queue_of, ttl_millis, unix, Rdb};
use crate::{BrokerError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use task_queue_core::{keys, TaskMessage};
use task_queue_store::{from_value, Keyspace, Script, ScriptArgs, Value};
use tracing::{debug, info, warn};

// KEYS[1] -> tq:scheduled
// ARGV[1] -> process-at unix time
// ARGV[2] -> encoded message
static SCHEDULE: Script = Script::new(
    "schedule",
    r#"
redis.call("ZADD", KEYS[1], ARGV[1], ARGV[2])
return 1
"#,
    run_schedule,
);

fn run_schedule(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    ks.zadd(call.key(0)?, call.parse(0)?, call.arg(1)?)?;
    Ok(Value::Int(1))
}

// KEYS[1] -> unique lock
// KEYS[2] -> tq:scheduled
// ARGV[1] -> task id
// ARGV[2] -> lock TTL in milliseconds
// ARGV[3] -> process-at unix time
// ARGV[4] -> encoded message
static SCHEDULE_UNIQUE: Script = Script::new(
    "schedule_unique",
    r#"
local ok = redis.call("SET", KEYS[1], ARGV[1], "NX", "PX", ARGV[2])
if not ok then
  return 0
end
redis.call("ZADD", KEYS[2], ARGV[3], ARGV[4])
return 1
"#,
    run_schedule_unique,
);

fn run_schedule_unique(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    let ttl = Duration::from_millis(call.parse(1)?);
    let score: f64 = call.parse(2)?;
    if !ks.set_nx(call.key(0)?, call.arg(0)?, Some(ttl)) {
        return Ok(Value::Int(0));
    }
    ks.zadd(call.key(1)?, score, call.arg(3)?)?;
    Ok(Value::Int(1))
}

// KEYS[1] -> tq:scheduled or tq:retry
// KEYS[2] -> tq:queues
// ARGV[1] -> current unix time
// ARGV[2] -> queue key prefix
static FORWARD: Script = Script::new(
    "forward",
    r#"
local msgs = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1])
local moved = 0
for _, msg in ipairs(msgs) do
  if redis.call("ZREM", KEYS[1], msg) == 1 then
    local qname = cjson.decode(msg)["queue"]
    redis.call("LPUSH", ARGV[2] .. qname, msg)
    redis.call("SADD", KEYS[2], qname)
    moved = moved + 1
  end
end
return moved
"#,
    run_forward,
);

fn run_forward(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    let delayed = call.key(0)?;
    let all_queues = call.key(1)?;
    let now: f64 = call.parse(0)?;
    let prefix = call.arg(1)?;

    let mut moved = 0;
    for msg in ks.zrange_by_score(delayed, now)? {
        if ks.zrem(delayed, &msg)? {
            let queue = queue_of(call, &msg)?;
            ks.lpush(&format!("{}{}", prefix, queue), &msg)?;
            ks.sadd(all_queues, &queue)?;
            moved += 1;
        }
    }
    Ok(Value::Int(moved))
}

impl Rdb {
    /// Hold a task in the scheduled set until `process_at`
    pub async fn schedule(&self, msg: &TaskMessage, process_at: DateTime<Utc>) -> Result<()> {
        let data = msg.encode()?;
        self.run(
            &SCHEDULE,
            vec![keys::SCHEDULED.to_string()],
            vec![unix(process_at), data],
        )
        .await?;

        debug!("Scheduled task {} for {}", msg.id, process_at);
        Ok(())
    }

    /// Schedule a task unless another task holds its unique key
    pub async fn schedule_unique(
        &self,
        msg: &TaskMessage,
        process_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<()> {
        let lock = lock_key(msg)?;
        let data = msg.encode()?;
        let reply = self
            .run(
                &SCHEDULE_UNIQUE,
                vec![lock.to_string(), keys::SCHEDULED.to_string()],
                vec![msg.id.to_string(), ttl_millis(ttl), unix(process_at), data],
            )
            .await?;

        if from_value::<i64>(&reply)? == 0 {
            warn!("Rejected duplicate scheduled task {} with unique key {}", msg.id, lock);
            return Err(BrokerError::DuplicateTask(lock.to_string()));
        }

        debug!("Scheduled unique task {} for {}", msg.id, process_at);
        Ok(())
    }

    /// Move every due scheduled and retry task onto its recorded queue.
    ///
    /// Each task is moved by its own atomic step, so concurrent callers never
    /// promote a task twice. `queues` is only reported in logs; tasks always
    /// go to the queue they were created for. Returns how many were moved.
    pub async fn check_and_enqueue<S: AsRef<str>>(&self, queues: &[S]) -> Result<usize> {
        let now = unix(Utc::now());
        let mut promoted = 0;

        for delayed in [keys::SCHEDULED, keys::RETRY] {
            let reply = self
                .run(
                    &FORWARD,
                    vec![delayed.to_string(), keys::ALL_QUEUES.to_string()],
                    vec![now.clone(), keys::QUEUE_PREFIX.to_string()],
                )
                .await?;
            promoted += from_value::<usize>(&reply)?;
        }

        if promoted > 0 {
            let served: Vec<&str> = queues.iter().map(|q| q.as_ref()).collect();
            info!("Promoted {} due tasks (serving queues {:?})", promoted, served);
        }
        Ok(promoted)
    }
}
