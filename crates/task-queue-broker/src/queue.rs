use crate::rdb::{bulk, ttl_millis, Rdb};
use crate::{BrokerError, Result};
use std::time::Duration;
use task_queue_core::{keys, TaskError, TaskMessage};
use task_queue_store::{from_value, Keyspace, Script, ScriptArgs, Value};
use tracing::{debug, warn};

// KEYS[1] -> tq:queues:<qname>
// KEYS[2] -> tq:queues
// ARGV[1] -> encoded message
// ARGV[2] -> queue name
static ENQUEUE: Script = Script::new(
    "enqueue",
    r#"
redis.call("LPUSH", KEYS[1], ARGV[1])
redis.call("SADD", KEYS[2], ARGV[2])
return 1
"#,
    run_enqueue,
);

fn run_enqueue(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    ks.lpush(call.key(0)?, call.arg(0)?)?;
    ks.sadd(call.key(1)?, call.arg(1)?)?;
    Ok(Value::Int(1))
}

// KEYS[1] -> unique lock
// KEYS[2] -> tq:queues:<qname>
// KEYS[3] -> tq:queues
// ARGV[1] -> task id
// ARGV[2] -> lock TTL in milliseconds
// ARGV[3] -> encoded message
// ARGV[4] -> queue name
static ENQUEUE_UNIQUE: Script = Script::new(
    "enqueue_unique",
    r#"
local ok = redis.call("SET", KEYS[1], ARGV[1], "NX", "PX", ARGV[2])
if not ok then
  return 0
end
redis.call("LPUSH", KEYS[2], ARGV[3])
redis.call("SADD", KEYS[3], ARGV[4])
return 1
"#,
    run_enqueue_unique,
);

fn run_enqueue_unique(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    let ttl = Duration::from_millis(call.parse(1)?);
    if !ks.set_nx(call.key(0)?, call.arg(0)?, Some(ttl)) {
        return Ok(Value::Int(0));
    }
    ks.lpush(call.key(1)?, call.arg(2)?)?;
    ks.sadd(call.key(2)?, call.arg(3)?)?;
    Ok(Value::Int(1))
}

// KEYS[1..N-1] -> tq:queues:<qname>, highest priority first
// KEYS[N]      -> tq:in_progress
static DEQUEUE: Script = Script::new(
    "dequeue",
    r#"
local in_progress = KEYS[#KEYS]
for i = 1, #KEYS - 1 do
  local msg = redis.call("RPOPLPUSH", KEYS[i], in_progress)
  if msg then
    return msg
  end
end
return nil
"#,
    run_dequeue,
);

fn run_dequeue(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    let Some((in_progress, queues)) = call.keys().split_last() else {
        return Err(call.fail("missing in-progress key"));
    };
    for queue in queues {
        if let Some(msg) = ks.rpoplpush(queue, in_progress)? {
            return Ok(bulk(msg));
        }
    }
    Ok(Value::Nil)
}

/// Lock key of a message that must be unique
pub(crate) fn lock_key(msg: &TaskMessage) -> Result<&str> {
    msg.unique_key.as_deref().ok_or_else(|| {
        BrokerError::Task(TaskError::InvalidMessage(format!(
            "task {} has no unique key",
            msg.id
        )))
    })
}

impl Rdb {
    /// Append a task to its queue so that queue stays first-in first-out
    pub async fn enqueue(&self, msg: &TaskMessage) -> Result<()> {
        let data = msg.encode()?;
        self.run(
            &ENQUEUE,
            vec![keys::queue_key(&msg.queue), keys::ALL_QUEUES.to_string()],
            vec![data, msg.queue.clone()],
        )
        .await?;

        debug!("Enqueued task {} on queue {}", msg.id, msg.queue);
        Ok(())
    }

    /// Enqueue a task unless another task holds its unique key.
    ///
    /// The lock is created with `ttl` and names the task id as owner; it is
    /// released by [`Rdb::done`] or expires on its own.
    pub async fn enqueue_unique(&self, msg: &TaskMessage, ttl: Duration) -> Result<()> {
        let lock = lock_key(msg)?;
        let data = msg.encode()?;
        let reply = self
            .run(
                &ENQUEUE_UNIQUE,
                vec![
                    lock.to_string(),
                    keys::queue_key(&msg.queue),
                    keys::ALL_QUEUES.to_string(),
                ],
                vec![msg.id.to_string(), ttl_millis(ttl), data, msg.queue.clone()],
            )
            .await?;

        if from_value::<i64>(&reply)? == 0 {
            warn!("Rejected duplicate task {} with unique key {}", msg.id, lock);
            return Err(BrokerError::DuplicateTask(lock.to_string()));
        }

        debug!("Enqueued unique task {} on queue {}", msg.id, msg.queue);
        Ok(())
    }

    /// Claim the head of the first non-empty queue, in the order given.
    ///
    /// The task moves to the in-progress list in the same atomic step.
    /// Fails with [`BrokerError::NoProcessableTask`] when every queue is empty.
    pub async fn dequeue<S: AsRef<str>>(&self, queues: &[S]) -> Result<TaskMessage> {
        if queues.is_empty() {
            return Err(BrokerError::NoProcessableTask);
        }

        let mut script_keys: Vec<String> = queues.iter().map(|q| keys::queue_key(q.as_ref())).collect();
        script_keys.push(keys::IN_PROGRESS.to_string());

        let reply = self.run(&DEQUEUE, script_keys, Vec::new()).await?;
        let data: Option<String> = from_value(&reply)?;
        let data = data.ok_or(BrokerError::NoProcessableTask)?;

        let msg = TaskMessage::decode(&data)?;
        debug!("Dequeued task {} from queue {}", msg.id, msg.queue);
        Ok(msg)
    }
}
