use crate::rdb::{queue_of, Rdb};
use crate::Result;
use task_queue_core::keys;
use task_queue_store::{from_value, Keyspace, Script, ScriptArgs, Value};
use tracing::info;

// KEYS[1] -> tq:in_progress
// KEYS[2] -> tq:queues
// ARGV[1] -> queue key prefix
static REQUEUE_ALL: Script = Script::new(
    "requeue_all",
    r#"
local msgs = redis.call("LRANGE", KEYS[1], 0, -1)
for _, msg in ipairs(msgs) do
  local qname = cjson.decode(msg)["queue"]
  redis.call("RPUSH", ARGV[1] .. qname, msg)
  redis.call("SADD", KEYS[2], qname)
end
redis.call("DEL", KEYS[1])
return #msgs
"#,
    run_requeue_all,
);

fn run_requeue_all(ks: &mut Keyspace, call: &ScriptArgs<'_>) -> task_queue_store::Result<Value> {
    let in_progress = call.key(0)?;
    let all_queues = call.key(1)?;
    let prefix = call.arg(0)?;

    let msgs = ks.lrange(in_progress)?;
    for msg in &msgs {
        let queue = queue_of(call, msg)?;
        ks.rpush(&format!("{}{}", prefix, queue), msg)?;
        ks.sadd(all_queues, &queue)?;
    }
    ks.del(in_progress);
    Ok(Value::Int(msgs.len() as i64))
}

impl Rdb {
    /// Return every in-progress task to the head of its origin queue.
    ///
    /// Meant for startup, after a crash left claimed tasks unfinished.
    /// Returns how many tasks were moved.
    pub async fn requeue_all(&self) -> Result<usize> {
        let reply = self
            .run(
                &REQUEUE_ALL,
                vec![keys::IN_PROGRESS.to_string(), keys::ALL_QUEUES.to_string()],
                vec![keys::QUEUE_PREFIX.to_string()],
            )
            .await?;

        let moved: usize = from_value(&reply)?;
        if moved > 0 {
            info!("Restored {} in-progress tasks to their queues", moved);
        }
        Ok(moved)
    }
}
