//! Layout of the keys shared by every broker process.

use crate::{Payload, Result};
use chrono::{DateTime, Utc};

pub const KEY_PREFIX: &str = "tq:";

/// Set holding the name of every queue that has ever received a task
pub const ALL_QUEUES: &str = "tq:queues";

/// Prefix of the per-queue pending lists
pub const QUEUE_PREFIX: &str = "tq:queues:";

pub const IN_PROGRESS: &str = "tq:in_progress";
pub const SCHEDULED: &str = "tq:scheduled";
pub const RETRY: &str = "tq:retry";
pub const DEAD: &str = "tq:dead";

/// Sorted set of live server-state keys, scored by expiry
pub const ALL_SERVERS: &str = "tq:servers";

/// Sorted set of live worker-state keys, scored by expiry
pub const ALL_WORKERS: &str = "tq:workers";

/// Pub/sub channel carrying task ids to cancel
pub const CANCEL_CHANNEL: &str = "tq:cancel";

pub fn queue_key(queue: &str) -> String {
    format!("{}{}", QUEUE_PREFIX, queue)
}

pub fn processed_key(at: DateTime<Utc>) -> String {
    format!("{}processed:{}", KEY_PREFIX, at.format("%Y-%m-%d"))
}

pub fn failure_key(at: DateTime<Utc>) -> String {
    format!("{}failure:{}", KEY_PREFIX, at.format("%Y-%m-%d"))
}

pub fn server_info_key(host: &str, pid: u32, server_id: &str) -> String {
    format!("{}servers:{{{}:{}:{}}}", KEY_PREFIX, host, pid, server_id)
}

pub fn workers_key(host: &str, pid: u32, server_id: &str) -> String {
    format!("{}workers:{{{}:{}:{}}}", KEY_PREFIX, host, pid, server_id)
}

/// Content fingerprint for callers deduplicating tasks by type and payload
pub fn unique_key_for(queue: &str, task_type: &str, payload: &Payload) -> Result<String> {
    let body = serde_json::to_string(payload)?;
    Ok(format!("{}unique:{}:{}:{}", KEY_PREFIX, queue, task_type, body))
}
