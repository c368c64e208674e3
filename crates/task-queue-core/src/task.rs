use crate::{Result, TaskError, DEFAULT_MAX_RETRY, DEFAULT_QUEUE};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Unique, time-sortable identifier for a task
pub type TaskId = Uuid;

/// Task type identifier
pub type TaskType = String;

/// Key/value arguments of a task.
///
/// Keys are kept sorted so that the encoded form of a message is stable, which
/// lets the store address a message by its serialized bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Payload(Map::new())
    }

    /// Build a payload from any value that serializes to a JSON object
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Payload(map)),
            Value::Null => Ok(Payload::new()),
            other => Err(TaskError::InvalidMessage(format!(
                "payload must be an object, got {}",
                other
            ))),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Decode the whole payload into a typed struct
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(TaskError::from)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload(map)
    }
}

/// The unit of work flowing through the broker.
///
/// Everything except `retried` and `error_message` is fixed at creation; those
/// two are only rewritten when a task is retried or killed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Unique task identifier
    pub id: TaskId,

    /// Task type name (e.g., "send_email", "process_image")
    #[serde(rename = "type")]
    pub task_type: TaskType,

    pub payload: Payload,

    /// Destination queue name
    pub queue: String,

    /// Maximum number of retry attempts
    pub retry: u32,

    /// Number of retry attempts so far
    pub retried: u32,

    /// Reason of the last failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Fingerprint enforcing at most one active instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_key: Option<String>,
}

impl TaskMessage {
    /// Create a new message destined for the default queue
    pub fn new(task_type: impl Into<TaskType>, payload: Payload) -> Self {
        TaskMessage {
            id: Uuid::now_v7(),
            task_type: task_type.into(),
            payload,
            queue: DEFAULT_QUEUE.to_string(),
            retry: DEFAULT_MAX_RETRY,
            retried: 0,
            error_message: None,
            unique_key: None,
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn max_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn unique_key(mut self, unique_key: impl Into<String>) -> Self {
        self.unique_key = Some(unique_key.into());
        self
    }

    /// Serialize to the wire form kept in the store
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(TaskError::from)
    }

    /// Deserialize from the wire form kept in the store
    pub fn decode(data: &str) -> Result<Self> {
        let msg: TaskMessage = serde_json::from_str(data)?;
        if msg.task_type.is_empty() {
            return Err(TaskError::InvalidMessage(format!("task {} has no type", msg.id)));
        }
        if msg.queue.is_empty() {
            return Err(TaskError::InvalidMessage(format!("task {} has no queue", msg.id)));
        }
        Ok(msg)
    }

    /// Copy of this message after a failed attempt that will be retried
    pub fn retried_with(&self, error: impl Into<String>) -> Self {
        TaskMessage {
            retried: self.retried.saturating_add(1),
            error_message: Some(error.into()),
            ..self.clone()
        }
    }

    /// Copy of this message after a terminal failure
    pub fn killed_with(&self, error: impl Into<String>) -> Self {
        TaskMessage {
            error_message: Some(error.into()),
            ..self.clone()
        }
    }

    /// Check if task can be retried
    pub fn can_retry(&self) -> bool {
        self.retried < self.retry
    }

    /// Calculate retry delay using exponential backoff
    pub fn retry_delay(&self) -> Duration {
        const BASE_DELAY_SECS: i64 = 5;
        const MAX_DELAY_SECS: i64 = 3600;

        let delay = BASE_DELAY_SECS.saturating_mul(2i64.saturating_pow(self.retried));
        Duration::seconds(delay.min(MAX_DELAY_SECS))
    }

    /// When the next attempt should run if the current one failed at `now`
    pub fn next_retry_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.retry_delay()
    }
}
