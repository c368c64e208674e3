use crate::{keys, Payload, TaskId, TaskMessage, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Lifecycle status of a server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Created but not yet processing
    Idle,
    /// Processing tasks
    Running,
    /// Stopped pulling new tasks, draining active ones
    Quiet,
    /// Shut down
    Stopped,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Idle => "idle",
            ServerStatus::Running => "running",
            ServerStatus::Quiet => "quiet",
            ServerStatus::Stopped => "stopped",
        }
    }
}

/// Heartbeat record of one server process, as published to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub host: String,
    pub pid: u32,
    pub server_id: String,
    pub concurrency: usize,
    /// Queue name to priority weight
    pub queues: BTreeMap<String, u32>,
    pub strict_priority: bool,
    pub status: ServerStatus,
    pub started: DateTime<Utc>,
    pub active_worker_count: usize,
}

/// A task currently executing on some server, as published to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub host: String,
    pub pid: u32,
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub queue: String,
    pub payload: Payload,
    pub started: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ActiveWorker {
    msg: TaskMessage,
    started: DateTime<Utc>,
}

/// Liveness state of the local server process.
///
/// Owned by the process that runs the workers; it is snapshotted into a
/// [`ServerInfo`] and a set of [`WorkerInfo`] records on every heartbeat.
#[derive(Debug, Clone)]
pub struct ServerState {
    host: String,
    pid: u32,
    server_id: String,
    concurrency: usize,
    queues: BTreeMap<String, u32>,
    strict_priority: bool,
    status: ServerStatus,
    started: DateTime<Utc>,
    workers: HashMap<TaskId, ActiveWorker>,
}

impl ServerState {
    pub fn new(
        host: impl Into<String>,
        pid: u32,
        concurrency: usize,
        queues: impl IntoIterator<Item = (String, u32)>,
        strict_priority: bool,
    ) -> Self {
        ServerState {
            host: host.into(),
            pid,
            server_id: Uuid::new_v4().to_string(),
            concurrency,
            queues: queues.into_iter().collect(),
            strict_priority,
            status: ServerStatus::Idle,
            started: Utc::now(),
            workers: HashMap::new(),
        }
    }

    /// State for the calling process, identified by hostname and pid
    pub fn for_current_process(
        concurrency: usize,
        queues: impl IntoIterator<Item = (String, u32)>,
        strict_priority: bool,
    ) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Self::new(host, std::process::id(), concurrency, queues, strict_priority)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ServerStatus) {
        self.status = status;
    }

    pub fn set_started(&mut self, started: DateTime<Utc>) {
        self.started = started;
    }

    /// Record that a worker started processing `msg`
    pub fn add_worker(&mut self, msg: &TaskMessage, started: DateTime<Utc>) {
        self.workers.insert(
            msg.id,
            ActiveWorker {
                msg: msg.clone(),
                started,
            },
        );
    }

    /// Record that the worker processing `task_id` finished
    pub fn remove_worker(&mut self, task_id: &TaskId) -> bool {
        self.workers.remove(task_id).is_some()
    }

    pub fn active_worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn server_key(&self) -> String {
        keys::server_info_key(&self.host, self.pid, &self.server_id)
    }

    pub fn workers_key(&self) -> String {
        keys::workers_key(&self.host, self.pid, &self.server_id)
    }

    /// Snapshot of the server record
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            host: self.host.clone(),
            pid: self.pid,
            server_id: self.server_id.clone(),
            concurrency: self.concurrency,
            queues: self.queues.clone(),
            strict_priority: self.strict_priority,
            status: self.status,
            started: self.started,
            active_worker_count: self.workers.len(),
        }
    }

    /// Snapshot of the active workers, ordered by task id
    pub fn workers(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> = self
            .workers
            .values()
            .map(|w| WorkerInfo {
                host: self.host.clone(),
                pid: self.pid,
                id: w.msg.id,
                task_type: w.msg.task_type.clone(),
                queue: w.msg.queue.clone(),
                payload: w.msg.payload.clone(),
                started: w.started,
            })
            .collect();
        workers.sort_by_key(|w| w.id);
        workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queues() -> Vec<(String, u32)> {
        vec![("default".to_string(), 2), ("email".to_string(), 5)]
    }

    #[test]
    fn test_info_snapshot() {
        let mut state = ServerState::new("localhost", 4242, 10, queues(), false);
        state.set_status(ServerStatus::Running);

        let info = state.info();
        assert_eq!(info.host, "localhost");
        assert_eq!(info.pid, 4242);
        assert_eq!(info.concurrency, 10);
        assert_eq!(info.queues.get("email"), Some(&5));
        assert_eq!(info.status, ServerStatus::Running);
        assert_eq!(info.active_worker_count, 0);
        assert_eq!(info.server_id, state.server_id());
    }

    #[test]
    fn test_worker_tracking() {
        let mut state = ServerState::new("localhost", 4242, 10, queues(), false);
        let msg = TaskMessage::new("send_email", Payload::new().with("user_id", "123"));
        let started = Utc::now();

        state.add_worker(&msg, started);
        assert_eq!(state.active_worker_count(), 1);

        let workers = state.workers();
        assert_eq!(workers[0].id, msg.id);
        assert_eq!(workers[0].task_type, "send_email");
        assert_eq!(workers[0].started, started);

        assert!(state.remove_worker(&msg.id));
        assert!(!state.remove_worker(&msg.id));
        assert_eq!(state.info().active_worker_count, 0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ServerStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert_eq!(ServerStatus::Stopped.as_str(), "stopped");
    }

    #[test]
    fn test_keys_are_distinct_per_server() {
        let a = ServerState::new("localhost", 4242, 1, queues(), false);
        let b = ServerState::new("localhost", 4242, 1, queues(), false);

        assert_ne!(a.server_key(), b.server_key());
        assert!(a.server_key().starts_with("tq:servers:{localhost:4242:"));
        assert!(a.workers_key().starts_with("tq:workers:{localhost:4242:"));
    }
}
