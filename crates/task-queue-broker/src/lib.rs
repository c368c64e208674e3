//! Task state transitions over a shared store.
//!
//! [`Rdb`] moves task messages between queues, the in-progress list and the
//! scheduled, retry and dead sets, each move as one atomic script.

pub mod config;
pub mod error;

mod cancel;
mod heartbeat;
mod lifecycle;
mod queue;
mod rdb;
mod recovery;
mod scheduler;

pub use config::{RdbConfig, SchedulerConfig};
pub use error::{BrokerError, Result};
pub use rdb::Rdb;
