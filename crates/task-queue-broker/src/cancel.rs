use crate::rdb::Rdb;
use crate::Result;
use task_queue_core::keys;
use task_queue_store::Subscription;
use tracing::debug;

impl Rdb {
    /// Ask every listening worker to cancel `task_id`.
    ///
    /// Best effort: only currently connected subscribers see the request.
    /// Returns how many were reached.
    pub async fn publish_cancelation(&self, task_id: &str) -> Result<usize> {
        let receivers = self.store().publish(keys::CANCEL_CHANNEL, task_id).await?;
        debug!("Published cancelation of task {} to {} subscribers", task_id, receivers);
        Ok(receivers)
    }

    /// Subscribe to cancelation requests
    pub async fn cancelation_pubsub(&self) -> Result<Subscription> {
        Ok(self.store().subscribe(keys::CANCEL_CHANNEL).await?)
    }
}
