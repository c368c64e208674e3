use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Receiving end of a pub/sub channel.
///
/// The subscription is live as soon as it is returned. Messages published
/// afterwards are delivered in order until it is closed or dropped.
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<String>,
    token: CancellationToken,
    forwarder: Option<JoinHandle<()>>,
}

/// Closes a [`Subscription`] from another task
#[derive(Debug, Clone)]
pub struct SubscriptionCloser {
    token: CancellationToken,
}

impl SubscriptionCloser {
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Subscription {
    pub(crate) fn new(
        channel: impl Into<String>,
        rx: mpsc::UnboundedReceiver<String>,
        token: CancellationToken,
        forwarder: Option<JoinHandle<()>>,
    ) -> Self {
        Subscription {
            channel: channel.into(),
            rx,
            token,
            forwarder,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or `None` once the subscription is closed
    pub async fn recv(&mut self) -> Option<String> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            msg = self.rx.recv() => msg,
        }
    }

    pub fn closer(&self) -> SubscriptionCloser {
        SubscriptionCloser {
            token: self.token.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn close(&mut self) {
        self.token.cancel();
        self.rx.close();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    /// Consume the subscription as a stream of messages
    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            let msg = sub.recv().await?;
            Some((msg, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("closed", &self.token.is_cancelled())
            .finish()
    }
}
