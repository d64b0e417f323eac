/// Ordered publish queue for one editor
///
/// Every message an editor emits, including the debounced `idle` posted from
/// the timer task, goes through one queue drained by a single task. Messages
/// reach the relay in the order they were queued, so a slow publish can delay
/// a later status but never let it overtake an earlier one.
use crate::protocol::RelayMessage;
use crate::relay::RelayChannel;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

enum Outgoing {
    Publish {
        message: RelayMessage,
        done: oneshot::Sender<()>,
    },
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle for queueing messages
#[derive(Clone)]
pub struct OutboxSender {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl OutboxSender {
    /// Queue a message; the receiver resolves once it has been handed to the relay
    pub fn post(&self, message: RelayMessage) -> oneshot::Receiver<()> {
        let (done, delivered) = oneshot::channel();
        if self.tx.send(Outgoing::Publish { message, done }).is_err() {
            debug!("Outbox closed, message dropped");
        }
        delivered
    }
}

pub struct Outbox {
    sender: OutboxSender,
    task: JoinHandle<()>,
}

impl Outbox {
    /// Start draining into `channel`
    pub fn spawn(channel: Arc<dyn RelayChannel>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(outgoing) = rx.recv().await {
                match outgoing {
                    Outgoing::Publish { message, done } => {
                        publish(channel.as_ref(), &message).await;
                        let _ = done.send(());
                    }
                    Outgoing::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self {
            sender: OutboxSender { tx },
            task,
        }
    }

    pub fn sender(&self) -> OutboxSender {
        self.sender.clone()
    }

    /// Wait until everything queued so far has been published
    pub async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        if self.sender.tx.send(Outgoing::Flush(done)).is_ok() {
            let _ = flushed.await;
        }
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Publish a message, logging and swallowing any transport failure
async fn publish(channel: &dyn RelayChannel, message: &RelayMessage) {
    let (event, payload) = match message.encode() {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!("Failed to encode {:?}: {}", message, e);
            return;
        }
    };

    if let Err(e) = channel.publish(event, payload).await {
        warn!("Failed to publish {} to {}: {}", event, channel.topic(), e);
    }
}
