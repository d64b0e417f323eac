/// Scoped relay resources for one session
///
/// A `ChannelScope` owns the connection and topic channel a session acquired.
/// `release` unsubscribes and closes; dropping an unreleased scope performs the
/// same release on the current runtime in the background.
use crate::relay::{RelayChannel, RelayConnection, RelayConnector, RelayError, Role};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ChannelScope {
    connection: Arc<dyn RelayConnection>,
    channel: Arc<dyn RelayChannel>,
    released: bool,
}

impl ChannelScope {
    /// Connect as `role` and open the channel for `topic`
    pub async fn acquire(
        connector: &dyn RelayConnector,
        role: Role,
        topic: &str,
    ) -> Result<Self, RelayError> {
        let connection = connector.connect(role).await?;
        let channel = connection.channel(topic);
        debug!("Acquired relay channel {} as {}", topic, role);

        Ok(Self {
            connection,
            channel,
            released: false,
        })
    }

    pub fn channel(&self) -> &Arc<dyn RelayChannel> {
        &self.channel
    }

    pub fn role(&self) -> Role {
        self.connection.role()
    }

    /// Unsubscribe and close the connection
    ///
    /// Both steps run even if the first fails; the first error is returned.
    pub async fn release(mut self) -> Result<(), RelayError> {
        self.released = true;
        let unsubscribed = self.channel.unsubscribe().await;
        let closed = self.connection.close().await;
        debug!("Released relay channel {}", self.channel.topic());
        unsubscribed.and(closed)
    }
}

impl Drop for ChannelScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let connection = Arc::clone(&self.connection);
        let channel = Arc::clone(&self.channel);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = channel.unsubscribe().await {
                        warn!("Background unsubscribe failed: {}", e);
                    }
                    if let Err(e) = connection.close().await {
                        warn!("Background connection close failed: {}", e);
                    }
                });
            }
            Err(_) => warn!(
                "Relay channel {} dropped outside a runtime; subscription not released",
                channel.topic()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{LocalRelay, MessageHandler};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl MessageHandler for Noop {
        async fn handle_message(&self, _event: &str, _payload: serde_json::Value) {}
    }

    #[tokio::test]
    async fn test_release_drops_subscriptions() {
        let relay = LocalRelay::new();
        let scope = ChannelScope::acquire(&relay, Role::Staff, "patient-form")
            .await
            .unwrap();
        scope
            .channel()
            .subscribe("typing", Arc::new(Noop))
            .await
            .unwrap();
        assert_eq!(scope.role(), Role::Staff);
        assert_eq!(relay.subscriber_count("patient-form"), 1);

        scope.release().await.unwrap();
        assert_eq!(relay.subscriber_count("patient-form"), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let relay = LocalRelay::new();
        let scope = ChannelScope::acquire(&relay, Role::Staff, "patient-form")
            .await
            .unwrap();
        scope
            .channel()
            .subscribe("field-change", Arc::new(Noop))
            .await
            .unwrap();

        drop(scope);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        assert_eq!(relay.subscriber_count("patient-form"), 0);
    }
}
