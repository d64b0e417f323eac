/// In-process relay hub
///
/// Delivers every publish to each live subscriber of the same topic and event,
/// awaiting handlers in subscription order. Used by tests and the monitor's
/// demo mode; behaves like the hosted relay minus the network.
use super::{MessageHandler, RelayChannel, RelayConnection, RelayConnector, RelayError, Role};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

struct Subscriber {
    connection_id: u64,
    channel_id: u64,
    event: String,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Default)]
struct Hub {
    /// topic -> subscribers
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    reject_connections: AtomicBool,
}

impl Hub {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn handlers_for(&self, topic: &str, event: &str) -> Vec<Arc<dyn MessageHandler>> {
        let topics = self.topics.read();
        topics
            .get(topic)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.event == event)
                    .map(|s| Arc::clone(&s.handler))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn remove_where(&self, predicate: impl Fn(&Subscriber) -> bool) -> usize {
        let mut topics = self.topics.write();
        let mut removed = 0;
        for subs in topics.values_mut() {
            let before = subs.len();
            subs.retain(|s| !predicate(s));
            removed += before - subs.len();
        }
        topics.retain(|_, subs| !subs.is_empty());
        removed
    }
}

/// In-process relay; clones share the same hub
#[derive(Clone, Default)]
pub struct LocalRelay {
    hub: Arc<Hub>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on a topic, across all events
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.hub
            .topics
            .read()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Make subsequent `connect` calls fail, simulating an unreachable relay
    pub fn set_reject_connections(&self, reject: bool) {
        self.hub.reject_connections.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl RelayConnector for LocalRelay {
    async fn connect(&self, role: Role) -> Result<Arc<dyn RelayConnection>, RelayError> {
        if self.hub.reject_connections.load(Ordering::SeqCst) {
            return Err(RelayError::NetworkError(
                "local relay is rejecting connections".to_string(),
            ));
        }

        let id = self.hub.next_id();
        debug!("Local relay connection {} opened for role {}", id, role);

        Ok(Arc::new(LocalConnection {
            hub: Arc::clone(&self.hub),
            id,
            role,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct LocalConnection {
    hub: Arc<Hub>,
    id: u64,
    role: Role,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl RelayConnection for LocalConnection {
    fn role(&self) -> Role {
        self.role
    }

    fn channel(&self, topic: &str) -> Arc<dyn RelayChannel> {
        Arc::new(LocalChannel {
            hub: Arc::clone(&self.hub),
            topic: topic.to_string(),
            connection_id: self.id,
            id: self.hub.next_id(),
            closed: Arc::clone(&self.closed),
        })
    }

    async fn close(&self) -> Result<(), RelayError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let id = self.id;
        let removed = self.hub.remove_where(|s| s.connection_id == id);
        debug!(
            "Local relay connection {} closed, dropped {} subscriptions",
            id, removed
        );
        Ok(())
    }
}

struct LocalChannel {
    hub: Arc<Hub>,
    topic: String,
    connection_id: u64,
    id: u64,
    closed: Arc<AtomicBool>,
}

impl LocalChannel {
    fn ensure_open(&self) -> Result<(), RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RelayError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RelayChannel for LocalChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, event: &str, payload: serde_json::Value) -> Result<(), RelayError> {
        self.ensure_open()?;

        let handlers = self.hub.handlers_for(&self.topic, event);
        debug!(
            "Local relay delivering {} on {} to {} subscribers",
            event,
            self.topic,
            handlers.len()
        );

        for handler in handlers {
            handler.handle_message(event, payload.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        event: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RelayError> {
        self.ensure_open()?;

        let mut topics = self.hub.topics.write();
        topics
            .entry(self.topic.clone())
            .or_default()
            .push(Subscriber {
                connection_id: self.connection_id,
                channel_id: self.id,
                event: event.to_string(),
                handler,
            });
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), RelayError> {
        let id = self.id;
        self.hub.remove_where(|s| s.channel_id == id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingHandler {
        received: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle_message(&self, event: &str, payload: serde_json::Value) {
            self.received.lock().push((event.to_string(), payload));
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers() {
        let relay = LocalRelay::new();
        let staff = relay.connect(Role::Staff).await.unwrap();
        let patient = relay.connect(Role::Patient).await.unwrap();

        let handler = Arc::new(RecordingHandler::default());
        let channel = staff.channel("patient-form");
        channel.subscribe("typing", handler.clone()).await.unwrap();

        let out = patient.channel("patient-form");
        out.publish("typing", json!({"status": "typing"})).await.unwrap();
        out.publish("field-change", json!({"action": "clear"}))
            .await
            .unwrap();
        patient
            .channel("other-topic")
            .publish("typing", json!({"status": "idle"}))
            .await
            .unwrap();

        let received = handler.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "typing");
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close_release_subscriptions() {
        let relay = LocalRelay::new();
        let staff = relay.connect(Role::Staff).await.unwrap();
        let handler = Arc::new(RecordingHandler::default());

        let first = staff.channel("patient-form");
        first.subscribe("typing", handler.clone()).await.unwrap();
        let second = staff.channel("patient-form");
        second.subscribe("field-change", handler.clone()).await.unwrap();
        assert_eq!(relay.subscriber_count("patient-form"), 2);

        first.unsubscribe().await.unwrap();
        assert_eq!(relay.subscriber_count("patient-form"), 1);

        staff.close().await.unwrap();
        assert_eq!(relay.subscriber_count("patient-form"), 0);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_publish() {
        let relay = LocalRelay::new();
        let patient = relay.connect(Role::Patient).await.unwrap();
        let channel = patient.channel("patient-form");

        patient.close().await.unwrap();
        let result = channel.publish("typing", json!({"status": "idle"})).await;
        assert!(matches!(result, Err(RelayError::Closed)));
    }

    #[tokio::test]
    async fn test_rejecting_connections() {
        let relay = LocalRelay::new();
        relay.set_reject_connections(true);
        assert!(relay.connect(Role::Patient).await.is_err());

        relay.set_reject_connections(false);
        assert!(relay.connect(Role::Patient).await.is_ok());
    }
}
