/// Viewer session: read-only replica of the editor's form
///
/// Subscribes to both relay events for the lifetime of the session and applies
/// each decoded message in arrival order. Payloads that fail to decode are
/// dropped at the subscribe boundary. Applied changes are broadcast as
/// [`ViewerEvent`]s.
use super::scope::ChannelScope;
use crate::protocol::{RelayMessage, SUBSCRIBED_EVENTS};
use crate::relay::{MessageHandler, RelayConnector, RelayError, Role};
use crate::view::FormView;
use async_trait::async_trait;
use intake_core::{ActivityStatus, FieldName, FormRecord, SessionConfig, ValidationErrors};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A change applied to the replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    FieldChanged { field: FieldName, value: String },
    Cleared,
    StatusChanged(ActivityStatus),
}

struct ReplicaState {
    record: RwLock<FormRecord>,
    status: RwLock<ActivityStatus>,
    events: broadcast::Sender<ViewerEvent>,
}

impl ReplicaState {
    fn new(event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer);
        Self {
            record: RwLock::new(FormRecord::new()),
            status: RwLock::new(ActivityStatus::default()),
            events,
        }
    }

    /// Apply a decoded message; returns the resulting event, if anything changed
    fn apply(&self, message: RelayMessage) -> Option<ViewerEvent> {
        match message {
            RelayMessage::FieldChange { field, value } => {
                self.record.write().set(field, value.clone());
                Some(ViewerEvent::FieldChanged { field, value })
            }
            RelayMessage::Clear => {
                self.record.write().clear();
                Some(ViewerEvent::Cleared)
            }
            RelayMessage::StatusUpdate(status) => {
                let mut current = self.status.write();
                if *current == status {
                    None
                } else {
                    *current = status;
                    Some(ViewerEvent::StatusChanged(status))
                }
            }
        }
    }
}

struct ReplicaHandler {
    state: Arc<ReplicaState>,
}

#[async_trait]
impl MessageHandler for ReplicaHandler {
    async fn handle_message(&self, event: &str, payload: serde_json::Value) {
        let message = match RelayMessage::decode(event, &payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Rejected relay message: {}", e);
                return;
            }
        };

        debug!("Viewer applying {:?}", message);
        if let Some(change) = self.state.apply(message) {
            // No receivers is fine: nobody is watching yet
            let _ = self.state.events.send(change);
        }
    }
}

pub struct ViewerSession {
    state: Arc<ReplicaState>,
    scope: Option<ChannelScope>,
}

impl ViewerSession {
    /// Connect as the staff role and subscribe to `topic`
    ///
    /// A connect or subscribe failure is logged; the session then stays
    /// disconnected and shows an empty replica.
    pub async fn start(connector: &dyn RelayConnector, topic: &str, config: &SessionConfig) -> Self {
        let state = Arc::new(ReplicaState::new(config.event_buffer));

        let scope = match Self::subscribe(connector, topic, &state).await {
            Ok(scope) => {
                info!("Viewer session subscribed to {}", topic);
                Some(scope)
            }
            Err(e) => {
                warn!("Viewer relay unavailable: {}", e);
                None
            }
        };

        Self { state, scope }
    }

    async fn subscribe(
        connector: &dyn RelayConnector,
        topic: &str,
        state: &Arc<ReplicaState>,
    ) -> Result<ChannelScope, RelayError> {
        let scope = ChannelScope::acquire(connector, Role::Staff, topic).await?;
        let handler: Arc<dyn MessageHandler> = Arc::new(ReplicaHandler {
            state: Arc::clone(state),
        });

        for event in SUBSCRIBED_EVENTS {
            if let Err(e) = scope.channel().subscribe(event, Arc::clone(&handler)).await {
                // Release whatever was registered before reporting the failure
                if let Err(release) = scope.release().await {
                    warn!("Viewer relay release failed: {}", release);
                }
                return Err(e);
            }
        }
        Ok(scope)
    }

    pub fn is_connected(&self) -> bool {
        self.scope.is_some()
    }

    /// Snapshot of the replica
    pub fn record(&self) -> FormRecord {
        self.state.record.read().clone()
    }

    /// Editor status as last reported
    pub fn status(&self) -> ActivityStatus {
        *self.state.status.read()
    }

    /// Receive every change applied from now on
    pub fn events(&self) -> broadcast::Receiver<ViewerEvent> {
        self.state.events.subscribe()
    }

    /// Read-only rendering of the replica
    pub fn view(&self) -> FormView {
        FormView::render(
            Role::Staff,
            &self.record(),
            self.status(),
            &ValidationErrors::new(),
        )
    }

    /// Unsubscribe and close the connection
    pub async fn close(mut self) {
        if let Some(scope) = self.scope.take() {
            if let Err(e) = scope.release().await {
                warn!("Viewer relay release failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{RelayChannel, RelayConnection};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Relay whose second subscribe fails
    #[derive(Clone, Default)]
    struct FlakyRelay {
        subscribed: Arc<AtomicUsize>,
        unsubscribed: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RelayConnector for FlakyRelay {
        async fn connect(&self, _role: Role) -> Result<Arc<dyn RelayConnection>, RelayError> {
            Ok(Arc::new(self.clone()))
        }
    }

    #[async_trait]
    impl RelayConnection for FlakyRelay {
        fn role(&self) -> Role {
            Role::Staff
        }

        fn channel(&self, _topic: &str) -> Arc<dyn RelayChannel> {
            Arc::new(self.clone())
        }

        async fn close(&self) -> Result<(), RelayError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl RelayChannel for FlakyRelay {
        fn topic(&self) -> &str {
            "patient-form"
        }

        async fn publish(&self, _event: &str, _payload: serde_json::Value) -> Result<(), RelayError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            event: &str,
            _handler: Arc<dyn MessageHandler>,
        ) -> Result<(), RelayError> {
            if self.subscribed.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(RelayError::ChannelError(format!("cannot attach {}", event)));
            }
            Ok(())
        }

        async fn unsubscribe(&self) -> Result<(), RelayError> {
            self.unsubscribed.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::Closed)
        }
    }

    fn handler() -> ReplicaHandler {
        ReplicaHandler {
            state: Arc::new(ReplicaState::new(16)),
        }
    }

    #[tokio::test]
    async fn test_field_change_and_clear() {
        let handler = handler();
        let mut events = handler.state.events.subscribe();

        handler
            .handle_message("field-change", json!({"field": "FirstName", "value": "Jane"}))
            .await;
        assert_eq!(handler.state.record.read().get(FieldName::FirstName), "Jane");
        assert_eq!(
            events.try_recv().unwrap(),
            ViewerEvent::FieldChanged {
                field: FieldName::FirstName,
                value: "Jane".to_string()
            }
        );

        handler
            .handle_message("field-change", json!({"action": "clear"}))
            .await;
        assert!(handler.state.record.read().is_empty());
        assert_eq!(events.try_recv().unwrap(), ViewerEvent::Cleared);
    }

    #[tokio::test]
    async fn test_status_changes_only_on_transition() {
        let handler = handler();
        let mut events = handler.state.events.subscribe();

        handler.handle_message("typing", json!({"status": "typing"})).await;
        handler.handle_message("typing", json!({"status": "typing"})).await;
        handler.handle_message("typing", json!({"status": "idle"})).await;

        assert_eq!(
            events.try_recv().unwrap(),
            ViewerEvent::StatusChanged(ActivityStatus::Typing)
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ViewerEvent::StatusChanged(ActivityStatus::Idle)
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_messages_leave_state_unchanged() {
        let handler = handler();
        handler
            .handle_message("field-change", json!({"field": "Email", "value": "a@b.co"}))
            .await;
        handler.handle_message("typing", json!({"status": "submitted"})).await;
        let mut events = handler.state.events.subscribe();

        handler.handle_message("typing", json!({"status": "away"})).await;
        handler
            .handle_message("field-change", json!({"field": "Nickname", "value": "J"}))
            .await;
        handler
            .handle_message("field-change", json!({"action": "drop"}))
            .await;
        handler.handle_message("presence", json!({"status": "idle"})).await;

        assert_eq!(*handler.state.status.read(), ActivityStatus::Submitted);
        assert_eq!(handler.state.record.read().get(FieldName::Email), "a@b.co");
        assert_eq!(handler.state.record.read().filled_fields().count(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_failure_releases_scope() {
        let relay = FlakyRelay::default();
        let viewer = ViewerSession::start(&relay, "patient-form", &SessionConfig::default()).await;

        assert!(!viewer.is_connected());
        assert_eq!(relay.subscribed.load(Ordering::SeqCst), 2);
        // close still runs after a failed unsubscribe
        assert_eq!(relay.unsubscribed.load(Ordering::SeqCst), 1);
        assert_eq!(relay.closed.load(Ordering::SeqCst), 1);
        assert!(viewer.record().is_empty());
    }
}
