/// Relay channel binding
///
/// The hosted pub/sub service is reached through three handles that mirror
/// its client API:
/// - [`RelayConnector::connect`] opens a [`RelayConnection`] for a role
/// - [`RelayConnection::channel`] returns a [`RelayChannel`] for a topic
/// - [`RelayChannel`] publishes, subscribes and unsubscribes
///
/// Bindings:
/// - `local`: in-process hub for tests and demo mode
/// - `ably`: HTTP binding to the hosted realtime service
pub mod ably;
pub mod local;

pub use ably::{AblyConnector, TokenDetails, TokenRequest};
pub use local::LocalRelay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Identity a session connects with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Editor role: owns and publishes the form
    Patient,
    /// Viewer role: mirrors the form read-only
    Staff,
}

impl Role {
    /// Identifier passed to the token endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Staff => "staff",
        }
    }

    /// Whether this role may edit the form
    pub fn is_editor(&self) -> bool {
        matches!(self, Role::Patient)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay transport errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Connection closed")]
    Closed,
}

/// Callback for messages received on a subscribed event
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, event: &str, payload: serde_json::Value);
}

/// Opens relay connections
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, role: Role) -> Result<Arc<dyn RelayConnection>, RelayError>;
}

/// An open connection to the relay
#[async_trait]
pub trait RelayConnection: Send + Sync {
    /// Role the connection was opened with
    fn role(&self) -> Role;

    /// Get the channel handle for a topic
    fn channel(&self, topic: &str) -> Arc<dyn RelayChannel>;

    /// Close the connection; later publishes fail with [`RelayError::Closed`]
    async fn close(&self) -> Result<(), RelayError>;
}

/// A named pub/sub topic
#[async_trait]
pub trait RelayChannel: Send + Sync {
    fn topic(&self) -> &str;

    async fn publish(&self, event: &str, payload: serde_json::Value) -> Result<(), RelayError>;

    /// Register a handler for one event name
    async fn subscribe(
        &self,
        event: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RelayError>;

    /// Drop every handler this channel handle registered
    async fn unsubscribe(&self) -> Result<(), RelayError>;
}
