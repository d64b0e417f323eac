/// Intake Live Sync
///
/// Mirrors a patient intake form from one editor to staff viewers in real time
///
/// Features:
/// - Field deltas and activity status over a hosted pub/sub relay
/// - Debounced typing/idle status with cancel-and-replace timers
/// - Closed wire protocol validated at the subscribe boundary
/// - Local in-process relay for tests and demo mode
pub mod protocol;
pub mod relay;
pub mod session;
pub mod view;

pub use protocol::{ProtocolError, RelayMessage, FIELD_CHANGE_EVENT, SUBSCRIBED_EVENTS, TYPING_EVENT};
pub use relay::{
    AblyConnector, LocalRelay, MessageHandler, RelayChannel, RelayConnection, RelayConnector,
    RelayError, Role,
};
pub use session::{ActivityTracker, ChannelScope, EditorSession, ViewerEvent, ViewerSession};
pub use view::{FieldView, FormView};

/// Initialize tracing for the sync components
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "intake_sync=debug,intake_monitor=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
