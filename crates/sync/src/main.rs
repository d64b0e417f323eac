/// Intake Monitor - headless staff viewer
///
/// Subscribes to the intake form topic and logs every replica change until
/// interrupted. `INTAKE_MONITOR_MODE=local` runs against the in-process relay
/// with a scripted editor instead of the hosted service.
use anyhow::{bail, Context};
use intake_core::{load_dotenv, ConfigLoader, FieldName, RelayConfig, SessionConfig};
use intake_sync::{
    init_tracing, AblyConnector, EditorSession, LocalRelay, RelayConnector, ViewerEvent,
    ViewerSession,
};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const DEMO_ENTRIES: [(FieldName, &str); 7] = [
    (FieldName::FirstName, "Jane"),
    (FieldName::LastName, "Doe"),
    (FieldName::BirthDate, "1990-04-01"),
    (FieldName::Gender, "female"),
    (FieldName::PhoneNumber, "0812345678"),
    (FieldName::Email, "jane.doe@example.com"),
    (FieldName::Nationality, "thai"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorMode {
    Ably,
    Local,
}

impl MonitorMode {
    fn from_env() -> anyhow::Result<Self> {
        match std::env::var("INTAKE_MONITOR_MODE").as_deref() {
            Err(_) | Ok("ably") => Ok(Self::Ably),
            Ok("local") => Ok(Self::Local),
            Ok(other) => bail!("INTAKE_MONITOR_MODE must be 'ably' or 'local', got '{}'", other),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing();

    let relay_config = RelayConfig::from_env().context("Failed to load relay configuration")?;
    relay_config.validate().context("Invalid relay configuration")?;
    let session_config = SessionConfig::from_env().context("Failed to load session configuration")?;
    session_config.validate().context("Invalid session configuration")?;

    let mode = MonitorMode::from_env()?;
    tracing::info!(
        "Intake monitor starting on topic {} ({:?} relay)",
        relay_config.topic,
        mode
    );

    match mode {
        MonitorMode::Ably => {
            let connector = AblyConnector::new(relay_config.clone());
            monitor(&connector, &relay_config.topic, &session_config, None).await
        }
        MonitorMode::Local => {
            let relay = LocalRelay::new();
            let demo = tokio::spawn(run_demo_editor(
                relay.clone(),
                relay_config.topic.clone(),
                session_config.clone(),
            ));
            monitor(&relay, &relay_config.topic, &session_config, Some(demo)).await
        }
    }
}

async fn monitor(
    connector: &dyn RelayConnector,
    topic: &str,
    config: &SessionConfig,
    demo: Option<tokio::task::JoinHandle<()>>,
) -> anyhow::Result<()> {
    let viewer = ViewerSession::start(connector, topic, config).await;
    if !viewer.is_connected() {
        bail!("Could not subscribe to relay topic {}", topic);
    }
    let mut events = viewer.events();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&viewer, event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Monitor lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Some(demo) = demo {
        demo.abort();
    }
    viewer.close().await;
    Ok(())
}

fn log_event(viewer: &ViewerSession, event: ViewerEvent) {
    match event {
        ViewerEvent::FieldChanged { field, value } => {
            tracing::info!(field = %field, value = %value, "Field updated");
        }
        ViewerEvent::Cleared => tracing::info!("Form cleared"),
        ViewerEvent::StatusChanged(status) => {
            let filled = viewer.record().filled_fields().count();
            tracing::info!(status = %status, filled, "{}", status.label());
        }
    }
}

/// Fill the form field by field, pause past the idle window, then submit
async fn run_demo_editor(relay: LocalRelay, topic: String, config: SessionConfig) {
    // Let the viewer subscribe first
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut editor = EditorSession::start(&relay, &topic, &config).await;
    for (field, value) in DEMO_ENTRIES {
        editor.edit(field, value).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    tokio::time::sleep(config.idle_debounce + Duration::from_millis(200)).await;

    if let Err(errors) = editor.submit().await {
        tracing::warn!("Demo submit rejected: {}", errors);
    }
    editor.close().await;
}
