/// Editor session: owner of the authoritative form state
///
/// Every mutation applies locally first and is then queued on the session's
/// outbox; relay failures are logged and swallowed. Without a relay connection
/// the session keeps working on local state only.
use super::activity::ActivityTracker;
use super::outbox::{Outbox, OutboxSender};
use super::scope::ChannelScope;
use crate::protocol::RelayMessage;
use crate::relay::{RelayConnector, Role};
use crate::view::FormView;
use intake_core::{
    validate_field, validate_for_submit, ActivityStatus, FieldError, FieldName, FormRecord,
    SessionConfig, ValidationErrors,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub struct EditorSession {
    record: FormRecord,
    errors: ValidationErrors,
    activity: ActivityTracker,
    outbox: Option<Outbox>,
    scope: Option<ChannelScope>,
}

impl EditorSession {
    /// Connect as the patient role and open `topic`
    ///
    /// A connect failure is logged and leaves the session local-only.
    pub async fn start(connector: &dyn RelayConnector, topic: &str, config: &SessionConfig) -> Self {
        let scope = match ChannelScope::acquire(connector, Role::Patient, topic).await {
            Ok(scope) => {
                info!("Editor session started on {}", topic);
                Some(scope)
            }
            Err(e) => {
                warn!("Editor relay unavailable, continuing without sync: {}", e);
                None
            }
        };

        Self::with_scope(scope, config)
    }

    /// Session that never publishes
    pub fn local_only(config: &SessionConfig) -> Self {
        Self::with_scope(None, config)
    }

    fn with_scope(scope: Option<ChannelScope>, config: &SessionConfig) -> Self {
        Self {
            record: FormRecord::new(),
            errors: ValidationErrors::new(),
            activity: ActivityTracker::new(config.idle_debounce),
            outbox: scope
                .as_ref()
                .map(|scope| Outbox::spawn(Arc::clone(scope.channel()))),
            scope,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.scope.is_some()
    }

    pub fn record(&self) -> &FormRecord {
        &self.record
    }

    pub fn status(&self) -> ActivityStatus {
        self.activity.status()
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// Editable rendering of the current state
    pub fn view(&self) -> FormView {
        FormView::render(Role::Patient, &self.record, self.status(), &self.errors)
    }

    /// Set one field, publish the delta and restart the idle timer
    pub async fn edit(&mut self, field: FieldName, value: impl Into<String>) {
        let value = value.into();
        self.record.set(field, value.clone());

        // Queued before the timer is armed, so `idle` always lands after them
        let delta = self.post(RelayMessage::FieldChange { field, value });
        let typing = self.post(RelayMessage::StatusUpdate(ActivityStatus::Typing));

        let sender = self.sender();
        self.activity.touch(move || async move {
            if let Some(sender) = sender {
                let _ = sender.post(RelayMessage::StatusUpdate(ActivityStatus::Idle));
            }
        });

        delivered(delta).await;
        delivered(typing).await;
    }

    /// Check one field when it loses focus, recording or clearing its error
    pub fn blur(&mut self, field: FieldName) -> Option<&FieldError> {
        match validate_field(field, self.record.get(field)) {
            Some(error) => self.errors.insert(field, error),
            None => {
                self.errors.remove(field);
            }
        }
        self.errors.get(field)
    }

    /// Validate and, if valid, announce the submission
    ///
    /// On failure the per-field errors are kept on the session and returned;
    /// nothing is published and the status is unchanged.
    pub async fn submit(&mut self) -> Result<(), ValidationErrors> {
        if let Err(errors) = validate_for_submit(&self.record) {
            debug!("Submit rejected: {}", errors);
            self.errors = errors.clone();
            return Err(errors);
        }

        self.errors.clear();
        self.activity.settle(ActivityStatus::Submitted);
        let submitted = self.post(RelayMessage::StatusUpdate(ActivityStatus::Submitted));
        delivered(submitted).await;
        info!("Intake form submitted");
        Ok(())
    }

    /// Reset the form, tell viewers to clear, and mark the editor inactive
    pub async fn cancel(&mut self) {
        self.record.clear();
        self.errors.clear();
        self.activity.settle(ActivityStatus::Inactive);

        let clear = self.post(RelayMessage::Clear);
        let inactive = self.post(RelayMessage::StatusUpdate(ActivityStatus::Inactive));
        delivered(clear).await;
        delivered(inactive).await;
        info!("Intake form cancelled");
    }

    /// End the session and release the relay connection
    pub async fn close(mut self) {
        if let Some(outbox) = self.outbox.take() {
            outbox.flush().await;
        }
        if let Some(scope) = self.scope.take() {
            if let Err(e) = scope.release().await {
                warn!("Editor relay release failed: {}", e);
            }
        }
    }

    fn sender(&self) -> Option<OutboxSender> {
        self.outbox.as_ref().map(Outbox::sender)
    }

    fn post(&self, message: RelayMessage) -> Option<oneshot::Receiver<()>> {
        match &self.outbox {
            Some(outbox) => Some(outbox.sender().post(message)),
            None => {
                debug!("No relay connection, keeping {:?} local", message);
                None
            }
        }
    }
}

/// Wait until a queued message has been handed to the relay
async fn delivered(receipt: Option<oneshot::Receiver<()>>) {
    if let Some(receipt) = receipt {
        let _ = receipt.await;
    }
}
