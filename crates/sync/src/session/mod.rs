/// Editor and viewer sessions
///
/// An [`EditorSession`] owns the authoritative form and publishes every change;
/// a [`ViewerSession`] mirrors it read-only. Both hold their relay resources in
/// a [`ChannelScope`] released on close.
pub mod activity;
pub mod editor;
pub mod outbox;
pub mod scope;
pub mod viewer;

pub use activity::ActivityTracker;
pub use editor::EditorSession;
pub use outbox::{Outbox, OutboxSender};
pub use scope::ChannelScope;
pub use viewer::{ViewerEvent, ViewerSession};
