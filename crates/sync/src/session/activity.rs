/// Debounced activity status for the editor
///
/// Every edit sets `typing` and replaces the single pending idle timer. When a
/// timer outlives its window without a newer edit it flips the status to
/// `idle` and runs its callback. Timers are aborted on replacement and also
/// carry a generation number, so one that already woke up cannot apply a
/// stale `idle`.
use intake_core::ActivityStatus;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

struct TrackerState {
    status: ActivityStatus,
    generation: u64,
}

pub struct ActivityTracker {
    state: Arc<Mutex<TrackerState>>,
    window: Duration,
    pending: Option<JoinHandle<()>>,
}

impl ActivityTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                status: ActivityStatus::default(),
                generation: 0,
            })),
            window,
            pending: None,
        }
    }

    pub fn status(&self) -> ActivityStatus {
        self.state.lock().status
    }

    /// Whether an idle timer is still waiting to fire
    pub fn has_pending(&self) -> bool {
        self.pending
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Record an edit: status becomes `typing` and the idle timer restarts
    ///
    /// `on_idle` runs once, after the status has been set to `idle`, only if
    /// no later `touch` or `settle` happened in the meantime.
    pub fn touch<F, Fut>(&mut self, on_idle: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.abort_pending();

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.status = ActivityStatus::Typing;
            state.generation
        };

        let state = Arc::clone(&self.state);
        let window = self.window;
        self.pending = Some(tokio::spawn(async move {
            sleep(window).await;

            let fired = {
                let mut state = state.lock();
                if state.generation == generation {
                    state.status = ActivityStatus::Idle;
                    true
                } else {
                    false
                }
            };

            if fired {
                debug!("Idle after {:?} without edits", window);
                on_idle().await;
            }
        }));
    }

    /// Set a terminal status (`submitted`, `inactive`) and cancel any idle timer
    pub fn settle(&mut self, status: ActivityStatus) {
        self.abort_pending();
        let mut state = self.state.lock();
        state.generation += 1;
        state.status = status;
    }

    fn abort_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for ActivityTracker {
    fn drop(&mut self) {
        self.abort_pending();
    }
}
