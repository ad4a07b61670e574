//! Recorder state machine.
//!
//! Two states: idle and recording. `start` always opens a fresh session,
//! `stop` closes it but keeps the log exportable until the next `start`,
//! and `add_event` only has an effect while recording. Every mutation is
//! applied under the state lock, the lock is released, and only then are
//! subscribers notified.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::{SystemTime, UNIX_EPOCH},
};

use uuid::Uuid;

use crate::{
    config::RecorderConfig,
    event::{CapturedEvent, RecordedEvent},
    session::{RecordingSession, RecordingState},
};

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: HashMap<u64, Listener>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A state change decided and applied under the state lock.
enum Change {
    Started {
        session_id: String,
        discarded: usize,
    },
    Stopped {
        session_id: Option<String>,
        events: usize,
        duration_ms: u64,
    },
    Unchanged {
        recording: bool,
    },
}

fn begin(state: &mut RecordingState) -> Change {
    let session_id = Uuid::new_v4().to_string();
    let discarded = state.events.len();
    *state = RecordingState {
        is_recording: true,
        events: Vec::new(),
        session_id: Some(session_id.clone()),
        session_start_time: Some(now_millis()),
        session_end_time: None,
    };
    Change::Started {
        session_id,
        discarded,
    }
}

fn end(state: &mut RecordingState) -> Change {
    if !state.is_recording {
        return Change::Unchanged { recording: false };
    }
    let start = state.session_start_time.unwrap_or_default();
    let stopped_at = now_millis().max(start);
    state.is_recording = false;
    state.session_end_time = Some(stopped_at);
    Change::Stopped {
        session_id: state.session_id.clone(),
        events: state.events.len(),
        duration_ms: stopped_at - start,
    }
}

/// Interaction recorder. Construct one per privileged process.
pub struct Recorder {
    config: RecorderConfig,
    state: Mutex<RecordingState>,
    listeners: Arc<Mutex<Listeners>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

impl Recorder {
    /// Create an idle recorder.
    #[must_use]
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RecordingState::default()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RecorderConfig {
        &self.config
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.lock_state().is_recording
    }

    /// Snapshot of the full state.
    #[must_use]
    pub fn state(&self) -> RecordingState {
        self.lock_state().clone()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock_state().events.clone()
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.lock_state().events.len()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.lock_state().session_id.clone()
    }

    /// Begin a fresh session, discarding any previous log.
    ///
    /// Returns the new session id.
    pub fn start(&self) -> String {
        let (change, session_id) = {
            let mut state = self.lock_state();
            let change = begin(&mut state);
            (change, state.session_id.clone().unwrap_or_default())
        };
        self.finish(change);
        session_id
    }

    /// End the current session, keeping its log. Notifies even when idle.
    pub fn stop(&self) {
        let change = end(&mut self.lock_state());
        self.finish(change);
    }

    /// Start if idle, stop if recording. Returns the new recording flag.
    ///
    /// The state is read and changed under one lock, so concurrent toggles
    /// alternate instead of both starting.
    pub fn toggle(&self) -> bool {
        let change = {
            let mut state = self.lock_state();
            if state.is_recording {
                end(&mut state)
            } else {
                begin(&mut state)
            }
        };
        self.finish(change)
    }

    /// Drive the recorder to the requested state.
    ///
    /// Asking to record while already recording keeps the current session;
    /// use [`Recorder::start`] to force a fresh one.
    pub fn set_recording(&self, recording: bool) -> bool {
        let change = {
            let mut state = self.lock_state();
            match (recording, state.is_recording) {
                (true, false) => begin(&mut state),
                (false, _) => end(&mut state),
                (true, true) => Change::Unchanged { recording: true },
            }
        };
        self.finish(change)
    }

    /// Append an event if recording. Dropped silently when idle.
    ///
    /// Returns the stamped event when it was appended.
    pub fn add_event(&self, event: CapturedEvent) -> Option<RecordedEvent> {
        let event = event.normalized(self.config.inner_text_limit);
        let recorded = {
            let mut state = self.lock_state();
            if !state.is_recording {
                return None;
            }
            let floor = state
                .events
                .last()
                .map(|e| e.timestamp)
                .or(state.session_start_time)
                .unwrap_or_default();
            let recorded = RecordedEvent {
                id: Uuid::new_v4().to_string(),
                timestamp: now_millis().max(floor),
                event,
            };
            state.events.push(recorded.clone());
            tracing::debug!(
                kind = ?recorded.kind(),
                url = %recorded.event.url,
                count = state.events.len(),
                "Event captured"
            );
            recorded
        };
        self.notify();
        Some(recorded)
    }

    /// Empty the log without ending the session.
    pub fn clear(&self) {
        self.lock_state().events.clear();
        self.notify();
    }

    /// Snapshot the current session for export.
    ///
    /// Returns `None` if no session was ever started. `end_time` is set
    /// only when the recorder is idle.
    #[must_use]
    pub fn export(&self) -> Option<RecordingSession> {
        let state = self.lock_state();
        let id = state.session_id.clone()?;
        let start_time = state.session_start_time?;
        Some(RecordingSession {
            id,
            start_time,
            end_time: if state.is_recording {
                None
            } else {
                state.session_end_time
            },
            events: state.events.clone(),
            metadata: self.config.metadata(),
        })
    }

    /// Register a change listener, fired after every start, stop, clear
    /// and appended event.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    fn finish(&self, change: Change) -> bool {
        let recording = match change {
            Change::Started {
                session_id,
                discarded,
            } => {
                tracing::info!(session_id = %session_id, discarded, "Recording started");
                true
            }
            Change::Stopped {
                session_id,
                events,
                duration_ms,
            } => {
                tracing::info!(
                    session_id = session_id.as_deref().unwrap_or_default(),
                    events,
                    duration_ms,
                    "Recording stopped"
                );
                false
            }
            Change::Unchanged { recording } => {
                tracing::debug!(recording, "Recording state unchanged");
                recording
            }
        };
        self.notify();
        recording
    }

    fn notify(&self) {
        // Snapshot so listeners may subscribe or unsubscribe re-entrantly.
        let listeners: Vec<Listener> = lock(&self.listeners).entries.values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RecordingState> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by [`Recorder::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Remove the listener. Safe to call any number of times.
    ///
    /// Returns whether this call removed it.
    pub fn unsubscribe(&self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|listeners| lock(&listeners).entries.remove(&self.id).is_some())
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}
