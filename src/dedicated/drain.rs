//! Session-aware drain handling
//!
//! A drain while no session is running starts the shutdown sequence right
//! away. A drain during a session arms a pending shutdown that runs when the
//! session ends. Game logic reports session boundaries through
//! [`DrainCoordinator::begin_session`] and [`DrainCoordinator::end_session`].
//! Once armed, the pending shutdown is only ever cleared by shutting down.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Steps taken to shut the server down
#[async_trait]
pub trait ShutdownSequence: Send + Sync {
    async fn shutdown(&self);
}

#[derive(Debug, Default)]
struct SessionState {
    session_active: bool,
    drain_armed: bool,
}

pub struct DrainCoordinator {
    state: Mutex<SessionState>,
    shutdown_initiated: AtomicBool,
    sequence: Arc<dyn ShutdownSequence>,
}

impl DrainCoordinator {
    pub fn new(sequence: Arc<dyn ShutdownSequence>) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            shutdown_initiated: AtomicBool::new(false),
            sequence,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    /// Mark a session as started. Refused once a drain has been received.
    pub fn begin_session(&self) -> bool {
        if self.is_shutdown_initiated() {
            return false;
        }
        self.with_state(|state| {
            if state.drain_armed {
                warn!("Refusing new session: drain pending");
                return false;
            }
            state.session_active = true;
            info!("Session started");
            true
        })
    }

    /// Mark the active session as finished, running a pending shutdown
    pub async fn end_session(&self) {
        let pending = self.with_state(|state| {
            state.session_active = false;
            state.drain_armed
        });
        info!(drain_pending = pending, "Session ended");

        if pending {
            self.initiate_shutdown().await;
        }
    }

    /// React to a drain request from the watchdog
    pub async fn on_drain(&self) {
        let session_active = self.with_state(|state| {
            state.drain_armed = true;
            state.session_active
        });

        if session_active {
            info!("Drain received during a session, shutdown deferred until it ends");
        } else {
            info!("Drain received while idle, shutting down");
            self.initiate_shutdown().await;
        }
    }

    /// Run the shutdown sequence now, regardless of sessions
    pub async fn shutdown_now(&self) {
        self.initiate_shutdown().await;
    }

    async fn initiate_shutdown(&self) {
        if self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already initiated");
            return;
        }
        info!("Starting shutdown sequence");
        self.sequence.shutdown().await;
    }

    pub fn is_session_active(&self) -> bool {
        self.with_state(|state| state.session_active)
    }

    /// Drain received and shutdown still waiting on the session
    pub fn is_drain_pending(&self) -> bool {
        self.with_state(|state| state.drain_armed) && !self.is_shutdown_initiated()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }
}
