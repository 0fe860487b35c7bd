//! Emergency-stop broadcast.
//!
//! Components that must react to an emergency subscribe a closure;
//! triggering the broadcast latches the active flag and fans out to
//! every subscriber.  A trigger while already latched does not fan out
//! again, which makes the orchestrator's shutdown path idempotent.

use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Errors surfaced by emergency subscribers.
#[derive(Error, Debug)]
pub enum EmergencyError {
    #[error("emergency handler {0} failed: {1}")]
    Handler(String, String),
}

/// A subscriber's reaction to the emergency signal.
pub type EmergencySubscriber = Box<dyn Fn() -> Result<(), EmergencyError> + Send + Sync>;

/// Fan-out channel for emergency stops.
#[derive(Default)]
pub struct EmergencyBroadcast {
    active: AtomicBool,
    subscribers: Mutex<Vec<(String, EmergencySubscriber)>>,
}

impl EmergencyBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named subscriber.  Subscribing an existing name replaces
    /// the previous handler, so repeated component setup never
    /// accumulates duplicate reactions.
    pub fn subscribe(&self, name: impl Into<String>, subscriber: EmergencySubscriber) {
        let name = name.into();
        info!("emergency subscriber registered: {name}");
        let mut subscribers = self.subscribers.lock().unwrap();
        match subscribers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = subscriber,
            None => subscribers.push((name, subscriber)),
        }
    }

    /// Latch the emergency flag and notify every subscriber once.
    ///
    /// Returns `false` without re-notifying when already latched.
    /// Subscriber failures are swallowed and logged; the broadcast
    /// itself never fails.
    pub fn trigger(&self) -> bool {
        if self.active.swap(true, Ordering::SeqCst) {
            warn!("emergency broadcast already active");
            return false;
        }

        error!("EMERGENCY BROADCAST TRIGGERED");
        let subscribers = self.subscribers.lock().unwrap();
        for (name, subscriber) in subscribers.iter() {
            if let Err(e) = subscriber() {
                error!("emergency subscriber {name} failed: {e}");
            }
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Clear the latch so a later emergency can fan out again.
    pub fn reset(&self) {
        self.active.store(false, Ordering::SeqCst);
        info!("emergency broadcast reset");
    }
}
