//! Safety-aware logging adapter.
//!
//! Maps a seven-level safety taxonomy onto the `log` facade and routes
//! critical and fatal records, with their safety context, to a
//! registered safety-event callback.  Logging a record never panics;
//! callback failures are swallowed and reported through `log` only.

use log::{debug, error, info, trace, warn};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

/// Errors surfaced by safety-event callbacks.
#[derive(Error, Debug)]
pub enum SafetyLogError {
    #[error("safety event handler failed: {0}")]
    Handler(String),
}

/// Severity taxonomy for safety records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SafetyLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyLevel::Trace => "TRACE",
            SafetyLevel::Debug => "DEBUG",
            SafetyLevel::Info => "INFO",
            SafetyLevel::Warning => "WARNING",
            SafetyLevel::Error => "ERROR",
            SafetyLevel::Critical => "CRITICAL",
            SafetyLevel::Fatal => "FATAL",
        };
        write!(f, "{s}")
    }
}

/// A critical or fatal record as delivered to the safety callback.
#[derive(Debug, Clone)]
pub struct SafetyEvent {
    pub level: SafetyLevel,
    pub message: String,
    /// Device or patient context, when the caller supplied one.
    pub safety_context: Option<String>,
}

/// Callback invoked for every critical and fatal record.
pub type SafetyEventCallback = Box<dyn Fn(&SafetyEvent) -> Result<(), SafetyLogError> + Send + Sync>;

/// Safety logging front end over the `log` facade.
#[derive(Default)]
pub struct SafetyLog {
    callback: Mutex<Option<SafetyEventCallback>>,
}

impl SafetyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_safety_event_callback(&self, callback: SafetyEventCallback) {
        *self.callback.lock().unwrap() = Some(callback);
        info!("safety event callback registered");
    }

    /// Emit a record at `level`.  Critical and fatal records also
    /// reach the safety-event callback, without a context.
    pub fn log(&self, level: SafetyLevel, message: &str) {
        self.emit(level, message, None);
    }

    /// Emit a critical record carrying an explicit safety context.
    pub fn log_critical(&self, message: &str, safety_context: &str) {
        self.emit(SafetyLevel::Critical, message, Some(safety_context));
    }

    /// Emit a fatal record carrying an explicit safety context.
    pub fn log_fatal(&self, message: &str, safety_context: &str) {
        self.emit(SafetyLevel::Fatal, message, Some(safety_context));
    }

    fn emit(&self, level: SafetyLevel, message: &str, safety_context: Option<&str>) {
        match level {
            SafetyLevel::Trace => trace!("{message}"),
            SafetyLevel::Debug => debug!("{message}"),
            SafetyLevel::Info => info!("{message}"),
            SafetyLevel::Warning => warn!("{message}"),
            SafetyLevel::Error => error!("{message}"),
            SafetyLevel::Critical | SafetyLevel::Fatal => match safety_context {
                Some(ctx) => error!("[{level}] {message} (context: {ctx})"),
                None => error!("[{level}] {message}"),
            },
        }

        if level < SafetyLevel::Critical {
            return;
        }

        let event = SafetyEvent {
            level,
            message: message.to_string(),
            safety_context: safety_context.map(str::to_string),
        };

        let callback = self.callback.lock().unwrap();
        if let Some(cb) = callback.as_deref() {
            if let Err(e) = cb(&event) {
                error!("safety event callback failed: {e}");
            }
        }
    }
}
