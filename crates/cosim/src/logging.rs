//! Process-wide log callback.
//!
//! The runtime reports user-visible messages (queue overflows, port-mapper
//! traces, step-loop failures) through a single process-wide callback.
//! Each log site captures the current callback by clone, so rebinding the
//! callback never races an in-flight call. Ambient diagnostics additionally
//! go through `tracing`.

use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::{debug, error, info, warn};

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Severity {
    Error = 0,
    Warning = 1,
    Info = 2,
    Trace = 3,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
            Severity::Trace => "Trace",
        };
        write!(f, "{name}")
    }
}

pub type LogCallback = Arc<dyn Fn(Severity, &str) + Send + Sync>;

static LOG_CALLBACK: RwLock<Option<LogCallback>> = RwLock::new(None);

/// Install or remove the process-wide log callback.
pub fn set_log_callback(callback: Option<LogCallback>) {
    if let Ok(mut slot) = LOG_CALLBACK.write() {
        *slot = callback;
    }
}

pub(crate) fn log(severity: Severity, message: &str) {
    match severity {
        Severity::Error => error!("{message}"),
        Severity::Warning => warn!("{message}"),
        Severity::Info => info!("{message}"),
        Severity::Trace => debug!("{message}"),
    }

    let callback = LOG_CALLBACK
        .read()
        .ok()
        .and_then(|slot| slot.as_ref().cloned());
    if let Some(callback) = callback {
        callback(severity, message);
    }
}

pub(crate) fn log_error(message: impl AsRef<str>) {
    log(Severity::Error, message.as_ref());
}

pub(crate) fn log_warning(message: impl AsRef<str>) {
    log(Severity::Warning, message.as_ref());
}

pub(crate) fn log_info(message: impl AsRef<str>) {
    log(Severity::Info, message.as_ref());
}

pub(crate) fn log_trace(message: impl AsRef<str>) {
    log(Severity::Trace, message.as_ref());
}
