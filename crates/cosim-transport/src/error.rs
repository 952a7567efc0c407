use std::time::Duration;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on a transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A connect or accept attempt elapsed without progress.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// An OS-level call failed. Carries the system error code.
    #[error("{operation} failed (system error {code})")]
    System { operation: &'static str, code: i32 },
}

impl TransportError {
    /// Build a `System` error from the current `errno` value.
    pub(crate) fn last_os(operation: &'static str) -> Self {
        Self::System {
            operation,
            code: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
