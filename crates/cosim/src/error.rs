use std::time::Duration;

use cosim_channel::ChannelError;
use cosim_transport::TransportError;

use crate::types::{BusControllerId, IoSignalId};

/// Errors surfaced by the co-simulation runtime.
#[derive(Debug, thiserror::Error)]
pub enum CoSimError {
    /// The transport closed or the peer went away. Recoverable only by
    /// reconnecting.
    #[error("remote endpoint disconnected")]
    Disconnected,

    /// Malformed frame, unexpected frame kind, or a size out of bounds.
    /// Fatal for the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A write length does not match a fixed size signal.
    #[error("invalid length {length} for IO signal {signal_id}")]
    InvalidLength { signal_id: IoSignalId, length: u32 },

    /// A write length exceeds a variable size signal's maximum.
    #[error("length {length} exceeds maximum {maximum} of IO signal {signal_id}")]
    VariableLengthExceeded {
        signal_id: IoSignalId,
        length: u32,
        maximum: u32,
    },

    #[error("duplicated IO signal id {0}")]
    DuplicateSignalId(IoSignalId),

    #[error("duplicated bus controller id {0}")]
    DuplicateControllerId(BusControllerId),

    #[error("IO signal id {0} is unknown")]
    UnknownSignal(IoSignalId),

    #[error("bus controller id {0} is unknown")]
    UnknownController(BusControllerId),

    /// A connect or accept attempt elapsed without progress.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// An OS-level failure. Carries the system error code.
    #[error("{message} (system error {code})")]
    System { message: String, code: i32 },

    /// A port-mapper lookup missed.
    #[error("{0}")]
    NotFound(String),
}

impl From<ChannelError> for CoSimError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Disconnected => CoSimError::Disconnected,
            ChannelError::Transport(transport) => transport.into(),
        }
    }
}

impl From<TransportError> for CoSimError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(elapsed) => CoSimError::Timeout(elapsed),
            TransportError::System { operation, code } => CoSimError::System {
                message: format!("{operation} failed"),
                code,
            },
            TransportError::Io(io)
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::BrokenPipe
                        | std::io::ErrorKind::UnexpectedEof
                ) =>
            {
                CoSimError::Disconnected
            }
            other => {
                let code = match &other {
                    TransportError::Bind { source, .. }
                    | TransportError::Connect { source, .. } => source.raw_os_error(),
                    TransportError::Accept(source) | TransportError::Io(source) => {
                        source.raw_os_error()
                    }
                    _ => None,
                };
                CoSimError::System {
                    message: other.to_string(),
                    code: code.unwrap_or(0),
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CoSimError>;
