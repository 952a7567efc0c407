use cosim_transport::TransportError;

/// Errors that can occur on a channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The transport was closed locally or the peer went away.
    ///
    /// Sticky: once surfaced, every further operation on the same channel
    /// half reports it again.
    #[error("remote endpoint disconnected")]
    Disconnected,

    /// An underlying transport failure that is not a disconnect.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Map stream-level I/O failures onto the channel error model.
///
/// Peer-initiated teardown in any of its OS flavors becomes `Disconnected`.
pub(crate) fn map_io(err: std::io::Error) -> ChannelError {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof
        | ErrorKind::NotConnected => ChannelError::Disconnected,
        _ => ChannelError::Transport(TransportError::Io(err)),
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
