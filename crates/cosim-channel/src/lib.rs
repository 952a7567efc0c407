//! Buffered frame channels for the co-simulation runtime.
//!
//! A channel carries atomic, length-delimited frames over one of two
//! interchangeable transports: a socket channel (TCP or Unix domain, for
//! cross-host and fallback use) and a single-host shared-memory channel.
//! Writers coalesce small writes and deliver a frame on `end_write`;
//! readers block until the requested bytes of the frame stream arrive.

mod channel;
mod error;
mod socket;

#[cfg(target_os = "linux")]
mod local;

pub use channel::{Channel, ChannelReader, ChannelWriter};
pub use error::{ChannelError, Result};
pub use socket::{SocketChannelReader, SocketChannelWriter};

#[cfg(target_os = "linux")]
pub use local::{connect_local, LocalChannelReader, LocalChannelServer, LocalChannelWriter};
