use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(not(target_os = "linux"))]
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Name prefix for all named endpoints created by this library.
pub const SOCKET_NAME_PREFIX: &str = "dSPACE.VEOS.CoSim.";

/// Poll period for accept loops observing a stop signal.
pub const ACCEPT_POLL_PERIOD: Duration = Duration::from_millis(10);

/// A connected byte stream — TCP or Unix domain.
///
/// This is the fundamental I/O type returned by transport operations. All
/// TCP streams have `TCP_NODELAY` enabled.
pub struct TransportStream {
    inner: StreamInner,
}

enum StreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl TransportStream {
    fn from_tcp(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(false)?;
        Ok(Self {
            inner: StreamInner::Tcp(stream),
        })
    }

    #[cfg(unix)]
    fn from_unix(stream: UnixStream) -> Result<Self> {
        stream.set_nonblocking(false)?;
        Ok(Self {
            inner: StreamInner::Unix(stream),
        })
    }

    /// Create a connected pair of streams in this process.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from_unix(left)?, Self::from_unix(right)?))
    }

    /// Clone the stream (duplicates the OS handle).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            StreamInner::Tcp(stream) => StreamInner::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            StreamInner::Unix(stream) => StreamInner::Unix(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Shut down both directions. Unblocks any in-flight read on a clone of
    /// this stream; idempotent.
    pub fn shutdown(&self) {
        let _ = match &self.inner {
            StreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
    }
}

impl Read for TransportStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            StreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for TransportStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            StreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            StreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            StreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            StreamInner::Unix(_) => "unix",
        };
        f.debug_struct("TransportStream").field("type", &kind).finish()
    }
}

/// TCP server accepting connections on IPv4 and, where available, IPv6.
///
/// With remote access disabled the listeners bind to the loopback addresses
/// only. `port == 0` selects an ephemeral port; the chosen port is shared by
/// both address families.
pub struct TcpChannelServer {
    listeners: Vec<TcpListener>,
    local_port: u16,
}

impl TcpChannelServer {
    pub fn new(port: u16, enable_remote_access: bool) -> Result<Self> {
        let v4_address = if enable_remote_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        };

        let v4 = TcpListener::bind((v4_address, port)).map_err(|source| TransportError::Bind {
            address: format!("{v4_address}:{port}"),
            source,
        })?;
        let local_port = v4
            .local_addr()
            .map_err(TransportError::Io)?
            .port();
        v4.set_nonblocking(true)?;

        let mut listeners = vec![v4];

        // IPv6 needs V6ONLY so the shared port does not collide with the
        // IPv4 listener. Not every host has an IPv6 stack.
        match bind_v6_only(local_port, enable_remote_access) {
            Ok(v6) => {
                v6.set_nonblocking(true)?;
                listeners.push(v6);
            }
            Err(err) => debug!(%err, "IPv6 listener unavailable"),
        }

        info!(port = local_port, enable_remote_access, "listening on TCP");

        Ok(Self {
            listeners,
            local_port,
        })
    }

    /// The port the server is bound to.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Accept the next connection, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout elapses without a connection.
    pub fn try_accept(&self, timeout: Duration) -> Result<Option<TransportStream>> {
        let deadline = Instant::now() + timeout;
        loop {
            for listener in &self.listeners {
                match listener.accept() {
                    Ok((stream, address)) => {
                        debug!(%address, "accepted TCP connection");
                        return Ok(Some(TransportStream::from_tcp(stream)?));
                    }
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                    Err(err) if err.kind() == ErrorKind::Interrupted => {}
                    Err(err) => return Err(TransportError::Accept(err)),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(ACCEPT_POLL_PERIOD);
            poll_readable(self.listeners.iter().map(|l| l.as_raw_fd()), wait)?;
        }
    }

    /// Accept the next connection (blocking).
    pub fn accept(&self) -> Result<TransportStream> {
        loop {
            if let Some(stream) = self.try_accept(Duration::from_secs(1))? {
                return Ok(stream);
            }
        }
    }
}

/// Connect to a TCP endpoint, waiting at most `timeout`.
///
/// An empty `ip_address` targets `127.0.0.1`. A non-zero `local_port` is
/// bound before connecting; in that case the connect itself is blocking.
/// Returns `Ok(None)` when the timeout elapses.
pub fn try_connect_tcp(
    ip_address: &str,
    remote_port: u16,
    local_port: u16,
    timeout: Duration,
) -> Result<Option<TransportStream>> {
    let host = if ip_address.is_empty() {
        "127.0.0.1"
    } else {
        ip_address
    };

    let addresses: Vec<SocketAddr> = match host.parse::<IpAddr>() {
        Ok(ip) => vec![SocketAddr::new(ip, remote_port)],
        Err(_) => (host, remote_port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                address: format!("{host}:{remote_port}"),
                source,
            })?
            .collect(),
    };

    let mut last_error: Option<std::io::Error> = None;
    for address in addresses {
        let attempt = if local_port == 0 {
            TcpStream::connect_timeout(&address, timeout)
        } else {
            connect_from_local_port(&address, local_port)
        };
        match attempt {
            Ok(stream) => {
                debug!(%address, "connected to TCP endpoint");
                return Ok(Some(TransportStream::from_tcp(stream)?));
            }
            Err(err) if err.kind() == ErrorKind::TimedOut => return Ok(None),
            Err(err) => last_error = Some(err),
        }
    }

    Err(TransportError::Connect {
        address: format!("{host}:{remote_port}"),
        source: last_error
            .unwrap_or_else(|| std::io::Error::new(ErrorKind::AddrNotAvailable, "no address")),
    })
}

/// Unix domain socket server for a named local endpoint.
///
/// On Linux the abstract namespace is used, so no filesystem entry exists.
/// Elsewhere a socket file is created in the platform temporary directory
/// and removed on drop.
#[cfg(unix)]
pub struct UdsChannelServer {
    listener: UnixListener,
    #[cfg(not(target_os = "linux"))]
    path: PathBuf,
    #[cfg(not(target_os = "linux"))]
    created_inode: Option<(u64, u64)>,
}

#[cfg(unix)]
impl UdsChannelServer {
    pub fn new(name: &str) -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            use std::os::linux::net::SocketAddrExt;

            let abstract_name = format!("{SOCKET_NAME_PREFIX}{name}");
            let address = std::os::unix::net::SocketAddr::from_abstract_name(&abstract_name)
                .map_err(|source| TransportError::Bind {
                    address: abstract_name.clone(),
                    source,
                })?;
            let listener =
                UnixListener::bind_addr(&address).map_err(|source| TransportError::Bind {
                    address: abstract_name.clone(),
                    source,
                })?;
            listener.set_nonblocking(true)?;
            info!(name = %abstract_name, "listening on abstract unix domain socket");
            Ok(Self { listener })
        }

        #[cfg(not(target_os = "linux"))]
        {
            use std::os::unix::fs::{FileTypeExt, MetadataExt};

            let path = uds_path(name);

            // Remove a stale socket if one exists, but never remove
            // anything else occupying the path.
            if path.exists() {
                let metadata =
                    std::fs::symlink_metadata(&path).map_err(|source| TransportError::Bind {
                        address: path.display().to_string(),
                        source,
                    })?;
                if metadata.file_type().is_socket() {
                    debug!(path = %path.display(), "removing stale socket");
                    std::fs::remove_file(&path).map_err(|source| TransportError::Bind {
                        address: path.display().to_string(),
                        source,
                    })?;
                } else {
                    return Err(TransportError::Bind {
                        address: path.display().to_string(),
                        source: std::io::Error::new(
                            ErrorKind::AlreadyExists,
                            "existing path is not a unix socket",
                        ),
                    });
                }
            }

            let listener = UnixListener::bind(&path).map_err(|source| TransportError::Bind {
                address: path.display().to_string(),
                source,
            })?;
            listener.set_nonblocking(true)?;

            let created_metadata =
                std::fs::symlink_metadata(&path).map_err(|source| TransportError::Bind {
                    address: path.display().to_string(),
                    source,
                })?;
            let created_inode = Some((created_metadata.dev(), created_metadata.ino()));

            info!(path = %path.display(), "listening on unix domain socket");
            Ok(Self {
                listener,
                path,
                created_inode,
            })
        }
    }

    /// Accept the next connection, waiting at most `timeout`.
    pub fn try_accept(&self, timeout: Duration) -> Result<Option<TransportStream>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    debug!("accepted unix domain socket connection");
                    return Ok(Some(TransportStream::from_unix(stream)?));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(TransportError::Accept(err)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(ACCEPT_POLL_PERIOD);
            poll_readable(std::iter::once(self.listener.as_raw_fd()), wait)?;
        }
    }

    /// Accept the next connection (blocking).
    pub fn accept(&self) -> Result<TransportStream> {
        loop {
            if let Some(stream) = self.try_accept(Duration::from_secs(1))? {
                return Ok(stream);
            }
        }
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
impl Drop for UdsChannelServer {
    fn drop(&mut self) {
        use std::os::unix::fs::{FileTypeExt, MetadataExt};

        // Only remove the path if it is still the socket created in `new`;
        // an unrelated file may have taken the name in the meantime.
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = %self.path.display(), "cleaning up socket file");
                    let _ = std::fs::remove_file(&self.path);
                } else {
                    debug!(
                        path = %self.path.display(),
                        "socket path identity changed; skipping cleanup"
                    );
                }
            }
        }
    }
}

/// Connect to a named Unix domain socket endpoint.
#[cfg(unix)]
pub fn connect_uds(name: &str) -> Result<TransportStream> {
    #[cfg(target_os = "linux")]
    {
        use std::os::linux::net::SocketAddrExt;

        let abstract_name = format!("{SOCKET_NAME_PREFIX}{name}");
        let address = std::os::unix::net::SocketAddr::from_abstract_name(&abstract_name)
            .map_err(|source| TransportError::Connect {
                address: abstract_name.clone(),
                source,
            })?;
        let stream =
            UnixStream::connect_addr(&address).map_err(|source| TransportError::Connect {
                address: abstract_name.clone(),
                source,
            })?;
        TransportStream::from_unix(stream)
    }

    #[cfg(not(target_os = "linux"))]
    {
        let path = uds_path(name);
        let stream = UnixStream::connect(&path).map_err(|source| TransportError::Connect {
            address: path.display().to_string(),
            source,
        })?;
        TransportStream::from_unix(stream)
    }
}

#[cfg(not(target_os = "linux"))]
fn uds_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{SOCKET_NAME_PREFIX}{name}"))
}

/// Wait until one of the descriptors is readable or the timeout elapses.
#[cfg(unix)]
fn poll_readable(fds: impl Iterator<Item = RawFd>, timeout: Duration) -> Result<()> {
    let mut poll_fds: Vec<libc::pollfd> = fds
        .map(|fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    // SAFETY: `poll_fds` is a valid, writable slice of pollfd for the given
    // length, and the timeout is bounded.
    let rc = unsafe {
        libc::poll(
            poll_fds.as_mut_ptr(),
            poll_fds.len() as libc::nfds_t,
            timeout.as_millis() as libc::c_int,
        )
    };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(());
        }
        return Err(TransportError::Io(err));
    }
    Ok(())
}

/// Bind an IPv6 listener with `IPV6_V6ONLY`, so it can share the port with
/// the IPv4 listener.
fn bind_v6_only(port: u16, enable_remote_access: bool) -> Result<TcpListener> {
    #[cfg(unix)]
    {
        // SAFETY: plain socket creation; the descriptor is owned below.
        let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(TransportError::last_os("socket"));
        }

        let enable: libc::c_int = 1;
        // SAFETY: `fd` is a valid socket and `enable` outlives the call.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_V6ONLY,
                (&enable as *const libc::c_int).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            // SAFETY: fd was returned by socket() above.
            unsafe { libc::close(fd) };
            return Err(TransportError::last_os("setsockopt"));
        }

        let mut address: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
        address.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        address.sin6_port = port.to_be();
        if !enable_remote_access {
            address.sin6_addr.s6_addr[15] = 1; // ::1
        }

        // SAFETY: `address` is a properly initialized sockaddr_in6.
        let rc = unsafe {
            libc::bind(
                fd,
                (&address as *const libc::sockaddr_in6).cast(),
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            unsafe { libc::close(fd) };
            return Err(TransportError::last_os("bind"));
        }

        // SAFETY: fd is a bound socket.
        let rc = unsafe { libc::listen(fd, 128) };
        if rc != 0 {
            unsafe { libc::close(fd) };
            return Err(TransportError::last_os("listen"));
        }

        // SAFETY: fd is an owned, listening socket descriptor.
        Ok(unsafe { TcpListener::from_raw_fd(fd) })
    }

    #[cfg(not(unix))]
    {
        let _ = (port, enable_remote_access);
        Err(TransportError::System {
            operation: "bind_v6_only",
            code: 0,
        })
    }
}

/// Bind `local_port` and connect to `address` (blocking).
#[cfg(unix)]
fn connect_from_local_port(address: &SocketAddr, local_port: u16) -> std::io::Result<TcpStream> {
    let family = match address {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    // SAFETY: plain socket creation; the descriptor is owned below.
    let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let close_on_error = |fd: RawFd, err: std::io::Error| -> std::io::Error {
        // SAFETY: fd was returned by socket() above.
        unsafe { libc::close(fd) };
        err
    };

    let enable: libc::c_int = 1;
    // SAFETY: `fd` is a valid socket and `enable` outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            (&enable as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(close_on_error(fd, std::io::Error::last_os_error()));
    }

    let rc = match address {
        SocketAddr::V4(_) => {
            let mut local: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            local.sin_family = libc::AF_INET as libc::sa_family_t;
            local.sin_port = local_port.to_be();
            // SAFETY: `local` is a properly initialized sockaddr_in.
            unsafe {
                libc::bind(
                    fd,
                    (&local as *const libc::sockaddr_in).cast(),
                    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(_) => {
            let mut local: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            local.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            local.sin6_port = local_port.to_be();
            // SAFETY: `local` is a properly initialized sockaddr_in6.
            unsafe {
                libc::bind(
                    fd,
                    (&local as *const libc::sockaddr_in6).cast(),
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };
    if rc != 0 {
        return Err(close_on_error(fd, std::io::Error::last_os_error()));
    }

    let rc = match address {
        SocketAddr::V4(v4) => {
            let mut remote: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            remote.sin_family = libc::AF_INET as libc::sa_family_t;
            remote.sin_port = v4.port().to_be();
            remote.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            // SAFETY: `remote` is a properly initialized sockaddr_in.
            unsafe {
                libc::connect(
                    fd,
                    (&remote as *const libc::sockaddr_in).cast(),
                    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            let mut remote: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            remote.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            remote.sin6_port = v6.port().to_be();
            remote.sin6_addr.s6_addr = v6.ip().octets();
            // SAFETY: `remote` is a properly initialized sockaddr_in6.
            unsafe {
                libc::connect(
                    fd,
                    (&remote as *const libc::sockaddr_in6).cast(),
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };
    if rc != 0 {
        return Err(close_on_error(fd, std::io::Error::last_os_error()));
    }

    // SAFETY: fd is an owned, connected socket descriptor.
    Ok(unsafe { TcpStream::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_bind_accept_connect() {
        let server = TcpChannelServer::new(0, false).unwrap();
        let port = server.local_port();
        assert_ne!(port, 0);

        let connector = std::thread::spawn(move || {
            try_connect_tcp("127.0.0.1", port, 0, Duration::from_secs(1))
                .unwrap()
                .unwrap()
        });

        let mut accepted = server.accept().unwrap();
        let mut client = connector.join().unwrap();

        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn tcp_try_accept_times_out() {
        let server = TcpChannelServer::new(0, false).unwrap();
        let result = server.try_accept(Duration::from_millis(30)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn tcp_connect_with_explicit_local_port() {
        let server = TcpChannelServer::new(0, false).unwrap();
        let port = server.local_port();

        // Pick a free port for the client side by briefly binding it.
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let local_port = probe.local_addr().unwrap().port();
        drop(probe);

        let connector = std::thread::spawn(move || {
            try_connect_tcp("127.0.0.1", port, local_port, Duration::from_secs(1))
        });
        let _accepted = server.accept().unwrap();
        let stream = connector.join().unwrap().unwrap();
        assert!(stream.is_some());
    }

    #[test]
    #[cfg(unix)]
    fn uds_bind_accept_connect() {
        let name = format!("transport-test-{}", std::process::id());
        let server = UdsChannelServer::new(&name).unwrap();

        let name_clone = name.clone();
        let connector = std::thread::spawn(move || connect_uds(&name_clone).unwrap());

        let mut accepted = server.accept().unwrap();
        let mut client = connector.join().unwrap();

        client.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        accepted.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    #[cfg(unix)]
    fn stream_pair_roundtrip() {
        let (mut left, mut right) = TransportStream::pair().unwrap();
        left.write_all(b"xy").unwrap();
        let mut buf = [0u8; 2];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"xy");
    }

    #[test]
    #[cfg(unix)]
    fn shutdown_unblocks_pending_read() {
        let (mut left, right) = TransportStream::pair().unwrap();
        let handle = right.try_clone().unwrap();

        let reader = std::thread::spawn(move || {
            let mut right = right;
            let mut buf = [0u8; 1];
            right.read(&mut buf)
        });

        std::thread::sleep(Duration::from_millis(20));
        handle.shutdown();
        let result = reader.join().unwrap();
        assert_eq!(result.unwrap(), 0, "shutdown should surface EOF");

        drop(left.flush());
    }
}
