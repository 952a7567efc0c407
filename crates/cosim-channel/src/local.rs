//! Single-host channel over a named shared-memory ring.
//!
//! The region holds one byte ring per direction. Each ring has a header
//! with free-running read/write indices and a power-of-two data area.
//! Producers wait on the ring's `space` event when full; consumers wait on
//! its `data` event when empty. Event names embed the direction
//! (`cs` client→server, `sc` server→client) so the two endpoints never
//! collide on a name.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use cosim_transport::{NamedEvent, SharedMemory, SOCKET_NAME_PREFIX};
use tracing::debug;

use crate::channel::{Channel, ChannelReader, ChannelWriter};
use crate::error::{ChannelError, Result};

/// Bytes per direction. Must be a power of two.
const RING_DATA_SIZE: u32 = 64 * 1024;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

#[repr(C)]
struct RingHeader {
    read_index: AtomicU32,
    write_index: AtomicU32,
    disconnected: AtomicU32,
    size: AtomicU32,
}

const RING_HEADER_SIZE: usize = std::mem::size_of::<RingHeader>();
const RING_SIZE: usize = RING_HEADER_SIZE + RING_DATA_SIZE as usize;
const REGION_SIZE: usize = 2 * RING_SIZE;

/// One direction of the shared region.
#[derive(Clone, Copy)]
struct RingView {
    header: *mut RingHeader,
    data: *mut u8,
}

// SAFETY: all shared state behind the pointers is accessed through atomics;
// the data area is written only by the single producer and read only by the
// single consumer, with index stores ordering the accesses.
unsafe impl Send for RingView {}

impl RingView {
    /// # Safety
    /// `base` must point to a mapping of at least `offset + RING_SIZE`
    /// bytes that outlives the view.
    unsafe fn at(base: *mut u8, offset: usize) -> Self {
        let header = base.add(offset).cast::<RingHeader>();
        let data = base.add(offset + RING_HEADER_SIZE);
        Self { header, data }
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: guaranteed by the contract of `at`.
        unsafe { &*self.header }
    }

    fn initialize(&self) {
        let header = self.header();
        header.read_index.store(0, Ordering::Relaxed);
        header.write_index.store(0, Ordering::Relaxed);
        header.disconnected.store(0, Ordering::Relaxed);
        header.size.store(RING_DATA_SIZE, Ordering::Release);
    }

    fn is_disconnected(&self) -> bool {
        self.header().disconnected.load(Ordering::Acquire) != 0
    }

    fn mark_disconnected(&self) {
        self.header().disconnected.store(1, Ordering::Release);
    }
}

/// Writing half of a local channel.
pub struct LocalChannelWriter {
    ring: RingView,
    data_available: NamedEvent,
    space_available: NamedEvent,
    buf: BytesMut,
    disconnected: bool,
    _shm: Arc<SharedMemory>,
}

impl LocalChannelWriter {
    /// Append bytes to the current frame. Never partial.
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        if self.disconnected {
            return Err(ChannelError::Disconnected);
        }
        self.buf.extend_from_slice(src);
        Ok(())
    }

    /// Finalize the current frame: push the buffered bytes into the ring.
    pub fn end_write(&mut self) -> Result<()> {
        if self.disconnected {
            return Err(ChannelError::Disconnected);
        }

        let result = self.drain_buffer();
        self.buf.clear();
        if matches!(result, Err(ChannelError::Disconnected)) {
            self.disconnected = true;
        }
        result
    }

    fn drain_buffer(&mut self) -> Result<()> {
        let header = self.ring.header();
        let size = header.size.load(Ordering::Acquire);
        let mask = size - 1;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            if self.ring.is_disconnected() {
                return Err(ChannelError::Disconnected);
            }

            let read = header.read_index.load(Ordering::Acquire);
            let write = header.write_index.load(Ordering::Relaxed);
            let free = size - write.wrapping_sub(read);
            if free == 0 {
                self.space_available.wait()?;
                continue;
            }

            let n = (free as usize).min(self.buf.len() - offset);
            let position = (write & mask) as usize;
            let first = n.min(size as usize - position);

            // SAFETY: the producer exclusively owns [write, write + free);
            // both segments are inside the ring's data area.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.buf.as_ptr().add(offset),
                    self.ring.data.add(position),
                    first,
                );
                std::ptr::copy_nonoverlapping(
                    self.buf.as_ptr().add(offset + first),
                    self.ring.data,
                    n - first,
                );
            }

            header
                .write_index
                .store(write.wrapping_add(n as u32), Ordering::Release);
            self.data_available.set();
            offset += n;
        }
        Ok(())
    }

    /// Mark this direction disconnected and wake both endpoints.
    pub fn disconnect(&mut self) {
        self.disconnected = true;
        self.ring.mark_disconnected();
        self.data_available.set();
        self.space_available.set();
    }
}

/// Reading half of a local channel.
pub struct LocalChannelReader {
    ring: RingView,
    data_available: NamedEvent,
    space_available: NamedEvent,
    disconnected: bool,
    _shm: Arc<SharedMemory>,
}

impl LocalChannelReader {
    /// Read exactly `dst.len()` bytes, blocking until they are delivered.
    ///
    /// Bytes already in the ring are served before a disconnect surfaces.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<()> {
        if self.disconnected {
            return Err(ChannelError::Disconnected);
        }
        let result = self.read_inner(dst);
        if matches!(result, Err(ChannelError::Disconnected)) {
            self.disconnected = true;
        }
        result
    }

    fn read_inner(&mut self, dst: &mut [u8]) -> Result<()> {
        let header = self.ring.header();
        let size = header.size.load(Ordering::Acquire);
        let mask = size - 1;

        let mut offset = 0usize;
        while offset < dst.len() {
            let write = header.write_index.load(Ordering::Acquire);
            let read = header.read_index.load(Ordering::Relaxed);
            let used = write.wrapping_sub(read);
            if used == 0 {
                if self.ring.is_disconnected() {
                    return Err(ChannelError::Disconnected);
                }
                self.data_available.wait()?;
                continue;
            }

            let n = (used as usize).min(dst.len() - offset);
            let position = (read & mask) as usize;
            let first = n.min(size as usize - position);

            // SAFETY: the consumer exclusively owns [read, read + used);
            // both segments are inside the ring's data area.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.ring.data.add(position),
                    dst.as_mut_ptr().add(offset),
                    first,
                );
                std::ptr::copy_nonoverlapping(
                    self.ring.data,
                    dst.as_mut_ptr().add(offset + first),
                    n - first,
                );
            }

            header
                .read_index
                .store(read.wrapping_add(n as u32), Ordering::Release);
            self.space_available.set();
            offset += n;
        }
        Ok(())
    }

    /// Mark this direction disconnected and wake both endpoints.
    pub fn disconnect(&mut self) {
        self.disconnected = true;
        self.ring.mark_disconnected();
        self.data_available.set();
        self.space_available.set();
    }
}

fn base_name(name: &str) -> String {
    format!("{SOCKET_NAME_PREFIX}{name}")
}

fn event_name(base: &str, direction: &str, role: &str) -> String {
    format!("{base}.{direction}.{role}")
}

struct RingEvents {
    data_available: NamedEvent,
    space_available: NamedEvent,
}

fn open_events(base: &str, direction: &str) -> Result<RingEvents> {
    Ok(RingEvents {
        data_available: NamedEvent::open(&event_name(base, direction, "data"))?,
        space_available: NamedEvent::open(&event_name(base, direction, "space"))?,
    })
}

fn assemble_channel(
    shm: Arc<SharedMemory>,
    read_direction: &str,
    write_direction: &str,
    base: &str,
) -> Result<Channel> {
    let read_offset = if read_direction == "cs" { 0 } else { RING_SIZE };
    let write_offset = if write_direction == "cs" { 0 } else { RING_SIZE };

    // SAFETY: the mapping spans REGION_SIZE bytes and is kept alive by the
    // Arc clones stored in both halves.
    let (read_ring, write_ring) = unsafe {
        (
            RingView::at(shm.as_ptr(), read_offset),
            RingView::at(shm.as_ptr(), write_offset),
        )
    };

    let read_events = open_events(base, read_direction)?;
    let write_events = open_events(base, write_direction)?;

    let reader = LocalChannelReader {
        ring: read_ring,
        data_available: read_events.data_available,
        space_available: read_events.space_available,
        disconnected: false,
        _shm: Arc::clone(&shm),
    };
    let writer = LocalChannelWriter {
        ring: write_ring,
        data_available: write_events.data_available,
        space_available: write_events.space_available,
        buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        disconnected: false,
        _shm: shm,
    };

    Ok(Channel::from_local_parts(reader, writer))
}

/// Server side of a named local channel.
///
/// Creates the shared region and the named events; a client announces
/// itself by signalling the accept event.
pub struct LocalChannelServer {
    shm: Arc<SharedMemory>,
    accept_event: NamedEvent,
    base: String,
    // Keep ownership of the names so they are unlinked on drop.
    _events: Vec<NamedEvent>,
}

impl LocalChannelServer {
    pub fn new(name: &str) -> Result<Self> {
        let base = base_name(name);
        let shm = Arc::new(SharedMemory::create(&base, REGION_SIZE)?);

        // SAFETY: the fresh mapping spans REGION_SIZE bytes.
        unsafe {
            RingView::at(shm.as_ptr(), 0).initialize();
            RingView::at(shm.as_ptr(), RING_SIZE).initialize();
        }

        let mut events = Vec::with_capacity(4);
        for direction in ["cs", "sc"] {
            for role in ["data", "space"] {
                events.push(NamedEvent::create(&event_name(&base, direction, role))?);
            }
        }
        let accept_event = NamedEvent::create(&event_name(&base, "accept", "event"))?;

        debug!(name, "created local channel server");

        Ok(Self {
            shm,
            accept_event,
            base,
            _events: events,
        })
    }

    /// Wait for a client to connect, at most `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout elapses.
    pub fn try_accept(&self, timeout: Duration) -> Result<Option<Channel>> {
        if !self.accept_event.try_wait(timeout)? {
            return Ok(None);
        }
        let channel = assemble_channel(Arc::clone(&self.shm), "cs", "sc", &self.base)?;
        debug!(name = %self.base, "accepted local channel connection");
        Ok(Some(channel))
    }
}

/// Connect to a named local channel created by [`LocalChannelServer`].
pub fn connect_local(name: &str) -> Result<Channel> {
    let base = base_name(name);
    let shm = Arc::new(SharedMemory::open(&base, REGION_SIZE)?);
    let channel = assemble_channel(shm, "sc", "cs", &base)?;

    let accept_event = NamedEvent::open(&event_name(&base, "accept", "event"))?;
    accept_event.set();

    debug!(name, "connected to local channel");
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("local-channel-{tag}-{}", std::process::id())
    }

    #[test]
    fn connect_accept_roundtrip() {
        let name = unique_name("roundtrip");
        let server = LocalChannelServer::new(&name).unwrap();

        let client_name = name.clone();
        let client = std::thread::spawn(move || connect_local(&client_name).unwrap());

        let mut server_channel = server
            .try_accept(Duration::from_secs(2))
            .unwrap()
            .expect("client should connect");
        let mut client_channel = client.join().unwrap();

        client_channel.writer().write(b"step").unwrap();
        client_channel.writer().end_write().unwrap();

        let mut buf = [0u8; 4];
        server_channel.reader().read(&mut buf).unwrap();
        assert_eq!(&buf, b"step");

        server_channel.writer().write(b"ok").unwrap();
        server_channel.writer().end_write().unwrap();

        let mut buf = [0u8; 2];
        client_channel.reader().read(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[test]
    fn try_accept_times_out() {
        let server = LocalChannelServer::new(&unique_name("timeout")).unwrap();
        let accepted = server.try_accept(Duration::from_millis(30)).unwrap();
        assert!(accepted.is_none());
    }

    #[test]
    fn large_transfer_wraps_ring() {
        let name = unique_name("wrap");
        let server = LocalChannelServer::new(&name).unwrap();

        let client_name = name.clone();
        let payload: Vec<u8> = (0..RING_DATA_SIZE * 3).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let client = std::thread::spawn(move || {
            let mut channel = connect_local(&client_name).unwrap();
            channel.writer().write(&payload).unwrap();
            channel.writer().end_write().unwrap();
            channel
        });

        let mut server_channel = server
            .try_accept(Duration::from_secs(2))
            .unwrap()
            .expect("client should connect");

        let mut received = vec![0u8; expected.len()];
        server_channel.reader().read(&mut received).unwrap();
        assert_eq!(received, expected);

        let _client_channel = client.join().unwrap();
    }

    #[test]
    fn disconnect_unblocks_pending_read() {
        let name = unique_name("disconnect");
        let server = LocalChannelServer::new(&name).unwrap();

        let client_name = name.clone();
        let client = std::thread::spawn(move || connect_local(&client_name).unwrap());

        let mut server_channel = server
            .try_accept(Duration::from_secs(2))
            .unwrap()
            .expect("client should connect");
        let mut client_channel = client.join().unwrap();

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            let result = server_channel.reader().read(&mut buf);
            assert!(matches!(result, Err(ChannelError::Disconnected)));
        });

        std::thread::sleep(Duration::from_millis(20));
        client_channel.disconnect();
        reader.join().unwrap();
    }
}
