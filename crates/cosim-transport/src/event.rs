use std::ffi::CString;
use std::time::Duration;

use crate::error::{Result, TransportError};

/// A named, process-shared event backed by a POSIX semaphore.
///
/// `set` wakes one pending `wait`. Waits consume one pending set, so a set
/// with no waiter is remembered. The creating side unlinks the name on drop;
/// both sides close their handle.
pub struct NamedEvent {
    sem: *mut libc::sem_t,
    name: CString,
    owner: bool,
}

// SAFETY: sem_t operations are async-signal-safe and process-shared; the
// raw pointer is only handed to libc semaphore calls.
unsafe impl Send for NamedEvent {}
unsafe impl Sync for NamedEvent {}

impl NamedEvent {
    /// Create a new named event, initially not set.
    pub fn create(name: &str) -> Result<Self> {
        Self::open_with(name, true)
    }

    /// Open an existing named event.
    pub fn open(name: &str) -> Result<Self> {
        Self::open_with(name, false)
    }

    fn open_with(name: &str, create: bool) -> Result<Self> {
        let c_name = sem_name(name)?;

        let sem = if create {
            // SAFETY: `c_name` is a valid NUL-terminated string.
            unsafe {
                libc::sem_open(
                    c_name.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL,
                    0o600 as libc::mode_t,
                    0u32,
                )
            }
        } else {
            // SAFETY: as above.
            unsafe { libc::sem_open(c_name.as_ptr(), 0) }
        };

        if sem == libc::SEM_FAILED {
            return Err(TransportError::last_os("sem_open"));
        }

        Ok(Self {
            sem,
            name: c_name,
            owner: create,
        })
    }

    /// Signal the event.
    pub fn set(&self) {
        // SAFETY: `sem` is a valid semaphore handle.
        unsafe { libc::sem_post(self.sem) };
    }

    /// Wait until the event is signalled.
    pub fn wait(&self) -> Result<()> {
        loop {
            // SAFETY: `sem` is a valid semaphore handle.
            let rc = unsafe { libc::sem_wait(self.sem) };
            if rc == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(TransportError::Io(err));
        }
    }

    /// Wait until the event is signalled or the timeout elapses.
    ///
    /// Returns `false` on timeout.
    pub fn try_wait(&self, timeout: Duration) -> Result<bool> {
        let mut deadline: libc::timespec = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `deadline` is a valid writable timespec.
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut deadline) };

        deadline.tv_sec += timeout.as_secs() as libc::time_t;
        deadline.tv_nsec += timeout.subsec_nanos() as libc::c_long;
        if deadline.tv_nsec >= 1_000_000_000 {
            deadline.tv_sec += 1;
            deadline.tv_nsec -= 1_000_000_000;
        }

        loop {
            // SAFETY: `sem` is valid and `deadline` is a valid timespec.
            let rc = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if rc == 0 {
                return Ok(true);
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl Drop for NamedEvent {
    fn drop(&mut self) {
        // SAFETY: `sem` and `name` were produced by sem_open above.
        unsafe {
            libc::sem_close(self.sem);
            if self.owner {
                libc::sem_unlink(self.name.as_ptr());
            }
        }
    }
}

/// POSIX semaphore names are a single path component with a leading slash.
fn sem_name(name: &str) -> Result<CString> {
    let flat = name.replace('/', "_");
    CString::new(format!("/{flat}")).map_err(|_| TransportError::System {
        operation: "sem_name",
        code: libc::EINVAL,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("cosim-event-{tag}-{}", std::process::id())
    }

    #[test]
    fn set_before_wait_is_remembered() {
        let event = NamedEvent::create(&unique_name("pre")).unwrap();
        event.set();
        event.wait().unwrap();
    }

    #[test]
    fn try_wait_times_out() {
        let event = NamedEvent::create(&unique_name("timeout")).unwrap();
        assert!(!event.try_wait(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn set_wakes_waiting_thread() {
        let name = unique_name("wake");
        let event = NamedEvent::create(&name).unwrap();
        let peer = NamedEvent::open(&name).unwrap();

        let waiter = std::thread::spawn(move || event.try_wait(Duration::from_secs(2)).unwrap());
        std::thread::sleep(Duration::from_millis(20));
        peer.set();
        assert!(waiter.join().unwrap());
    }
}
