use std::ffi::CString;

use tracing::debug;

use crate::error::{Result, TransportError};

/// A named POSIX shared-memory region.
///
/// The creating side owns the name: it unlinks the region on drop. Openers
/// only unmap. The OS reference-counts the mapping, so the region stays
/// alive until both sides have dropped it.
pub struct SharedMemory {
    ptr: *mut u8,
    size: usize,
    name: CString,
    owner: bool,
}

// SAFETY: the mapping is valid for the lifetime of the struct and all
// concurrent access goes through atomics placed in the region by the user.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Create a new named region of `size` bytes, zero-initialized.
    ///
    /// Fails if a region with this name already exists.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        Self::map(name, size, true)
    }

    /// Open an existing named region of `size` bytes.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        Self::map(name, size, false)
    }

    fn map(name: &str, size: usize, create: bool) -> Result<Self> {
        let c_name = shm_name(name)?;

        let flags = if create {
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR
        } else {
            libc::O_RDWR
        };

        // SAFETY: `c_name` is a valid NUL-terminated string.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, 0o600 as libc::mode_t) };
        if fd < 0 {
            return Err(TransportError::last_os("shm_open"));
        }

        if create {
            // SAFETY: fd was returned by shm_open above.
            let rc = unsafe { libc::ftruncate(fd, size as libc::off_t) };
            if rc != 0 {
                let err = TransportError::last_os("ftruncate");
                // SAFETY: fd is owned here.
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err);
            }
        }

        // SAFETY: fd refers to a shared-memory object of at least `size`
        // bytes; the mapping is private to this struct.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // The descriptor is no longer needed once mapped.
        // SAFETY: fd is owned here.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            let err = TransportError::last_os("mmap");
            if create {
                // SAFETY: `c_name` is valid; we created the object above.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
            return Err(err);
        }

        debug!(name, size, create, "mapped shared memory region");

        Ok(Self {
            ptr: ptr.cast(),
            size,
            name: c_name,
            owner: create,
        })
    }

    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        // SAFETY: `ptr` and `size` describe the mapping created in `map`.
        unsafe {
            libc::munmap(self.ptr.cast(), self.size);
            if self.owner {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}

/// POSIX shm names are a single path component with a leading slash.
fn shm_name(name: &str) -> Result<CString> {
    let flat = name.replace('/', "_");
    CString::new(format!("/{flat}")).map_err(|_| TransportError::System {
        operation: "shm_name",
        code: libc::EINVAL,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("cosim-shm-{tag}-{}", std::process::id())
    }

    #[test]
    fn create_open_share_bytes() {
        let name = unique_name("share");
        let region = SharedMemory::create(&name, 4096).unwrap();
        let peer = SharedMemory::open(&name, 4096).unwrap();

        // SAFETY: both mappings cover 4096 valid bytes.
        unsafe {
            region.as_ptr().write(0xAB);
            assert_eq!(peer.as_ptr().read(), 0xAB);
        }
    }

    #[test]
    fn create_twice_fails() {
        let name = unique_name("dup");
        let _region = SharedMemory::create(&name, 1024).unwrap();
        let second = SharedMemory::create(&name, 1024);
        assert!(matches!(second, Err(TransportError::System { .. })));
    }

    #[test]
    fn unlinked_after_owner_drop() {
        let name = unique_name("unlink");
        let region = SharedMemory::create(&name, 1024).unwrap();
        drop(region);
        let reopened = SharedMemory::open(&name, 1024);
        assert!(reopened.is_err());
    }
}
