//! Double-mapped memory: the same physical pages mapped twice, back to back.
//!
//! Any region of up to `capacity` bytes starting anywhere in the first mapping is
//! contiguous in virtual memory, which lets the ring buffer hand out plain slices that
//! run across the wrap point.

use crate::{Error, Result};

/// System page size.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
    }
    4096
}

/// Owner of a double mapping of `capacity` bytes.
pub(crate) struct MirroredMemory {
    address: *mut u8,
    capacity: usize,
}

// SAFETY: the mapping is plain memory owned by this value; concurrent access to the
// bytes is coordinated by the ring buffer's offsets.
unsafe impl Send for MirroredMemory {}
unsafe impl Sync for MirroredMemory {}

impl MirroredMemory {
    /// Maps `capacity` bytes twice. `capacity` must be a multiple of the page size.
    #[cfg(unix)]
    pub(crate) fn new(capacity: usize) -> Result<Self> {
        debug_assert!(capacity > 0 && capacity % page_size() == 0);

        let fd = shared_fd(capacity)?;
        let result = map_twice(fd, capacity);
        // SAFETY: fd came from memfd_create/shm_open and is no longer needed once mapped.
        unsafe {
            libc::close(fd);
        }
        let address = result?;
        Ok(Self { address, capacity })
    }

    #[cfg(not(unix))]
    pub(crate) fn new(_capacity: usize) -> Result<Self> {
        Err(Error::SystemResources(
            "mirrored memory requires a unix target".to_string(),
        ))
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.address
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for MirroredMemory {
    fn drop(&mut self) {
        #[cfg(unix)]
        // SAFETY: address/2*capacity is exactly the reservation made in map_twice.
        unsafe {
            libc::munmap(self.address as *mut libc::c_void, self.capacity * 2);
        }
    }
}

#[cfg(unix)]
fn os_error(what: &str) -> Error {
    Error::SystemResources(format!("{}: {}", what, std::io::Error::last_os_error()))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn shared_fd(capacity: usize) -> Result<libc::c_int> {
    let name = c"cadence-ring";
    // SAFETY: name is a valid NUL-terminated string.
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(os_error("memfd_create"));
    }
    truncate(fd, capacity)
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn shared_fd(capacity: usize) -> Result<libc::c_int> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let name = format!(
        "/cadence-ring-{}-{}\0",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let name_ptr = name.as_ptr() as *const libc::c_char;
    // SAFETY: name is NUL-terminated and outlives both calls.
    let fd = unsafe {
        libc::shm_open(
            name_ptr,
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            0o600 as libc::mode_t,
        )
    };
    if fd < 0 {
        return Err(os_error("shm_open"));
    }
    // SAFETY: the object stays alive through fd; the name is not needed anymore.
    unsafe {
        libc::shm_unlink(name_ptr);
    }
    truncate(fd, capacity)
}

#[cfg(unix)]
fn truncate(fd: libc::c_int, capacity: usize) -> Result<libc::c_int> {
    // SAFETY: fd is a freshly created shared memory object.
    if unsafe { libc::ftruncate(fd, capacity as libc::off_t) } != 0 {
        let err = os_error("ftruncate");
        // SAFETY: fd is owned here and closed exactly once on this path.
        unsafe {
            libc::close(fd);
        }
        return Err(err);
    }
    Ok(fd)
}

#[cfg(unix)]
fn map_twice(fd: libc::c_int, capacity: usize) -> Result<*mut u8> {
    // SAFETY: reserving address space with PROT_NONE; the two fixed mappings below
    // replace the reservation in place, so no other mapping can be clobbered.
    unsafe {
        let base = libc::mmap(
            std::ptr::null_mut(),
            capacity * 2,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if base == libc::MAP_FAILED {
            return Err(os_error("mmap reserve"));
        }

        for half in 0..2 {
            let target = (base as *mut u8).add(half * capacity) as *mut libc::c_void;
            let mapped = libc::mmap(
                target,
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_FIXED | libc::MAP_SHARED,
                fd,
                0,
            );
            if mapped != target {
                let err = os_error("mmap mirror");
                libc::munmap(base, capacity * 2);
                return Err(err);
            }
        }

        Ok(base as *mut u8)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_writes_visible_in_both_halves() {
        let capacity = page_size();
        let memory = MirroredMemory::new(capacity).unwrap();
        let ptr = memory.as_ptr();
        unsafe {
            *ptr = 0xAB;
            *ptr.add(capacity + 1) = 0xCD;
            assert_eq!(*ptr.add(capacity), 0xAB);
            assert_eq!(*ptr.add(1), 0xCD);
        }
    }
}
