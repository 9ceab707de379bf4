//! Named POSIX shared-memory objects.
//!
//! The coordinator creates each region after unlinking any stale instance;
//! peers map the existing object read-write. Regions are never unmapped
//! before process exit and are unlinked again on the next coordinator start,
//! so destructors only tear down this process's mapping.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
use std::time::Duration;

/// How long a peer sleeps between attempts to open a region the coordinator
/// has not created yet.
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(10);

/// A mapped named shared-memory object (`shm_open` + `mmap`).
pub struct SharedMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// The region is plain shared bytes; synchronization lives in the structures
// placed on it (semaphores, pshared mutexes, atomics).
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Create a fresh region of `len` bytes, removing any stale object of
    /// the same name first. Coordinator only.
    pub fn create(name: &str, len: usize) -> io::Result<Self> {
        let c_name = shm_name(name)?;

        unsafe {
            // Stale instance from a previous run, if any.
            libc::shm_unlink(c_name.as_ptr());
        }

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        Self::map(fd, len)
    }

    /// Map an existing region, blocking until the coordinator has created it.
    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = shm_name(name)?;
        let mut waiting_logged = false;

        let fd = loop {
            let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
            if fd >= 0 {
                break fd;
            }

            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }

            if !waiting_logged {
                tracing::info!(name, "waiting for shared memory object");
                waiting_logged = true;
            }
            std::thread::sleep(OPEN_RETRY_DELAY);
        };

        let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
        if unsafe { libc::fstat(fd, stat.as_mut_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let len = unsafe { stat.assume_init() }.st_size as usize;

        Self::map(fd, len)
    }

    fn map(fd: libc::c_int, len: usize) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // The mapping keeps the object alive without the descriptor.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: NonNull::new(ptr as *mut u8).ok_or_else(io::Error::last_os_error)?,
            len,
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        // Unmap only; the named object itself outlives the process.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

fn shm_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))
}
