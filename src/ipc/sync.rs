//! Process-shared synchronization primitives placed in shared memory.
//!
//! All in-region primitives are constructed in place by the coordinator
//! (`init` on a raw pointer into the mapping); peers reinterpret the bytes.
//! Destruction is deliberately skipped: the regions outlive any single
//! process and are unlinked on the next coordinator start.

use std::cell::UnsafeCell;
use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::time::Duration;

/// A process-shared counting semaphore living inside a shared-memory region.
#[repr(C)]
pub struct ShmSemaphore {
    inner: UnsafeCell<libc::sem_t>,
}

unsafe impl Send for ShmSemaphore {}
unsafe impl Sync for ShmSemaphore {}

impl ShmSemaphore {
    /// In-place construction on a freshly created region, count zero.
    ///
    /// # Safety
    /// `this` must point into a writable mapping with room and alignment for
    /// a `ShmSemaphore`, and no other process may be using the slot yet.
    pub unsafe fn init(this: *mut ShmSemaphore) -> io::Result<()> {
        if unsafe { libc::sem_init((*this).inner.get(), 1, 0) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn post(&self) {
        unsafe {
            libc::sem_post(self.inner.get());
        }
    }

    pub fn wait(&self) {
        loop {
            if unsafe { libc::sem_wait(self.inner.get()) } == 0 {
                return;
            }
            if io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                return;
            }
        }
    }

    /// Wait with a deadline so callers can observe shutdown; returns whether
    /// the semaphore was acquired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut now = MaybeUninit::<libc::timespec>::uninit();
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, now.as_mut_ptr()) } != 0 {
            self.wait();
            return true;
        }
        let now = unsafe { now.assume_init() };

        let nanos = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
        let deadline = libc::timespec {
            tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t + (nanos / 1_000_000_000),
            tv_nsec: nanos % 1_000_000_000,
        };

        loop {
            if unsafe { libc::sem_timedwait(self.inner.get(), &deadline) } == 0 {
                return true;
            }
            match io::Error::last_os_error().raw_os_error() {
                Some(libc::EINTR) => continue,
                _ => return false,
            }
        }
    }
}

/// A named (filesystem-visible) POSIX semaphore used for the coordinator
/// readiness handshake around the database open.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
}

unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create a fresh semaphore at count zero, unlinking any stale instance
    /// of the same name first. Coordinator only.
    pub fn create(name: &str) -> io::Result<Self> {
        let c_name = sem_name(name)?;
        unsafe {
            libc::sem_unlink(c_name.as_ptr());
        }
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                0 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem })
    }

    /// Open the coordinator's semaphore, blocking until it exists.
    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = sem_name(name)?;
        let mut waiting_logged = false;
        loop {
            let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
            if sem != libc::SEM_FAILED {
                return Ok(Self { sem });
            }

            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }

            if !waiting_logged {
                tracing::info!(name, "waiting for coordinator semaphore");
                waiting_logged = true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn post(&self) {
        unsafe {
            libc::sem_post(self.sem);
        }
    }

    pub fn wait(&self) {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return;
            }
            if io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                return;
            }
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

/// Readiness gate at the head of the IPC region: a flag guarded by a
/// process-shared mutex and condition variable. The coordinator flips the
/// flag and broadcasts once every slot is constructed; peers block until
/// they observe it.
#[repr(C)]
pub struct ReadyGate {
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    cond: UnsafeCell<libc::pthread_cond_t>,
    ready: UnsafeCell<bool>,
}

unsafe impl Send for ReadyGate {}
unsafe impl Sync for ReadyGate {}

impl ReadyGate {
    /// # Safety
    /// Same contract as [`ShmSemaphore::init`].
    pub unsafe fn init(this: *mut ReadyGate) -> io::Result<()> {
        unsafe {
            let mut mutex_attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            check(libc::pthread_mutexattr_init(mutex_attr.as_mut_ptr()))?;
            check(libc::pthread_mutexattr_setpshared(
                mutex_attr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            ))?;
            check(libc::pthread_mutex_init(
                (*this).mutex.get(),
                mutex_attr.as_ptr(),
            ))?;
            libc::pthread_mutexattr_destroy(mutex_attr.as_mut_ptr());

            let mut cond_attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
            check(libc::pthread_condattr_init(cond_attr.as_mut_ptr()))?;
            check(libc::pthread_condattr_setpshared(
                cond_attr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            ))?;
            check(libc::pthread_cond_init((*this).cond.get(), cond_attr.as_ptr()))?;
            libc::pthread_condattr_destroy(cond_attr.as_mut_ptr());

            (*this).ready.get().write(false);
        }
        Ok(())
    }

    pub fn set_ready(&self) {
        unsafe {
            libc::pthread_mutex_lock(self.mutex.get());
            self.ready.get().write(true);
            libc::pthread_cond_broadcast(self.cond.get());
            libc::pthread_mutex_unlock(self.mutex.get());
        }
    }

    pub fn wait_ready(&self) {
        unsafe {
            libc::pthread_mutex_lock(self.mutex.get());
            while !self.ready.get().read() {
                libc::pthread_cond_wait(self.cond.get(), self.mutex.get());
            }
            libc::pthread_mutex_unlock(self.mutex.get());
        }
    }
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

fn sem_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn boxed_semaphore() -> Arc<ShmSemaphore> {
        // In tests the semaphore lives on the heap instead of a mapped
        // region; sem_init with pshared still works within one process.
        let sem: Arc<ShmSemaphore> = Arc::new(unsafe { std::mem::zeroed() });
        unsafe {
            ShmSemaphore::init(Arc::as_ptr(&sem) as *mut ShmSemaphore).unwrap();
        }
        sem
    }

    #[test]
    fn semaphore_post_then_wait() {
        let sem = boxed_semaphore();
        sem.post();
        assert!(sem.wait_timeout(Duration::from_millis(100)));
    }

    #[test]
    fn semaphore_wait_timeout_expires() {
        let sem = boxed_semaphore();
        let start = Instant::now();
        assert!(!sem.wait_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn semaphore_wakes_blocked_thread() {
        let sem = boxed_semaphore();
        let waiter = Arc::clone(&sem);
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        sem.post();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn ready_gate_releases_waiter() {
        let gate: Arc<ReadyGate> = Arc::new(unsafe { std::mem::zeroed() });
        unsafe {
            ReadyGate::init(Arc::as_ptr(&gate) as *mut ReadyGate).unwrap();
        }

        let waiter = Arc::clone(&gate);
        let handle = std::thread::spawn(move || waiter.wait_ready());
        std::thread::sleep(Duration::from_millis(20));
        gate.set_ready();
        handle.join().unwrap();
    }
}
