//! Memory of a live process, read with `process_vm_readv(2)`.
//!
//! The kernel checks every page, so reading a garbage address gives `EFAULT`
//! instead of a crash. That makes this safe to point at candidate frames of
//! our own process too.

use crate::mem::Memory;
use crate::stdext::with_last_os_error_str;
use crate::vm::ProbeFault;
use crate::Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessMemory {
    pid: libc::pid_t,
}

impl ProcessMemory {
    /// The caller must have ptrace access to `pid`, and should keep the
    /// inspected thread stopped while reading.
    pub fn new(pid: libc::pid_t) -> Self {
        Self { pid }
    }

    pub fn current() -> Self {
        // SAFETY: getpid has no preconditions.
        Self::new(unsafe { libc::getpid() })
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }
}

impl Memory for ProcessMemory {
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ProbeFault> {
        let local = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let remote = libc::iovec {
            iov_base: addr.get() as usize as *mut libc::c_void,
            iov_len: buf.len(),
        };

        // SAFETY: `local` covers exactly `buf`. The remote side is checked by
        // the kernel and never dereferenced by us.
        let read = unsafe { libc::process_vm_readv(self.pid, &local, 1, &remote, 1, 0) };
        if read < 0 {
            with_last_os_error_str(|err| {
                trace!(pid = self.pid, ?addr, "process_vm_readv failed: {err}")
            });
            return Err(ProbeFault::Unreadable(addr));
        }
        if read as usize != buf.len() {
            trace!(pid = self.pid, ?addr, read, "short read");
            return Err(ProbeFault::Unreadable(addr));
        }
        Ok(())
    }
}
