use alloc::vec;
use alloc::vec::Vec;

use crate::vm::ProbeFault;
use crate::Addr;

/// Read-only access to the memory of a suspended target.
pub trait Memory {
    /// Fills `buf` with the bytes at `addr`. Partial reads are faults.
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ProbeFault>;

    /// Reads one little-endian machine word.
    fn read_word(&self, addr: Addr) -> Result<u64, ProbeFault> {
        let mut buf = [0; 8];
        self.read(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl<M: Memory + ?Sized> Memory for &M {
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ProbeFault> {
        (**self).read(addr, buf)
    }
}

/// A copy of a range of the target's stack, for example out of a core file.
#[derive(Debug, Clone)]
pub struct StackImage {
    base: Addr,
    bytes: Vec<u8>,
}

impl StackImage {
    /// A zeroed image of `len` bytes starting at `base`.
    pub fn new(base: Addr, len: usize) -> Self {
        Self {
            base,
            bytes: vec![0; len],
        }
    }

    pub fn from_bytes(base: Addr, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    pub fn base(&self) -> Addr {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, addr: Addr, len: usize) -> Option<core::ops::Range<usize>> {
        let start = usize::try_from(addr.get().checked_sub(self.base.get())?).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.bytes.len()).then_some(start..end)
    }

    /// Stores a little-endian word. Returns `false` if `addr` is outside the
    /// image.
    pub fn write_word(&mut self, addr: Addr, value: u64) -> bool {
        match self.range(addr, 8) {
            Some(range) => {
                self.bytes[range].copy_from_slice(&value.to_le_bytes());
                true
            }
            None => false,
        }
    }
}

impl Memory for StackImage {
    fn read(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ProbeFault> {
        let range = self
            .range(addr, buf.len())
            .ok_or(ProbeFault::Unreadable(addr))?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }
}
