//! Recovers the current Java frame of a suspended thread from raw register
//! state when no reliable unwind information is available.
//!
//! The entry point is [`guess::FrameGuesser`]. Everything it needs from the
//! target (memory, the code cache, thread checkpoints, frame construction) is
//! injected through the traits in [`vm`], [`code`] and [`mem`], so the same
//! algorithm runs against a live process, a captured stack image or a fake.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate tracing;

use alloc::string::String;
use core::fmt;

pub mod arch;
pub mod code;
pub mod guess;
#[cfg(unix)]
pub mod identify;
pub mod mem;
#[cfg(target_os = "linux")]
pub mod process;
pub mod regs;
pub mod stack;
#[cfg(target_os = "linux")]
mod stdext;
pub mod vm;
pub mod walk;

#[cfg(test)]
mod testutil;

pub use guess::{FrameGuess, FrameGuesser, GuessSource};
pub use regs::RegisterSnapshot;
pub use vm::ProbeFault;

/// A non-null address in the target's address space.
///
/// A null address is never stored: "unknown" is `Option<Addr>`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(u64);

impl Addr {
    pub const fn new(value: u64) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self(value))
        }
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).and_then(Self::new)
    }

    pub fn checked_sub(self, bytes: u64) -> Option<Self> {
        self.0.checked_sub(bytes).and_then(Self::new)
    }

    pub fn checked_offset(self, bytes: i64) -> Option<Self> {
        self.0.checked_add_signed(bytes).and_then(Self::new)
    }

    pub fn is_aligned(self, align: u64) -> bool {
        align != 0 && self.0 % align == 0
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// An error that the caller has to deal with. Failing to find a frame is not
/// one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error(String);

impl Error {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ProbeFault> for Error {
    fn from(fault: ProbeFault) -> Self {
        Self(alloc::format!("{fault}"))
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::Addr;

    #[test]
    fn null_is_not_an_address() {
        assert_eq!(Addr::new(0), None);
        assert_eq!(Addr::new(8).map(Addr::get), Some(8));
    }

    #[test]
    fn arithmetic_never_produces_null() {
        let a = Addr::new(0x10).unwrap();
        assert_eq!(a.checked_sub(0x10), None);
        assert_eq!(a.checked_offset(-0x8), Addr::new(0x8));
        assert_eq!(Addr::new(u64::MAX).unwrap().checked_add(1), None);
        assert!(a.is_aligned(8));
        assert!(!a.is_aligned(0));
    }
}
