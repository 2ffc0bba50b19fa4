//! What the guesser needs from the target runtime.

use alloc::vec::Vec;
use core::fmt;

use crate::arch::Arch;
use crate::code::CodeCache;
use crate::regs::Context;
use crate::{Addr, Result};

/// Why a frame could not be built or unwound. Expected while probing garbage
/// stack slots, so these are values and never abort a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFault {
    Unreadable(Addr),
    Misaligned(Addr),
    MissingFramePointer,
    UnknownCode(Addr),
    AddressOverflow,
    NotAnEntryFrame,
    NonMonotonicSender { sp: Addr, sender_sp: Addr },
}

impl fmt::Display for ProbeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable(addr) => write!(f, "cannot read target memory at {addr}"),
            Self::Misaligned(addr) => write!(f, "{addr} is not word aligned"),
            Self::MissingFramePointer => f.write_str("frame has no frame pointer"),
            Self::UnknownCode(pc) => write!(f, "pc {pc} is not in any known code region"),
            Self::AddressOverflow => f.write_str("address arithmetic overflowed"),
            Self::NotAnEntryFrame => f.write_str("frame is not an entry frame"),
            Self::NonMonotonicSender { sp, sender_sp } => {
                write!(f, "sender sp {sender_sp} does not lie above sp {sp}")
            }
        }
    }
}

/// Unwind state threaded through consecutive `sender` calls.
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    saved_links: Vec<Addr>,
    steps: usize,
}

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers the stack slot the caller's fp was restored from.
    pub fn record_saved_link(&mut self, slot: Addr) {
        self.saved_links.push(slot);
    }

    pub fn record_step(&mut self) {
        self.steps += 1;
    }

    pub fn saved_link(&self) -> Option<Addr> {
        self.saved_links.last().copied()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}

pub trait Frame: Sized {
    fn sp(&self) -> Addr;
    fn fp(&self) -> Option<Addr>;
    fn pc(&self) -> Addr;

    /// Is this the transition from native code into Java?
    fn is_entry_frame(&self) -> bool;

    /// Is this the outermost entry frame of the thread? Only meaningful for
    /// entry frames.
    fn entry_frame_is_first(&self) -> Result<bool, ProbeFault>;

    /// The next older frame, or `None` at the bottom of the stack.
    fn sender(&self, map: &mut RegisterMap) -> Result<Option<Self>, ProbeFault>;
}

/// A target thread, already suspended by the caller.
pub trait JavaThread {
    /// The last-Java checkpoint, saved by the runtime whenever the thread
    /// leaves Java for native code.
    fn last_java_sp(&self) -> Option<Addr>;
    fn last_java_fp(&self) -> Option<Addr>;
    fn last_java_pc(&self) -> Option<Addr>;

    fn register_context(&self) -> Result<Context>;
}

impl<T: JavaThread + ?Sized> JavaThread for &T {
    fn last_java_sp(&self) -> Option<Addr> {
        (**self).last_java_sp()
    }

    fn last_java_fp(&self) -> Option<Addr> {
        (**self).last_java_fp()
    }

    fn last_java_pc(&self) -> Option<Addr> {
        (**self).last_java_pc()
    }

    fn register_context(&self) -> Result<Context> {
        (**self).register_context()
    }
}

/// The target runtime as seen by the guesser.
pub trait Vm {
    type Arch: Arch;
    type CodeCache: CodeCache;
    type Frame<'a>: Frame
    where
        Self: 'a;

    fn code_cache(&self) -> &Self::CodeCache;

    /// With only a baseline compiler, frames are complete at every pc.
    fn uses_client_compiler(&self) -> bool {
        false
    }

    fn construct_frame(
        &self,
        sp: Addr,
        fp: Option<Addr>,
        pc: Addr,
    ) -> Result<Self::Frame<'_>, ProbeFault>;

    /// The return address stored in the word below `sp`, for frames whose pc
    /// was not recorded.
    fn pc_below(&self, sp: Addr) -> Result<Addr, ProbeFault>;
}
