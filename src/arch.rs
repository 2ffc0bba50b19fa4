//! Per-architecture knowledge the guesser needs. Both supported targets lay
//! out frames the same way (saved fp, then return address, right below the
//! sender's sp), so an adapter is mostly register numbering.

use core::fmt::Debug;

use crate::regs::Context;
use crate::Addr;

pub trait Arch: Debug + Copy + 'static {
    const NAME: &'static str;
    const WORD_SIZE: u64 = 8;

    /// DWARF register number of the stack pointer.
    const SP: u16;
    /// DWARF register number of the frame pointer.
    const FP: u16;
    /// DWARF column holding the program counter.
    const PC: u16;

    /// Offset, in words from an entry frame's fp, of the slot holding the
    /// call wrapper pointer.
    const ENTRY_FRAME_CALL_WRAPPER_OFFSET: i64;

    /// Where a compiled frame of `frame_size` bytes starting at `sp` keeps the
    /// caller's frame pointer.
    fn saved_fp_slot(sp: Addr, frame_size: u64) -> Option<Addr> {
        sp.checked_add(frame_size.checked_sub(2 * Self::WORD_SIZE)?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct X86_64;

impl Arch for X86_64 {
    const NAME: &'static str = "x86_64";
    const SP: u16 = 7;
    const FP: u16 = 6;
    const PC: u16 = 16;
    const ENTRY_FRAME_CALL_WRAPPER_OFFSET: i64 = -6;
}

#[derive(Debug, Clone, Copy)]
pub struct Aarch64;

impl Arch for Aarch64 {
    const NAME: &'static str = "aarch64";
    const SP: u16 = 31;
    const FP: u16 = 29;
    const PC: u16 = 32;
    const ENTRY_FRAME_CALL_WRAPPER_OFFSET: i64 = -8;
}

#[cfg(target_arch = "x86_64")]
pub type Host = X86_64;
#[cfg(target_arch = "aarch64")]
pub type Host = Aarch64;

/// Captures sp, fp and pc of the calling thread.
#[cfg(target_arch = "x86_64")]
pub fn capture_context() -> Context {
    let mut context = Context::new();
    let (sp, fp, pc): (u64, u64, u64);

    unsafe {
        core::arch::asm!(
            "mov {sp}, rsp",
            "mov {fp}, rbp",
            "lea {pc}, [rip]", // must use rip as a base register
            sp = out(reg) sp,
            fp = out(reg) fp,
            pc = out(reg) pc,
            options(nomem, nostack, preserves_flags),
        );
    }

    context.set(X86_64::SP, sp);
    context.set(X86_64::FP, fp);
    context.set(X86_64::PC, pc);
    context
}

/// Captures sp, fp and pc of the calling thread.
#[cfg(target_arch = "aarch64")]
pub fn capture_context() -> Context {
    let mut context = Context::new();
    let (sp, fp, pc): (u64, u64, u64);

    unsafe {
        core::arch::asm!(
            "mov {sp}, sp",
            "mov {fp}, x29",
            "adr {pc}, .",
            sp = out(reg) sp,
            fp = out(reg) fp,
            pc = out(reg) pc,
            options(nomem, nostack, preserves_flags),
        );
    }

    context.set(Aarch64::SP, sp);
    context.set(Aarch64::FP, fp);
    context.set(Aarch64::PC, pc);
    context
}
