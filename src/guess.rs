//! Guessing the current Java frame of a suspended thread.
//!
//! The registers of a thread stopped at an arbitrary instruction do not always
//! describe a walkable frame: the thread may be in native code, or in the
//! middle of a compiled method's prologue where fp is not set up yet. The
//! guesser picks the most trustworthy source available:
//!
//! 1. no sp at all: the thread's last-Java checkpoint
//! 2. pc outside generated code: the last-Java checkpoint again, recovering
//!    its fp from the code blob's frame size if it was not saved
//! 3. pc in the interpreter, or any pc with only a baseline compiler: the
//!    registers as they are
//! 4. pc in optimized code: a bounded scan up the stack for an sp from which
//!    the frames unwind all the way to the thread's first entry frame.


use crate::arch::Arch;
use crate::code::CodeCache;
use crate::regs::RegisterSnapshot;
use crate::vm::{Frame, JavaThread, ProbeFault, RegisterMap, Vm};
use crate::{Addr, Result};

/// The recovered frame. Any part may be unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGuess {
    pub sp: Option<Addr>,
    pub fp: Option<Addr>,
    /// Always a pc that was found inside generated code.
    pub pc: Option<Addr>,
    pub source: GuessSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessSource {
    LastJavaFrame,
    Registers,
    /// Found by scanning, `offset` bytes above the captured sp.
    StackSearch { offset: u64 },
}

/// Result of unwinding from one candidate sp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateOutcome {
    /// Reached the first entry frame.
    Accepted,
    /// Ran out of senders before reaching it.
    Exhausted,
    /// A sender did not lie above its callee.
    NonMonotonic,
}

pub struct FrameGuesser<'v, V> {
    vm: &'v V,
}

impl<'v, V: Vm> FrameGuesser<'v, V> {
    pub fn new(vm: &'v V) -> Self {
        Self { vm }
    }

    /// Reads the thread's registers and guesses from them. Only failing to
    /// read the registers is an error.
    pub fn guess_thread<T: JavaThread>(
        &self,
        thread: &T,
        region_in_bytes_to_search: u64,
    ) -> Result<Option<FrameGuess>> {
        let context = thread.register_context()?;
        let registers = RegisterSnapshot::from_context::<V::Arch>(&context);
        Ok(self.guess(thread, &registers, region_in_bytes_to_search))
    }

    /// Guesses the current Java frame of `thread`, which must be suspended.
    /// Never reads candidate frames outside
    /// `[sp, sp + region_in_bytes_to_search)`.
    #[instrument(level = "debug", skip(self, thread), fields(arch = <V::Arch as Arch>::NAME))]
    pub fn guess<T: JavaThread>(
        &self,
        thread: &T,
        registers: &RegisterSnapshot,
        region_in_bytes_to_search: u64,
    ) -> Option<FrameGuess> {
        let Some(sp) = registers.sp else {
            debug!("no sp, using the last Java frame");
            return thread.last_java_sp().map(|last_sp| FrameGuess {
                sp: Some(last_sp),
                fp: thread.last_java_fp(),
                pc: None,
                source: GuessSource::LastJavaFrame,
            });
        };

        let code_cache = self.vm.code_cache();
        let Some(pc) = registers.pc.filter(|&pc| code_cache.is_known_code(pc)) else {
            debug!("pc is not in generated code, using the last Java frame");
            return self.from_last_java_frame(thread);
        };

        if self.vm.uses_client_compiler() {
            debug!("frames are complete at every pc with the client compiler");
            return Some(Self::registers_as_is(sp, registers.fp, pc));
        }
        if code_cache.interpreter_contains(pc) {
            debug!("pc is in the interpreter");
            return Some(Self::registers_as_is(sp, registers.fp, pc));
        }

        self.search(sp, pc, region_in_bytes_to_search)
    }

    fn registers_as_is(sp: Addr, fp: Option<Addr>, pc: Addr) -> FrameGuess {
        FrameGuess {
            sp: Some(sp),
            fp,
            pc: Some(pc),
            source: GuessSource::Registers,
        }
    }

    fn from_last_java_frame<T: JavaThread>(&self, thread: &T) -> Option<FrameGuess> {
        let Some(sp) = thread.last_java_sp() else {
            debug!("thread has no last Java frame");
            return None;
        };
        let pc = thread.last_java_pc();
        let code_cache = self.vm.code_cache();

        let fp = thread.last_java_fp().or_else(|| {
            let blob = code_cache.find_blob(pc?)?;
            let fp = <V::Arch as Arch>::saved_fp_slot(sp, blob.frame_size)?;
            debug!(?fp, frame_size = blob.frame_size, "recovered fp from code blob");
            Some(fp)
        });

        Some(FrameGuess {
            sp: Some(sp),
            fp,
            pc: pc.filter(|&pc| code_cache.is_known_code(pc)),
            source: GuessSource::LastJavaFrame,
        })
    }

    /// Looks for an sp above the captured one from which the stack unwinds to
    /// the first entry frame.
    fn search(&self, sp: Addr, pc: Addr, region: u64) -> Option<FrameGuess> {
        let word = <V::Arch as Arch>::WORD_SIZE;

        for offset in (0..region).step_by(word as usize) {
            let Some(candidate) = sp.checked_add(offset) else {
                debug!(?offset, "candidate sp overflowed, giving up");
                break;
            };

            match self.probe(candidate, pc) {
                Ok(CandidateOutcome::Accepted) => {
                    debug!(?candidate, ?offset, "found first entry frame");
                    return Some(FrameGuess {
                        sp: Some(candidate),
                        fp: None,
                        pc: Some(pc),
                        source: GuessSource::StackSearch { offset },
                    });
                }
                Ok(outcome) => trace!(?candidate, ?outcome, "rejected"),
                Err(fault) => trace!(?candidate, %fault, "rejected"),
            }
        }

        debug!(?region, "no candidate sp unwinds to the first entry frame");
        None
    }

    fn probe(&self, sp: Addr, pc: Addr) -> Result<CandidateOutcome, ProbeFault> {
        let mut frame = self.vm.construct_frame(sp, None, pc)?;
        let mut map = RegisterMap::new();

        loop {
            if frame.is_entry_frame() && frame.entry_frame_is_first()? {
                return Ok(CandidateOutcome::Accepted);
            }

            let Some(sender) = frame.sender(&mut map)? else {
                return Ok(CandidateOutcome::Exhausted);
            };
            if sender.sp() <= frame.sp() {
                return Ok(CandidateOutcome::NonMonotonic);
            }
            frame = sender;
        }
    }
}
