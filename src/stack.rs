//! Frames read straight out of target memory.
//!
//! Every frame on both supported architectures is laid out like this, with
//! the stack growing down:
//!
//! ```text
//!   sender sp -> [ caller's outgoing area ... ]
//!                [ return address            ]  sender sp - 1 word
//!          fp -> [ caller's fp               ]  sender sp - 2 words
//!                [ locals, spills ...        ]
//!          sp -> [ ...                       ]
//! ```
//!
//! Compiled frames have a fixed size known from their code blob, so they can
//! be unwound from `sp` alone. Interpreter and stub frames are unwound through
//! the fp chain. Entry frames hand over to the last Java frame saved in their
//! call wrapper.


use core::marker::PhantomData;

use crate::arch::Arch;
use crate::code::CodeCache;
use crate::mem::Memory;
use crate::vm::{Frame, ProbeFault, RegisterMap, Vm};
use crate::Addr;

/// Field offsets inside the runtime's call wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmLayout {
    /// Words from an entry frame's fp to the call wrapper pointer.
    pub entry_frame_call_wrapper_offset: i64,
    /// Bytes from the call wrapper to the anchored last Java sp.
    pub anchor_last_java_sp_offset: u64,
    pub anchor_last_java_pc_offset: u64,
    pub anchor_last_java_fp_offset: u64,
}

impl VmLayout {
    pub fn new<A: Arch>() -> Self {
        Self {
            entry_frame_call_wrapper_offset: A::ENTRY_FRAME_CALL_WRAPPER_OFFSET,
            anchor_last_java_sp_offset: 4 * A::WORD_SIZE,
            anchor_last_java_pc_offset: 5 * A::WORD_SIZE,
            anchor_last_java_fp_offset: 6 * A::WORD_SIZE,
        }
    }
}

/// A [`Vm`] over any memory and code cache.
#[derive(Debug)]
pub struct StackVm<A, M, C> {
    memory: M,
    code_cache: C,
    layout: VmLayout,
    client_compiler: bool,
    _arch: PhantomData<A>,
}

impl<A: Arch, M: Memory, C: CodeCache> StackVm<A, M, C> {
    pub fn new(memory: M, code_cache: C) -> Self {
        Self {
            memory,
            code_cache,
            layout: VmLayout::new::<A>(),
            client_compiler: false,
            _arch: PhantomData,
        }
    }

    pub fn with_layout(mut self, layout: VmLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_client_compiler(mut self, client_compiler: bool) -> Self {
        self.client_compiler = client_compiler;
        self
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn layout(&self) -> &VmLayout {
        &self.layout
    }

    fn read_addr(&self, addr: Addr) -> Result<Option<Addr>, ProbeFault> {
        self.memory.read_word(addr).map(Addr::new)
    }
}

impl<A: Arch, M: Memory, C: CodeCache> Vm for StackVm<A, M, C> {
    type Arch = A;
    type CodeCache = C;
    type Frame<'a> = StackFrame<'a, A, M, C> where Self: 'a;

    fn code_cache(&self) -> &C {
        &self.code_cache
    }

    fn uses_client_compiler(&self) -> bool {
        self.client_compiler
    }

    fn construct_frame(
        &self,
        sp: Addr,
        fp: Option<Addr>,
        pc: Addr,
    ) -> Result<StackFrame<'_, A, M, C>, ProbeFault> {
        if !sp.is_aligned(A::WORD_SIZE) {
            return Err(ProbeFault::Misaligned(sp));
        }
        Ok(StackFrame { vm: self, sp, fp, pc })
    }

    fn pc_below(&self, sp: Addr) -> Result<Addr, ProbeFault> {
        let slot = sp
            .checked_sub(A::WORD_SIZE)
            .ok_or(ProbeFault::AddressOverflow)?;
        self.read_addr(slot)?.ok_or(ProbeFault::Unreadable(slot))
    }
}

pub struct StackFrame<'a, A, M, C> {
    vm: &'a StackVm<A, M, C>,
    sp: Addr,
    fp: Option<Addr>,
    pc: Addr,
}

impl<A, M, C> core::fmt::Debug for StackFrame<'_, A, M, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StackFrame")
            .field("sp", &self.sp)
            .field("fp", &self.fp)
            .field("pc", &self.pc)
            .finish()
    }
}

impl<'a, A: Arch, M: Memory, C: CodeCache> StackFrame<'a, A, M, C> {
    fn word(slot: Addr, words: i64) -> Result<Addr, ProbeFault> {
        slot.checked_offset(words * A::WORD_SIZE as i64)
            .ok_or(ProbeFault::AddressOverflow)
    }

    fn call_wrapper(&self) -> Result<Addr, ProbeFault> {
        if !self.is_entry_frame() {
            return Err(ProbeFault::NotAnEntryFrame);
        }
        let fp = self.fp.ok_or(ProbeFault::MissingFramePointer)?;
        let slot = Self::word(fp, self.vm.layout.entry_frame_call_wrapper_offset)?;
        let wrapper = self.vm.read_addr(slot)?;
        wrapper.ok_or(ProbeFault::Unreadable(slot))
    }

    /// Builds the frame returned to at `sender_sp`, with its fp taken from
    /// the slot below the return address.
    fn sender_at(
        &self,
        sender_sp: Addr,
        saved_fp_slot: Addr,
        map: &mut RegisterMap,
    ) -> Result<Option<Self>, ProbeFault> {
        let ret_slot = Self::word(sender_sp, -1)?;
        let Some(sender_pc) = self.vm.read_addr(ret_slot)? else {
            trace!(?sender_sp, "null return address, end of stack");
            return Ok(None);
        };
        let sender_fp = self.vm.read_addr(saved_fp_slot)?;
        map.record_saved_link(saved_fp_slot);

        Ok(Some(Self {
            vm: self.vm,
            sp: sender_sp,
            fp: sender_fp,
            pc: sender_pc,
        }))
    }

    fn sender_for_entry_frame(&self) -> Result<Option<Self>, ProbeFault> {
        let wrapper = self.call_wrapper()?;
        let layout = &self.vm.layout;
        let field = |offset: u64| wrapper.checked_add(offset).ok_or(ProbeFault::AddressOverflow);

        let Some(last_sp) = self.vm.read_addr(field(layout.anchor_last_java_sp_offset)?)? else {
            return Ok(None);
        };
        let last_fp = self.vm.read_addr(field(layout.anchor_last_java_fp_offset)?)?;
        let last_pc = match self.vm.read_addr(field(layout.anchor_last_java_pc_offset)?)? {
            Some(pc) => pc,
            None => self.vm.pc_below(last_sp)?,
        };

        Ok(Some(Self {
            vm: self.vm,
            sp: last_sp,
            fp: last_fp,
            pc: last_pc,
        }))
    }

    fn sender_for_linked_frame(&self, map: &mut RegisterMap) -> Result<Option<Self>, ProbeFault> {
        let fp = self.fp.ok_or(ProbeFault::MissingFramePointer)?;
        let sender_sp = Self::word(fp, 2)?;
        self.sender_at(sender_sp, fp, map)
    }

    fn sender_for_compiled_frame(
        &self,
        frame_size: u64,
        map: &mut RegisterMap,
    ) -> Result<Option<Self>, ProbeFault> {
        let sender_sp = self
            .sp
            .checked_add(frame_size)
            .ok_or(ProbeFault::AddressOverflow)?;
        let saved_fp_slot =
            A::saved_fp_slot(self.sp, frame_size).ok_or(ProbeFault::AddressOverflow)?;
        self.sender_at(sender_sp, saved_fp_slot, map)
    }
}

impl<'a, A: Arch, M: Memory, C: CodeCache> Frame for StackFrame<'a, A, M, C> {
    fn sp(&self) -> Addr {
        self.sp
    }

    fn fp(&self) -> Option<Addr> {
        self.fp
    }

    fn pc(&self) -> Addr {
        self.pc
    }

    fn is_entry_frame(&self) -> bool {
        self.vm.code_cache.is_call_stub(self.pc)
    }

    fn entry_frame_is_first(&self) -> Result<bool, ProbeFault> {
        let wrapper = self.call_wrapper()?;
        let anchor = wrapper
            .checked_add(self.vm.layout.anchor_last_java_sp_offset)
            .ok_or(ProbeFault::AddressOverflow)?;
        Ok(self.vm.read_addr(anchor)?.is_none())
    }

    fn sender(&self, map: &mut RegisterMap) -> Result<Option<Self>, ProbeFault> {
        map.record_step();

        if self.is_entry_frame() {
            return self.sender_for_entry_frame();
        }
        let code_cache = &self.vm.code_cache;
        if code_cache.interpreter_contains(self.pc) {
            return self.sender_for_linked_frame(map);
        }
        match code_cache.find_blob(self.pc) {
            Some(blob) if blob.frame_size > 0 => {
                self.sender_for_compiled_frame(blob.frame_size, map)
            }
            Some(_) => self.sender_for_linked_frame(map),
            None => Err(ProbeFault::UnknownCode(self.pc)),
        }
    }
}
