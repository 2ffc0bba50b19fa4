use std::cell::{Cell, RefCell};

use crate::arch::{Arch, X86_64};
use crate::code::{BlobKind, CodeBlob, CodeMap};
use crate::mem::StackImage;
use crate::regs::Context;
use crate::stack::StackVm;
use crate::vm::{Frame, JavaThread, ProbeFault, RegisterMap, Vm};
use crate::{Addr, Error, Result};

pub(crate) fn addr(value: u64) -> Addr {
    Addr::new(value).unwrap()
}

pub(crate) const INTERPRETER: (u64, u64) = (0x1000, 0x2000);
pub(crate) const COMPILED: (u64, u64) = (0x4000, 0x5000);
pub(crate) const CALL_STUB: (u64, u64) = (0x6000, 0x6100);
pub(crate) const COMPILED_FRAME_SIZE: u64 = 0x40;

pub(crate) fn code_map() -> CodeMap {
    let mut map = CodeMap::new().with_interpreter(addr(INTERPRETER.0)..addr(INTERPRETER.1));
    map.insert(CodeBlob {
        start: addr(COMPILED.0),
        end: addr(COMPILED.1),
        kind: BlobKind::Compiled,
        frame_size: COMPILED_FRAME_SIZE,
    })
    .unwrap();
    map.insert(CodeBlob {
        start: addr(CALL_STUB.0),
        end: addr(CALL_STUB.1),
        kind: BlobKind::CallStub,
        frame_size: 0,
    })
    .unwrap();
    map
}

pub(crate) const STACK_BASE: u64 = 0x7fff_0000;
pub(crate) const ENTRY_FP: u64 = STACK_BASE + 0x100;
pub(crate) const WRAPPER: u64 = STACK_BASE + 0x180;
pub(crate) const STUB_PC: u64 = CALL_STUB.0 + 8;
pub(crate) const COMPILED_PC: u64 = COMPILED.0 + 0x10;

/// A stack where only `STACK_BASE + 0x10` is the sp of a compiled frame
/// called from the first entry frame.
///
/// ```text
/// STACK_BASE + 0x38   0          candidate +0x00 sees a null return address
/// STACK_BASE + 0x40   ENTRY_FP   candidate +0x08 returns into the stack
/// STACK_BASE + 0x48   STUB_PC    candidate +0x10 returns into the call stub
/// call wrapper slot   WRAPPER    per-arch words below ENTRY_FP
/// WRAPPER + 32        0          no older Java frames
/// ```
pub(crate) fn entry_stack() -> StackImage {
    entry_stack_for::<X86_64>()
}

pub(crate) fn entry_stack_for<A: Arch>() -> StackImage {
    let mut image = StackImage::new(addr(STACK_BASE), 0x200);
    assert!(image.write_word(addr(STACK_BASE + 0x40), ENTRY_FP));
    assert!(image.write_word(addr(STACK_BASE + 0x48), STUB_PC));
    let wrapper_slot = addr(ENTRY_FP)
        .checked_offset(A::ENTRY_FRAME_CALL_WRAPPER_OFFSET * A::WORD_SIZE as i64)
        .unwrap();
    assert!(image.write_word(wrapper_slot, WRAPPER));
    image
}

pub(crate) fn stack_vm(image: StackImage) -> StackVm<X86_64, StackImage, CodeMap> {
    stack_vm_for::<X86_64>(image)
}

pub(crate) fn stack_vm_for<A: Arch>(image: StackImage) -> StackVm<A, StackImage, CodeMap> {
    StackVm::new(image, code_map())
}

#[derive(Debug, Default)]
pub(crate) struct FakeThread {
    pub last_sp: Option<Addr>,
    pub last_fp: Option<Addr>,
    pub last_pc: Option<Addr>,
    pub context: Option<Context>,
}

impl JavaThread for FakeThread {
    fn last_java_sp(&self) -> Option<Addr> {
        self.last_sp
    }

    fn last_java_fp(&self) -> Option<Addr> {
        self.last_fp
    }

    fn last_java_pc(&self) -> Option<Addr> {
        self.last_pc
    }

    fn register_context(&self) -> Result<Context> {
        self.context
            .clone()
            .ok_or_else(|| Error::new("thread is not suspended"))
    }
}

/// A VM whose frames follow a fixed script instead of memory contents.
#[derive(Debug)]
pub(crate) struct ScriptedVm {
    pub code: CodeMap,
    pub client_compiler: bool,
    /// Sender sp relative to its callee's sp.
    pub sender_delta: i64,
    /// The candidate sp whose second sender is the first entry frame.
    pub accept_at: Option<Addr>,
    /// Frames at this depth have no sender.
    pub max_depth: usize,
    /// Candidate sps that cannot even be turned into a frame.
    pub faulty: Vec<Addr>,
    pub constructed: RefCell<Vec<Addr>>,
    pub sender_calls: Cell<usize>,
}

impl ScriptedVm {
    pub fn new() -> Self {
        Self {
            code: code_map(),
            client_compiler: false,
            sender_delta: 0x10,
            accept_at: None,
            max_depth: 8,
            faulty: Vec::new(),
            constructed: RefCell::new(Vec::new()),
            sender_calls: Cell::new(0),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedFrame<'a> {
    vm: &'a ScriptedVm,
    origin: Addr,
    sp: Addr,
    pc: Addr,
    depth: usize,
}

impl Frame for ScriptedFrame<'_> {
    fn sp(&self) -> Addr {
        self.sp
    }

    fn fp(&self) -> Option<Addr> {
        None
    }

    fn pc(&self) -> Addr {
        self.pc
    }

    fn is_entry_frame(&self) -> bool {
        self.depth == 2 && self.vm.accept_at == Some(self.origin)
    }

    fn entry_frame_is_first(&self) -> Result<bool, ProbeFault> {
        Ok(true)
    }

    fn sender(&self, map: &mut RegisterMap) -> Result<Option<Self>, ProbeFault> {
        map.record_step();
        self.vm.sender_calls.set(self.vm.sender_calls.get() + 1);
        if self.depth >= self.vm.max_depth {
            return Ok(None);
        }
        let sp = self
            .sp
            .checked_offset(self.vm.sender_delta)
            .ok_or(ProbeFault::AddressOverflow)?;
        Ok(Some(Self {
            vm: self.vm,
            origin: self.origin,
            sp,
            pc: self.pc,
            depth: self.depth + 1,
        }))
    }
}

impl Vm for ScriptedVm {
    type Arch = X86_64;
    type CodeCache = CodeMap;
    type Frame<'a> = ScriptedFrame<'a>;

    fn code_cache(&self) -> &CodeMap {
        &self.code
    }

    fn uses_client_compiler(&self) -> bool {
        self.client_compiler
    }

    fn construct_frame(
        &self,
        sp: Addr,
        _fp: Option<Addr>,
        pc: Addr,
    ) -> Result<ScriptedFrame<'_>, ProbeFault> {
        self.constructed.borrow_mut().push(sp);
        if self.faulty.contains(&sp) {
            return Err(ProbeFault::Unreadable(sp));
        }
        Ok(ScriptedFrame {
            vm: self,
            origin: sp,
            sp,
            pc,
            depth: 0,
        })
    }

    fn pc_below(&self, sp: Addr) -> Result<Addr, ProbeFault> {
        Err(ProbeFault::Unreadable(sp))
    }
}
