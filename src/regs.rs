use crate::arch::Arch;
use crate::Addr;

/// Read access to a thread's registers by DWARF register number.
pub trait RegisterContext {
    fn register(&self, dwarf: u16) -> Option<Addr>;
}

/// A DWARF-numbered register file. A zero value reads as unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub registers: [u64; 33],
}

impl Context {
    pub const fn new() -> Self {
        Self { registers: [0; 33] }
    }

    pub fn set(&mut self, dwarf: u16, value: u64) {
        if let Some(slot) = self.registers.get_mut(usize::from(dwarf)) {
            *slot = value;
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterContext for Context {
    fn register(&self, dwarf: u16) -> Option<Addr> {
        self.registers
            .get(usize::from(dwarf))
            .copied()
            .and_then(Addr::new)
    }
}

/// The three registers the guesser looks at, captured at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub sp: Option<Addr>,
    pub fp: Option<Addr>,
    pub pc: Option<Addr>,
}

impl RegisterSnapshot {
    pub fn new(sp: Option<Addr>, fp: Option<Addr>, pc: Option<Addr>) -> Self {
        Self { sp, fp, pc }
    }

    pub fn from_context<A: Arch>(ctx: &impl RegisterContext) -> Self {
        Self {
            sp: ctx.register(A::SP),
            fp: ctx.register(A::FP),
            pc: ctx.register(A::PC),
        }
    }
}
