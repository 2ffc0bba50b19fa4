//! The code-region oracle: which addresses hold generated code, and what kind.

use alloc::vec::Vec;
use core::ops::Range;

use crate::{Addr, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    /// Code produced by an optimizing or baseline compiler.
    Compiled,
    /// The stub through which native code calls into Java. A frame whose pc
    /// lies in here is an entry frame.
    CallStub,
    RuntimeStub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlob {
    pub start: Addr,
    /// Exclusive.
    pub end: Addr,
    pub kind: BlobKind,
    /// Size of the blob's frames in bytes, including return address and saved
    /// fp. Zero for blobs that keep a frame pointer chain instead.
    pub frame_size: u64,
}

impl CodeBlob {
    pub fn contains(&self, pc: Addr) -> bool {
        (self.start..self.end).contains(&pc)
    }
}

pub trait CodeCache {
    fn interpreter_contains(&self, pc: Addr) -> bool;

    fn find_blob(&self, pc: Addr) -> Option<CodeBlob>;

    /// Is `pc` inside interpreted or compiled code?
    fn is_known_code(&self, pc: Addr) -> bool {
        self.interpreter_contains(pc) || self.find_blob(pc).is_some()
    }

    fn is_call_stub(&self, pc: Addr) -> bool {
        self.find_blob(pc)
            .is_some_and(|blob| blob.kind == BlobKind::CallStub)
    }
}

impl<C: CodeCache + ?Sized> CodeCache for &C {
    fn interpreter_contains(&self, pc: Addr) -> bool {
        (**self).interpreter_contains(pc)
    }

    fn find_blob(&self, pc: Addr) -> Option<CodeBlob> {
        (**self).find_blob(pc)
    }
}

/// A snapshot of the target's code regions.
#[derive(Debug, Clone, Default)]
pub struct CodeMap {
    interpreter: Option<Range<Addr>>,
    /// Sorted by start, never overlapping.
    blobs: Vec<CodeBlob>,
}

impl CodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpreter(mut self, interpreter: Range<Addr>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    pub fn insert(&mut self, blob: CodeBlob) -> Result<()> {
        if blob.start >= blob.end {
            return Err(Error::new(alloc::format!(
                "empty code blob at {}",
                blob.start
            )));
        }

        let idx = self.blobs.partition_point(|b| b.start < blob.start);
        let overlaps_prev = idx
            .checked_sub(1)
            .is_some_and(|prev| self.blobs[prev].end > blob.start);
        let overlaps_next = self
            .blobs
            .get(idx)
            .is_some_and(|next| next.start < blob.end);
        if overlaps_prev || overlaps_next {
            return Err(Error::new(alloc::format!(
                "code blob {}..{} overlaps an existing blob",
                blob.start,
                blob.end
            )));
        }

        self.blobs.insert(idx, blob);
        Ok(())
    }

    pub fn blobs(&self) -> &[CodeBlob] {
        &self.blobs
    }
}

impl CodeCache for CodeMap {
    fn interpreter_contains(&self, pc: Addr) -> bool {
        self.interpreter
            .as_ref()
            .is_some_and(|range| range.contains(&pc))
    }

    fn find_blob(&self, pc: Addr) -> Option<CodeBlob> {
        let idx = self.blobs.partition_point(|b| b.start <= pc);
        let blob = self.blobs.get(idx.checked_sub(1)?)?;
        trace!(?pc, ?blob, "binary searched code map");
        blob.contains(pc).then_some(*blob)
    }
}
