//! Walks the Java frames of a thread, starting at a guessed frame and ending
//! at its first entry frame.

use crate::guess::FrameGuess;
use crate::vm::{Frame, ProbeFault, RegisterMap, Vm};
use crate::{Error, Result};

/// No thread has a Java stack this deep; a walk that gets here is following
/// garbage.
pub const MAX_DEPTH: usize = 4096;

pub struct JavaFrames<'v, V: Vm + 'v> {
    next: Option<Result<V::Frame<'v>, ProbeFault>>,
    map: RegisterMap,
    depth: usize,
}

#[instrument(level = "debug", skip(vm))]
pub fn walk<'v, V: Vm>(vm: &'v V, guess: &FrameGuess) -> Result<JavaFrames<'v, V>> {
    let sp = guess.sp.ok_or_else(|| Error::new("guessed frame has no sp"))?;
    let pc = match guess.pc {
        Some(pc) => pc,
        None => vm.pc_below(sp)?,
    };
    let first = vm.construct_frame(sp, guess.fp, pc)?;

    Ok(JavaFrames {
        next: Some(Ok(first)),
        map: RegisterMap::new(),
        depth: 0,
    })
}

impl<'v, V: Vm + 'v> JavaFrames<'v, V> {
    fn advance(&mut self, frame: &V::Frame<'v>) -> Option<Result<V::Frame<'v>, ProbeFault>> {
        if frame.is_entry_frame() {
            match frame.entry_frame_is_first() {
                Ok(true) => {
                    debug!(depth = self.depth, "reached the first entry frame");
                    return None;
                }
                Ok(false) => {}
                Err(fault) => return Some(Err(fault)),
            }
        }

        match frame.sender(&mut self.map) {
            Ok(Some(sender)) if sender.sp() <= frame.sp() => {
                Some(Err(ProbeFault::NonMonotonicSender {
                    sp: frame.sp(),
                    sender_sp: sender.sp(),
                }))
            }
            Ok(Some(sender)) => Some(Ok(sender)),
            Ok(None) => None,
            Err(fault) => Some(Err(fault)),
        }
    }
}

impl<'v, V: Vm + 'v> Iterator for JavaFrames<'v, V> {
    type Item = Result<V::Frame<'v>, ProbeFault>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = match self.next.take()? {
            Ok(frame) => frame,
            Err(fault) => {
                debug!(%fault, depth = self.depth, "walk stopped");
                return Some(Err(fault));
            }
        };

        self.depth += 1;
        trace!(depth = self.depth, sp = ?frame.sp(), pc = ?frame.pc(), "walk...");
        if self.depth < MAX_DEPTH {
            self.next = self.advance(&frame);
        } else {
            debug!("walk is too deep, giving up");
        }
        Some(Ok(frame))
    }
}
