use crate::heap::HeapRef;
use crate::keys::ThreadId;
use crate::vm::stack::FrameStack;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-host-thread interpreter state. One interpreter runs per host thread;
/// the frame stack it owns never escapes the thread.
pub struct VmThread {
    pub id: ThreadId,
    pub stack: FrameStack,
    /// Mirror object of `java/lang/Thread`, once bound.
    oop: OnceCell<HeapRef>,
    interrupted: AtomicBool,
}

impl VmThread {
    pub fn new(id: ThreadId, max_frames: usize) -> Self {
        Self {
            id,
            stack: FrameStack::new(max_frames),
            oop: OnceCell::new(),
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn oop(&self) -> Option<HeapRef> {
        self.oop.get().copied()
    }

    pub fn bind_oop(&self, oop: HeapRef) {
        let _ = self.oop.set(oop);
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    /// Reads and clears the interrupt flag, as `wait`/`sleep` do.
    pub fn take_interrupted(&self) -> bool {
        self.interrupted.swap(false, Ordering::AcqRel)
    }
}
