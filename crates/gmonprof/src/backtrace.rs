//! Bounded stack walking used by the sampler to attribute ticks that land
//! outside the profiled text (e.g. in ROM or library code) to the nearest
//! profiled caller.

use crate::profile::TextRange;

/// Maximum number of caller frames inspected before a sample is dropped.
pub const DEPTH_MAX: usize = 5;

/// Registers of the profiled task captured at sample time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub pc: usize,
    pub return_address: usize,
    pub stack_pointer: usize,
}

/// One step of a stack walk: a code address and the stack pointer of the
/// frame it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub pc: usize,
    pub stack_pointer: usize,
}

/// Architecture-specific knowledge needed to walk up the stack.
pub trait FrameUnwinder {
    /// Convert a raw return address into a code address.
    fn return_address_to_pc(&self, return_address: usize) -> usize {
        return_address
    }

    /// The caller frame implied by the live return-address register.
    fn first_frame(&self, registers: &RegisterSnapshot) -> Option<Frame> {
        Some(Frame {
            pc: self.return_address_to_pc(registers.return_address),
            stack_pointer: registers.stack_pointer,
        })
    }

    /// The frame that called `frame`, or `None` when there are no more frames
    /// or the stack looks unusable.
    fn unwind(&self, frame: &Frame) -> Option<Frame>;
}

/// Resolve the address a sample is attributed to.
///
/// Returns `registers.pc` when it lies in `text`. Otherwise walks up to
/// [`DEPTH_MAX`] caller frames and returns the first in-range address.
/// Never allocates.
pub fn resolve_sample_pc<U: FrameUnwinder + ?Sized>(
    unwinder: &U,
    text: &TextRange,
    registers: &RegisterSnapshot,
) -> Option<usize> {
    if text.contains(registers.pc) {
        return Some(registers.pc);
    }

    let mut frame = unwinder.first_frame(registers)?;
    if text.contains(frame.pc) {
        return Some(frame.pc);
    }
    for _ in 0..DEPTH_MAX {
        frame = unwinder.unwind(&frame)?;
        if text.contains(frame.pc) {
            return Some(frame.pc);
        }
    }
    None
}

/// Disables stack walking: only the sampled PC itself is considered.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoUnwinder;

impl FrameUnwinder for NoUnwinder {
    fn first_frame(&self, _registers: &RegisterSnapshot) -> Option<Frame> {
        None
    }

    fn unwind(&self, _frame: &Frame) -> Option<Frame> {
        None
    }
}

/// Read access to the profiled task's stack.
pub trait StackMemory {
    /// Read one machine word. `None` if the address cannot be read.
    fn read_word(&self, address: usize) -> Option<usize>;

    /// Cheap plausibility check of a stack pointer before dereferencing it.
    fn is_sane_stack_pointer(&self, stack_pointer: usize) -> bool;
}

/// Offset added to a code address by the windowed-call encoding of return
/// addresses.
pub const XTENSA_RA_OFFSET: usize = 0x4000_0000;

/// Unwinder for the Xtensa windowed ABI: the caller's return address and
/// stack pointer are spilled 16 and 12 bytes below the current stack
/// pointer.
#[derive(Debug)]
pub struct XtensaUnwinder<M> {
    memory: M,
}

impl<M: StackMemory> XtensaUnwinder<M> {
    const RA_SPILL: usize = 16;
    const SP_SPILL: usize = 12;

    pub fn new(memory: M) -> Self {
        Self { memory }
    }
}

impl<M: StackMemory> FrameUnwinder for XtensaUnwinder<M> {
    fn return_address_to_pc(&self, return_address: usize) -> usize {
        return_address.wrapping_sub(XTENSA_RA_OFFSET)
    }

    fn unwind(&self, frame: &Frame) -> Option<Frame> {
        let sp = frame.stack_pointer;
        if !self.memory.is_sane_stack_pointer(sp) {
            return None;
        }
        let return_address = self.memory.read_word(sp.checked_sub(Self::RA_SPILL)?)?;
        let stack_pointer = self.memory.read_word(sp.checked_sub(Self::SP_SPILL)?)?;
        Some(Frame {
            pc: self.return_address_to_pc(return_address),
            stack_pointer,
        })
    }
}

/// A 32-bit stack image held in memory, addressed from `base`.
///
/// Stack pointers are sane when they are 16-byte aligned and inside the
/// image.
#[derive(Clone, Debug)]
pub struct StackImage {
    base: usize,
    words: Vec<u32>,
}

impl StackImage {
    const WORD: usize = std::mem::size_of::<u32>();

    pub fn new(base: usize, words: Vec<u32>) -> Self {
        Self { base, words }
    }

    fn end(&self) -> usize {
        self.base + self.words.len() * Self::WORD
    }
}

impl StackMemory for StackImage {
    fn read_word(&self, address: usize) -> Option<usize> {
        let off = address.checked_sub(self.base)?;
        if off % Self::WORD != 0 {
            return None;
        }
        self.words.get(off / Self::WORD).map(|&w| w as usize)
    }

    fn is_sane_stack_pointer(&self, stack_pointer: usize) -> bool {
        stack_pointer % 16 == 0 && stack_pointer > self.base && stack_pointer <= self.end()
    }
}
