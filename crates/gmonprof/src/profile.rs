use std::mem;

use crate::error::{Error, Result};
use crate::session::configuration::PointerWidth;
use crate::util::{ceil_div, round_up};

/// Bytes of text covered by one histogram counter, per counter byte.
pub const HISTFRACTION: usize = 2;
/// Bytes of text covered by one caller bucket, per address byte.
pub const HASHFRACTION: usize = 2;
/// Arc table size as a percentage of the text size.
pub const ARCDENSITY: usize = 2;
pub const MINARCS: usize = 50;
pub const MAXARCS: usize = (1 << 16) - 2;

pub type HistCounter = u16;

/// 1-based index into the arc table. 0 is the null index.
pub type ArcIndex = u32;

/// A callee reached from one caller bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Arc {
    pub callee_pc: usize,
    pub count: u32,
    /// Next (older) arc of the same caller bucket.
    pub prev_in_bucket: ArcIndex,
}

/// The profiled address span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TextRange {
    pub low: usize,
    pub high: usize,
    /// `high - low` rounded up to the target address size.
    pub size: usize,
}

impl TextRange {
    #[inline(always)]
    pub fn offset_of(&self, addr: usize) -> Option<usize> {
        crate::util::text_offset(self.low, self.size, addr)
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.offset_of(addr).is_some()
    }
}

/// Buffer sizes derived from the profiled address range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaLayout {
    pub text: TextRange,
    pub hist_len: usize,
    pub callers_len: usize,
    /// Length of the arc table including the reserved slot 0.
    pub arcs_len: usize,
    /// log2 of the number of text bytes sharing one caller bucket.
    pub log_hash_granularity: u32,
}

impl ArenaLayout {
    pub fn for_range(low_pc: usize, high_pc: usize, width: PointerWidth) -> Result<Self> {
        if low_pc >= high_pc {
            return Err(Error::InvalidArgument(format!(
                "low_pc ({:#x}) must be below high_pc ({:#x})",
                low_pc, high_pc
            )));
        }
        if high_pc as u64 > width.max_address() {
            return Err(Error::InvalidArgument(format!(
                "high_pc ({:#x}) does not fit a {}-byte target address",
                high_pc,
                width.bytes()
            )));
        }

        let address_size = width.bytes();
        let size = round_up(high_pc - low_pc, address_size);

        let hist_len = ceil_div(size / HISTFRACTION, mem::size_of::<HistCounter>());
        let callers_len = ceil_div(size / HASHFRACTION, address_size);
        let arcs_len = (size * ARCDENSITY / 100).clamp(MINARCS, MAXARCS);
        if u32::try_from(hist_len).is_err() {
            return Err(Error::InvalidArgument(format!(
                "range of {:#x} bytes needs {} histogram counters, more than the header can hold",
                size, hist_len
            )));
        }

        let hash_granularity = HASHFRACTION * address_size;
        debug_assert!(hash_granularity.is_power_of_two());

        Ok(Self {
            text: TextRange {
                low: low_pc,
                high: high_pc,
                size,
            },
            hist_len,
            callers_len,
            arcs_len,
            log_hash_granularity: hash_granularity.trailing_zeros(),
        })
    }

    /// Total number of bytes the session buffers occupy.
    pub fn total_bytes(&self) -> usize {
        self.arcs_len * mem::size_of::<Arc>()
            + self.hist_len * mem::size_of::<HistCounter>()
            + self.callers_len * mem::size_of::<ArcIndex>()
    }
}

/// The buffers owned by a session: arcs, then histogram, then callers.
///
/// Sized once from an [`ArenaLayout`]; none of them grows afterwards.
#[derive(Debug)]
pub struct ProfileData {
    pub layout: ArenaLayout,
    pub arcs: Box<[Arc]>,
    pub histogram: Box<[HistCounter]>,
    pub callers: Box<[ArcIndex]>,
}

impl ProfileData {
    pub fn allocate(layout: ArenaLayout) -> Result<Self> {
        log::debug!(
            "text_size={:#x} hist_len={} callers_len={} arcs_len={} total={} bytes",
            layout.text.size,
            layout.hist_len,
            layout.callers_len,
            layout.arcs_len,
            layout.total_bytes()
        );

        let oom = || Error::OutOfMemory {
            bytes: layout.total_bytes(),
        };
        let arcs = zeroed_slice::<Arc>(layout.arcs_len).ok_or_else(oom)?;
        let histogram = zeroed_slice::<HistCounter>(layout.hist_len).ok_or_else(oom)?;
        let callers = zeroed_slice::<ArcIndex>(layout.callers_len).ok_or_else(oom)?;

        Ok(Self {
            layout,
            arcs,
            histogram,
            callers,
        })
    }
}

fn zeroed_slice<T: Default + Clone>(len: usize) -> Option<Box<[T]>> {
    let mut buf: Vec<T> = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, T::default());
    Some(buf.into_boxed_slice())
}
