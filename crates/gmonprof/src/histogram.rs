use std::mem;

use crate::backtrace::{resolve_sample_pc, FrameUnwinder, RegisterSnapshot};
use crate::profile::{HistCounter, TextRange, HISTFRACTION};

/// Histogram bucket covering `pc`, if any.
#[inline(always)]
pub fn bucket_of(text: &TextRange, pc: usize) -> usize {
    pc.wrapping_sub(text.low) / HISTFRACTION / mem::size_of::<HistCounter>()
}

/// Lowest address attributed to `bucket`.
pub fn bucket_base(text: &TextRange, bucket: usize) -> usize {
    text.low + bucket * HISTFRACTION * mem::size_of::<HistCounter>()
}

/// Count one tick at `pc`. Ticks outside the histogram are dropped.
///
/// async-signal-safe: no allocation, no locking.
#[inline(always)]
pub fn record_tick(histogram: &mut [HistCounter], text: &TextRange, pc: usize) -> bool {
    match histogram.get_mut(bucket_of(text, pc)) {
        Some(counter) => {
            *counter = counter.saturating_add(1);
            true
        }
        None => false,
    }
}

/// Attribute one timer tick to a histogram bucket.
///
/// If the sampled PC is outside the profiled text, a bounded backtrace is
/// attempted first. Returns whether a bucket was incremented.
///
/// async-signal-safe: no allocation, no locking, at most
/// [`DEPTH_MAX`](crate::backtrace::DEPTH_MAX) frames are inspected.
pub fn sample<U: FrameUnwinder + ?Sized>(
    histogram: &mut [HistCounter],
    text: &TextRange,
    unwinder: &U,
    registers: &RegisterSnapshot,
) -> bool {
    match resolve_sample_pc(unwinder, text, registers) {
        Some(pc) => record_tick(histogram, text, pc),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtrace::NoUnwinder;

    fn text() -> TextRange {
        TextRange {
            low: 0x1000,
            high: 0x2000,
            size: 0x1000,
        }
    }

    fn at(pc: usize) -> RegisterSnapshot {
        RegisterSnapshot {
            pc,
            ..Default::default()
        }
    }

    #[test]
    fn test_bucket_of() {
        assert_eq!(bucket_of(&text(), 0x1000), 0);
        assert_eq!(bucket_of(&text(), 0x1003), 0);
        assert_eq!(bucket_of(&text(), 0x1004), 1);
        assert_eq!(bucket_of(&text(), 0x1200), 0x80);
        assert_eq!(bucket_base(&text(), 0x80), 0x1200);
    }

    #[test]
    fn test_sample_increments_bucket() {
        let mut histogram = vec![0u16; 0x400];
        for _ in 0..3 {
            assert!(sample(&mut histogram, &text(), &NoUnwinder, &at(0x1200)));
        }
        assert_eq!(histogram[0x80], 3);
        assert_eq!(histogram.iter().map(|&c| c as u32).sum::<u32>(), 3);
    }

    #[test]
    fn test_sample_saturates() {
        let mut histogram = vec![0u16; 0x400];
        histogram[0x80] = u16::MAX - 1;
        sample(&mut histogram, &text(), &NoUnwinder, &at(0x1200));
        sample(&mut histogram, &text(), &NoUnwinder, &at(0x1200));
        sample(&mut histogram, &text(), &NoUnwinder, &at(0x1200));
        assert_eq!(histogram[0x80], u16::MAX);
    }

    #[test]
    fn test_sample_out_of_range_is_dropped() {
        let mut histogram = vec![0u16; 0x400];
        assert!(!sample(&mut histogram, &text(), &NoUnwinder, &at(0x0fff)));
        assert!(!sample(&mut histogram, &text(), &NoUnwinder, &at(0x2000)));
        assert!(!sample(&mut histogram, &text(), &NoUnwinder, &at(0)));
        assert!(histogram.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_record_tick_bounds_checked() {
        let mut histogram = vec![0u16; 4];
        assert!(record_tick(&mut histogram, &text(), 0x100f));
        assert!(!record_tick(&mut histogram, &text(), 0x1010));
        assert_eq!(histogram, vec![0, 0, 0, 1]);
    }
}
