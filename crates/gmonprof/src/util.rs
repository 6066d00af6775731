/// Round `x` up to the next multiple of `y`.
pub const fn round_up(x: usize, y: usize) -> usize {
    x.div_ceil(y) * y
}

/// Integer division rounding towards positive infinity.
pub const fn ceil_div(x: usize, y: usize) -> usize {
    x.div_ceil(y)
}

/// Offset of `addr` from `low` if it falls inside `[low, low + size)`.
///
/// Addresses below `low` wrap around to a huge offset and are rejected by the
/// same comparison.
#[inline(always)]
pub fn text_offset(low: usize, size: usize, addr: usize) -> Option<usize> {
    let off = addr.wrapping_sub(low);
    if off < size {
        Some(off)
    } else {
        None
    }
}
