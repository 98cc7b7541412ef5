/// Number of bits needed to index `n` items (`$clog2` semantics, `clog2(1) == 0`).
pub fn clog2(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// All-ones mask of `width` bits.
pub fn mask(width: usize) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

pub fn is_pow2(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Merge `new` into `old` under a byte-enable style strobe. Each strobe
/// covers `lane_bits` bits of the 32-bit word.
pub fn merge_lanes(old: u32, new: u32, strobes: &[bool], lane_bits: usize) -> u32 {
    let mut res = old;
    for (lane, en) in strobes.iter().enumerate() {
        if *en {
            let m = (mask(lane_bits) as u32) << (lane * lane_bits);
            res = (res & !m) | (new & m);
        }
    }
    res
}
