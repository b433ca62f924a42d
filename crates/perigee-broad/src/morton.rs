//! Morton encoding of AABB centroids.
//!
//! Each centroid coordinate is quantized to 16 bits against the chunk's
//! global bounds, then the four coordinates are interleaved into a
//! 64-bit code via a precomputed byte-spread LUT. Codes close in
//! integer distance are close in (x, y, z, r) space, which is what the
//! radix-tree split relies on.

use rayon::prelude::*;

use crate::aabb::AabbArrays;

/// Number of quantization slots per axis.
const SLOTS: u64 = 1 << 16;

/// 256-entry table spreading the 8 bits of the index so bit k lands at
/// bit 4k.
const fn spread_lut() -> [u32; 256] {
    let mut lut = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut v = 0u32;
        let mut k = 0;
        while k < 8 {
            if (i >> k) & 1 == 1 {
                v |= 1 << (4 * k);
            }
            k += 1;
        }
        lut[i] = v;
        i += 1;
    }
    lut
}

const SPREAD: [u32; 256] = spread_lut();

/// Spreads a 16-bit value so bit j lands at bit 4j, one LUT lookup per
/// byte.
#[inline]
fn spread16(v: u64) -> u64 {
    ((SPREAD[(v >> 8) as usize] as u64) << 32) | SPREAD[(v & 0xff) as usize] as u64
}

/// Quantizes `x` in `[min, max)` into one of 2^16 discrete slots,
/// numbered 0 to 2^16 - 1.
///
/// Callers must guarantee `min` and `max` are finite with `max > min`
/// and a finite extent. `x` itself may fall slightly outside the range
/// (FP rounding upstream) or be NaN: negative and NaN values land on
/// slot 0, and the result is clamped to the top slot so the code stays
/// within the LUT-supported range even when `x == max`.
pub fn discretize_coord(x: f32, min: f32, max: f32) -> u64 {
    debug_assert!(min.is_finite());
    debug_assert!(max.is_finite());
    debug_assert!(max > min);
    debug_assert!((max - min).is_finite());

    let extent = max - min;

    // Rescale so min maps to 0 and max to 1.
    let mut rx = (x - min) / extent;

    // NaN comparisons are false, so NaN also lands on zero.
    rx = if rx >= 0.0 { rx } else { 0.0 };

    let rx = rx * SLOTS as f32;

    // The `as` cast saturates; the clamp still applies for x == max.
    let val = rx as u64;
    val.min(SLOTS - 1)
}

/// Interleaves four 16-bit quantized coordinates into a 64-bit Morton
/// code. Bit j of dimension d lands at output bit `4j + (3 - d)`, so x
/// is the most significant dimension, then y, z, r.
#[inline]
pub fn morton_encode_4d(n0: u64, n1: u64, n2: u64, n3: u64) -> u64 {
    debug_assert!(n0 < SLOTS && n1 < SLOTS && n2 < SLOTS && n3 < SLOTS);

    (spread16(n0) << 3) | (spread16(n1) << 2) | (spread16(n2) << 1) | spread16(n3)
}

/// Fills `mcodes` with the Morton codes of the AABB centroids, per
/// chunk, against that chunk's validated global bounds.
pub fn encode_codes(
    aabbs: &AabbArrays,
    glb: &[[f32; 4]],
    gub: &[[f32; 4]],
    mcodes: &mut [u64],
    nparts: usize,
) {
    mcodes
        .par_chunks_mut(nparts)
        .enumerate()
        .for_each(|(chunk_idx, codes)| {
            let base = chunk_idx * nparts;
            let lb = &aabbs.lb[base..base + nparts];
            let ub = &aabbs.ub[base..base + nparts];
            let glb = glb[chunk_idx];
            let gub = gub[chunk_idx];

            codes.par_iter_mut().enumerate().for_each(|(i, code)| {
                // Centre of the AABB, halves first as the bounds may sit
                // near the float extremes.
                let n0 = discretize_coord(lb[i][0] / 2.0 + ub[i][0] / 2.0, glb[0], gub[0]);
                let n1 = discretize_coord(lb[i][1] / 2.0 + ub[i][1] / 2.0, glb[1], gub[1]);
                let n2 = discretize_coord(lb[i][2] / 2.0 + ub[i][2] / 2.0, glb[2], gub[2]);
                let n3 = discretize_coord(lb[i][3] / 2.0 + ub[i][3] / 2.0, glb[3], gub[3]);

                *code = morton_encode_4d(n0, n1, n2, n3);
            });
        });
}
