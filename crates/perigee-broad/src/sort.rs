//! Indirect Morton sorting and gathering.
//!
//! The particles themselves never move: a per-chunk permutation is
//! sorted by Morton code, then sorted shadow copies of the AABB and
//! code arrays are materialized by gather. Everything downstream of
//! this module consumes the sorted arrays.

use rayon::prelude::*;

use crate::aabb::AabbArrays;

/// Resets `vidx` to the identity permutation within each chunk.
pub fn init_indices(vidx: &mut [u32], nparts: usize) {
    vidx.par_chunks_mut(nparts).for_each(|chunk| {
        chunk
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, v)| *v = i as u32);
    });
}

/// Sorts each chunk's permutation by Morton code and gathers the sorted
/// shadows of the AABB and code arrays.
///
/// Stability is not required: ties are particles with identical codes,
/// which downstream treats as indistinguishable.
pub fn sort_and_gather(
    mcodes: &[u64],
    vidx: &mut [u32],
    aabbs: &AabbArrays,
    srt_aabbs: &mut AabbArrays,
    srt_mcodes: &mut [u64],
    nparts: usize,
) {
    vidx.par_chunks_mut(nparts)
        .zip(srt_aabbs.lb.par_chunks_mut(nparts))
        .zip(srt_aabbs.ub.par_chunks_mut(nparts))
        .zip(srt_mcodes.par_chunks_mut(nparts))
        .enumerate()
        .for_each(|(chunk_idx, (((vidx_c, srt_lb), srt_ub), srt_mc))| {
            let base = chunk_idx * nparts;
            let mc = &mcodes[base..base + nparts];
            let lb = &aabbs.lb[base..base + nparts];
            let ub = &aabbs.ub[base..base + nparts];

            vidx_c.par_sort_unstable_by_key(|&i| mc[i as usize]);

            srt_lb
                .par_iter_mut()
                .zip(srt_ub.par_iter_mut())
                .zip(srt_mc.par_iter_mut())
                .enumerate()
                .for_each(|(i, ((l, u), m))| {
                    let src = vidx_c[i] as usize;
                    *l = lb[src];
                    *u = ub[src];
                    *m = mc[src];
                });
        });
}
