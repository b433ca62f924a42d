//! Per-chunk AABB extraction from substep records.
//!
//! For every (chunk, particle) pair, the substeps overlapping the
//! chunk's time window are located in the particle's record and the
//! Taylor coefficients of x, y, z, r are evaluated in interval
//! arithmetic over the overlap, producing a 4D float AABB with outward
//! rounding.

use rayon::prelude::*;

use perigee_propagate::SubstepRecord;
use perigee_types::DFloat;

use crate::interval::Ival;

/// Paired lower/upper AABB arrays.
///
/// Logical layout `[C, N, 4]`, row-major: element `chunk * N + i` holds
/// particle `i`'s bounds within chunk `chunk`. Dimension order is
/// x, y, z, r.
#[derive(Debug, Default)]
pub struct AabbArrays {
    /// Lower bounds.
    pub lb: Vec<[f32; 4]>,
    /// Upper bounds.
    pub ub: Vec<[f32; 4]>,
}

impl AabbArrays {
    /// Resizes both arrays to `len` elements.
    pub fn resize(&mut self, len: usize) {
        self.lb.resize(len, [0.0; 4]);
        self.ub.resize(len, [0.0; 4]);
    }
}

/// Computes the AABB of one particle's motion within one chunk.
fn particle_chunk_aabb(
    rec: &SubstepRecord,
    order: u32,
    chunk_begin: DFloat,
    chunk_end: DFloat,
) -> ([f32; 4], [f32; 4]) {
    let mut lb = [f32::INFINITY; 4];
    let mut ub = [f32::NEG_INFINITY; 4];

    let tcoords = &rec.tcoords;

    // Locate the substep range overlapping the chunk: first the first
    // substep whose end time is strictly greater than the chunk begin,
    // then the first substep whose end time reaches the chunk end.
    let first = tcoords.partition_point(|t| *t <= chunk_begin);
    let mut last = first + tcoords[first..].partition_point(|t| *t < chunk_end);
    // Bump to a half-open range, unless already at the end (possible in
    // the last chunk due to rounding).
    last += (last != tcoords.len()) as usize;

    for ss in first..last {
        // Substep-local evaluation interval: the intersection of the
        // substep and the chunk, re-based to the substep start.
        let ss_start = if ss == 0 { DFloat::ZERO } else { tcoords[ss - 1] };
        let ev_lb = if chunk_begin > ss_start {
            chunk_begin
        } else {
            ss_start
        };
        let ev_ub = if chunk_end < tcoords[ss] {
            chunk_end
        } else {
            tcoords[ss]
        };

        let h = Ival::new((ev_lb - ss_start).to_f64(), (ev_ub - ss_start).to_f64());

        let x = Ival::horner(rec.tcs_x(ss, order), h);
        let y = Ival::horner(rec.tcs_y(ss, order), h);
        let z = Ival::horner(rec.tcs_z(ss, order), h);
        let r = Ival::horner(rec.tcs_r(ss, order), h);

        lb[0] = lb[0].min(x.lower_f32());
        lb[1] = lb[1].min(y.lower_f32());
        lb[2] = lb[2].min(z.lower_f32());
        lb[3] = lb[3].min(r.lower_f32());

        ub[0] = ub[0].max(x.upper_f32());
        ub[1] = ub[1].max(y.upper_f32());
        ub[2] = ub[2].max(z.upper_f32());
        ub[3] = ub[3].max(r.upper_f32());
    }

    (lb, ub)
}

/// Fills the `[C, N]` AABB arrays from the per-particle records.
///
/// `chunk_size` is the superstep length divided by the chunk count;
/// chunk `k` covers `[k * chunk_size, (k + 1) * chunk_size]` relative
/// to the superstep start.
pub fn compute_chunk_aabbs(
    records: &[SubstepRecord],
    order: u32,
    chunk_size: f64,
    aabbs: &mut AabbArrays,
) {
    let nparts = records.len();

    aabbs
        .lb
        .par_iter_mut()
        .zip(aabbs.ub.par_iter_mut())
        .enumerate()
        .for_each(|(idx, (lb, ub))| {
            let chunk_idx = idx / nparts;
            let pidx = idx % nparts;

            let chunk_begin = DFloat::from(chunk_size * chunk_idx as f64);
            let chunk_end = DFloat::from(chunk_size * (chunk_idx + 1) as f64);

            let (l, u) = particle_chunk_aabb(&records[pidx], order, chunk_begin, chunk_end);
            *lb = l;
            *ub = u;
        });
}
