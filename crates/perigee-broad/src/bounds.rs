//! Atomic global AABB reduction.
//!
//! Each chunk carries eight atomically-updated floats (4D lower and
//! upper bounds). Workers accumulate batch-local envelopes and merge
//! them with compare-exchange loops, keeping contention on the shared
//! bounds proportional to the worker count rather than the particle
//! count.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use perigee_types::{PerigeeError, PerigeeResult};

use crate::aabb::AabbArrays;

/// One chunk's global AABB as eight CAS-updated floats.
///
/// Values are stored as `f32` bit patterns in `AtomicU32`; min/max
/// comparisons run on the decoded floats inside the CAS loop. Relaxed
/// ordering suffices: readers only run after the enclosing parallel
/// region joins.
#[derive(Debug)]
pub struct AtomicAabb {
    lb: [AtomicU32; 4],
    ub: [AtomicU32; 4],
}

impl Default for AtomicAabb {
    fn default() -> Self {
        let inf = f32::INFINITY.to_bits();
        let ninf = f32::NEG_INFINITY.to_bits();
        Self {
            lb: [
                AtomicU32::new(inf),
                AtomicU32::new(inf),
                AtomicU32::new(inf),
                AtomicU32::new(inf),
            ],
            ub: [
                AtomicU32::new(ninf),
                AtomicU32::new(ninf),
                AtomicU32::new(ninf),
                AtomicU32::new(ninf),
            ],
        }
    }
}

impl AtomicAabb {
    /// CAS-merges a candidate lower bound for dimension `dim`.
    pub fn update_lb(&self, dim: usize, val: f32) {
        let mut cur = self.lb[dim].load(Ordering::Relaxed);
        loop {
            let new = val.min(f32::from_bits(cur));
            match self.lb[dim].compare_exchange_weak(
                cur,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    /// CAS-merges a candidate upper bound for dimension `dim`.
    pub fn update_ub(&self, dim: usize, val: f32) {
        let mut cur = self.ub[dim].load(Ordering::Relaxed);
        loop {
            let new = val.max(f32::from_bits(cur));
            match self.ub[dim].compare_exchange_weak(
                cur,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Snapshot of the lower bounds.
    pub fn load_lb(&self) -> [f32; 4] {
        [
            f32::from_bits(self.lb[0].load(Ordering::Relaxed)),
            f32::from_bits(self.lb[1].load(Ordering::Relaxed)),
            f32::from_bits(self.lb[2].load(Ordering::Relaxed)),
            f32::from_bits(self.lb[3].load(Ordering::Relaxed)),
        ]
    }

    /// Snapshot of the upper bounds.
    pub fn load_ub(&self) -> [f32; 4] {
        [
            f32::from_bits(self.ub[0].load(Ordering::Relaxed)),
            f32::from_bits(self.ub[1].load(Ordering::Relaxed)),
            f32::from_bits(self.ub[2].load(Ordering::Relaxed)),
            f32::from_bits(self.ub[3].load(Ordering::Relaxed)),
        ]
    }
}

/// Reduces the per-particle AABBs into the per-chunk global bounds.
///
/// rayon's fold yields one batch-local envelope per worker split; each
/// envelope is merged into the chunk's atomics with the CAS loops. The
/// upper-bound envelope is accumulated from the `ub` array (and the
/// lower from `lb`).
pub fn reduce_global_bounds(aabbs: &AabbArrays, nparts: usize, global: &[AtomicAabb]) {
    global.par_iter().enumerate().for_each(|(chunk_idx, g)| {
        let base = chunk_idx * nparts;
        let lb = &aabbs.lb[base..base + nparts];
        let ub = &aabbs.ub[base..base + nparts];

        lb.par_iter()
            .zip(ub.par_iter())
            .fold(
                || ([f32::INFINITY; 4], [f32::NEG_INFINITY; 4]),
                |mut acc, (l, u)| {
                    for d in 0..4 {
                        acc.0[d] = acc.0[d].min(l[d]);
                        acc.1[d] = acc.1[d].max(u[d]);
                    }
                    acc
                },
            )
            .for_each(|(local_lb, local_ub)| {
                for d in 0..4 {
                    g.update_lb(d, local_lb[d]);
                    g.update_ub(d, local_ub[d]);
                }
            });
    });
}

/// Loads the atomic bounds into plain snapshots and validates them for
/// quantization: every dimension must be finite with `ub > lb` and a
/// finite extent.
pub fn load_global_bounds(
    global: &[AtomicAabb],
    glb: &mut Vec<[f32; 4]>,
    gub: &mut Vec<[f32; 4]>,
) -> PerigeeResult<()> {
    glb.clear();
    gub.clear();

    for (chunk_idx, g) in global.iter().enumerate() {
        let lb = g.load_lb();
        let ub = g.load_ub();

        for d in 0..4 {
            if !lb[d].is_finite()
                || !ub[d].is_finite()
                || ub[d] <= lb[d]
                || !(ub[d] - lb[d]).is_finite()
            {
                return Err(PerigeeError::Integration(format!(
                    "Non-finite or degenerate global bounds in chunk {} (dimension {}): [{}, {}]",
                    chunk_idx, d, lb[d], ub[d]
                )));
            }
        }

        glb.push(lb);
        gub.push(ub);
    }

    Ok(())
}
