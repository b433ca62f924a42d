//! Parallel integrator driver.
//!
//! Advances every particle by one superstep in W-lane batches,
//! recording substep end times and Taylor coefficients into the
//! per-particle records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;

use perigee_types::{DFloat, PerigeeError, PerigeeResult};

use crate::propagator::{
    BatchPropagator, StepOutcome, STATE_DIM, VAR_R, VAR_VX, VAR_VY, VAR_VZ, VAR_X, VAR_Y, VAR_Z,
};
use crate::record::SubstepRecord;
use crate::state::ParticleSet;

/// Factory plus free list of batch-propagator instances.
///
/// Workers pop an instance on entry to their range and push it back on
/// exit; cold misses construct a fresh instance via the factory.
pub struct PropagatorPool {
    factory: Box<dyn Fn() -> Box<dyn BatchPropagator> + Send + Sync>,
    cache: Mutex<Vec<Box<dyn BatchPropagator>>>,
    order: u32,
    width: u32,
}

impl PropagatorPool {
    /// Builds a pool around a propagator factory. One instance is
    /// constructed eagerly to probe the order and batch width.
    pub fn new<F>(factory: F) -> PerigeeResult<Self>
    where
        F: Fn() -> Box<dyn BatchPropagator> + Send + Sync + 'static,
    {
        let probe = factory();
        let order = probe.order();
        let width = probe.batch_size();
        if width == 0 {
            return Err(PerigeeError::InvalidConfig(
                "Propagator batch size must be at least 1".into(),
            ));
        }

        Ok(Self {
            factory: Box::new(factory),
            cache: Mutex::new(vec![probe]),
            order,
            width,
        })
    }

    /// Taylor order reported by the pooled propagators.
    #[inline]
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Lane count reported by the pooled propagators.
    #[inline]
    pub fn batch_size(&self) -> u32 {
        self.width
    }

    fn acquire(&self) -> Box<dyn BatchPropagator> {
        let cached = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.pop()
        };
        cached.unwrap_or_else(|| {
            tracing::debug!("creating new batch propagator");
            (self.factory)()
        })
    }

    fn release(&self, ta: Box<dyn BatchPropagator>) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.push(ta);
    }
}

/// Advances `particles` by `delta_t` starting at `init_time`, filling
/// one substep record per particle.
///
/// Batches of W lanes are distributed over the rayon pool; each worker
/// drives its own propagator instance. Fails with
/// [`PerigeeError::Integration`] if any lane of any batch does not reach
/// the time limit, or records a non-finite substep end time. On failure
/// the records are left partially filled and the particle state is
/// untouched.
pub fn propagate_superstep(
    particles: &mut ParticleSet,
    records: &mut Vec<SubstepRecord>,
    pool: &PropagatorPool,
    init_time: DFloat,
    delta_t: f64,
) -> PerigeeResult<()> {
    let n = particles.len();
    let w = pool.batch_size() as usize;
    let order = pool.order();

    records.resize_with(n, SubstepRecord::default);

    // Staging area for the post-step state; written back to the SoA
    // columns only if the whole superstep succeeds.
    let mut final_state = vec![[0.0_f64; STATE_DIM]; n];

    let int_error = AtomicBool::new(false);

    records
        .par_chunks_mut(w)
        .zip(final_state.par_chunks_mut(w))
        .enumerate()
        .for_each(|(batch_idx, (recs, staged))| {
            if int_error.load(Ordering::Relaxed) {
                return;
            }

            let base = batch_idx * w;
            let lanes = recs.len();

            let mut ta = pool.acquire();

            for rec in recs.iter_mut() {
                rec.clear();
            }

            ta.reset_cooldowns();
            ta.set_dtime(init_time.hi(), init_time.lo());

            // Load the lane state. The tail batch pads unused lanes
            // with the last valid particle; padded lanes are ignored
            // for records, outcomes, and write-back.
            {
                let st = ta.state_mut();
                for lane in 0..w {
                    let pidx = base + lane.min(lanes - 1);
                    st[VAR_X * w + lane] = particles.x[pidx];
                    st[VAR_Y * w + lane] = particles.y[pidx];
                    st[VAR_Z * w + lane] = particles.z[pidx];
                    st[VAR_VX * w + lane] = particles.vx[pidx];
                    st[VAR_VY * w + lane] = particles.vy[pidx];
                    st[VAR_VZ * w + lane] = particles.vz[pidx];
                    st[VAR_R * w + lane] = particles.r[pidx];
                }
            }

            let mut record_failed = false;
            let outcomes = ta.propagate_for(delta_t, &mut |view| {
                for lane in 0..lanes {
                    // A zero-length last substep contributes no entry
                    // for this tick.
                    if view.last_h(lane) == 0.0 {
                        continue;
                    }

                    let t = view.end_time(lane) - init_time;
                    if !t.is_finite() {
                        record_failed = true;
                        return false;
                    }

                    let rec = &mut recs[lane];
                    rec.tcoords.push(t);
                    for k in 0..=order {
                        rec.tc_x.push(view.tc(VAR_X, k, lane));
                        rec.tc_y.push(view.tc(VAR_Y, k, lane));
                        rec.tc_z.push(view.tc(VAR_Z, k, lane));
                        rec.tc_r.push(view.tc(VAR_R, k, lane));
                    }
                }
                true
            });

            let failed = record_failed
                || outcomes
                    .iter()
                    .take(lanes)
                    .any(|out| *out != StepOutcome::TimeLimit);

            if failed {
                int_error.store(true, Ordering::Relaxed);
            } else {
                let st = ta.state();
                for (lane, out) in staged.iter_mut().enumerate() {
                    for var in 0..STATE_DIM {
                        out[var] = st[var * w + lane];
                    }
                }
            }

            pool.release(ta);
        });

    if int_error.load(Ordering::Relaxed) {
        return Err(PerigeeError::Integration(
            "a propagation lane did not reach the superstep time limit".into(),
        ));
    }

    for (pidx, vals) in final_state.iter().enumerate() {
        particles.x[pidx] = vals[VAR_X];
        particles.y[pidx] = vals[VAR_Y];
        particles.z[pidx] = vals[VAR_Z];
        particles.vx[pidx] = vals[VAR_VX];
        particles.vy[pidx] = vals[VAR_VY];
        particles.vz[pidx] = vals[VAR_VZ];
        particles.r[pidx] = vals[VAR_R];
    }

    Ok(())
}
