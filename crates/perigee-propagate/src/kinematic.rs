//! Constant-velocity reference propagator.
//!
//! Stands in for the production Taylor integrator in tests and demos:
//! trajectories are straight lines, so the degree-1 Taylor expansion is
//! exact on every substep and adaptive step control degenerates to a
//! fixed maximum step length.

use perigee_types::DFloat;

use crate::propagator::{
    BatchPropagator, RecordFn, StepOutcome, SubstepView, STATE_DIM, VAR_R, VAR_VX, VAR_VY, VAR_VZ,
    VAR_X, VAR_Y, VAR_Z,
};

/// A W-lane propagator for unaccelerated motion.
///
/// Every substep has length `min(max_step, remaining)`; the recorded
/// coefficients are the exact substep-local Taylor expansion of the
/// linear trajectory (orders above 1 are zero).
pub struct KinematicPropagator {
    order: u32,
    width: u32,
    max_step: f64,
    /// Lane state, `[STATE_DIM][W]`.
    state: Vec<f64>,
    /// Per-lane double-double time coordinate.
    time_hi: Vec<f64>,
    time_lo: Vec<f64>,
    /// Per-lane length of the last accepted step.
    last_h: Vec<f64>,
    /// Coefficient block, `[STATE_DIM][order + 1][W]`.
    tcs: Vec<f64>,
}

impl KinematicPropagator {
    /// Creates a propagator with the given Taylor order, lane count,
    /// and maximum substep length. The order is raised to at least 1,
    /// which the velocity coefficient of the position series needs.
    pub fn new(order: u32, width: u32, max_step: f64) -> Self {
        let order = order.max(1);
        let w = width as usize;
        Self {
            order,
            width,
            max_step,
            state: vec![0.0; STATE_DIM * w],
            time_hi: vec![0.0; w],
            time_lo: vec![0.0; w],
            last_h: vec![0.0; w],
            tcs: vec![0.0; STATE_DIM * (order as usize + 1) * w],
        }
    }

    /// Writes the substep-local Taylor coefficients of every lane from
    /// the current (substep-start) state.
    fn fill_coefficients(&mut self) {
        let w = self.width as usize;
        let per_var = (self.order as usize + 1) * w;

        for lane in 0..w {
            let x = self.state[VAR_X * w + lane];
            let y = self.state[VAR_Y * w + lane];
            let z = self.state[VAR_Z * w + lane];
            let vx = self.state[VAR_VX * w + lane];
            let vy = self.state[VAR_VY * w + lane];
            let vz = self.state[VAR_VZ * w + lane];
            let r = self.state[VAR_R * w + lane];

            // Positions: c0 = value, c1 = velocity. Velocities and the
            // radius are constant: c0 only. Higher orders stay zero.
            self.tcs[VAR_X * per_var + lane] = x;
            self.tcs[VAR_X * per_var + w + lane] = vx;
            self.tcs[VAR_Y * per_var + lane] = y;
            self.tcs[VAR_Y * per_var + w + lane] = vy;
            self.tcs[VAR_Z * per_var + lane] = z;
            self.tcs[VAR_Z * per_var + w + lane] = vz;

            self.tcs[VAR_VX * per_var + lane] = vx;
            self.tcs[VAR_VY * per_var + lane] = vy;
            self.tcs[VAR_VZ * per_var + lane] = vz;
            self.tcs[VAR_R * per_var + lane] = r;
        }
    }
}

impl BatchPropagator for KinematicPropagator {
    fn order(&self) -> u32 {
        self.order
    }

    fn batch_size(&self) -> u32 {
        self.width
    }

    fn set_dtime(&mut self, hi: f64, lo: f64) {
        self.time_hi.fill(hi);
        self.time_lo.fill(lo);
    }

    fn reset_cooldowns(&mut self) {
        // No event detection, nothing to reset.
    }

    fn state(&self) -> &[f64] {
        &self.state
    }

    fn state_mut(&mut self) -> &mut [f64] {
        &mut self.state
    }

    fn propagate_for(&mut self, delta_t: f64, record: &mut RecordFn<'_>) -> Vec<StepOutcome> {
        let w = self.width as usize;
        let mut outcomes = vec![StepOutcome::TimeLimit; w];

        // An adaptive integrator cannot step a lane whose state is not
        // finite. The whole batch is abandoned; the driver fails the
        // superstep on any non-time-limit outcome anyway.
        let mut any_bad = false;
        for lane in 0..w {
            for var in 0..STATE_DIM {
                if !self.state[var * w + lane].is_finite() {
                    outcomes[lane] = StepOutcome::NonFinite;
                    any_bad = true;
                    break;
                }
            }
        }
        if any_bad {
            for out in outcomes.iter_mut() {
                if *out == StepOutcome::TimeLimit {
                    *out = StepOutcome::Interrupted;
                }
            }
            return outcomes;
        }

        let mut elapsed = DFloat::ZERO;
        loop {
            let remaining = delta_t - elapsed.to_f64();
            if remaining <= 0.0 {
                break;
            }
            let h = remaining.min(self.max_step);

            // Coefficients describe the substep polynomial from the
            // substep-start state; record them before advancing.
            self.fill_coefficients();

            for lane in 0..w {
                let vx = self.state[VAR_VX * w + lane];
                let vy = self.state[VAR_VY * w + lane];
                let vz = self.state[VAR_VZ * w + lane];
                self.state[VAR_X * w + lane] += vx * h;
                self.state[VAR_Y * w + lane] += vy * h;
                self.state[VAR_Z * w + lane] += vz * h;

                let t = DFloat::from_parts(self.time_hi[lane], self.time_lo[lane]) + h;
                self.time_hi[lane] = t.hi();
                self.time_lo[lane] = t.lo();
            }
            self.last_h.fill(h);
            elapsed = elapsed + h;

            let view = SubstepView::new(
                &self.last_h,
                &self.time_hi,
                &self.time_lo,
                &self.tcs,
                self.order,
                self.width,
            );
            if !record(&view) {
                outcomes.fill(StepOutcome::Interrupted);
                return outcomes;
            }
        }

        outcomes
    }
}
