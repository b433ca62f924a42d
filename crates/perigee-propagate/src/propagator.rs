//! Abstract batch-propagator interface.
//!
//! The adaptive Taylor integrator is an external collaborator: Perigee
//! only requires that it advances W particle lanes together and surfaces
//! Taylor coefficients at every accepted substep. This module defines
//! that seam.

use perigee_types::DFloat;

/// Number of state variables per lane: x, y, z, vx, vy, vz, r.
pub const STATE_DIM: usize = 7;

/// Column of the x coordinate in the lane state block.
pub const VAR_X: usize = 0;
/// Column of the y coordinate.
pub const VAR_Y: usize = 1;
/// Column of the z coordinate.
pub const VAR_Z: usize = 2;
/// Column of the x velocity.
pub const VAR_VX: usize = 3;
/// Column of the y velocity.
pub const VAR_VY: usize = 4;
/// Column of the z velocity.
pub const VAR_VZ: usize = 5;
/// Column of the particle radius.
pub const VAR_R: usize = 6;

/// Per-lane outcome of a [`BatchPropagator::propagate_for`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The lane reached the requested time limit.
    TimeLimit,
    /// Propagation was cut short by the recording callback.
    Interrupted,
    /// The lane's state or step produced non-finite values.
    NonFinite,
}

/// Borrowed view of one accepted substep, handed to the recording
/// callback.
///
/// The coefficient block is laid out `[var][order + 1][W]`: all
/// coefficients of a state variable are contiguous by order, each order
/// holding one value per lane.
pub struct SubstepView<'a> {
    last_h: &'a [f64],
    time_hi: &'a [f64],
    time_lo: &'a [f64],
    tcs: &'a [f64],
    order: u32,
    width: u32,
}

impl<'a> SubstepView<'a> {
    /// Assembles a view over a propagator's per-substep buffers.
    pub fn new(
        last_h: &'a [f64],
        time_hi: &'a [f64],
        time_lo: &'a [f64],
        tcs: &'a [f64],
        order: u32,
        width: u32,
    ) -> Self {
        let w = width as usize;
        debug_assert_eq!(last_h.len(), w);
        debug_assert_eq!(time_hi.len(), w);
        debug_assert_eq!(time_lo.len(), w);
        debug_assert_eq!(tcs.len(), STATE_DIM * (order as usize + 1) * w);
        Self {
            last_h,
            time_hi,
            time_lo,
            tcs,
            order,
            width,
        }
    }

    /// Length of the last accepted step for `lane`. Zero means the lane
    /// did not advance on this tick.
    #[inline]
    pub fn last_h(&self, lane: usize) -> f64 {
        self.last_h[lane]
    }

    /// Absolute end time of the substep for `lane`.
    #[inline]
    pub fn end_time(&self, lane: usize) -> DFloat {
        DFloat::from_parts(self.time_hi[lane], self.time_lo[lane])
    }

    /// Taylor coefficient of `var` at order `k` for `lane`.
    #[inline]
    pub fn tc(&self, var: usize, k: u32, lane: usize) -> f64 {
        let w = self.width as usize;
        let per_var = (self.order as usize + 1) * w;
        self.tcs[var * per_var + k as usize * w + lane]
    }
}

/// Recording callback invoked at every accepted substep. Returning
/// `false` aborts the propagation.
pub type RecordFn<'a> = dyn FnMut(&SubstepView<'_>) -> bool + 'a;

/// A W-lane adaptive Taylor propagator.
///
/// Implementations wrap the actual numerical integrator; Perigee drives
/// them through this trait only.
pub trait BatchPropagator: Send {
    /// Taylor order of the recorded coefficients.
    fn order(&self) -> u32;

    /// Number of lanes advanced together.
    fn batch_size(&self) -> u32;

    /// Sets the current time coordinate as a double-double pair, for
    /// all lanes.
    fn set_dtime(&mut self, hi: f64, lo: f64);

    /// Clears any event-detection cooldowns carried over from the
    /// previous use of this instance.
    fn reset_cooldowns(&mut self);

    /// Lane state block, laid out `[STATE_DIM][W]`.
    fn state(&self) -> &[f64];

    /// Mutable lane state block.
    fn state_mut(&mut self) -> &mut [f64];

    /// Advances all lanes by `delta_t`, invoking `record` at every
    /// accepted substep. Returns one outcome per lane.
    fn propagate_for(&mut self, delta_t: f64, record: &mut RecordFn<'_>) -> Vec<StepOutcome>;
}
