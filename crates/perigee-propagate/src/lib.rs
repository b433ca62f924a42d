//! # perigee-propagate
//!
//! Trajectory propagation for the Perigee engine: particle state
//! management, the abstract batch-propagator seam, per-particle substep
//! records, and the parallel superstep driver.
//!
//! ## Key Types
//!
//! - [`ParticleSet`] — SoA buffers for positions, velocities, radii
//! - [`BatchPropagator`] — pluggable W-lane Taylor propagator trait
//! - [`KinematicPropagator`] — built-in constant-velocity reference
//! - [`PropagatorPool`] — reusable propagator instances for workers
//! - [`propagate_superstep`] — the parallel integrator driver

pub mod driver;
pub mod kinematic;
pub mod propagator;
pub mod record;
pub mod state;

pub use driver::{propagate_superstep, PropagatorPool};
pub use kinematic::KinematicPropagator;
pub use propagator::{
    BatchPropagator, StepOutcome, SubstepView, STATE_DIM, VAR_R, VAR_VX, VAR_VY, VAR_VZ, VAR_X,
    VAR_Y, VAR_Z,
};
pub use record::SubstepRecord;
pub use state::ParticleSet;
