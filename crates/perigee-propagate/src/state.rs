//! Particle state — SoA buffers for all per-particle data.
//!
//! This is the primary mutable data structure across supersteps.
//! The driver reads these buffers at superstep start and writes the
//! post-step state back on success.

use perigee_types::{PerigeeError, PerigeeResult};

/// SoA particle state buffers.
///
/// # Layout
///
/// All arrays have length `count`. Channels are stored contiguously:
/// ```text
/// x: [x0, x1, x2, ...]
/// y: [y0, y1, y2, ...]
/// ...
/// ```
#[derive(Debug, Clone)]
pub struct ParticleSet {
    /// Number of particles.
    pub count: usize,

    // ─── Position ───
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,

    // ─── Velocity ───
    pub vx: Vec<f64>,
    pub vy: Vec<f64>,
    pub vz: Vec<f64>,

    // ─── Physical radius ───
    pub r: Vec<f64>,
}

impl ParticleSet {
    /// Builds a particle set from pre-filled columns.
    ///
    /// All seven columns must have the same length.
    #[allow(clippy::too_many_arguments)]
    pub fn from_columns(
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<f64>,
        vx: Vec<f64>,
        vy: Vec<f64>,
        vz: Vec<f64>,
        r: Vec<f64>,
    ) -> PerigeeResult<Self> {
        let n = x.len();
        let lens = [y.len(), z.len(), vx.len(), vy.len(), vz.len(), r.len()];
        if lens.iter().any(|&l| l != n) {
            return Err(PerigeeError::InvalidConfig(format!(
                "Particle columns have mismatched lengths: x has {}, others {:?}",
                n, lens
            )));
        }

        Ok(Self {
            count: n,
            x,
            y,
            z,
            vx,
            vy,
            vz,
            r,
        })
    }

    /// Number of particles.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when the set holds no particles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
