//! Superstep pipeline: propagate → AABBs → Morton sort → BVH.
//!
//! The pipeline owns every per-superstep buffer and rebuilds all
//! per-chunk structures from scratch on each `step()` call. Buffers are
//! cleared and resized rather than reallocated, so steady-state
//! supersteps do not allocate.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use perigee_propagate::{propagate_superstep, ParticleSet, PropagatorPool, SubstepRecord};
use perigee_types::constants::{DEFAULT_NCHUNKS, DEFAULT_SUPERSTEP};
use perigee_types::{ChunkId, DFloat, ParticleId, PerigeeError, PerigeeResult};

use crate::aabb::{self, AabbArrays};
use crate::bounds::{self, AtomicAabb};
use crate::bvh::{self, BvhNode, BvhTree};
use crate::{morton, sort, verify};

/// Configuration for the broad-phase pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadPhaseConfig {
    /// Number of equal time chunks per superstep. One BVH is built per
    /// chunk.
    pub nchunks: u32,

    /// Superstep length (seconds).
    pub superstep: f64,
}

impl Default for BroadPhaseConfig {
    fn default() -> Self {
        Self {
            nchunks: DEFAULT_NCHUNKS,
            superstep: DEFAULT_SUPERSTEP,
        }
    }
}

impl BroadPhaseConfig {
    /// Creates a config with a single chunk, useful for scenarios with
    /// short supersteps.
    pub fn single_chunk(superstep: f64) -> Self {
        Self {
            nchunks: 1,
            superstep,
        }
    }

    fn validate(&self) -> PerigeeResult<()> {
        if self.nchunks == 0 {
            return Err(PerigeeError::InvalidConfig(
                "Chunk count must be at least 1".into(),
            ));
        }
        if !self.superstep.is_finite() || self.superstep <= 0.0 {
            return Err(PerigeeError::InvalidConfig(format!(
                "Superstep length must be positive and finite, got {}",
                self.superstep
            )));
        }
        Ok(())
    }
}

/// Borrowed per-chunk outputs for the narrow-phase consumer.
pub struct ChunkView<'a> {
    /// BVH nodes in level order.
    pub nodes: &'a [BvhNode],
    /// Morton-sort permutation: `vidx[i]` is the particle index at
    /// sorted position `i`.
    pub vidx: &'a [u32],
    /// Sorted per-particle lower bounds (x, y, z, r).
    pub srt_lb: &'a [[f32; 4]],
    /// Sorted per-particle upper bounds.
    pub srt_ub: &'a [[f32; 4]],
    /// Chunk-wide lower bounds.
    pub global_lb: [f32; 4],
    /// Chunk-wide upper bounds.
    pub global_ub: [f32; 4],
}

impl ChunkView<'_> {
    /// Particle occupying sorted position `i` within this chunk.
    #[inline]
    pub fn particle_at(&self, i: usize) -> ParticleId {
        ParticleId(self.vidx[i])
    }
}

/// The broad-phase pipeline.
///
/// One `step()` call per superstep: propagation and recording, AABB
/// extraction, global-bound reduction, Morton encoding and indirect
/// sorting, and BVH construction, in that order. On any error the
/// per-superstep buffers are left size-consistent but content-stale,
/// to be overwritten by the next attempt.
pub struct BroadPhasePipeline {
    config: BroadPhaseConfig,
    pool: PropagatorPool,
    time: DFloat,
    nparts: usize,

    records: Vec<SubstepRecord>,
    aabbs: AabbArrays,
    srt_aabbs: AabbArrays,
    mcodes: Vec<u64>,
    srt_mcodes: Vec<u64>,
    vidx: Vec<u32>,
    global_atomic: Vec<AtomicAabb>,
    global_lb: Vec<[f32; 4]>,
    global_ub: Vec<[f32; 4]>,
    trees: Vec<BvhTree>,
}

impl BroadPhasePipeline {
    /// Creates a pipeline from a validated config and a propagator
    /// pool.
    pub fn new(config: BroadPhaseConfig, pool: PropagatorPool) -> PerigeeResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            pool,
            time: DFloat::ZERO,
            nparts: 0,
            records: Vec::new(),
            aabbs: AabbArrays::default(),
            srt_aabbs: AabbArrays::default(),
            mcodes: Vec::new(),
            srt_mcodes: Vec::new(),
            vidx: Vec::new(),
            global_atomic: Vec::new(),
            global_lb: Vec::new(),
            global_ub: Vec::new(),
            trees: Vec::new(),
        })
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &BroadPhaseConfig {
        &self.config
    }

    /// Current absolute time coordinate (advanced by one superstep per
    /// successful `step()`).
    pub fn time(&self) -> DFloat {
        self.time
    }

    /// Number of chunks per superstep.
    pub fn nchunks(&self) -> usize {
        self.config.nchunks as usize
    }

    /// Number of particles seen by the last `step()`.
    pub fn nparts(&self) -> usize {
        self.nparts
    }

    /// Runs one superstep over `particles`.
    pub fn step(&mut self, particles: &mut ParticleSet) -> PerigeeResult<()> {
        let nparts = particles.len();
        let nchunks = self.config.nchunks as usize;
        let chunk_size = self.config.superstep / self.config.nchunks as f64;

        u32::try_from(nparts).map_err(|_| {
            PerigeeError::Overflow("Particle count does not fit the index width".into())
        })?;
        let total = nparts
            .checked_mul(nchunks)
            .ok_or_else(|| PerigeeError::Overflow("Chunk arrays would overflow".into()))?;

        self.nparts = nparts;

        // Clear and resize every per-superstep buffer. The atomics are
        // rebuilt so the bounds start from their infinities.
        self.aabbs.resize(total);
        self.srt_aabbs.resize(total);
        self.mcodes.resize(total, 0);
        self.srt_mcodes.resize(total, 0);
        self.vidx.resize(total, 0);
        self.global_atomic.clear();
        self.global_atomic.resize_with(nchunks, AtomicAabb::default);
        self.trees.resize_with(nchunks, BvhTree::default);

        if nparts == 0 {
            // Nothing to screen; the trees stay empty.
            for tree in &mut self.trees {
                tree.nodes.clear();
            }
            self.global_lb.clear();
            self.global_ub.clear();
            self.time = self.time + DFloat::from(self.config.superstep);
            return Ok(());
        }

        let sw = Instant::now();

        // Integration runs concurrently with the identity init of the
        // sort indices.
        let (int_res, ()) = rayon::join(
            || {
                propagate_superstep(
                    particles,
                    &mut self.records,
                    &self.pool,
                    self.time,
                    self.config.superstep,
                )
            },
            || sort::init_indices(&mut self.vidx, nparts),
        );
        int_res?;

        aabb::compute_chunk_aabbs(&self.records, self.pool.order(), chunk_size, &mut self.aabbs);
        bounds::reduce_global_bounds(&self.aabbs, nparts, &self.global_atomic);
        tracing::trace!(
            "propagation and AABB computation time: {:?}",
            sw.elapsed()
        );

        let sw = Instant::now();
        bounds::load_global_bounds(&self.global_atomic, &mut self.global_lb, &mut self.global_ub)?;
        morton::encode_codes(
            &self.aabbs,
            &self.global_lb,
            &self.global_ub,
            &mut self.mcodes,
            nparts,
        );
        sort::sort_and_gather(
            &self.mcodes,
            &mut self.vidx,
            &self.aabbs,
            &mut self.srt_aabbs,
            &mut self.srt_mcodes,
            nparts,
        );
        tracing::trace!("Morton encoding and sorting time: {:?}", sw.elapsed());

        let sw = Instant::now();
        bvh::build_bvh_trees(&mut self.trees, &self.srt_aabbs, &self.srt_mcodes, nparts)?;
        tracing::trace!("BVH construction time: {:?}", sw.elapsed());

        if cfg!(debug_assertions) {
            verify::verify_bvh_trees(
                &self.trees,
                &self.aabbs,
                &self.srt_aabbs,
                &self.mcodes,
                &self.srt_mcodes,
                &self.vidx,
                nparts,
            )?;
        }

        self.time = self.time + DFloat::from(self.config.superstep);
        Ok(())
    }

    /// Borrows one chunk's outputs for the narrow-phase consumer.
    ///
    /// Valid after a successful `step()`.
    pub fn chunk(&self, chunk: ChunkId) -> ChunkView<'_> {
        let k = chunk.index();
        let base = k * self.nparts;

        ChunkView {
            nodes: &self.trees[k].nodes,
            vidx: &self.vidx[base..base + self.nparts],
            srt_lb: &self.srt_aabbs.lb[base..base + self.nparts],
            srt_ub: &self.srt_aabbs.ub[base..base + self.nparts],
            global_lb: self.global_lb[k],
            global_ub: self.global_ub[k],
        }
    }
}
