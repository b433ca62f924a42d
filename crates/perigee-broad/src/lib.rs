//! # perigee-broad
//!
//! Broad-phase collision detection for the Perigee engine.
//!
//! After each integration superstep, the broad phase derives
//! per-particle bounding volumes over time sub-intervals ("chunks") and
//! organizes them into one bounding-volume hierarchy per chunk:
//!
//! 1. **AABB extraction** — interval-arithmetic evaluation of the
//!    recorded Taylor coefficients over each chunk's time window.
//! 2. **Morton encoding & indirect sort** — centroid quantization, 4D
//!    bit interleave, and a per-chunk sort permutation.
//! 3. **BVH construction** — level-parallel binary radix trees over the
//!    Morton-sorted particles, with a bottom-up AABB pass.
//!
//! The [`BroadPhasePipeline`] orchestrates all stages into a single
//! `step()` call and hands per-chunk [`ChunkView`]s to the narrow-phase
//! consumer.

pub mod aabb;
pub mod bounds;
pub mod bvh;
pub mod interval;
pub mod morton;
pub mod pipeline;
pub mod sort;
pub mod verify;

pub use aabb::AabbArrays;
pub use bounds::AtomicAabb;
pub use bvh::{BvhNode, BvhTree};
pub use interval::Ival;
pub use pipeline::{BroadPhaseConfig, BroadPhasePipeline, ChunkView};
