//! # perigee-types
//!
//! Shared types, identifiers, error types, extended-precision time,
//! and defaults for the Perigee conjunction-screening engine.
//!
//! This crate has zero domain logic — it defines the vocabulary
//! that all other Perigee crates share.

pub mod constants;
pub mod dfloat;
pub mod error;
pub mod ids;

pub use dfloat::DFloat;
pub use error::{PerigeeError, PerigeeResult};
pub use ids::{ChunkId, ParticleId};
