//! Coordinate types for the voxel world.
//!
//! The world is measured in a handful of units: absolute block positions
//! ([`Pos`]), chunk columns ([`ChunkPos`]), shard squares ([`ShardPos`]),
//! positions relative to a chunk ([`RelPos`]), and floating/fixed point
//! positions for entities ([`FPos`]/[`IPos`]).
//!
//! All conversions that divide use floored (euclidean) semantics: block -1
//! is in chunk -1, at chunk-relative position 15.

mod chunk_pos;
mod fpos;
mod look;
mod pos;
mod rel_pos;

pub use chunk_pos::{ChunkPos, ShardPos, SHARD_SIZE};
pub use fpos::{FPos, IPos};
pub use look::{Look, LookBytes};
pub use pos::{Pos, PosError};
pub use rel_pos::{BlockIndex, RelPos};

/// Chunks are this many blocks along X and Z.
pub const CHUNK_WIDTH: i32 = 16;
/// Chunks are this many blocks tall.
pub const CHUNK_HEIGHT: i32 = 128;
