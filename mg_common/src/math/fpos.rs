use super::{ChunkPos, Pos, CHUNK_WIDTH};
use std::{
  fmt,
  ops::{Add, AddAssign, Sub, SubAssign},
};

/// An entity position, in absolute world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FPos {
  pub x: f64,
  pub y: f64,
  pub z: f64,
}

impl fmt::Display for FPos {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "FPos({} {} {})", self.x, self.y, self.z)
  }
}

impl FPos {
  pub const fn new(x: f64, y: f64, z: f64) -> Self { FPos { x, y, z } }

  #[inline(always)]
  pub fn x(&self) -> f64 { self.x }
  #[inline(always)]
  pub fn y(&self) -> f64 { self.y }
  #[inline(always)]
  pub fn z(&self) -> f64 { self.z }

  /// Returns the block this position is in, flooring on all axes.
  pub fn block(&self) -> Pos {
    Pos::new(self.x.floor() as i32, self.y.floor() as i32, self.z.floor() as i32)
  }

  /// Returns the chunk column this position is in.
  pub fn chunk(&self) -> ChunkPos { self.block().chunk() }

  /// Converts to fixed-point (1/32 block) units, as used by entity spawn
  /// packets.
  pub fn fixed(&self) -> IPos {
    IPos::new(
      (self.x * 32.0).floor() as i32,
      (self.y * 32.0).floor() as i32,
      (self.z * 32.0).floor() as i32,
    )
  }

  /// Returns true if the euclidean distance to `other` is at most `dist`.
  pub fn is_within_dist_of(&self, other: FPos, dist: f64) -> bool {
    let dx = self.x - other.x;
    let dy = self.y - other.y;
    let dz = self.z - other.z;
    dx * dx + dy * dy + dz * dz <= dist * dist
  }
}

impl Add for FPos {
  type Output = FPos;
  fn add(self, other: FPos) -> FPos {
    FPos::new(self.x + other.x, self.y + other.y, self.z + other.z)
  }
}
impl AddAssign for FPos {
  fn add_assign(&mut self, other: FPos) {
    self.x += other.x;
    self.y += other.y;
    self.z += other.z;
  }
}
impl Sub for FPos {
  type Output = FPos;
  fn sub(self, other: FPos) -> FPos {
    FPos::new(self.x - other.x, self.y - other.y, self.z - other.z)
  }
}
impl SubAssign for FPos {
  fn sub_assign(&mut self, other: FPos) {
    self.x -= other.x;
    self.y -= other.y;
    self.z -= other.z;
  }
}

/// An entity position in fixed-point units of 1/32 block. This is the form
/// sent in entity spawn and teleport packets.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Default)]
pub struct IPos {
  pub x: i32,
  pub y: i32,
  pub z: i32,
}

impl IPos {
  pub const fn new(x: i32, y: i32, z: i32) -> Self { IPos { x, y, z } }

  /// Returns the chunk column this position is in. One chunk is 16 blocks of
  /// 32 fixed-point units each.
  pub fn chunk(&self) -> ChunkPos {
    ChunkPos::new(self.x.div_euclid(32 * CHUNK_WIDTH), self.z.div_euclid(32 * CHUNK_WIDTH))
  }

  /// Converts back to floating point coordinates.
  pub fn float(&self) -> FPos {
    FPos::new(self.x as f64 / 32.0, self.y as f64 / 32.0, self.z as f64 / 32.0)
  }
}
