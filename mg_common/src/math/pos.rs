use super::{ChunkPos, IPos, RelPos, CHUNK_HEIGHT, CHUNK_WIDTH};
use std::{
  error::Error,
  fmt,
  ops::{Add, AddAssign, Sub, SubAssign},
};

#[derive(Debug, PartialEq)]
pub struct PosError {
  pub pos: Pos,
  pub msg: String,
}

impl fmt::Display for PosError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "invalid position: {} {}", self.pos, self.msg)
  }
}

impl Error for PosError {}

/// A block position in absolute world coordinates. Y is only meaningful
/// within `0..128`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Pos {
  pub x: i32,
  pub y: i32,
  pub z: i32,
}

impl Default for Pos {
  fn default() -> Self { Pos::new(0, 0, 0) }
}

impl fmt::Display for Pos {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "Pos({} {} {})", self.x, self.y, self.z)
  }
}

impl Pos {
  /// Creates a new block position. This can be used to find chunk coordinates,
  /// place blocks, or send a position in a packet.
  pub const fn new(x: i32, y: i32, z: i32) -> Self { Pos { x, y, z } }

  /// Returns the X value of the position.
  #[inline(always)]
  pub const fn x(&self) -> i32 { self.x }
  /// Returns the Y value of the position.
  #[inline(always)]
  pub const fn y(&self) -> i32 { self.y }
  /// Returns the Z value of the position.
  #[inline(always)]
  pub const fn z(&self) -> i32 { self.z }

  /// Returns the chunk column that contains this block. Uses floored
  /// division, so block -1 is in chunk -1.
  pub fn chunk(&self) -> ChunkPos {
    ChunkPos::new(self.x.div_euclid(CHUNK_WIDTH), self.z.div_euclid(CHUNK_WIDTH))
  }

  /// Returns this position relative to its containing chunk. The result has
  /// `x` and `z` within `0..16`. Fails if `y` is outside the world.
  pub fn chunk_rel(&self) -> Result<RelPos, PosError> {
    if self.y < 0 || self.y >= CHUNK_HEIGHT {
      return Err(PosError { pos: *self, msg: "y outside of world".into() });
    }
    Ok(RelPos::new(
      self.x.rem_euclid(CHUNK_WIDTH) as u8,
      self.y as u8,
      self.z.rem_euclid(CHUNK_WIDTH) as u8,
    ))
  }

  /// This creates a "unit" position from a face byte. Whenever a block is
  /// placed, the face is sent as a value from 0..6. The result is intended to
  /// be added to a block position, to offset it by one block. If the value is
  /// outside of 0..6, then (0, 0, 0) is returned.
  pub const fn dir_from_byte(v: u8) -> Self {
    match v {
      0 => Pos::new(0, -1, 0),
      1 => Pos::new(0, 1, 0),
      2 => Pos::new(0, 0, -1),
      3 => Pos::new(0, 0, 1),
      4 => Pos::new(-1, 0, 0),
      5 => Pos::new(1, 0, 0),
      _ => Pos::new(0, 0, 0),
    }
  }

  /// Offsets this position, returning `None` if any component overflows or if
  /// the new Y leaves the world. Used when following a block face out of a
  /// placement packet.
  pub fn checked_add(self, dx: i32, dy: i32, dz: i32) -> Option<Pos> {
    let x = self.x.checked_add(dx)?;
    let y = self.y.checked_add(dy)?;
    let z = self.z.checked_add(dz)?;
    if y < 0 || y >= CHUNK_HEIGHT {
      return None;
    }
    Some(Pos::new(x, y, z))
  }

  /// Converts to fixed-point (1/32 block) units.
  pub fn fixed(&self) -> IPos { IPos::new(self.x * 32, self.y * 32, self.z * 32) }
}

impl Add for Pos {
  type Output = Pos;
  fn add(self, other: Pos) -> Pos {
    Pos::new(self.x + other.x, self.y + other.y, self.z + other.z)
  }
}
impl AddAssign for Pos {
  fn add_assign(&mut self, other: Pos) {
    self.x += other.x;
    self.y += other.y;
    self.z += other.z;
  }
}
impl Sub for Pos {
  type Output = Pos;
  fn sub(self, other: Pos) -> Pos {
    Pos::new(self.x - other.x, self.y - other.y, self.z - other.z)
  }
}
impl SubAssign for Pos {
  fn sub_assign(&mut self, other: Pos) {
    self.x -= other.x;
    self.y -= other.y;
    self.z -= other.z;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn chunk_local() {
    // (chunk, rel, block)
    let tests = [
      (0, 0, 0),
      (0, 1, 1),
      (0, 15, 15),
      (1, 0, 16),
      (1, 15, 31),
      (-1, 15, -1),
      (-1, 0, -16),
      (-2, 15, -17),
      (-2, 0, -32),
    ];
    for (chunk, rel, block) in tests {
      let p = Pos::new(block, 0, block);
      assert_eq!(p.chunk(), ChunkPos::new(chunk, chunk));
      let r = p.chunk_rel().unwrap();
      assert_eq!((r.x() as i32, r.z() as i32), (rel, rel));
      // The conversion must partition the block coordinate exactly.
      assert_eq!(chunk * 16 + rel, block);
    }
  }

  #[test]
  fn chunk_rel_bounds() {
    assert!(Pos::new(0, -1, 0).chunk_rel().is_err());
    assert!(Pos::new(0, 128, 0).chunk_rel().is_err());
    assert!(Pos::new(0, 127, 0).chunk_rel().is_ok());
  }

  #[test]
  fn checked_add() {
    assert_eq!(Pos::new(0, 0, 0).checked_add(5, 5, 5), Some(Pos::new(5, 5, 5)));
    assert_eq!(Pos::new(0, 0, 0).checked_add(-1, 0, -1), Some(Pos::new(-1, 0, -1)));
    assert_eq!(Pos::new(-156, 70, -91).checked_add(-1, 0, 0), Some(Pos::new(-157, 70, -91)));
    // Leaving the world vertically fails.
    assert_eq!(Pos::new(0, 127, 0).checked_add(0, 1, 0), None);
    assert_eq!(Pos::new(0, 0, 0).checked_add(0, -1, 0), None);
    // Horizontal overflow fails instead of wrapping.
    assert_eq!(Pos::new(i32::MAX, 0, 0).checked_add(1, 0, 0), None);
  }

  #[test]
  fn dir_from_byte() {
    assert_eq!(Pos::dir_from_byte(0), Pos::new(0, -1, 0));
    assert_eq!(Pos::dir_from_byte(5), Pos::new(1, 0, 0));
    assert_eq!(Pos::dir_from_byte(200), Pos::new(0, 0, 0));
  }

  #[test]
  fn fixed_point() {
    assert_eq!(Pos::new(0, 0, 1).fixed(), IPos::new(0, 0, 32));
    assert_eq!(Pos::new(0, 0, -1).fixed(), IPos::new(0, 0, -32));
    assert_eq!(Pos::new(0, 63, 0).fixed(), IPos::new(0, 2016, 0));
    assert_eq!(Pos::new(0, 64, 0).fixed(), IPos::new(0, 2048, 0));
  }
}
