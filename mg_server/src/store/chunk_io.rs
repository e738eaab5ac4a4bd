//! Translation between the on-disk chunk NBT and flat block arrays.
//!
//! On disk a chunk is a `Level` compound holding a `Sections` list. Section
//! `s` holds the slice `[4096*s .. 4096*(s+1))` of the chunk's block array
//! (and the matching 2048-byte slices of the nibble arrays), tagged with its
//! `Y` index. Reading concatenates the sections in ascending Y order, filling
//! any gap with zeroes, so a full chunk always comes back as one
//! 16*16*16*8 = 32768 byte array.

use super::StoreError;
use mg_common::{
  math::ChunkPos,
  nbt::{Nbt, Tag},
};

/// Sections per chunk column: 128 blocks of height in 16-block slices.
pub const NUM_SECTIONS: usize = 8;
/// Bytes of block ids per section.
pub const SECTION_ARRAY_LEN: usize = 16 * 16 * 16;
/// Bytes of packed nibbles per section.
pub const NIBBLE_ARRAY_LEN: usize = SECTION_ARRAY_LEN / 2;

/// A parsed chunk, ready to pull arrays out of.
pub struct ChunkReader {
  pos:   ChunkPos,
  level: Tag,
}

impl ChunkReader {
  /// Parses the NBT blob of a chunk. The root must hold a `Level` compound
  /// whose `xPos`/`zPos` match the position the chunk was looked up by.
  pub fn new(pos: ChunkPos, data: Vec<u8>) -> Result<ChunkReader, StoreError> {
    let root = Nbt::deserialize(data)?.into_tag();
    let level = root
      .get("Level")
      .ok_or_else(|| StoreError::Corrupt(format!("chunk {pos} has no Level tag")))?
      .clone();

    let x = level
      .get("xPos")
      .ok_or_else(|| StoreError::Corrupt(format!("chunk {pos} has no xPos")))?
      .int()?;
    let z = level
      .get("zPos")
      .ok_or_else(|| StoreError::Corrupt(format!("chunk {pos} has no zPos")))?
      .int()?;
    if ChunkPos::new(x, z) != pos {
      return Err(StoreError::Corrupt(format!(
        "chunk {pos} has stored position ChunkPos({x} {z})"
      )));
    }
    Ok(ChunkReader { pos, level })
  }

  pub fn pos(&self) -> ChunkPos { self.pos }

  /// Concatenates one per-section array into the full chunk array. Missing
  /// sections are left zeroed.
  fn combine_sections(&self, key: &'static str, section_len: usize) -> Result<Vec<u8>, StoreError> {
    let mut out = vec![0; section_len * NUM_SECTIONS];
    let sections = match self.level.get("Sections") {
      Some(list) => list.list()?,
      None => return Ok(out),
    };
    for section in sections {
      let y = section
        .get("Y")
        .ok_or_else(|| StoreError::Corrupt(format!("chunk {} section has no Y", self.pos)))?
        .byte()?;
      if y < 0 || y as usize >= NUM_SECTIONS {
        return Err(StoreError::Corrupt(format!(
          "chunk {} section Y {y} out of range",
          self.pos
        )));
      }
      let arr = match section.get(key) {
        Some(arr) => arr.byte_arr()?,
        None => continue,
      };
      if arr.len() != section_len {
        return Err(StoreError::Corrupt(format!(
          "chunk {} section {y} {key} is {} bytes, want {section_len}",
          self.pos,
          arr.len()
        )));
      }
      out[y as usize * section_len..(y as usize + 1) * section_len].copy_from_slice(arr);
    }
    Ok(out)
  }

  pub fn blocks(&self) -> Result<Vec<u8>, StoreError> {
    self.combine_sections("Blocks", SECTION_ARRAY_LEN)
  }
  pub fn block_data(&self) -> Result<Vec<u8>, StoreError> {
    self.combine_sections("Data", NIBBLE_ARRAY_LEN)
  }
  pub fn block_light(&self) -> Result<Vec<u8>, StoreError> {
    self.combine_sections("BlockLight", NIBBLE_ARRAY_LEN)
  }
  pub fn sky_light(&self) -> Result<Vec<u8>, StoreError> {
    self.combine_sections("SkyLight", NIBBLE_ARRAY_LEN)
  }

  pub fn height_map(&self) -> Result<Vec<i32>, StoreError> {
    match self.level.get("HeightMap") {
      Some(arr) => Ok(arr.int_arr()?.clone()),
      None => Ok(vec![0; 16 * 16]),
    }
  }

  /// The raw entity compounds. The entity module decides which of these it
  /// can revive.
  pub fn entities(&self) -> Vec<&Tag> {
    match self.level.get("Entities").and_then(|t| t.list().ok()) {
      Some(list) => list.iter().collect(),
      None => vec![],
    }
  }

  pub fn tile_entities(&self) -> Vec<&Tag> {
    match self.level.get("TileEntities").and_then(|t| t.list().ok()) {
      Some(list) => list.iter().collect(),
      None => vec![],
    }
  }
}

/// Collects a chunk's state for writing. Fill in the arrays, then hand it to
/// [`ChunkStore::write_chunk`](super::ChunkStore::write_chunk).
pub struct ChunkWriter {
  pos:               ChunkPos,
  pub blocks:        Vec<u8>,
  pub data:          Vec<u8>,
  pub block_light:   Vec<u8>,
  pub sky_light:     Vec<u8>,
  pub height_map:    Vec<i32>,
  pub entities:      Vec<Tag>,
  pub tile_entities: Vec<Tag>,
  pub last_update:   i64,
}

impl ChunkWriter {
  pub fn new(pos: ChunkPos) -> ChunkWriter {
    ChunkWriter {
      pos,
      blocks: vec![0; SECTION_ARRAY_LEN * NUM_SECTIONS],
      data: vec![0; NIBBLE_ARRAY_LEN * NUM_SECTIONS],
      block_light: vec![0; NIBBLE_ARRAY_LEN * NUM_SECTIONS],
      sky_light: vec![0; NIBBLE_ARRAY_LEN * NUM_SECTIONS],
      height_map: vec![0; 16 * 16],
      entities: vec![],
      tile_entities: vec![],
      last_update: 0,
    }
  }

  pub fn pos(&self) -> ChunkPos { self.pos }

  /// Builds the on-disk NBT tree. Every section is written, including all-air
  /// ones; the reader tolerates gaps but we never produce them.
  pub fn to_nbt(&self) -> Nbt {
    let mut sections = Vec::with_capacity(NUM_SECTIONS);
    for s in 0..NUM_SECTIONS {
      let b = s * SECTION_ARRAY_LEN..(s + 1) * SECTION_ARRAY_LEN;
      let n = s * NIBBLE_ARRAY_LEN..(s + 1) * NIBBLE_ARRAY_LEN;
      sections.push(Tag::new_compound(&[
        ("Y", Tag::Byte(s as i8)),
        ("Blocks", Tag::ByteArr(self.blocks[b].to_vec())),
        ("Data", Tag::ByteArr(self.data[n.clone()].to_vec())),
        ("BlockLight", Tag::ByteArr(self.block_light[n.clone()].to_vec())),
        ("SkyLight", Tag::ByteArr(self.sky_light[n].to_vec())),
      ]));
    }

    Nbt::new(
      "",
      Tag::new_compound(&[(
        "Level",
        Tag::new_compound(&[
          ("xPos", Tag::Int(self.pos.x())),
          ("zPos", Tag::Int(self.pos.z())),
          ("LastUpdate", Tag::Long(self.last_update)),
          ("TerrainPopulated", Tag::Byte(1)),
          ("Sections", Tag::List(sections)),
          ("HeightMap", Tag::IntArray(self.height_map.clone())),
          ("Entities", Tag::List(self.entities.clone())),
          ("TileEntities", Tag::List(self.tile_entities.clone())),
        ]),
      )]),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn reader_for(w: &ChunkWriter) -> ChunkReader {
    ChunkReader::new(w.pos(), w.to_nbt().serialize()).unwrap()
  }

  #[test]
  fn sections_concatenate_in_ascending_y() {
    let mut w = ChunkWriter::new(ChunkPos::new(1, 2));
    // A distinct pattern per section, so any reordering or overlap shows.
    for s in 0..NUM_SECTIONS {
      for i in 0..SECTION_ARRAY_LEN {
        w.blocks[s * SECTION_ARRAY_LEN + i] = (s as u8) * 29 ^ (i % 256) as u8;
      }
    }
    let r = reader_for(&w);
    let blocks = r.blocks().unwrap();
    assert_eq!(blocks.len(), SECTION_ARRAY_LEN * NUM_SECTIONS);
    assert_eq!(blocks, w.blocks);
  }

  #[test]
  fn missing_sections_read_as_air() {
    // Hand-build a chunk with only section 1 present.
    let mut section = vec![0; SECTION_ARRAY_LEN];
    section[0] = 7;
    let nbt = Nbt::new(
      "",
      Tag::new_compound(&[(
        "Level",
        Tag::new_compound(&[
          ("xPos", Tag::Int(0)),
          ("zPos", Tag::Int(0)),
          (
            "Sections",
            Tag::List(vec![Tag::new_compound(&[
              ("Y", Tag::Byte(1)),
              ("Blocks", Tag::ByteArr(section)),
            ])]),
          ),
        ]),
      )]),
    );
    let r = ChunkReader::new(ChunkPos::new(0, 0), nbt.serialize()).unwrap();
    let blocks = r.blocks().unwrap();
    assert_eq!(blocks.len(), SECTION_ARRAY_LEN * NUM_SECTIONS);
    assert_eq!(blocks[SECTION_ARRAY_LEN], 7);
    assert!(blocks[..SECTION_ARRAY_LEN].iter().all(|b| *b == 0));
    // Nibble arrays were absent entirely, which reads as all-zero.
    assert!(r.block_data().unwrap().iter().all(|b| *b == 0));
  }

  #[test]
  fn nibble_arrays_round_trip() {
    let mut w = ChunkWriter::new(ChunkPos::new(-1, -1));
    for i in 0..w.sky_light.len() {
      w.sky_light[i] = (i % 255) as u8;
    }
    let r = reader_for(&w);
    assert_eq!(r.sky_light().unwrap(), w.sky_light);
  }

  #[test]
  fn rejects_position_mismatch() {
    let w = ChunkWriter::new(ChunkPos::new(3, 4));
    let err = ChunkReader::new(ChunkPos::new(3, 5), w.to_nbt().serialize());
    assert!(matches!(err, Err(StoreError::Corrupt(_))));
  }

  #[test]
  fn rejects_bad_section_length() {
    let nbt = Nbt::new(
      "",
      Tag::new_compound(&[(
        "Level",
        Tag::new_compound(&[
          ("xPos", Tag::Int(0)),
          ("zPos", Tag::Int(0)),
          (
            "Sections",
            Tag::List(vec![Tag::new_compound(&[
              ("Y", Tag::Byte(0)),
              ("Blocks", Tag::ByteArr(vec![1, 2, 3])),
            ])]),
          ),
        ]),
      )]),
    );
    let r = ChunkReader::new(ChunkPos::new(0, 0), nbt.serialize()).unwrap();
    assert!(matches!(r.blocks(), Err(StoreError::Corrupt(_))));
  }

  #[test]
  fn entity_lists_default_empty() {
    let w = ChunkWriter::new(ChunkPos::new(0, 0));
    let r = reader_for(&w);
    assert!(r.entities().is_empty());
    assert!(r.tile_entities().is_empty());
  }
}
