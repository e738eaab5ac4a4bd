//! Persistence for the world: region files full of chunks, the `level.dat`
//! world header, and per-player data files.
//!
//! Everything here reports a missing chunk as a distinct `Ok(None)` outcome.
//! Malformed data (short reads, bad lengths, unknown compression, broken NBT)
//! is always an error, and is never replaced with an empty chunk.

mod chunk_io;
mod region;
mod world_store;

pub use chunk_io::{ChunkReader, ChunkWriter, NIBBLE_ARRAY_LEN, NUM_SECTIONS, SECTION_ARRAY_LEN};
pub use region::RegionFile;
pub use world_store::{saved_position, WorldStore};

use mg_common::{
  math::ChunkPos,
  nbt::{ParseError, WrongTag},
};
use parking_lot::Mutex;
use std::{
  collections::{HashMap, VecDeque},
  io,
  path::{Path, PathBuf},
  sync::Arc,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("{0}")]
  IO(#[from] io::Error),
  #[error("corrupt world data: {0}")]
  Corrupt(String),
  #[error("corrupt nbt: {0}")]
  Nbt(#[from] ParseError),
  #[error("corrupt nbt: {0}")]
  WrongTag(#[from] WrongTag),
}

/// How many region files we keep open at once. Each one holds a file handle
/// and two header sectors in memory.
const MAX_OPEN_REGIONS: usize = 64;

/// A directory of region files for one dimension. Region file access is
/// serialized per file; the store itself can be shared between shards.
pub struct ChunkStore {
  region_path: PathBuf,
  regions:     Mutex<RegionCache>,
}

/// Open region files, oldest-used first in `age`.
struct RegionCache {
  files: HashMap<u64, Arc<Mutex<RegionFile>>>,
  age:   VecDeque<u64>,
}

fn region_key(rx: i32, rz: i32) -> u64 { ((rx as u32 as u64) << 32) | (rz as u32 as u64) }

impl ChunkStore {
  /// Creates a store over `<world>/region` for the overworld, or
  /// `<world>/DIM<n>/region` for any other dimension. The directory is
  /// created if needed.
  pub fn new(world_path: &Path, dimension: i32) -> io::Result<ChunkStore> {
    let region_path = if dimension == 0 {
      world_path.join("region")
    } else {
      world_path.join(format!("DIM{dimension}")).join("region")
    };
    std::fs::create_dir_all(&region_path)?;
    Ok(ChunkStore {
      region_path,
      regions: Mutex::new(RegionCache { files: HashMap::new(), age: VecDeque::new() }),
    })
  }

  fn region_for(
    &self,
    pos: ChunkPos,
    create: bool,
  ) -> Result<Option<Arc<Mutex<RegionFile>>>, StoreError> {
    let (rx, rz) = pos.region();
    let key = region_key(rx, rz);

    let mut cache = self.regions.lock();
    if let Some(rf) = cache.files.get(&key) {
      let rf = rf.clone();
      cache.age.retain(|k| *k != key);
      cache.age.push_back(key);
      return Ok(Some(rf));
    }

    let path = self.region_path.join(format!("r.{rx}.{rz}.mca"));
    let rf = match RegionFile::open(&path, create)? {
      Some(rf) => Arc::new(Mutex::new(rf)),
      None => return Ok(None),
    };
    cache.files.insert(key, rf.clone());
    cache.age.push_back(key);
    if cache.files.len() > MAX_OPEN_REGIONS {
      if let Some(old) = cache.age.pop_front() {
        cache.files.remove(&old);
      }
    }
    Ok(Some(rf))
  }

  /// Reads a chunk. `Ok(None)` is the "no such chunk" outcome: the region
  /// file or the chunk within it has never been written.
  pub fn read_chunk(&self, pos: ChunkPos) -> Result<Option<ChunkReader>, StoreError> {
    let rf = match self.region_for(pos, false)? {
      Some(rf) => rf,
      None => return Ok(None),
    };
    let data = rf.lock().read_chunk_data(pos)?;
    match data {
      Some(data) => Ok(Some(ChunkReader::new(pos, data)?)),
      None => Ok(None),
    }
  }

  /// Writes a chunk, creating the region file if needed.
  pub fn write_chunk(&self, writer: &ChunkWriter) -> Result<(), StoreError> {
    let rf = self
      .region_for(writer.pos(), true)?
      .expect("region_for with create always returns a file");
    let nbt = writer.to_nbt();
    let result = rf.lock().write_chunk_data(writer.pos(), &nbt);
    result
  }
}
