//! A single region file: a sector-addressed container for up to 32x32
//! chunks.
//!
//! The file starts with two 4096-byte header sectors. The first holds 1024
//! location entries of `[offset_hi offset_mid offset_lo sector_count]`, the
//! second 1024 big-endian timestamps. Chunk payloads start at a sector
//! boundary with a 4-byte big-endian length (covering the compression byte
//! and the compressed data), one compression-scheme byte, then the compressed
//! NBT blob.

use super::StoreError;
use flate2::{
  read::{GzDecoder, ZlibDecoder},
  write::ZlibEncoder,
  Compression,
};
use mg_common::{math::ChunkPos, nbt::Nbt};
use std::{
  fs::{File, OpenOptions},
  io,
  io::{Read, Seek, SeekFrom, Write},
  path::Path,
  time::{SystemTime, UNIX_EPOCH},
};

pub const SECTOR_SIZE: usize = 4096;
const HEADER_SECTORS: u32 = 2;

const COMPRESSION_GZIP: u8 = 1;
const COMPRESSION_ZLIB: u8 = 2;

pub struct RegionFile {
  file:       File,
  // Raw location entries: `offset << 8 | sector_count`, offset in sectors.
  locations:  [u32; 1024],
  timestamps: [u32; 1024],
}

fn chunk_index(pos: ChunkPos) -> usize {
  ((pos.x() & 31) + (pos.z() & 31) * 32) as usize
}

impl RegionFile {
  /// Opens a region file. If the file does not exist and `create` is false,
  /// returns `Ok(None)`; with `create` set, a file with an empty header is
  /// written.
  pub fn open(path: &Path, create: bool) -> Result<Option<RegionFile>, StoreError> {
    if !path.exists() {
      if !create {
        return Ok(None);
      }
      let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
      file.write_all(&[0; SECTOR_SIZE * HEADER_SECTORS as usize])?;
      file.flush()?;
      return Ok(Some(RegionFile { file, locations: [0; 1024], timestamps: [0; 1024] }));
    }

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut header = [0; SECTOR_SIZE * HEADER_SECTORS as usize];
    file.read_exact(&mut header).map_err(|e| {
      if e.kind() == io::ErrorKind::UnexpectedEof {
        StoreError::Corrupt(format!("region file {} has a short header", path.display()))
      } else {
        StoreError::IO(e)
      }
    })?;

    let mut locations = [0; 1024];
    let mut timestamps = [0; 1024];
    for i in 0..1024 {
      locations[i] = u32::from_be_bytes(header[i * 4..i * 4 + 4].try_into().unwrap());
      let t = SECTOR_SIZE + i * 4;
      timestamps[i] = u32::from_be_bytes(header[t..t + 4].try_into().unwrap());
    }
    Ok(Some(RegionFile { file, locations, timestamps }))
  }

  /// Reads the decompressed NBT blob for a chunk. `Ok(None)` means this
  /// region has never stored that chunk; anything malformed is an error, and
  /// never an empty chunk.
  pub fn read_chunk_data(&mut self, pos: ChunkPos) -> Result<Option<Vec<u8>>, StoreError> {
    let entry = self.locations[chunk_index(pos)];
    let offset = entry >> 8;
    let sectors = entry & 0xff;
    if offset == 0 {
      return Ok(None);
    }

    self.file.seek(SeekFrom::Start(offset as u64 * SECTOR_SIZE as u64))?;
    let mut len_buf = [0; 4];
    self.file.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len < 1 || len > sectors as usize * SECTOR_SIZE {
      return Err(StoreError::Corrupt(format!(
        "chunk {pos} has invalid payload length {len} ({sectors} sectors allocated)"
      )));
    }
    let mut payload = vec![0; len];
    self.file.read_exact(&mut payload)?;

    let mut out = vec![];
    match payload[0] {
      COMPRESSION_GZIP => {
        GzDecoder::new(&payload[1..]).read_to_end(&mut out)?;
      }
      COMPRESSION_ZLIB => {
        ZlibDecoder::new(&payload[1..]).read_to_end(&mut out)?;
      }
      scheme => {
        return Err(StoreError::Corrupt(format!(
          "chunk {pos} has unknown compression scheme {scheme}"
        )))
      }
    }
    Ok(Some(out))
  }

  /// Writes a chunk, reusing its existing sector run when the new payload
  /// fits, and appending past every allocated run otherwise. The header is
  /// updated and flushed before this returns.
  pub fn write_chunk_data(&mut self, pos: ChunkPos, nbt: &Nbt) -> Result<(), StoreError> {
    let mut enc = ZlibEncoder::new(vec![], Compression::default());
    enc.write_all(&nbt.serialize())?;
    let compressed = enc.finish()?;

    // Length prefix covers the scheme byte as well.
    let len = compressed.len() + 1;
    let needed = ((4 + len + SECTOR_SIZE - 1) / SECTOR_SIZE) as u32;

    let i = chunk_index(pos);
    let entry = self.locations[i];
    let offset = if entry >> 8 != 0 && entry & 0xff >= needed {
      entry >> 8
    } else {
      self.end_of_allocations()
    };

    self.file.seek(SeekFrom::Start(offset as u64 * SECTOR_SIZE as u64))?;
    let mut payload = Vec::with_capacity(needed as usize * SECTOR_SIZE);
    payload.extend((len as u32).to_be_bytes());
    payload.push(COMPRESSION_ZLIB);
    payload.extend(&compressed);
    payload.resize(needed as usize * SECTOR_SIZE, 0);
    self.file.write_all(&payload)?;

    self.locations[i] = offset << 8 | needed;
    self.timestamps[i] =
      SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0);

    self.file.seek(SeekFrom::Start(i as u64 * 4))?;
    self.file.write_all(&self.locations[i].to_be_bytes())?;
    self.file.seek(SeekFrom::Start(SECTOR_SIZE as u64 + i as u64 * 4))?;
    self.file.write_all(&self.timestamps[i].to_be_bytes())?;
    self.file.flush()?;
    Ok(())
  }

  /// The first sector past every allocated run, where a new run can grow
  /// without clobbering anything.
  fn end_of_allocations(&self) -> u32 {
    let mut end = HEADER_SECTORS;
    for entry in self.locations {
      let run_end = (entry >> 8) + (entry & 0xff);
      if run_end > end {
        end = run_end;
      }
    }
    end
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mg_common::nbt::Tag;
  use pretty_assertions::assert_eq;

  fn scratch(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("mg_region_test_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
  }

  fn sample_nbt(x: i32) -> Nbt {
    Nbt::new(
      "",
      Tag::new_compound(&[(
        "Level",
        Tag::new_compound(&[("xPos", Tag::Int(x)), ("zPos", Tag::Int(5))]),
      )]),
    )
  }

  #[test]
  fn missing_file_is_not_created_for_reads() {
    let path = scratch("r.9.9.mca");
    let _ = std::fs::remove_file(&path);
    assert!(RegionFile::open(&path, false).unwrap().is_none());
    assert!(!path.exists());
  }

  #[test]
  fn absent_chunk_is_none() {
    let path = scratch("r.0.0.mca");
    let _ = std::fs::remove_file(&path);
    let mut rf = RegionFile::open(&path, true).unwrap().unwrap();
    assert!(rf.read_chunk_data(ChunkPos::new(5, 5)).unwrap().is_none());
  }

  #[test]
  fn write_then_read() {
    let path = scratch("r.1.0.mca");
    let _ = std::fs::remove_file(&path);
    let mut rf = RegionFile::open(&path, true).unwrap().unwrap();

    let nbt = sample_nbt(33);
    rf.write_chunk_data(ChunkPos::new(33, 5), &nbt).unwrap();
    let data = rf.read_chunk_data(ChunkPos::new(33, 5)).unwrap().unwrap();
    assert_eq!(Nbt::deserialize(data).unwrap(), nbt);

    // Reopening must read the same data through the on-disk header.
    drop(rf);
    let mut rf = RegionFile::open(&path, false).unwrap().unwrap();
    let data = rf.read_chunk_data(ChunkPos::new(33, 5)).unwrap().unwrap();
    assert_eq!(Nbt::deserialize(data).unwrap(), nbt);
    // And the neighbor is still absent.
    assert!(rf.read_chunk_data(ChunkPos::new(34, 5)).unwrap().is_none());
  }

  #[test]
  fn rewrites_reuse_sectors() {
    let path = scratch("r.2.0.mca");
    let _ = std::fs::remove_file(&path);
    let mut rf = RegionFile::open(&path, true).unwrap().unwrap();

    let pos = ChunkPos::new(64, 0);
    rf.write_chunk_data(pos, &sample_nbt(64)).unwrap();
    let first = rf.locations[chunk_index(pos)];
    rf.write_chunk_data(pos, &sample_nbt(64)).unwrap();
    let second = rf.locations[chunk_index(pos)];
    // Same payload size, so the same sector run is reused.
    assert_eq!(first >> 8, second >> 8);
  }

  #[test]
  fn two_chunks_do_not_collide() {
    let path = scratch("r.3.0.mca");
    let _ = std::fs::remove_file(&path);
    let mut rf = RegionFile::open(&path, true).unwrap().unwrap();

    let a = ChunkPos::new(96, 0);
    let b = ChunkPos::new(97, 31);
    rf.write_chunk_data(a, &sample_nbt(96)).unwrap();
    rf.write_chunk_data(b, &sample_nbt(97)).unwrap();
    assert_eq!(
      Nbt::deserialize(rf.read_chunk_data(a).unwrap().unwrap()).unwrap(),
      sample_nbt(96)
    );
    assert_eq!(
      Nbt::deserialize(rf.read_chunk_data(b).unwrap().unwrap()).unwrap(),
      sample_nbt(97)
    );
  }

  #[test]
  fn corrupt_length_is_an_error() {
    let path = scratch("r.4.0.mca");
    let _ = std::fs::remove_file(&path);
    let mut rf = RegionFile::open(&path, true).unwrap().unwrap();
    let pos = ChunkPos::new(128, 0);
    rf.write_chunk_data(pos, &sample_nbt(128)).unwrap();

    // Stamp garbage over the payload length.
    let entry = rf.locations[chunk_index(pos)];
    rf.file.seek(SeekFrom::Start((entry >> 8) as u64 * SECTOR_SIZE as u64)).unwrap();
    rf.file.write_all(&u32::MAX.to_be_bytes()).unwrap();
    assert!(matches!(rf.read_chunk_data(pos), Err(StoreError::Corrupt(_))));
  }
}
