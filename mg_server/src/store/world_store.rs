//! The world directory as a whole: `level.dat`, the per-dimension chunk
//! stores, and `players/<username>.dat` files.

use super::{ChunkStore, StoreError};
use flate2::{write::GzEncoder, Compression};
use mg_common::{
  math::FPos,
  nbt::{Nbt, Tag},
};
use std::{io::Write, path::PathBuf, sync::Arc};

pub struct WorldStore {
  path:       PathBuf,
  chunks:     Arc<ChunkStore>,
  spawn:      FPos,
  time:       u64,
  seed:       i64,
  level_name: String,
}

impl WorldStore {
  /// Loads `level.dat` and opens the overworld chunk store. A missing or
  /// unreadable world root is fatal to the caller.
  pub fn load(path: PathBuf) -> Result<WorldStore, StoreError> {
    let level_path = path.join("level.dat");
    let raw = std::fs::read(&level_path)?;
    let root = Nbt::deserialize_file(raw)?.into_tag();
    let data = root
      .get("Data")
      .ok_or_else(|| StoreError::Corrupt("level.dat has no Data tag".into()))?;

    let spawn = FPos::new(
      tag_int(data, "SpawnX")? as f64,
      tag_int(data, "SpawnY")? as f64,
      tag_int(data, "SpawnZ")? as f64,
    );
    let time = tag_long(data, "Time")?.max(0) as u64;
    let seed = tag_long(data, "RandomSeed")?;
    let level_name = match data.get("LevelName") {
      Some(tag) => tag.string()?.clone(),
      None => String::new(),
    };

    let chunks = Arc::new(ChunkStore::new(&path, 0)?);
    Ok(WorldStore { path, chunks, spawn, time, seed, level_name })
  }

  pub fn chunks(&self) -> Arc<ChunkStore> { self.chunks.clone() }
  pub fn spawn_position(&self) -> FPos { self.spawn }
  pub fn time(&self) -> u64 { self.time }
  pub fn seed(&self) -> i64 { self.seed }
  pub fn level_name(&self) -> &str { &self.level_name }

  /// Opens the chunk store for another dimension.
  pub fn dimension_chunks(&self, dimension: i32) -> Result<ChunkStore, StoreError> {
    Ok(ChunkStore::new(&self.path, dimension)?)
  }

  /// Loads a player's saved data, if any. The username must already be
  /// validated; it becomes a file name here.
  pub fn player_data(&self, username: &str) -> Result<Option<Nbt>, StoreError> {
    let path = self.path.join("players").join(format!("{username}.dat"));
    let raw = match std::fs::read(&path) {
      Ok(v) => v,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    Ok(Some(Nbt::deserialize_file(raw)?))
  }

  /// Saves a player's data, creating `players/` if needed.
  pub fn write_player_data(&self, username: &str, nbt: &Nbt) -> Result<(), StoreError> {
    let dir = self.path.join("players");
    std::fs::create_dir_all(&dir)?;
    let mut enc = GzEncoder::new(vec![], Compression::default());
    enc.write_all(&nbt.serialize())?;
    std::fs::write(dir.join(format!("{username}.dat")), enc.finish()?)?;
    Ok(())
  }
}

fn tag_int(data: &Tag, name: &'static str) -> Result<i32, StoreError> {
  data
    .get(name)
    .ok_or_else(|| StoreError::Corrupt(format!("level.dat has no {name} tag")))?
    .int()
    .map_err(Into::into)
}

fn tag_long(data: &Tag, name: &'static str) -> Result<i64, StoreError> {
  data
    .get(name)
    .ok_or_else(|| StoreError::Corrupt(format!("level.dat has no {name} tag")))?
    .long()
    .map_err(Into::into)
}

/// Pulls a saved position out of a player data file: the `Pos` list of three
/// doubles. Returns `None` if the list is missing or malformed, in which case
/// the caller falls back to the world spawn.
pub fn saved_position(data: &Nbt) -> Option<FPos> {
  let list = data.get("Pos")?.list().ok()?;
  if list.len() != 3 {
    return None;
  }
  let x = list[0].double().ok()?;
  let y = list[1].double().ok()?;
  let z = list[2].double().ok()?;
  Some(FPos::new(x, y, z))
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn scratch_world(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mg_world_test_{}_{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  fn write_level_dat(path: &PathBuf) {
    let nbt = Nbt::new(
      "",
      Tag::new_compound(&[(
        "Data",
        Tag::new_compound(&[
          ("SpawnX", Tag::Int(10)),
          ("SpawnY", Tag::Int(64)),
          ("SpawnZ", Tag::Int(-4)),
          ("Time", Tag::Long(1234)),
          ("RandomSeed", Tag::Long(0x1122334455667788)),
          ("LevelName", Tag::String("world".into())),
          ("LastPlayed", Tag::Long(0)),
        ]),
      )]),
    );
    let mut enc = GzEncoder::new(vec![], Compression::default());
    enc.write_all(&nbt.serialize()).unwrap();
    std::fs::write(path.join("level.dat"), enc.finish().unwrap()).unwrap();
  }

  #[test]
  fn loads_level_dat() {
    let dir = scratch_world("level");
    write_level_dat(&dir);
    let store = WorldStore::load(dir).unwrap();
    assert_eq!(store.spawn_position(), FPos::new(10.0, 64.0, -4.0));
    assert_eq!(store.time(), 1234);
    assert_eq!(store.seed(), 0x1122334455667788);
    assert_eq!(store.level_name(), "world");
  }

  #[test]
  fn missing_world_is_an_error() {
    let dir = scratch_world("missing").join("nope");
    assert!(WorldStore::load(dir).is_err());
  }

  #[test]
  fn player_data_round_trip() {
    let dir = scratch_world("players");
    write_level_dat(&dir);
    let store = WorldStore::load(dir).unwrap();

    assert!(store.player_data("alice").unwrap().is_none());

    let nbt = Nbt::new(
      "",
      Tag::new_compound(&[(
        "Pos",
        Tag::List(vec![Tag::Double(1.5), Tag::Double(64.0), Tag::Double(-2.5)]),
      )]),
    );
    store.write_player_data("alice", &nbt).unwrap();
    let read = store.player_data("alice").unwrap().unwrap();
    assert_eq!(read, nbt);
    assert_eq!(saved_position(&read), Some(FPos::new(1.5, 64.0, -2.5)));
  }

  #[test]
  fn saved_position_rejects_malformed() {
    let nbt = Nbt::new(
      "",
      Tag::new_compound(&[("Pos", Tag::List(vec![Tag::Double(1.0), Tag::Double(2.0)]))]),
    );
    assert_eq!(saved_position(&nbt), None);
    let nbt = Nbt::new("", Tag::new_compound(&[("NotPos", Tag::Int(1))]));
    assert_eq!(saved_position(&nbt), None);
  }
}
