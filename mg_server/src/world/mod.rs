//! The simulated world: chunks, and the shards that own them.
//!
//! [`ShardManager`] is the only entry point. It maps shard coordinates to
//! running shard actors, spawning them on first use, and hands out
//! [`ShardConn`] handles for sessions to talk to them.

mod chunk;
mod shard;

pub use chunk::Chunk;
pub use shard::{Command, ShardConn, ShardHandle, ShardState};

use crate::{entity::EntityIds, item::ItemTypes, net::ConnSender, store::ChunkStore};
use mg_common::{
  math::{ChunkPos, ShardPos},
  util::ThreadPool,
};
use parking_lot::Mutex;
use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

pub struct ShardManager {
  shards: Mutex<HashMap<ShardPos, ShardHandle>>,
  store:  Arc<ChunkStore>,
  io:     Arc<ThreadPool<()>>,
  eids:   EntityIds,
  types:  Arc<ItemTypes>,
  seed:   i64,
}

impl ShardManager {
  pub fn new(
    store: Arc<ChunkStore>,
    eids: EntityIds,
    types: Arc<ItemTypes>,
    seed: i64,
  ) -> ShardManager {
    ShardManager {
      shards: Mutex::new(HashMap::new()),
      store,
      io: Arc::new(ThreadPool::auto("chunk io", || ())),
      eids,
      types,
      seed,
    }
  }

  /// The shard owning the given coordinates, spawned on first use.
  pub fn shard_for(&self, pos: ShardPos) -> ShardHandle {
    self
      .shards
      .lock()
      .entry(pos)
      .or_insert_with(|| {
        shard::spawn(
          pos,
          self.store.clone(),
          self.io.clone(),
          self.eids.clone(),
          self.types.clone(),
          self.seed,
        )
      })
      .clone()
  }

  /// Connects a session to the shard at `pos`.
  pub fn connect(&self, eid: i32, sender: &ConnSender, pos: ShardPos) -> ShardConn {
    self.shard_for(pos).connect(eid, sender.clone())
  }

  /// Asks every running shard to flush dirty chunks.
  pub fn save_all(&self) {
    for handle in self.shards.lock().values() {
      handle.save_all();
    }
  }

  /// Stops every shard, saving as they go.
  pub fn shutdown(&self) {
    for (_, handle) in self.shards.lock().drain() {
      handle.shutdown();
    }
  }
}

/// The subscription changes when a player's chunk column changes: the chunks
/// to unsubscribe from, and the chunks to subscribe to. Both squares have
/// edge `2*radius + 1`.
pub fn subscription_diff(
  old: ChunkPos,
  new: ChunkPos,
  radius: i32,
) -> (Vec<ChunkPos>, Vec<ChunkPos>) {
  let old_set: HashSet<_> = old.columns_in_radius(radius).collect();
  let new_set: HashSet<_> = new.columns_in_radius(radius).collect();
  let unsubscribe = old.columns_in_radius(radius).filter(|c| !new_set.contains(c)).collect();
  let subscribe = new.columns_in_radius(radius).filter(|c| !old_set.contains(c)).collect();
  (unsubscribe, subscribe)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn diff_when_crossing_one_boundary() {
    // A player at block (0, 64, 0) moving to (16, 64, 0) crosses from chunk
    // (0,0) to (1,0). With radius 3 that drops column x=-3 and gains x=4.
    let (unsub, sub) = subscription_diff(ChunkPos::new(0, 0), ChunkPos::new(1, 0), 3);
    assert_eq!(unsub.len(), 7);
    assert_eq!(sub.len(), 7);
    assert!(unsub.iter().all(|c| c.x() == -3));
    assert!(sub.iter().all(|c| c.x() == 4));
    for z in -3..=3 {
      assert!(unsub.contains(&ChunkPos::new(-3, z)));
      assert!(sub.contains(&ChunkPos::new(4, z)));
    }
  }

  #[test]
  fn diff_without_movement_is_empty() {
    let (unsub, sub) = subscription_diff(ChunkPos::new(5, 5), ChunkPos::new(5, 5), 3);
    assert!(unsub.is_empty());
    assert!(sub.is_empty());
  }

  #[test]
  fn diff_on_diagonal_move() {
    let (unsub, sub) = subscription_diff(ChunkPos::new(0, 0), ChunkPos::new(1, 1), 1);
    // A 3x3 square moving diagonally keeps a 2x2 overlap.
    assert_eq!(unsub.len(), 5);
    assert_eq!(sub.len(), 5);
  }

  #[test]
  fn diff_beyond_overlap_replaces_everything() {
    let (unsub, sub) = subscription_diff(ChunkPos::new(0, 0), ChunkPos::new(100, 0), 2);
    assert_eq!(unsub.len(), 25);
    assert_eq!(sub.len(), 25);
  }
}
