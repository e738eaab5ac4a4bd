use crate::{
  block,
  entity::{Entity, EntityIds, ItemEntity, TickOutcome, TileEntity},
  item::Slot,
  net::ConnSender,
  proto::cb,
  store::{ChunkReader, ChunkWriter, StoreError},
};
use mg_common::math::{ChunkPos, FPos, Pos, RelPos, CHUNK_HEIGHT};
use rand::Rng;
use std::collections::HashMap;

const BLOCKS_LEN: usize = 16 * 128 * 16;
const NIBBLES_LEN: usize = BLOCKS_LEN / 2;

/// A 16x128x16 voxel column, plus everything that lives in it: entities,
/// tile entities, and the set of sessions subscribed to updates.
///
/// Chunks are owned by exactly one shard, and all of these methods run inside
/// that shard's loop.
pub struct Chunk {
  pos:           ChunkPos,
  blocks:        Vec<u8>,
  data:          Vec<u8>,
  block_light:   Vec<u8>,
  sky_light:     Vec<u8>,
  height_map:    Vec<i32>,
  entities:      HashMap<i32, Entity>,
  tile_entities: HashMap<u32, TileEntity>,
  subscribers:   HashMap<i32, ConnSender>,
  /// Positions of players in or near the chunk, for item physics.
  player_pos:    HashMap<i32, FPos>,
  dirty:         bool,
}

impl Chunk {
  fn empty(pos: ChunkPos) -> Chunk {
    Chunk {
      pos,
      blocks: vec![0; BLOCKS_LEN],
      data: vec![0; NIBBLES_LEN],
      block_light: vec![0; NIBBLES_LEN],
      sky_light: vec![0; NIBBLES_LEN],
      height_map: vec![0; 16 * 16],
      entities: HashMap::new(),
      tile_entities: HashMap::new(),
      subscribers: HashMap::new(),
      player_pos: HashMap::new(),
      dirty: false,
    }
  }

  /// A flat fallback chunk, for when the store has nothing: bedrock floor,
  /// dirt up to sea level, grass on top, full sky light above.
  pub fn generate_flat(pos: ChunkPos) -> Chunk {
    let mut c = Chunk::empty(pos);
    for x in 0..16u8 {
      for z in 0..16u8 {
        for y in 0..64u8 {
          let block = match y {
            0 => block::id::BEDROCK,
            63 => block::id::GRASS,
            _ => block::id::DIRT,
          };
          let idx = RelPos::new(x, y, z).block_index().unwrap();
          idx.set_block_id(&mut c.blocks, block);
        }
        for y in 64..128u8 {
          let idx = RelPos::new(x, y, z).block_index().unwrap();
          idx.set_half_byte(&mut c.sky_light, 15);
        }
        c.height_map[(z as usize) * 16 + x as usize] = 64;
      }
    }
    // Fresh chunks are saved on eviction so the world stays consistent.
    c.dirty = true;
    c
  }

  /// Builds a chunk from its stored form, reviving whatever entities and
  /// tile entities are recognized.
  pub fn from_reader(reader: &ChunkReader, eids: &EntityIds) -> Result<Chunk, StoreError> {
    let pos = reader.pos();
    let mut c = Chunk::empty(pos);
    c.blocks = reader.blocks()?;
    c.data = reader.block_data()?;
    c.block_light = reader.block_light()?;
    c.sky_light = reader.sky_light()?;
    c.height_map = reader.height_map()?;
    if c.height_map.len() != 16 * 16 {
      return Err(StoreError::Corrupt(format!(
        "chunk {pos} height map has {} entries",
        c.height_map.len()
      )));
    }

    for tag in reader.entities() {
      match Entity::from_nbt(tag, eids) {
        Some(e) => {
          c.entities.insert(e.eid(), e);
        }
        None => debug!("skipping unknown entity in chunk {pos}"),
      }
    }
    for tag in reader.tile_entities() {
      match TileEntity::from_nbt(tag) {
        Some(te) => {
          if let Ok(rel) = te.pos().chunk_rel() {
            if te.pos().chunk() == pos {
              c.tile_entities.insert(rel.block_index().unwrap().index() as u32, te);
              continue;
            }
          }
          warn!("tile entity at {} stored in wrong chunk {pos}", te.pos());
        }
        None => debug!("skipping unknown tile entity in chunk {pos}"),
      }
    }
    Ok(c)
  }

  /// Snapshots this chunk for the store.
  pub fn to_writer(&self) -> ChunkWriter {
    let mut w = ChunkWriter::new(self.pos);
    w.blocks = self.blocks.clone();
    w.data = self.data.clone();
    w.block_light = self.block_light.clone();
    w.sky_light = self.sky_light.clone();
    w.height_map = self.height_map.clone();
    w.entities = self.entities.values().map(|e| e.to_nbt()).collect();
    w.tile_entities = self.tile_entities.values().map(|te| te.to_nbt()).collect();
    w
  }

  pub fn pos(&self) -> ChunkPos { self.pos }
  pub fn dirty(&self) -> bool { self.dirty }
  pub fn mark_dirty(&mut self) { self.dirty = true; }
  pub fn mark_clean(&mut self) { self.dirty = false; }
  pub fn has_subscribers(&self) -> bool { !self.subscribers.is_empty() }

  pub fn get_block(&self, rel: RelPos) -> Option<(u8, u8)> {
    let idx = rel.block_index()?;
    Some((idx.block_id(&self.blocks), idx.half_byte(&self.data)))
  }

  /// Sets a block and multicasts the change to every subscriber.
  pub fn set_block(&mut self, rel: RelPos, block: u8, data: u8) {
    let idx = match rel.block_index() {
      Some(idx) => idx,
      None => return,
    };
    idx.set_block_id(&mut self.blocks, block);
    idx.set_half_byte(&mut self.data, data);
    self.update_height_map(rel, block);
    self.dirty = true;

    let pos = self.block_pos(rel);
    self.multicast(None, &cb::Packet::BlockChange {
      pos,
      block_type: block,
      block_data: data,
    });
  }

  fn update_height_map(&mut self, rel: RelPos, block: u8) {
    let column = (rel.z() as usize) * 16 + rel.x() as usize;
    let height = self.height_map[column];
    if block != block::id::AIR {
      if rel.y() as i32 + 1 > height {
        self.height_map[column] = rel.y() as i32 + 1;
      }
    } else if rel.y() as i32 + 1 == height {
      // The highest block went away; scan down for the new top.
      let mut y = rel.y() as i32 - 1;
      while y >= 0 {
        let idx = RelPos::new(rel.x(), y as u8, rel.z()).block_index().unwrap();
        if idx.block_id(&self.blocks) != block::id::AIR {
          break;
        }
        y -= 1;
      }
      self.height_map[column] = y + 1;
    }
  }

  fn block_pos(&self, rel: RelPos) -> Pos {
    self.pos.block() + Pos::new(rel.x() as i32, rel.y() as i32, rel.z() as i32)
  }

  /// Registers a subscriber and immediately sends it the full chunk plus a
  /// spawn packet for every resident entity.
  pub fn add_subscriber(&mut self, eid: i32, sender: ConnSender) {
    sender.send(cb::Packet::PreChunk { chunk: self.pos, mode: true });
    sender.send(self.full_packet());
    for entity in self.entities.values() {
      sender.send(entity.spawn_packet());
    }
    self.subscribers.insert(eid, sender);
  }

  /// Removes a subscriber. `send_unload` controls whether the client is told
  /// to drop the chunk; a session that is going away entirely skips that.
  pub fn remove_subscriber(&mut self, eid: i32, send_unload: bool) {
    if let Some(sender) = self.subscribers.remove(&eid) {
      if send_unload {
        sender.send(cb::Packet::PreChunk { chunk: self.pos, mode: false });
      }
    }
    self.player_pos.remove(&eid);
  }

  /// Refreshes a player's position for entity physics. `None` means the
  /// player has left the area.
  pub fn set_subscriber_position(&mut self, eid: i32, pos: Option<FPos>) {
    match pos {
      Some(p) => {
        self.player_pos.insert(eid, p);
      }
      None => {
        self.player_pos.remove(&eid);
      }
    }
  }

  /// Sends a packet to every subscriber except `exclude`.
  pub fn multicast(&self, exclude: Option<i32>, packet: &cb::Packet) {
    for (eid, sender) in &self.subscribers {
      if Some(*eid) == exclude {
        continue;
      }
      sender.send(packet.clone());
    }
  }

  /// The full-chunk packet: every block array, zlib-compressed by the codec.
  pub fn full_packet(&self) -> cb::Packet {
    let mut data =
      Vec::with_capacity(self.blocks.len() + self.data.len() * 3);
    data.extend(&self.blocks);
    data.extend(&self.data);
    data.extend(&self.block_light);
    data.extend(&self.sky_light);
    cb::Packet::MapChunk {
      corner: self.pos.block(),
      size_x: 16,
      size_y: CHUNK_HEIGHT as u8,
      size_z: 16,
      data,
    }
  }

  /// Handles a dig packet from a subscriber. Destruction happens when the
  /// client reports it finished digging; the drop is spawned on top of the
  /// broken block with a little sideways scatter.
  pub fn player_block_hit(
    &mut self,
    rel: RelPos,
    dig_status: u8,
    eids: &EntityIds,
    rng: &mut impl Rng,
  ) -> bool {
    // 2 = finished digging. Start/cancel need no server action.
    if dig_status != 2 {
      return true;
    }
    let (block, data) = match self.get_block(rel) {
      Some(v) => v,
      None => return false,
    };
    if !block::is_destructible(block) {
      return false;
    }
    self.set_block(rel, block::id::AIR, 0);
    self.tile_entities.remove(&(rel.block_index().unwrap().index() as u32));

    if let Some((item, count, item_data)) = block::dropped_item(block, data) {
      let pos = self.block_pos(rel);
      let drop = ItemEntity {
        eid:  eids.alloc(),
        slot: Slot::new(item, count, item_data),
        pos:  FPos::new(pos.x as f64 + 0.5, pos.y as f64, pos.z as f64 + 0.5),
        vel:  FPos::new(rng.gen_range(-0.1..0.1), 0.0, rng.gen_range(-0.1..0.1)),
        age:  0,
      };
      let entity = Entity::Item(drop);
      self.multicast(None, &entity.spawn_packet());
      self.entities.insert(entity.eid(), entity);
    }
    true
  }

  /// Handles a block placement from a subscriber holding `held`. Returns the
  /// slot the player should end up with (one item consumed) or `None` if the
  /// placement was refused.
  pub fn place_block(&mut self, rel: RelPos, held: Slot) -> Option<Slot> {
    if held.is_empty() || held.id < 0 || held.id > u8::MAX as i16 {
      return None;
    }
    match self.get_block(rel) {
      Some((block, _)) if block == block::id::AIR => {}
      _ => return None,
    }
    let block = held.id as u8;
    self.set_block(rel, block, held.data as u8);
    if block == block::id::CHEST {
      let idx = rel.block_index().unwrap().index() as u32;
      self.tile_entities.insert(idx, TileEntity::new_chest(self.block_pos(rel)));
    }
    let mut held = held;
    held.decrement();
    Some(held)
  }

  pub fn tile_entity_mut(&mut self, rel: RelPos) -> Option<&mut TileEntity> {
    self.tile_entities.get_mut(&(rel.block_index()?.index() as u32))
  }

  /// Runs one tick of entity physics, multicasting movement and despawns.
  /// Returns the entities that moved out of this chunk, for the shard to
  /// re-home.
  pub fn tick(&mut self) -> Vec<Entity> {
    let mut entities = std::mem::take(&mut self.entities);
    let mut despawned = vec![];
    let mut emigrants = vec![];

    for (eid, entity) in entities.iter_mut() {
      let outcome = entity.tick(|p| {
        if p.chunk() != self.pos {
          // Off-chunk lookups would cross shard state; treat as air.
          return false;
        }
        match p.chunk_rel().ok().and_then(|rel| self.get_block(rel)) {
          Some((block, _)) => block::is_solid(block),
          None => false,
        }
      });
      match outcome {
        TickOutcome::Still => {}
        TickOutcome::Moved => {
          self.dirty = true;
          if entity.pos().chunk() != self.pos {
            emigrants.push(*eid);
          } else {
            self.multicast(None, &cb::Packet::EntityTeleport {
              eid:  *eid,
              pos:  entity.pos().fixed(),
              look: Default::default(),
            });
          }
        }
        TickOutcome::Despawn => despawned.push(*eid),
      }
    }

    for eid in despawned {
      entities.remove(&eid);
      self.dirty = true;
      self.multicast(None, &cb::Packet::EntityDestroy { eid });
    }
    let mut moved_out = vec![];
    for eid in emigrants {
      if let Some(e) = entities.remove(&eid) {
        moved_out.push(e);
      }
    }
    self.entities = entities;
    moved_out
  }

  /// Adopts an entity that wandered in from a neighboring chunk, announcing
  /// it to subscribers.
  pub fn adopt_entity(&mut self, entity: Entity) {
    self.multicast(None, &entity.spawn_packet());
    self.dirty = true;
    self.entities.insert(entity.eid(), entity);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::{ConnSender, WakeEvent};
  use crossbeam_channel::Receiver;
  use mio::Poll;
  use pretty_assertions::assert_eq;
  use rand::SeedableRng;

  fn mock_sender() -> (Poll, Receiver<cb::Packet>, Receiver<WakeEvent>, ConnSender) {
    let poll = Poll::new().unwrap();
    let (rx, wake_rx, sender) = ConnSender::mock(&poll);
    (poll, rx, wake_rx, sender)
  }

  #[test]
  fn get_set_block() {
    let mut c = Chunk::generate_flat(ChunkPos::new(0, 0));
    let rel = RelPos::new(3, 64, 5);
    assert_eq!(c.get_block(rel), Some((block::id::AIR, 0)));
    c.set_block(rel, block::id::STONE, 0);
    assert_eq!(c.get_block(rel), Some((block::id::STONE, 0)));
    assert!(c.dirty());
  }

  #[test]
  fn height_map_tracks_highest_block() {
    let mut c = Chunk::generate_flat(ChunkPos::new(0, 0));
    // Flat world surface is grass at y=63, so the height is 64.
    assert_eq!(c.height_map[0], 64);
    c.set_block(RelPos::new(0, 80, 0), block::id::STONE, 0);
    assert_eq!(c.height_map[0], 81);
    c.set_block(RelPos::new(0, 80, 0), block::id::AIR, 0);
    assert_eq!(c.height_map[0], 64);
  }

  #[test]
  fn subscriber_receives_chunk_and_entities() {
    let (_poll, rx, _wake, sender) = mock_sender();
    let mut c = Chunk::generate_flat(ChunkPos::new(0, 0));
    let eids = EntityIds::new();
    c.adopt_entity(Entity::Item(ItemEntity {
      eid:  eids.alloc(),
      slot: Slot::new(1, 1, 0),
      pos:  FPos::new(0.5, 64.0, 0.5),
      vel:  FPos::default(),
      age:  0,
    }));

    c.add_subscriber(7, sender);
    let packets: Vec<_> = rx.try_iter().collect();
    assert!(matches!(packets[0], cb::Packet::PreChunk { mode: true, .. }));
    assert!(matches!(packets[1], cb::Packet::MapChunk { .. }));
    assert!(matches!(packets[2], cb::Packet::PickupSpawn { .. }));
  }

  #[test]
  fn unsubscribe_sends_unload_only_when_asked() {
    let (_poll, rx, _wake, sender) = mock_sender();
    let mut c = Chunk::generate_flat(ChunkPos::new(0, 0));
    c.add_subscriber(7, sender.clone());
    let _: Vec<_> = rx.try_iter().collect();

    c.remove_subscriber(7, true);
    let packets: Vec<_> = rx.try_iter().collect();
    assert_eq!(packets, vec![cb::Packet::PreChunk {
      chunk: ChunkPos::new(0, 0),
      mode:  false,
    }]);

    c.add_subscriber(7, sender);
    let _: Vec<_> = rx.try_iter().collect();
    c.remove_subscriber(7, false);
    assert_eq!(rx.try_iter().count(), 0);
  }

  #[test]
  fn multicast_excludes_one() {
    let (_poll_a, rx_a, _wa, sender_a) = mock_sender();
    let (_poll_b, rx_b, _wb, sender_b) = mock_sender();
    let mut c = Chunk::generate_flat(ChunkPos::new(0, 0));
    c.add_subscriber(1, sender_a);
    c.add_subscriber(2, sender_b);
    let _: Vec<_> = rx_a.try_iter().collect();
    let _: Vec<_> = rx_b.try_iter().collect();

    c.multicast(Some(1), &cb::Packet::TimeUpdate { time: 5 });
    assert_eq!(rx_a.try_iter().count(), 0);
    assert_eq!(rx_b.try_iter().count(), 1);
  }

  #[test]
  fn digging_drops_an_item() {
    let (_poll, rx, _wake, sender) = mock_sender();
    let mut c = Chunk::generate_flat(ChunkPos::new(0, 0));
    let eids = EntityIds::new();
    c.add_subscriber(7, sender);
    let _: Vec<_> = rx.try_iter().collect();

    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    let rel = RelPos::new(0, 63, 0);
    assert!(c.player_block_hit(rel, 2, &eids, &mut rng));
    assert_eq!(c.get_block(rel), Some((block::id::AIR, 0)));
    let packets: Vec<_> = rx.try_iter().collect();
    // A block change, then the drop spawn. Grass drops dirt.
    assert!(matches!(packets[0], cb::Packet::BlockChange {
      block_type: block::id::AIR,
      ..
    }));
    assert!(
      matches!(packets[1], cb::Packet::PickupSpawn { item, .. } if item == block::id::DIRT as i16)
    );
  }

  #[test]
  fn bedrock_refuses_to_break() {
    let mut c = Chunk::generate_flat(ChunkPos::new(0, 0));
    let eids = EntityIds::new();
    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    assert!(!c.player_block_hit(RelPos::new(0, 0, 0), 2, &eids, &mut rng));
    assert_eq!(c.get_block(RelPos::new(0, 0, 0)), Some((block::id::BEDROCK, 0)));
  }

  #[test]
  fn placement_consumes_one_item() {
    let mut c = Chunk::generate_flat(ChunkPos::new(0, 0));
    let held = Slot::new(block::id::STONE as i16, 3, 0);
    let left = c.place_block(RelPos::new(1, 64, 1), held).unwrap();
    assert_eq!(left.count, 2);
    assert_eq!(c.get_block(RelPos::new(1, 64, 1)), Some((block::id::STONE, 0)));
    // Placing into an occupied cell is refused.
    assert!(c.place_block(RelPos::new(1, 64, 1), left).is_none());
  }

  #[test]
  fn chest_placement_creates_tile_entity() {
    let mut c = Chunk::generate_flat(ChunkPos::new(0, 0));
    let rel = RelPos::new(2, 64, 2);
    c.place_block(rel, Slot::new(block::id::CHEST as i16, 1, 0)).unwrap();
    assert!(matches!(c.tile_entity_mut(rel), Some(TileEntity::Chest { .. })));
  }

  #[test]
  fn store_round_trip_preserves_arrays() {
    let eids = EntityIds::new();
    let mut c = Chunk::generate_flat(ChunkPos::new(2, -1));
    c.set_block(RelPos::new(5, 64, 5), block::id::TORCH, 0);
    let w = c.to_writer();
    let reader =
      ChunkReader::new(c.pos(), w.to_nbt().serialize()).unwrap();
    let c2 = Chunk::from_reader(&reader, &eids).unwrap();
    assert_eq!(c2.blocks, c.blocks);
    assert_eq!(c2.data, c.data);
    assert_eq!(c2.sky_light, c.sky_light);
    assert_eq!(c2.height_map, c.height_map);
  }

  #[test]
  fn entity_tick_moves_and_despawns() {
    let (_poll, rx, _wake, sender) = mock_sender();
    let eids = EntityIds::new();
    let mut c = Chunk::generate_flat(ChunkPos::new(0, 0));
    c.add_subscriber(9, sender);
    let _: Vec<_> = rx.try_iter().collect();

    c.adopt_entity(Entity::Item(ItemEntity {
      eid:  eids.alloc(),
      slot: Slot::new(1, 1, 0),
      pos:  FPos::new(8.5, 70.0, 8.5),
      vel:  FPos::default(),
      age:  0,
    }));
    let _: Vec<_> = rx.try_iter().collect();

    let out = c.tick();
    assert!(out.is_empty());
    let packets: Vec<_> = rx.try_iter().collect();
    assert!(matches!(packets[0], cb::Packet::EntityTeleport { .. }));
  }
}
