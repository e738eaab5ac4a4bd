//! Shards: the single-writer actors that own chunks.
//!
//! Each shard runs one thread. The thread drains a bounded command mailbox
//! and a 50 ms ticker with `select!`; everything that touches a chunk happens
//! here, so chunk state needs no locks. Chunk loads run on a shared I/O pool
//! and re-enter the mailbox as [`Command::ChunkLoaded`].

use super::chunk::Chunk;
use crate::{
  entity::EntityIds,
  item::ItemTypes,
  net::ConnSender,
  store::{ChunkReader, ChunkStore, StoreError},
};
use crossbeam_channel::{select, Receiver, Sender};
use mg_common::{
  math::{ChunkPos, FPos, ShardPos},
  util::ThreadPool,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{collections::HashMap, sync::Arc, thread, time::Duration};

const TICK_TIME: Duration = Duration::from_millis(50);
/// Sweep for evictable chunks this often, in ticks.
const EVICT_SWEEP: u64 = 20 * 30;
/// A chunk with no subscribers survives this many ticks after its last use.
const EVICT_AGE: u64 = 20 * 30;

pub enum Command {
  Subscribe { chunk: ChunkPos, eid: i32, sender: ConnSender },
  Unsubscribe { chunk: ChunkPos, eid: i32, send_unload: bool },
  SetPlayerPos { chunk: ChunkPos, eid: i32, pos: Option<FPos> },
  Enqueue(Box<dyn FnOnce(&mut ShardState) + Send>),
  /// Removes every subscription this entity id holds in the shard, without
  /// unload packets.
  Disconnect { eid: i32 },
  ChunkLoaded { chunk: ChunkPos, result: Result<Option<ChunkReader>, StoreError> },
  /// Flushes every dirty chunk to the store.
  SaveAll,
  /// Saves everything and stops the shard thread.
  Shutdown,
}

enum ChunkSlot {
  /// The store read is in flight; these subscribers get the chunk once it
  /// lands.
  Loading { pending: Vec<(i32, ConnSender)> },
  Ready { chunk: Chunk, last_used: u64 },
}

/// A cheap handle for submitting work to a shard.
#[derive(Clone)]
pub struct ShardHandle {
  tx: Sender<Command>,
}

impl ShardHandle {
  pub fn send(&self, cmd: Command) {
    // A dead shard thread is unrecoverable; every chunk it owned is gone.
    self.tx.send(cmd).expect("shard thread died");
  }

  pub fn save_all(&self) { self.send(Command::SaveAll); }

  pub fn shutdown(&self) { self.send(Command::Shutdown); }

  /// Creates the per-session connection described to sessions. Dropping the
  /// connection does not unsubscribe; sessions call
  /// [`ShardConn::disconnect`] on close.
  pub fn connect(&self, eid: i32, sender: ConnSender) -> ShardConn {
    ShardConn { eid, sender, tx: self.tx.clone() }
  }
}

/// A session's connection to one shard.
#[derive(Clone)]
pub struct ShardConn {
  eid:    i32,
  sender: ConnSender,
  tx:     Sender<Command>,
}

impl ShardConn {
  /// Registers the session as a subscriber of the chunk, loading it if
  /// needed. The full chunk and entity spawns arrive on the session's packet
  /// queue.
  pub fn subscribe_chunk(&self, chunk: ChunkPos) {
    let _ = self.tx.send(Command::Subscribe {
      chunk,
      eid: self.eid,
      sender: self.sender.clone(),
    });
  }

  pub fn unsubscribe_chunk(&self, chunk: ChunkPos, send_unload: bool) {
    let _ = self.tx.send(Command::Unsubscribe { chunk, eid: self.eid, send_unload });
  }

  pub fn set_position(&self, chunk: ChunkPos, pos: Option<FPos>) {
    let _ = self.tx.send(Command::SetPlayerPos { chunk, eid: self.eid, pos });
  }

  /// Runs a closure inside the shard's loop. Used for block interactions,
  /// where the session needs to mutate chunk state it does not own.
  pub fn enqueue(&self, f: impl FnOnce(&mut ShardState) + Send + 'static) {
    let _ = self.tx.send(Command::Enqueue(Box::new(f)));
  }

  /// Removes all subscriptions this session holds in the shard. No unload
  /// packets are sent; the disconnecting client does not need them.
  pub fn disconnect(&self) { let _ = self.tx.send(Command::Disconnect { eid: self.eid }); }

  pub fn eid(&self) -> i32 { self.eid }
  pub fn sender(&self) -> &ConnSender { &self.sender }
}

/// The state a shard thread owns. Enqueued closures see this.
pub struct ShardState {
  pos:    ShardPos,
  chunks: HashMap<ChunkPos, ChunkSlot>,
  store:  Arc<ChunkStore>,
  io:     Arc<ThreadPool<()>>,
  eids:   EntityIds,
  types:  Arc<ItemTypes>,
  rng:    StdRng,
  tick:   u64,
  tx:     Sender<Command>,
}

impl ShardState {
  /// The chunk, if it is resident and fully loaded.
  pub fn chunk_mut(&mut self, pos: ChunkPos) -> Option<&mut Chunk> {
    let tick = self.tick;
    match self.chunks.get_mut(&pos) {
      Some(ChunkSlot::Ready { chunk, last_used }) => {
        *last_used = tick;
        Some(chunk)
      }
      _ => None,
    }
  }

  pub fn eids(&self) -> &EntityIds { &self.eids }
  pub fn types(&self) -> &ItemTypes { &self.types }
  pub fn types_arc(&self) -> Arc<ItemTypes> { self.types.clone() }
  pub fn rng(&mut self) -> &mut StdRng { &mut self.rng }

  /// Splits the borrow so a closure can use the rng and a chunk together.
  pub fn chunk_and_rng(&mut self, pos: ChunkPos) -> Option<(&mut Chunk, &mut StdRng)> {
    let tick = self.tick;
    let rng = &mut self.rng;
    match self.chunks.get_mut(&pos) {
      Some(ChunkSlot::Ready { chunk, last_used }) => {
        *last_used = tick;
        Some((chunk, rng))
      }
      _ => None,
    }
  }

  fn subscribe(&mut self, pos: ChunkPos, eid: i32, sender: ConnSender) {
    let tick = self.tick;
    match self.chunks.get_mut(&pos) {
      Some(ChunkSlot::Ready { chunk, last_used }) => {
        *last_used = tick;
        chunk.add_subscriber(eid, sender);
      }
      Some(ChunkSlot::Loading { pending }) => pending.push((eid, sender)),
      None => {
        self.chunks.insert(pos, ChunkSlot::Loading { pending: vec![(eid, sender)] });
        let store = self.store.clone();
        let tx = self.tx.clone();
        self.io.execute(move |_| {
          let result = store.read_chunk(pos);
          let _ = tx.send(Command::ChunkLoaded { chunk: pos, result });
        });
      }
    }
  }

  fn unsubscribe(&mut self, pos: ChunkPos, eid: i32, send_unload: bool) {
    match self.chunks.get_mut(&pos) {
      Some(ChunkSlot::Ready { chunk, .. }) => chunk.remove_subscriber(eid, send_unload),
      Some(ChunkSlot::Loading { pending }) => pending.retain(|(e, _)| *e != eid),
      None => {}
    }
  }

  fn chunk_loaded(&mut self, pos: ChunkPos, result: Result<Option<ChunkReader>, StoreError>) {
    let pending = match self.chunks.remove(&pos) {
      Some(ChunkSlot::Loading { pending }) => pending,
      // Everyone unsubscribed while the read was in flight, or the slot is
      // in a state we did not expect; either way the load result is stale.
      other => {
        if let Some(slot) = other {
          self.chunks.insert(pos, slot);
        }
        return;
      }
    };

    let mut chunk = match result {
      Ok(Some(reader)) => match Chunk::from_reader(&reader, &self.eids) {
        Ok(chunk) => chunk,
        Err(e) => {
          // The chunk is unavailable, but the server carries on. Pending
          // subscribers never get a confirm for it.
          error!("corrupt chunk {pos}: {e}");
          return;
        }
      },
      Ok(None) => Chunk::generate_flat(pos),
      Err(e) => {
        error!("failed to read chunk {pos}: {e}");
        return;
      }
    };

    for (eid, sender) in pending {
      chunk.add_subscriber(eid, sender);
    }
    self.chunks.insert(pos, ChunkSlot::Ready { chunk, last_used: self.tick });
  }

  fn disconnect(&mut self, eid: i32) {
    for slot in self.chunks.values_mut() {
      match slot {
        ChunkSlot::Ready { chunk, .. } => chunk.remove_subscriber(eid, false),
        ChunkSlot::Loading { pending } => pending.retain(|(e, _)| *e != eid),
      }
    }
  }

  fn tick(&mut self) {
    self.tick += 1;

    // Entity physics per chunk, collecting anything that crossed a chunk
    // border.
    let mut moved = vec![];
    for slot in self.chunks.values_mut() {
      if let ChunkSlot::Ready { chunk, .. } = slot {
        moved.extend(chunk.tick());
      }
    }
    for entity in moved {
      let target = entity.pos().chunk();
      match self.chunks.get_mut(&target) {
        Some(ChunkSlot::Ready { chunk, .. }) => chunk.adopt_entity(entity),
        // Fell off the resident world (or crossed a shard border): gone.
        _ => {}
      }
    }

    if self.tick % EVICT_SWEEP == 0 {
      self.evict_idle();
    }
  }

  /// Unloads chunks nobody has looked at in a while, saving dirty ones
  /// first. A chunk is only evictable once it has no subscribers.
  fn evict_idle(&mut self) {
    let tick = self.tick;
    let mut evict = vec![];
    for (pos, slot) in &self.chunks {
      if let ChunkSlot::Ready { chunk, last_used } = slot {
        if !chunk.has_subscribers() && tick.saturating_sub(*last_used) >= EVICT_AGE {
          evict.push(*pos);
        }
      }
    }
    for pos in evict {
      if let Some(ChunkSlot::Ready { chunk, .. }) = self.chunks.remove(&pos) {
        if chunk.dirty() {
          self.write_chunk(&chunk);
        }
      }
    }
  }

  fn write_chunk(&self, chunk: &Chunk) {
    let writer = chunk.to_writer();
    let store = self.store.clone();
    self.io.execute(move |_| {
      if let Err(e) = store.write_chunk(&writer) {
        error!("failed to write chunk {}: {e}", writer.pos());
      }
    });
  }

  fn save_all(&mut self) {
    let mut saved = 0;
    for slot in self.chunks.values_mut() {
      if let ChunkSlot::Ready { chunk, .. } = slot {
        if chunk.dirty() {
          let writer = chunk.to_writer();
          let store = self.store.clone();
          self.io.execute(move |_| {
            if let Err(e) = store.write_chunk(&writer) {
              error!("failed to write chunk {}: {e}", writer.pos());
            }
          });
          saved += 1;
        }
      }
    }
    // write_chunk snapshots, so clearing dirty here does not race the pool.
    for slot in self.chunks.values_mut() {
      if let ChunkSlot::Ready { chunk, .. } = slot {
        chunk.mark_clean();
      }
    }
    if saved > 0 {
      info!("shard {}: saving {saved} chunks", self.pos);
    }
  }

  /// Handles one command. Returns false once the shard should stop.
  fn handle(&mut self, cmd: Command) -> bool {
    match cmd {
      Command::Subscribe { chunk, eid, sender } => self.subscribe(chunk, eid, sender),
      Command::Unsubscribe { chunk, eid, send_unload } => {
        self.unsubscribe(chunk, eid, send_unload)
      }
      Command::SetPlayerPos { chunk, eid, pos } => {
        if let Some(c) = self.chunk_mut(chunk) {
          c.set_subscriber_position(eid, pos);
        }
      }
      Command::Enqueue(f) => f(self),
      Command::Disconnect { eid } => self.disconnect(eid),
      Command::ChunkLoaded { chunk, result } => self.chunk_loaded(chunk, result),
      Command::SaveAll => self.save_all(),
      Command::Shutdown => {
        self.save_all();
        return false;
      }
    }
    true
  }
}

/// Spawns a shard thread and returns its handle.
pub fn spawn(
  pos: ShardPos,
  store: Arc<ChunkStore>,
  io: Arc<ThreadPool<()>>,
  eids: EntityIds,
  types: Arc<ItemTypes>,
  seed: i64,
) -> ShardHandle {
  let (tx, rx): (Sender<Command>, Receiver<Command>) = crossbeam_channel::bounded(256);
  let state_tx = tx.clone();
  thread::Builder::new()
    .name(format!("shard({},{})", pos.x(), pos.z()))
    .spawn(move || {
      let mut state = ShardState {
        pos,
        chunks: HashMap::new(),
        store,
        io,
        eids,
        types,
        rng: StdRng::seed_from_u64(seed as u64 ^ pos.shard_key()),
        tick: 0,
        tx: state_tx,
      };
      let ticker = crossbeam_channel::tick(TICK_TIME);
      loop {
        select! {
          recv(rx) -> cmd => match cmd {
            Ok(cmd) => {
              if !state.handle(cmd) {
                break;
              }
            }
            Err(_) => break,
          },
          recv(ticker) -> _ => state.tick(),
        }
      }
    })
    .expect("failed to spawn shard thread");
  ShardHandle { tx }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::proto::cb;
  use crate::net::WakeEvent;
  use crossbeam_channel::Receiver as CbReceiver;
  use mio::Poll;
  use pretty_assertions::assert_eq;
  use std::time::Duration;

  fn test_state(dir: &str) -> (ShardState, Receiver<Command>) {
    let world = std::env::temp_dir().join(format!("mg_shard_test_{}_{dir}", std::process::id()));
    let _ = std::fs::remove_dir_all(&world);
    std::fs::create_dir_all(&world).unwrap();
    let store = Arc::new(ChunkStore::new(&world, 0).unwrap());
    let io = Arc::new(ThreadPool::new("test-io", 1, || ()));
    let (tx, rx) = crossbeam_channel::bounded(256);
    (
      ShardState {
        pos: ShardPos::new(0, 0),
        chunks: HashMap::new(),
        store,
        io,
        eids: EntityIds::new(),
        types: Arc::new(ItemTypes::default_types()),
        rng: StdRng::seed_from_u64(7),
        tick: 0,
        tx,
      },
      rx,
    )
  }

  fn mock_sender() -> (Poll, CbReceiver<cb::Packet>, CbReceiver<WakeEvent>, ConnSender) {
    let poll = Poll::new().unwrap();
    let (rx, wake_rx, sender) = ConnSender::mock(&poll);
    (poll, rx, wake_rx, sender)
  }

  /// Pumps the loopback channel until the in-flight chunk load lands.
  fn pump_load(state: &mut ShardState, rx: &Receiver<Command>) {
    let cmd = rx.recv_timeout(Duration::from_secs(5)).expect("io pool never loaded the chunk");
    state.handle(cmd);
  }

  #[test]
  fn subscribe_loads_and_delivers() {
    let (mut state, rx) = test_state("subscribe");
    let (_poll, pkt_rx, _wake, sender) = mock_sender();
    let pos = ChunkPos::new(0, 0);

    state.subscribe(pos, 1, sender);
    assert!(state.chunk_mut(pos).is_none(), "chunk is still loading");
    pump_load(&mut state, &rx);

    assert!(state.chunk_mut(pos).is_some());
    let packets: Vec<_> = pkt_rx.try_iter().collect();
    assert!(matches!(packets[0], cb::Packet::PreChunk { mode: true, .. }));
    assert!(matches!(packets[1], cb::Packet::MapChunk { .. }));
  }

  #[test]
  fn late_subscriber_joins_pending_load() {
    let (mut state, rx) = test_state("pending");
    let (_poll_a, rx_a, _wa, sender_a) = mock_sender();
    let (_poll_b, rx_b, _wb, sender_b) = mock_sender();
    let pos = ChunkPos::new(1, 1);

    state.subscribe(pos, 1, sender_a);
    state.subscribe(pos, 2, sender_b);
    pump_load(&mut state, &rx);

    assert!(rx_a.try_iter().count() >= 2);
    assert!(rx_b.try_iter().count() >= 2);
  }

  #[test]
  fn unsubscribe_while_loading_cancels_delivery() {
    let (mut state, rx) = test_state("cancel");
    let (_poll, pkt_rx, _wake, sender) = mock_sender();
    let pos = ChunkPos::new(2, 2);

    state.subscribe(pos, 1, sender);
    state.unsubscribe(pos, 1, true);
    pump_load(&mut state, &rx);

    // The chunk is resident, but the canceled subscriber got nothing.
    assert!(state.chunk_mut(pos).is_some());
    assert_eq!(pkt_rx.try_iter().count(), 0);
  }

  #[test]
  fn disconnect_removes_all_subscriptions() {
    let (mut state, rx) = test_state("disconnect");
    let (_poll, pkt_rx, _wake, sender) = mock_sender();
    for x in 0..3 {
      state.subscribe(ChunkPos::new(x, 0), 1, sender.clone());
    }
    for _ in 0..3 {
      pump_load(&mut state, &rx);
    }
    let _: Vec<_> = pkt_rx.try_iter().collect();

    state.disconnect(1);
    // No unload packets on disconnect.
    assert_eq!(pkt_rx.try_iter().count(), 0);
    for x in 0..3 {
      assert!(!state.chunk_mut(ChunkPos::new(x, 0)).unwrap().has_subscribers());
    }
  }

  #[test]
  fn eviction_saves_dirty_chunks() {
    let (mut state, rx) = test_state("evict");
    let (_poll, pkt_rx, _wake, sender) = mock_sender();
    let pos = ChunkPos::new(3, 3);

    state.subscribe(pos, 1, sender);
    pump_load(&mut state, &rx);
    let _: Vec<_> = pkt_rx.try_iter().collect();
    state.unsubscribe(pos, 1, true);

    // Fresh flat chunks are dirty, so eviction must write before dropping.
    state.tick = EVICT_AGE + 1;
    state.evict_idle();
    assert!(state.chunk_mut(pos).is_none());
    state.io.wait();
    // Give the single io worker a moment to finish the write.
    for _ in 0..100 {
      if state.store.read_chunk(pos).unwrap().is_some() {
        return;
      }
      std::thread::sleep(Duration::from_millis(10));
    }
    panic!("evicted chunk never reached the store");
  }

  #[test]
  fn subscribed_chunks_are_not_evicted() {
    let (mut state, rx) = test_state("evict_subscribed");
    let (_poll, _pkt_rx, _wake, sender) = mock_sender();
    let pos = ChunkPos::new(4, 4);
    state.subscribe(pos, 1, sender);
    pump_load(&mut state, &rx);

    state.tick = EVICT_AGE * 10;
    state.evict_idle();
    assert!(state.chunk_mut(pos).is_some());
  }
}
