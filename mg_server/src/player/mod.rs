//! Per-connection player state.
//!
//! A [`Player`] is shared between the session's reader path and closures
//! running on shards (for container clicks and placement results), so its
//! mutable pieces sit behind mutexes. The roster handle in the dispatcher
//! only keeps the id, name and transmitter.

mod inventory;
mod window;

pub use inventory::PlayerInventory;
pub use window::{OpenWindow, Windows};

use crate::{
  game::Game,
  item::Slot,
  net::ConnSender,
  proto::cb,
  world::{subscription_diff, ShardConn},
};
use mg_common::{
  math::{ChunkPos, FPos, Look, ShardPos},
  nbt::{Nbt, Tag},
};
use parking_lot::Mutex;
use std::{
  collections::{HashMap, HashSet},
  fmt,
  sync::Arc,
};

#[derive(Debug, Clone)]
pub struct PlayerPosition {
  pub pos:   FPos,
  pub look:  Look,
  /// The chunk the position was in, tracked so boundary crossings are
  /// detected without re-deriving the old chunk.
  pub chunk: ChunkPos,
}

struct Subscriptions {
  conns:      HashMap<ShardPos, ShardConn>,
  subscribed: HashSet<ChunkPos>,
}

pub struct Player {
  eid:         i32,
  username:    String,
  conn:        ConnSender,
  view_radius: i32,

  pos:     Mutex<PlayerPosition>,
  inv:     Mutex<PlayerInventory>,
  cursor:  Mutex<Slot>,
  windows: Mutex<Windows>,
  subs:    Mutex<Subscriptions>,
}

impl fmt::Debug for Player {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Player")
      .field("eid", &self.eid)
      .field("username", &self.username)
      .field("pos", &self.pos)
      .finish()
  }
}

impl Player {
  pub fn new(
    eid: i32,
    username: String,
    conn: ConnSender,
    start: FPos,
    view_radius: i32,
  ) -> Arc<Player> {
    Arc::new(Player {
      eid,
      username,
      conn,
      view_radius,
      pos: Mutex::new(PlayerPosition { pos: start, look: Look::default(), chunk: start.chunk() }),
      inv: Mutex::new(PlayerInventory::new()),
      cursor: Mutex::new(Slot::EMPTY),
      windows: Mutex::new(Windows::default()),
      subs: Mutex::new(Subscriptions { conns: HashMap::new(), subscribed: HashSet::new() }),
    })
  }

  pub fn eid(&self) -> i32 { self.eid }
  pub fn username(&self) -> &str { &self.username }
  pub fn sender(&self) -> &ConnSender { &self.conn }
  pub fn position(&self) -> FPos { self.pos.lock().pos }

  pub fn inv(&self) -> &Mutex<PlayerInventory> { &self.inv }
  pub fn cursor(&self) -> &Mutex<Slot> { &self.cursor }
  pub fn windows(&self) -> &Mutex<Windows> { &self.windows }

  /// Restores saved state from the player's data file.
  pub fn load_data(&self, data: &Nbt) {
    if let Some(Tag::List(items)) = data.get("Inventory") {
      self.inv.lock().load_nbt(items);
    }
    if let Some(Tag::List(rot)) = data.get("Rotation") {
      if rot.len() == 2 {
        if let (Ok(yaw), Ok(pitch)) = (rot[0].float(), rot[1].float()) {
          self.pos.lock().look = Look::new(yaw, pitch);
        }
      }
    }
  }

  /// The saved form of this player: position, look, and inventory.
  pub fn to_nbt(&self) -> Nbt {
    let pos = self.pos.lock();
    Nbt::new(
      "",
      Tag::new_compound(&[
        (
          "Pos",
          Tag::List(vec![
            Tag::Double(pos.pos.x),
            Tag::Double(pos.pos.y),
            Tag::Double(pos.pos.z),
          ]),
        ),
        (
          "Rotation",
          Tag::List(vec![Tag::Float(pos.look.yaw), Tag::Float(pos.look.pitch)]),
        ),
        ("Inventory", self.inv.lock().to_nbt()),
      ]),
    )
  }

  /// Subscribes to the full square around the spawn chunk and teleports the
  /// client there. Called once, right after login.
  pub fn start(self: &Arc<Self>, game: &Game) {
    let (pos, chunk) = {
      let p = self.pos.lock();
      (p.pos, p.chunk)
    };
    {
      let mut subs = self.subs.lock();
      for c in chunk.columns_in_radius(self.view_radius) {
        Self::conn_for(&mut subs.conns, game, self.eid, &self.conn, c.shard())
          .subscribe_chunk(c);
        subs.subscribed.insert(c);
      }
      Self::conn_for(&mut subs.conns, game, self.eid, &self.conn, chunk.shard())
        .set_position(chunk, Some(pos));
    }
    self.conn.send(cb::Packet::PlayerPositionLook {
      x:         pos.x,
      y:         pos.y,
      stance:    pos.y + 1.62,
      z:         pos.z,
      yaw:       0.0,
      pitch:     0.0,
      on_ground: false,
    });
  }

  fn conn_for<'a>(
    conns: &'a mut HashMap<ShardPos, ShardConn>,
    game: &Game,
    eid: i32,
    sender: &ConnSender,
    shard: ShardPos,
  ) -> &'a ShardConn {
    conns.entry(shard).or_insert_with(|| game.shards().connect(eid, sender, shard))
  }

  /// Applies a movement packet: updates the stored position and, when the
  /// player crossed a chunk boundary, fixes up the subscription square.
  pub fn handle_move(self: &Arc<Self>, game: &Game, new_pos: Option<FPos>, new_look: Option<Look>) {
    let (old_chunk, pos) = {
      let mut p = self.pos.lock();
      if let Some(new_pos) = new_pos {
        p.pos = new_pos;
      }
      if let Some(look) = new_look {
        p.look = look;
      }
      let old = p.chunk;
      p.chunk = p.pos.chunk();
      (old, p.pos)
    };
    let new_chunk = pos.chunk();

    let mut subs = self.subs.lock();
    if old_chunk != new_chunk {
      let (unsubscribe, subscribe) = subscription_diff(old_chunk, new_chunk, self.view_radius);
      for c in unsubscribe {
        if subs.subscribed.remove(&c) {
          Self::conn_for(&mut subs.conns, game, self.eid, &self.conn, c.shard())
            .unsubscribe_chunk(c, true);
        }
      }
      for c in subscribe {
        if subs.subscribed.insert(c) {
          Self::conn_for(&mut subs.conns, game, self.eid, &self.conn, c.shard())
            .subscribe_chunk(c);
        }
      }
      Self::conn_for(&mut subs.conns, game, self.eid, &self.conn, old_chunk.shard())
        .set_position(old_chunk, None);
    }
    Self::conn_for(&mut subs.conns, game, self.eid, &self.conn, new_chunk.shard())
      .set_position(new_chunk, Some(pos));
  }

  /// The shard connection for a chunk, creating it on first use. Used by the
  /// packet handlers to enqueue block work.
  pub fn shard_conn_for<R>(
    &self,
    game: &Game,
    chunk: ChunkPos,
    f: impl FnOnce(&ShardConn) -> R,
  ) -> R {
    let mut subs = self.subs.lock();
    f(Self::conn_for(&mut subs.conns, game, self.eid, &self.conn, chunk.shard()))
  }

  /// Tears the player down: every shard forgets the session, the player file
  /// is written, and the roster entry goes away.
  pub fn remove(&self, game: &Game) {
    {
      let subs = self.subs.lock();
      for conn in subs.conns.values() {
        conn.disconnect();
      }
    }
    if let Err(e) = game.store().write_player_data(&self.username, &self.to_nbt()) {
      error!("could not save player {}: {e}", self.username);
    }
    game.disconnect(self.eid);
  }
}
