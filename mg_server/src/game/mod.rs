//! The game dispatcher: the single actor that owns the player roster and the
//! world clock.
//!
//! Everything that touches the roster goes through [`Game::enqueue`], which
//! runs closures on the dispatcher thread. The thread also drives the 20 Hz
//! world tick and drains the disconnect stream.

mod login;

pub use login::HandshakeOutcome;

use crate::{
  config::Config,
  entity::EntityIds,
  item::ItemTypes,
  net::{ConnSender, ConnectionManager},
  proto::cb,
  store::WorldStore,
  world::ShardManager,
};
use crossbeam_channel::{select, Sender};
use mg_common::math::FPos;
use rand::{rngs::StdRng, Rng, SeedableRng};
use regex::Regex;
use std::{collections::HashMap, io, net::SocketAddr, sync::Arc, thread, time::Duration};

const TICK_TIME: Duration = Duration::from_millis(50);
const TICKS_PER_SECOND: u64 = 20;

type BoxFn = Box<dyn FnOnce(&mut GameState) + Send>;

/// What the roster knows about an online player: enough to multicast and to
/// tear the player down again.
#[derive(Debug, Clone)]
pub struct PlayerHandle {
  pub eid:      i32,
  pub username: String,
  pub sender:   ConnSender,
}

/// The dispatcher-owned state. Only closures running on the dispatcher
/// thread ever see this.
pub struct GameState {
  players: HashMap<i32, PlayerHandle>,
  time:    u64,
}

impl GameState {
  pub fn add_player(&mut self, player: PlayerHandle) {
    info!("{} joined the game", player.username);
    self.players.insert(player.eid, player);
  }

  pub fn remove_player(&mut self, eid: i32) {
    if let Some(player) = self.players.remove(&eid) {
      info!("{} left the game", player.username);
    }
  }

  pub fn player(&self, eid: i32) -> Option<&PlayerHandle> { self.players.get(&eid) }
  pub fn players(&self) -> impl Iterator<Item = &PlayerHandle> { self.players.values() }
  pub fn time(&self) -> u64 { self.time }

  /// Sends a packet to every player, except `exclude` if set.
  pub fn multicast(&self, exclude: Option<i32>, packet: &cb::Packet) {
    for (eid, player) in &self.players {
      if Some(*eid) == exclude {
        continue;
      }
      player.sender.send(packet.clone());
    }
  }

  /// One world tick. Every second the current time and a keep-alive go out
  /// to everyone; the keep-alive round trip is what detects dead sessions.
  fn tick(&mut self) {
    self.time += 1;
    if self.time % TICKS_PER_SECOND == 0 {
      self.multicast(None, &cb::Packet::TimeUpdate { time: self.time as i64 });
      self.multicast(None, &cb::Packet::KeepAlive { id: 0 });
    }
  }
}

pub struct Game {
  tx:            Sender<BoxFn>,
  disconnect_tx: Sender<i32>,
  shards:        ShardManager,
  store:         Arc<WorldStore>,
  eids:          EntityIds,
  types:         Arc<ItemTypes>,
  config:        Config,
  /// The 16-hex-digit hash clients authenticate against, or `"-"` when the
  /// server runs without external auth.
  server_id:     String,
  username_re:   Regex,
}

impl Game {
  pub fn new(store: WorldStore, types: Arc<ItemTypes>, config: Config) -> Arc<Game> {
    let store = Arc::new(store);
    let eids = EntityIds::new();
    let shards =
      ShardManager::new(store.chunks(), eids.clone(), types.clone(), store.seed());

    let server_id = if config.online_mode {
      // Derived from the world seed, so it is stable across restarts.
      format!("{:016x}", StdRng::seed_from_u64(store.seed() as u64).gen::<u64>())
    } else {
      "-".into()
    };

    let (tx, rx) = crossbeam_channel::bounded::<BoxFn>(256);
    let (disconnect_tx, disconnect_rx) = crossbeam_channel::unbounded();

    let time = store.time();
    thread::Builder::new()
      .name("dispatcher".into())
      .spawn(move || {
        let mut state = GameState { players: HashMap::new(), time };
        let ticker = crossbeam_channel::tick(TICK_TIME);
        loop {
          select! {
            recv(rx) -> f => match f {
              Ok(f) => f(&mut state),
              Err(_) => break,
            },
            recv(disconnect_rx) -> eid => {
              if let Ok(eid) = eid {
                state.remove_player(eid);
              }
            }
            recv(ticker) -> _ => state.tick(),
          }
        }
      })
      .expect("failed to spawn dispatcher thread");

    Arc::new(Game {
      tx,
      disconnect_tx,
      shards,
      store,
      eids,
      types,
      config,
      server_id,
      username_re: Regex::new("^[A-Za-z0-9_-]+$").unwrap(),
    })
  }

  /// Queues a closure to run in the dispatcher's serialization context. The
  /// closure observes and may mutate the roster and world clock.
  pub fn enqueue(&self, f: impl FnOnce(&mut GameState) + Send + 'static) {
    self.tx.send(Box::new(f)).expect("dispatcher thread died");
  }

  /// Adds a player to the roster and waits until the dispatcher has done it.
  pub fn add_player(&self, player: PlayerHandle) {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    self.enqueue(move |state| {
      state.add_player(player);
      let _ = done_tx.send(());
    });
    let _ = done_rx.recv();
  }

  /// Removes the player from the roster. Safe to call from any thread; the
  /// entity id is simply never reused.
  pub fn disconnect(&self, eid: i32) { let _ = self.disconnect_tx.send(eid); }

  /// Sends a chat line from a player to the whole roster.
  pub fn chat(&self, from: &str, message: &str) {
    let line = format!("<{from}> {message}");
    info!("chat: {line}");
    self.enqueue(move |state| {
      state.multicast(None, &cb::Packet::Chat { message: line });
    });
  }

  /// Binds the listener and serves connections until the listener fails.
  pub fn serve(self: &Arc<Self>, addr: SocketAddr) -> io::Result<()> {
    let mut conn = ConnectionManager::new(self.clone());
    info!("listening on {addr}");
    conn.run(addr)
  }

  pub fn shards(&self) -> &ShardManager { &self.shards }
  pub fn store(&self) -> &WorldStore { &self.store }
  pub fn eids(&self) -> &EntityIds { &self.eids }
  pub fn types(&self) -> &ItemTypes { &self.types }
  pub fn config(&self) -> &Config { &self.config }
  pub fn server_id(&self) -> &str { &self.server_id }

  /// The spawn position for a player: their saved position if their data
  /// file has one, the world spawn otherwise.
  pub fn start_position(&self, username: &str) -> FPos {
    match self.store.player_data(username) {
      Ok(Some(data)) => {
        crate::store::saved_position(&data).unwrap_or_else(|| self.store.spawn_position())
      }
      Ok(None) => self.store.spawn_position(),
      Err(e) => {
        warn!("could not load player data for {username}: {e}");
        self.store.spawn_position()
      }
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::net::WakeEvent;
  use crossbeam_channel::Receiver;
  use flate2::{write::GzEncoder, Compression};
  use mg_common::nbt::{Nbt, Tag};
  use mio::Poll;
  use pretty_assertions::assert_eq;
  use std::io::Write;

  pub(crate) fn scratch_world(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("mg_game_test_{}_{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let nbt = Nbt::new(
      "",
      Tag::new_compound(&[(
        "Data",
        Tag::new_compound(&[
          ("SpawnX", Tag::Int(0)),
          ("SpawnY", Tag::Int(64)),
          ("SpawnZ", Tag::Int(0)),
          ("Time", Tag::Long(0)),
          ("RandomSeed", Tag::Long(12345)),
          ("LevelName", Tag::String("test".into())),
          ("LastPlayed", Tag::Long(0)),
        ]),
      )]),
    );
    let mut enc = GzEncoder::new(vec![], Compression::default());
    enc.write_all(&nbt.serialize()).unwrap();
    std::fs::write(dir.join("level.dat"), enc.finish().unwrap()).unwrap();
    dir
  }

  pub(crate) fn test_game(name: &str, config: Config) -> Arc<Game> {
    let store = WorldStore::load(scratch_world(name)).unwrap();
    Game::new(store, Arc::new(ItemTypes::default_types()), config)
  }

  fn mock_player(eid: i32, name: &str) -> (Poll, Receiver<cb::Packet>, PlayerHandle) {
    let poll = Poll::new().unwrap();
    let (rx, _wake, sender): (_, Receiver<WakeEvent>, _) = ConnSender::mock(&poll);
    (poll, rx, PlayerHandle { eid, username: name.into(), sender })
  }

  #[test]
  fn tick_broadcast_cadence() {
    let (_poll, rx, handle) = mock_player(1, "alice");
    let mut state = GameState { players: HashMap::new(), time: 0 };
    state.add_player(handle);

    for _ in 0..20 {
      state.tick();
    }
    let packets: Vec<_> = rx.try_iter().collect();
    let times = packets.iter().filter(|p| matches!(p, cb::Packet::TimeUpdate { .. })).count();
    let keep_alives =
      packets.iter().filter(|p| matches!(p, cb::Packet::KeepAlive { .. })).count();
    assert_eq!((times, keep_alives), (1, 1));

    for _ in 0..20 {
      state.tick();
    }
    let packets: Vec<_> = rx.try_iter().collect();
    let times = packets.iter().filter(|p| matches!(p, cb::Packet::TimeUpdate { .. })).count();
    let keep_alives =
      packets.iter().filter(|p| matches!(p, cb::Packet::KeepAlive { .. })).count();
    assert_eq!((times, keep_alives), (1, 1));
    assert_eq!(state.time(), 40);
  }

  #[test]
  fn multicast_excludes_sender() {
    let (_pa, rx_a, a) = mock_player(1, "alice");
    let (_pb, rx_b, b) = mock_player(2, "bob");
    let mut state = GameState { players: HashMap::new(), time: 0 };
    state.add_player(a);
    state.add_player(b);

    state.multicast(Some(1), &cb::Packet::Chat { message: "hi".into() });
    assert_eq!(rx_a.try_iter().count(), 0);
    assert_eq!(rx_b.try_iter().count(), 1);
  }

  #[test]
  fn roster_add_remove() {
    let (_poll, _rx, handle) = mock_player(5, "carol");
    let mut state = GameState { players: HashMap::new(), time: 0 };
    state.add_player(handle);
    assert!(state.player(5).is_some());
    state.remove_player(5);
    assert!(state.player(5).is_none());
    // Removing twice is harmless.
    state.remove_player(5);
  }

  #[test]
  fn enqueue_runs_on_dispatcher() {
    let game = test_game("enqueue", Config::default());
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    game.enqueue(move |state| {
      let _ = done_tx.send(state.time());
    });
    done_rx.recv_timeout(Duration::from_secs(5)).expect("closure never ran");
  }

  #[test]
  fn server_id_follows_online_mode() {
    let offline = test_game("offline", Config::default());
    assert_eq!(offline.server_id(), "-");

    let online = test_game("online", Config { online_mode: true, ..Config::default() });
    let id = online.server_id();
    assert_eq!(id.len(), 16);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
  }
}
