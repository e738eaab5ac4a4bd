//! Inbound packet dispatch: the login sequence for connections that are
//! still authenticating, and the gameplay handlers for everyone else.

use super::{Conns, SessionState};
use crate::{
  block,
  block::Interaction,
  entity::TileEntity,
  game::{Game, HandshakeOutcome, PlayerHandle},
  item::ItemTypes,
  player::{OpenWindow, Player},
  proto::{cb, sb, Login},
  world::{Chunk, ShardState},
};
use mg_common::math::{ChunkPos, FPos, Pos, RelPos, CHUNK_HEIGHT};
use mio::Token;
use std::sync::Arc;

/// How far away a block can be and still be dug or clicked.
const REACH: f64 = 6.0;

pub enum LoginFlow {
  Continue,
  Close,
}

/// Handles a packet on a connection that has not finished logging in.
///
/// This runs on a reader-pool thread with no locks held, because the auth
/// probe blocks and adding the player needs the connection map.
pub fn handle_login(game: &Arc<Game>, conns: &Conns, token: Token, p: sb::Packet) -> LoginFlow {
  match p {
    sb::Packet::Handshake { username } => handle_handshake(game, conns, token, username),
    sb::Packet::Login(login) => handle_login_packet(game, conns, token, login),
    sb::Packet::Disconnect { .. } => LoginFlow::Close,
    other => {
      warn!("unexpected packet during login: {other:?}");
      LoginFlow::Close
    }
  }
}

fn handle_handshake(
  game: &Arc<Game>,
  conns: &Conns,
  token: Token,
  username: String,
) -> LoginFlow {
  let sender = {
    let rl = conns.read();
    let cp = match rl.get(&token) {
      Some(cp) => cp,
      None => return LoginFlow::Close,
    };
    let conn = cp.conn.lock();
    if !matches!(conn.state, SessionState::Handshaking) {
      return LoginFlow::Close;
    }
    conn.sender()
  };

  match game.handle_handshake(&username) {
    HandshakeOutcome::Reject { reason } => {
      info!("rejecting {username}: {reason}");
      close_with(conns, token, &reason);
      LoginFlow::Close
    }
    HandshakeOutcome::Proceed { hash, needs_auth } => {
      sender.send(cb::Packet::HandshakeReply { hash });
      if needs_auth {
        if let Err(reason) = game.authenticate(&username) {
          info!("{username} failed authentication: {reason}");
          close_with(conns, token, &reason);
          return LoginFlow::Close;
        }
        info!("{username} passed authentication");
      }
      let rl = conns.read();
      match rl.get(&token) {
        Some(cp) => cp.conn.lock().state = SessionState::AwaitLogin { username },
        None => return LoginFlow::Close,
      }
      LoginFlow::Continue
    }
  }
}

fn handle_login_packet(game: &Arc<Game>, conns: &Conns, token: Token, login: Login) -> LoginFlow {
  let (username, sender) = {
    let rl = conns.read();
    let cp = match rl.get(&token) {
      Some(cp) => cp,
      None => return LoginFlow::Close,
    };
    let conn = cp.conn.lock();
    match &conn.state {
      SessionState::AwaitLogin { username } => (username.clone(), conn.sender()),
      _ => return LoginFlow::Close,
    }
  };
  if login.username != username {
    close_with(conns, token, "Username mismatch");
    return LoginFlow::Close;
  }

  // Only now, with every earlier step passed, is the entity id allocated.
  let eid = game.eids().alloc();
  let start = game.start_position(&username);
  let player = Player::new(
    eid,
    username.clone(),
    sender.clone(),
    start,
    game.config().view_radius,
  );
  match game.store().player_data(&username) {
    Ok(Some(data)) => player.load_data(&data),
    Ok(None) => {}
    Err(e) => warn!("ignoring unreadable player data for {username}: {e}"),
  }

  game.add_player(PlayerHandle { eid, username, sender: sender.clone() });

  {
    let mut wl = conns.write();
    match wl.get_mut(&token) {
      Some(cp) => {
        cp.player = Some(player.clone());
        cp.conn.lock().state = SessionState::Playing;
      }
      None => {
        // The socket died while we were adding the player.
        game.disconnect(eid);
        return LoginFlow::Close;
      }
    }
  }

  sender.send(cb::Packet::LoginReply(Login {
    version_or_eid: eid,
    username:       String::new(),
    map_seed:       game.store().seed(),
    level_type:     "DEFAULT".into(),
    game_mode:      0,
    dimension:      0,
    difficulty:     0,
    world_height:   CHUNK_HEIGHT as u8,
    max_players:    game.config().max_players,
  }));
  sender.send(cb::Packet::SpawnPosition { pos: game.store().spawn_position().block() });
  sender.send(cb::Packet::WindowItems {
    window_id: 0,
    items:     player.inv().lock().wire_slots(),
  });
  player.start(game);
  LoginFlow::Continue
}

/// Sends a disconnect frame with a reason, best effort, before the caller
/// tears the connection down.
fn close_with(conns: &Conns, token: Token, reason: &str) {
  if let Some(cp) = conns.read().get(&token) {
    cp.conn.lock().write_disconnect(reason);
  }
}

/// Handles a packet from a playing session. Returns false when the session
/// should be closed.
pub fn handle(game: &Arc<Game>, player: &Arc<Player>, p: sb::Packet) -> bool {
  match p {
    // Keep-alives and bare on-ground flags only refresh the idle deadline,
    // which the connection already did.
    sb::Packet::KeepAlive { .. } | sb::Packet::Flying { .. } | sb::Packet::Transaction { .. } => {
      true
    }
    sb::Packet::Chat { message } => {
      game.chat(player.username(), &message);
      true
    }
    sb::Packet::PlayerPosition { x, y, z, .. } => {
      player.handle_move(game, Some(FPos::new(x, y, z)), None);
      true
    }
    sb::Packet::PlayerLook { look, .. } => {
      player.handle_move(game, None, Some(look));
      true
    }
    sb::Packet::PlayerPositionLook { x, y, z, look, .. } => {
      player.handle_move(game, Some(FPos::new(x, y, z)), Some(look));
      true
    }
    sb::Packet::HoldingChange { slot } => {
      player.inv().lock().set_holding(slot);
      true
    }
    sb::Packet::PlayerDigging { status, pos, .. } => {
      dig(game, player, pos, status);
      true
    }
    sb::Packet::BlockPlacement { pos, face, .. } => {
      interact(game, player, pos, face);
      true
    }
    sb::Packet::WindowClick { window_id, slot, right_click, action_id, clicked, .. } => {
      window_click(game, player, window_id, slot, right_click, action_id, clicked);
      true
    }
    sb::Packet::WindowClose { window_id } => {
      let mut windows = player.windows().lock();
      if windows.open.map(|w| w.id) == Some(window_id) {
        windows.open = None;
      }
      true
    }
    sb::Packet::Disconnect { reason } => {
      info!("{} disconnecting: {reason}", player.username());
      false
    }
    // These are only valid before login.
    sb::Packet::Handshake { .. } | sb::Packet::Login(_) => false,
  }
}

fn in_reach(player: &Player, pos: Pos) -> bool {
  let center = FPos::new(pos.x as f64 + 0.5, pos.y as f64 + 0.5, pos.z as f64 + 0.5);
  player.position().is_within_dist_of(center, REACH)
}

fn dig(game: &Arc<Game>, player: &Arc<Player>, pos: Pos, status: u8) {
  if !in_reach(player, pos) {
    return;
  }
  let rel = match pos.chunk_rel() {
    Ok(rel) => rel,
    Err(_) => return,
  };
  let chunk = pos.chunk();
  player.shard_conn_for(game, chunk, |conn| {
    conn.enqueue(move |state: &mut ShardState| {
      let eids = state.eids().clone();
      if let Some((c, rng)) = state.chunk_and_rng(chunk) {
        c.player_block_hit(rel, status, &eids, rng);
      }
    });
  });
}

/// A right click on a block either opens its container or places the held
/// item against the clicked face. Which one is only known inside the owning
/// shard, so the decision happens there.
fn interact(game: &Arc<Game>, player: &Arc<Player>, pos: Pos, face: u8) {
  // face 0xff is "use held item in the air", which nothing we serve cares
  // about.
  if face > 5 {
    return;
  }
  if !in_reach(player, pos) {
    return;
  }
  let clicked_rel = match pos.chunk_rel() {
    Ok(rel) => rel,
    Err(_) => return,
  };
  let clicked_chunk = pos.chunk();
  let dir = Pos::dir_from_byte(face);
  let target = pos.checked_add(dir.x, dir.y, dir.z);

  // The placement target can be in a neighboring chunk, and that chunk can
  // belong to a different shard. Resolve the connection up front so the
  // first closure can forward there.
  let target_conn = target.map(|t| {
    (t, t.chunk(), player.shard_conn_for(game, t.chunk(), |conn| conn.clone()))
  });

  let p = player.clone();
  player.shard_conn_for(game, clicked_chunk, |conn| {
    conn.enqueue(move |state: &mut ShardState| {
      let clicked = state
        .chunk_mut(clicked_chunk)
        .and_then(|c| c.get_block(clicked_rel))
        .map(|(block, _)| block)
        .unwrap_or(block::id::AIR);

      if let Some(kind) = block::interaction(clicked) {
        if let Some(chunk) = state.chunk_mut(clicked_chunk) {
          open_container(&p, chunk, kind, clicked_chunk, clicked_rel);
        }
        return;
      }

      let (target, target_chunk, target_conn) = match target_conn {
        Some(v) => v,
        None => return,
      };
      let rel = match target.chunk_rel() {
        Ok(rel) => rel,
        Err(_) => return,
      };
      if target_chunk == clicked_chunk {
        if let Some(chunk) = state.chunk_mut(target_chunk) {
          place_held(chunk, rel, &p);
        }
      } else {
        // Forward to the shard that owns the target chunk. Within one shard
        // this just means another trip through our own mailbox.
        let p = p.clone();
        target_conn.enqueue(move |state: &mut ShardState| {
          if let Some(chunk) = state.chunk_mut(target_chunk) {
            place_held(chunk, rel, &p);
          }
        });
      }
    });
  });
}

/// Places the player's held item into the chunk, keeping the client's view
/// of both the block and the hotbar consistent whether or not it works.
fn place_held(chunk: &mut Chunk, rel: RelPos, player: &Arc<Player>) {
  let mut inv = player.inv().lock();
  let held = inv.held_item();
  match chunk.place_block(rel, held) {
    Some(left) => {
      inv.set_held_item(left);
      player.sender().send(cb::Packet::SetSlot {
        window_id: 0,
        slot:      inv.held_window_slot(),
        item:      left.to_wire(),
      });
    }
    None => {
      // The client predicted the placement; put its world and hotbar back.
      if let Some((block, data)) = chunk.get_block(rel) {
        player.sender().send(cb::Packet::BlockChange {
          pos:        chunk.pos().block()
            + Pos::new(rel.x() as i32, rel.y() as i32, rel.z() as i32),
          block_type: block,
          block_data: data,
        });
      }
      player.sender().send(cb::Packet::SetSlot {
        window_id: 0,
        slot:      inv.held_window_slot(),
        item:      held.to_wire(),
      });
    }
  }
}

/// Opens a container window over a block. Chests and furnaces show their
/// tile entity contents; the workbench is purely a client-side grid.
fn open_container(
  player: &Arc<Player>,
  chunk: &mut Chunk,
  kind: Interaction,
  chunk_pos: ChunkPos,
  rel: RelPos,
) {
  let (window_kind, title, num_slots, contents) = match kind {
    Interaction::Chest => match chunk.tile_entity_mut(rel) {
      Some(TileEntity::Chest { inv, .. }) => (0, "Chest", 27, inv.wire_slots()),
      _ => return,
    },
    Interaction::Workbench => (1, "Crafting", 9, vec![]),
    Interaction::Furnace => match chunk.tile_entity_mut(rel) {
      Some(TileEntity::Furnace { slots, .. }) => {
        (2, "Furnace", 3, slots.iter().map(|s| s.to_wire()).collect())
      }
      _ => return,
    },
  };

  let id = {
    let mut windows = player.windows().lock();
    let id = windows.next_id();
    windows.open = Some(OpenWindow { id, kind, chunk: chunk_pos, rel });
    id
  };
  player.sender().send(cb::Packet::WindowOpen {
    window_id: id,
    kind:      window_kind,
    title:     title.into(),
    num_slots: num_slots as u8,
  });
  if !contents.is_empty() {
    let mut items = contents;
    let inv = player.inv().lock();
    let player_slots = inv.wire_slots();
    // The container view is followed by the player's main grid and hotbar.
    items.extend_from_slice(&player_slots[9..]);
    player.sender().send(cb::Packet::WindowItems { window_id: id, items });
  }
}

fn window_click(
  game: &Arc<Game>,
  player: &Arc<Player>,
  window_id: i8,
  slot: i16,
  right_click: bool,
  action_id: i16,
  _clicked: crate::proto::WireSlot,
) {
  if window_id == 0 {
    let accepted = {
      let mut inv = player.inv().lock();
      let mut cursor = player.cursor().lock();
      inv.click(slot, &mut cursor, right_click, game.types())
    };
    player.sender().send(cb::Packet::Transaction { window_id, action_id, accepted });
    return;
  }

  let open = player.windows().lock().open;
  let w = match open {
    Some(w) if w.id == window_id => w,
    _ => {
      player.sender().send(cb::Packet::Transaction { window_id, action_id, accepted: false });
      return;
    }
  };

  let p = player.clone();
  player.shard_conn_for(game, w.chunk, |conn| {
    conn.enqueue(move |state: &mut ShardState| {
      let types = state.types_arc();
      let accepted = match state.chunk_mut(w.chunk) {
        Some(chunk) => container_click(chunk, &p, w, slot, right_click, &types),
        None => false,
      };
      p.sender().send(cb::Packet::Transaction { window_id, action_id, accepted });
    });
  });
}

/// A click inside an open container window. Slots below the container size
/// hit the tile entity; the rest map onto the player's main grid and hotbar.
fn container_click(
  chunk: &mut Chunk,
  player: &Arc<Player>,
  w: OpenWindow,
  slot: i16,
  right_click: bool,
  types: &ItemTypes,
) -> bool {
  let slot = match usize::try_from(slot) {
    Ok(s) => s,
    Err(_) => return false,
  };
  let container_slots = match w.kind {
    Interaction::Chest => 27,
    Interaction::Furnace => 3,
    Interaction::Workbench => return false,
  };

  // Same lock order as the window-0 path: inventory, then cursor.
  let mut inv = player.inv().lock();
  let mut cursor = player.cursor().lock();
  if slot < container_slots {
    let changed = match (w.kind, chunk.tile_entity_mut(w.rel)) {
      (Interaction::Chest, Some(TileEntity::Chest { inv, .. })) => {
        inv.standard_click(slot, &mut cursor, right_click, types)
      }
      (Interaction::Furnace, Some(TileEntity::Furnace { slots, .. })) => {
        let s = &mut slots[slot];
        if right_click {
          if cursor.is_empty() {
            s.split(&mut cursor)
          } else {
            s.add_one(&mut cursor, types)
          }
        } else {
          s.swap(&mut cursor)
        }
      }
      _ => false,
    };
    if changed {
      chunk.mark_dirty();
    }
    changed
  } else {
    // Player inventory section of the window: main grid, then hotbar.
    let player_slot = 9 + (slot - container_slots);
    if player_slot >= 45 {
      return false;
    }
    inv.click(player_slot as i16, &mut cursor, right_click, types)
  }
}
