//! Serverbound packets: everything a client can send us.

use super::{id, Login, ReadError, WireSlot, MAX_STR_LEN};
use mg_common::{
  math::{Look, Pos},
  util::Buffer,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
  KeepAlive {
    id: i32,
  },
  Login(Login),
  Handshake {
    username: String,
  },
  Chat {
    message: String,
  },
  /// The bare on-ground flag, sent every tick when the player is idle.
  Flying {
    on_ground: bool,
  },
  PlayerPosition {
    x:         f64,
    y:         f64,
    stance:    f64,
    z:         f64,
    on_ground: bool,
  },
  PlayerLook {
    look:      Look,
    on_ground: bool,
  },
  PlayerPositionLook {
    x:         f64,
    y:         f64,
    stance:    f64,
    z:         f64,
    look:      Look,
    on_ground: bool,
  },
  PlayerDigging {
    status: u8,
    pos:    Pos,
    face:   u8,
  },
  BlockPlacement {
    pos:  Pos,
    face: u8,
    held: WireSlot,
  },
  HoldingChange {
    slot: i16,
  },
  WindowClick {
    window_id:   i8,
    slot:        i16,
    right_click: bool,
    action_id:   i16,
    shift:       bool,
    clicked:     WireSlot,
  },
  WindowClose {
    window_id: i8,
  },
  Transaction {
    window_id: i8,
    action_id: i16,
    accepted:  bool,
  },
  Disconnect {
    reason: String,
  },
}

fn read_block_pos<T: AsRef<[u8]>>(buf: &mut Buffer<T>) -> Result<Pos, ReadError> {
  let x = buf.read_i32()?;
  let y = buf.read_i8()? as i32;
  let z = buf.read_i32()?;
  Ok(Pos::new(x, y, z))
}

impl Packet {
  /// Reads one packet from the buffer. Returns `Err` with
  /// [`ReadError::is_partial`] true if the buffer holds an incomplete frame.
  pub fn read<T: AsRef<[u8]>>(buf: &mut Buffer<T>) -> Result<Self, ReadError> {
    let ty = buf.read_u8()?;
    Ok(match ty {
      id::KEEP_ALIVE => Packet::KeepAlive { id: buf.read_i32()? },
      id::LOGIN => Packet::Login(Login::read(buf)?),
      id::HANDSHAKE => Packet::Handshake { username: buf.read_str16(MAX_STR_LEN)? },
      id::CHAT => Packet::Chat { message: buf.read_str16(MAX_STR_LEN)? },
      id::FLYING => Packet::Flying { on_ground: buf.read_bool()? },
      id::PLAYER_POSITION => Packet::PlayerPosition {
        x:         buf.read_f64()?,
        y:         buf.read_f64()?,
        stance:    buf.read_f64()?,
        z:         buf.read_f64()?,
        on_ground: buf.read_bool()?,
      },
      id::PLAYER_LOOK => Packet::PlayerLook {
        look:      Look::new(buf.read_f32()?, buf.read_f32()?),
        on_ground: buf.read_bool()?,
      },
      id::PLAYER_POSITION_LOOK => Packet::PlayerPositionLook {
        x:         buf.read_f64()?,
        y:         buf.read_f64()?,
        stance:    buf.read_f64()?,
        z:         buf.read_f64()?,
        look:      Look::new(buf.read_f32()?, buf.read_f32()?),
        on_ground: buf.read_bool()?,
      },
      id::PLAYER_DIGGING => Packet::PlayerDigging {
        status: buf.read_u8()?,
        pos:    read_block_pos(buf)?,
        face:   buf.read_u8()?,
      },
      id::BLOCK_PLACEMENT => Packet::BlockPlacement {
        pos:  read_block_pos(buf)?,
        face: buf.read_u8()?,
        held: WireSlot::read(buf)?,
      },
      id::HOLDING_CHANGE => Packet::HoldingChange { slot: buf.read_i16()? },
      id::WINDOW_CLICK => Packet::WindowClick {
        window_id:   buf.read_i8()?,
        slot:        buf.read_i16()?,
        right_click: buf.read_bool()?,
        action_id:   buf.read_i16()?,
        shift:       buf.read_bool()?,
        clicked:     WireSlot::read(buf)?,
      },
      id::WINDOW_CLOSE => Packet::WindowClose { window_id: buf.read_i8()? },
      id::TRANSACTION => Packet::Transaction {
        window_id: buf.read_i8()?,
        action_id: buf.read_i16()?,
        accepted:  buf.read_bool()?,
      },
      id::DISCONNECT => Packet::Disconnect { reason: buf.read_str16(MAX_STR_LEN)? },
      _ => return Err(ReadError::UnknownPacket(ty)),
    })
  }

  /// The inverse of [`read`](Self::read). Only used in tests on the server,
  /// but kept complete so the codec round trips.
  pub fn write(&self, buf: &mut Buffer<&mut Vec<u8>>) {
    match self {
      Packet::KeepAlive { id: v } => {
        buf.write_u8(id::KEEP_ALIVE);
        buf.write_i32(*v);
      }
      Packet::Login(login) => {
        buf.write_u8(id::LOGIN);
        login.write(buf);
      }
      Packet::Handshake { username } => {
        buf.write_u8(id::HANDSHAKE);
        buf.write_str16(username);
      }
      Packet::Chat { message } => {
        buf.write_u8(id::CHAT);
        buf.write_str16(message);
      }
      Packet::Flying { on_ground } => {
        buf.write_u8(id::FLYING);
        buf.write_bool(*on_ground);
      }
      Packet::PlayerPosition { x, y, stance, z, on_ground } => {
        buf.write_u8(id::PLAYER_POSITION);
        buf.write_f64(*x);
        buf.write_f64(*y);
        buf.write_f64(*stance);
        buf.write_f64(*z);
        buf.write_bool(*on_ground);
      }
      Packet::PlayerLook { look, on_ground } => {
        buf.write_u8(id::PLAYER_LOOK);
        buf.write_f32(look.yaw);
        buf.write_f32(look.pitch);
        buf.write_bool(*on_ground);
      }
      Packet::PlayerPositionLook { x, y, stance, z, look, on_ground } => {
        buf.write_u8(id::PLAYER_POSITION_LOOK);
        buf.write_f64(*x);
        buf.write_f64(*y);
        buf.write_f64(*stance);
        buf.write_f64(*z);
        buf.write_f32(look.yaw);
        buf.write_f32(look.pitch);
        buf.write_bool(*on_ground);
      }
      Packet::PlayerDigging { status, pos, face } => {
        buf.write_u8(id::PLAYER_DIGGING);
        buf.write_u8(*status);
        write_block_pos(buf, *pos);
        buf.write_u8(*face);
      }
      Packet::BlockPlacement { pos, face, held } => {
        buf.write_u8(id::BLOCK_PLACEMENT);
        write_block_pos(buf, *pos);
        buf.write_u8(*face);
        held.write(buf);
      }
      Packet::HoldingChange { slot } => {
        buf.write_u8(id::HOLDING_CHANGE);
        buf.write_i16(*slot);
      }
      Packet::WindowClick { window_id, slot, right_click, action_id, shift, clicked } => {
        buf.write_u8(id::WINDOW_CLICK);
        buf.write_i8(*window_id);
        buf.write_i16(*slot);
        buf.write_bool(*right_click);
        buf.write_i16(*action_id);
        buf.write_bool(*shift);
        clicked.write(buf);
      }
      Packet::WindowClose { window_id } => {
        buf.write_u8(id::WINDOW_CLOSE);
        buf.write_i8(*window_id);
      }
      Packet::Transaction { window_id, action_id, accepted } => {
        buf.write_u8(id::TRANSACTION);
        buf.write_i8(*window_id);
        buf.write_i16(*action_id);
        buf.write_bool(*accepted);
      }
      Packet::Disconnect { reason } => {
        buf.write_u8(id::DISCONNECT);
        buf.write_str16(reason);
      }
    }
  }

  pub fn serialize(&self) -> Vec<u8> {
    let mut data = vec![];
    let mut buf = Buffer::new(&mut data);
    self.write(&mut buf);
    data
  }
}

fn write_block_pos(buf: &mut Buffer<&mut Vec<u8>>, pos: Pos) {
  buf.write_i32(pos.x);
  buf.write_i8(pos.y as i8);
  buf.write_i32(pos.z);
}
