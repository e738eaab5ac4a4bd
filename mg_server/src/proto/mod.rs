//! The client protocol codec. Each frame on the wire is a one-byte packet id
//! followed by the packet body. There is no length prefix; the body layout is
//! fixed per id. Strings are UCS-2 with a 16-bit code unit count.
//!
//! [`sb::Packet`] is everything the server reads, [`cb::Packet`] everything it
//! writes. A few shapes (login, handshake, chat) travel in both directions and
//! share a struct here.

pub mod cb;
pub mod sb;


use mg_common::util::{Buffer, BufferError};
use thiserror::Error;

/// The maximum length accepted for any string field. Usernames, chat and
/// disconnect reasons are all far below this.
pub const MAX_STR_LEN: u64 = 32767;

#[derive(Debug, Error)]
pub enum ReadError {
  #[error("{0}")]
  Buffer(#[from] BufferError),
  #[error("unknown packet id {0:#04x}")]
  UnknownPacket(u8),
  #[error("invalid packet field: {0}")]
  InvalidField(&'static str),
}

impl ReadError {
  /// True if the packet was simply cut short. The caller should keep the
  /// bytes and retry once more have arrived.
  pub fn is_partial(&self) -> bool {
    matches!(self, ReadError::Buffer(e) if e.is_eof())
  }
}

/// An item stack as it appears on the wire: a type id of -1 means the slot is
/// empty and nothing else follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireSlot {
  pub id:    i16,
  pub count: u8,
  pub data:  i16,
}

impl WireSlot {
  pub const EMPTY: WireSlot = WireSlot { id: -1, count: 0, data: 0 };

  pub fn is_empty(&self) -> bool { self.id < 0 }

  pub fn read<T: AsRef<[u8]>>(buf: &mut Buffer<T>) -> Result<Self, ReadError> {
    let id = buf.read_i16()?;
    if id < 0 {
      Ok(WireSlot::EMPTY)
    } else {
      Ok(WireSlot { id, count: buf.read_u8()?, data: buf.read_i16()? })
    }
  }

  pub fn write(&self, buf: &mut Buffer<&mut Vec<u8>>) {
    if self.is_empty() {
      buf.write_i16(-1);
    } else {
      buf.write_i16(self.id);
      buf.write_u8(self.count);
      buf.write_i16(self.data);
    }
  }
}

/// The login packet body. The same layout is used in both directions: the
/// client fills in its protocol version and username, and the reply carries
/// the assigned entity id and the world parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Login {
  pub version_or_eid: i32,
  pub username:       String,
  pub map_seed:       i64,
  pub level_type:     String,
  pub game_mode:      i32,
  pub dimension:      i8,
  pub difficulty:     i8,
  pub world_height:   u8,
  pub max_players:    u8,
}

impl Login {
  fn read<T: AsRef<[u8]>>(buf: &mut Buffer<T>) -> Result<Self, ReadError> {
    Ok(Login {
      version_or_eid: buf.read_i32()?,
      username:       buf.read_str16(MAX_STR_LEN)?,
      map_seed:       buf.read_i64()?,
      level_type:     buf.read_str16(MAX_STR_LEN)?,
      game_mode:      buf.read_i32()?,
      dimension:      buf.read_i8()?,
      difficulty:     buf.read_i8()?,
      world_height:   buf.read_u8()?,
      max_players:    buf.read_u8()?,
    })
  }

  fn write(&self, buf: &mut Buffer<&mut Vec<u8>>) {
    buf.write_i32(self.version_or_eid);
    buf.write_str16(&self.username);
    buf.write_i64(self.map_seed);
    buf.write_str16(&self.level_type);
    buf.write_i32(self.game_mode);
    buf.write_i8(self.dimension);
    buf.write_i8(self.difficulty);
    buf.write_u8(self.world_height);
    buf.write_u8(self.max_players);
  }
}

mod id {
  pub const KEEP_ALIVE: u8 = 0x00;
  pub const LOGIN: u8 = 0x01;
  pub const HANDSHAKE: u8 = 0x02;
  pub const CHAT: u8 = 0x03;
  pub const TIME_UPDATE: u8 = 0x04;
  pub const SPAWN_POSITION: u8 = 0x06;
  pub const FLYING: u8 = 0x0a;
  pub const PLAYER_POSITION: u8 = 0x0b;
  pub const PLAYER_LOOK: u8 = 0x0c;
  pub const PLAYER_POSITION_LOOK: u8 = 0x0d;
  pub const PLAYER_DIGGING: u8 = 0x0e;
  pub const BLOCK_PLACEMENT: u8 = 0x0f;
  pub const HOLDING_CHANGE: u8 = 0x10;
  pub const NAMED_ENTITY_SPAWN: u8 = 0x14;
  pub const PICKUP_SPAWN: u8 = 0x15;
  pub const MOB_SPAWN: u8 = 0x18;
  pub const ENTITY_DESTROY: u8 = 0x1d;
  pub const ENTITY_TELEPORT: u8 = 0x22;
  pub const PRE_CHUNK: u8 = 0x32;
  pub const MAP_CHUNK: u8 = 0x33;
  pub const MULTI_BLOCK_CHANGE: u8 = 0x34;
  pub const BLOCK_CHANGE: u8 = 0x35;
  pub const EXPLOSION: u8 = 0x3c;
  pub const WINDOW_OPEN: u8 = 0x64;
  pub const WINDOW_CLOSE: u8 = 0x65;
  pub const WINDOW_CLICK: u8 = 0x66;
  pub const SET_SLOT: u8 = 0x67;
  pub const WINDOW_ITEMS: u8 = 0x68;
  pub const TRANSACTION: u8 = 0x6a;
  pub const DISCONNECT: u8 = 0xff;
}
