//! Clientbound packets: everything the server sends.

use super::{id, Login, ReadError, WireSlot, MAX_STR_LEN};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use mg_common::{
  math::{ChunkPos, IPos, LookBytes, Pos},
  util::Buffer,
};
use std::io::{Read, Write};

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
  KeepAlive {
    id: i32,
  },
  /// The reply to a login packet, carrying the new entity id in the field the
  /// client sent its protocol version in.
  LoginReply(Login),
  /// The reply to a handshake: the server id hash the client should use for
  /// authentication, or `"-"` for no auth.
  HandshakeReply {
    hash: String,
  },
  Chat {
    message: String,
  },
  TimeUpdate {
    time: i64,
  },
  SpawnPosition {
    pos: Pos,
  },
  /// Teleports the client, and is required once at spawn before it starts
  /// moving on its own.
  PlayerPositionLook {
    x:         f64,
    y:         f64,
    stance:    f64,
    z:         f64,
    yaw:       f32,
    pitch:     f32,
    on_ground: bool,
  },
  /// Spawns another player.
  NamedEntitySpawn {
    eid:          i32,
    username:     String,
    pos:          IPos,
    look:         LookBytes,
    current_item: i16,
  },
  /// Spawns an item drop.
  PickupSpawn {
    eid:      i32,
    item:     i16,
    count:    u8,
    data:     i16,
    pos:      IPos,
    rotation: i8,
    pitch:    i8,
    roll:     i8,
  },
  /// Spawns a mob. The metadata stream is kept as raw bytes; the server never
  /// inspects it, only relays what was loaded from disk.
  MobSpawn {
    eid:      i32,
    mob_type: u8,
    pos:      IPos,
    look:     LookBytes,
    metadata: Vec<u8>,
  },
  EntityDestroy {
    eid: i32,
  },
  EntityTeleport {
    eid:  i32,
    pos:  IPos,
    look: LookBytes,
  },
  /// mode=true tells the client to allocate the chunk, mode=false to unload
  /// it.
  PreChunk {
    chunk: ChunkPos,
    mode:  bool,
  },
  /// A cuboid of block data. `data` is the uncompressed concatenation of
  /// block ids, block data, block light and sky light; it is zlib-compressed
  /// on the wire.
  MapChunk {
    corner: Pos,
    size_x: u8,
    size_y: u8,
    size_z: u8,
    data:   Vec<u8>,
  },
  MultiBlockChange {
    chunk:  ChunkPos,
    coords: Vec<i16>,
    types:  Vec<u8>,
    data:   Vec<u8>,
  },
  BlockChange {
    pos:        Pos,
    block_type: u8,
    block_data: u8,
  },
  Explosion {
    x:      f64,
    y:      f64,
    z:      f64,
    radius: f32,
    blocks: Vec<(i8, i8, i8)>,
  },
  WindowOpen {
    window_id: i8,
    kind:      i8,
    title:     String,
    num_slots: u8,
  },
  WindowClose {
    window_id: i8,
  },
  SetSlot {
    window_id: i8,
    slot:      i16,
    item:      WireSlot,
  },
  WindowItems {
    window_id: i8,
    items:     Vec<WireSlot>,
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

impl Packet {
  pub fn write(&self, buf: &mut Buffer<&mut Vec<u8>>) {
    match self {
      Packet::KeepAlive { id: v } => {
        buf.write_u8(id::KEEP_ALIVE);
        buf.write_i32(*v);
      }
      Packet::LoginReply(login) => {
        buf.write_u8(id::LOGIN);
        login.write(buf);
      }
      Packet::HandshakeReply { hash } => {
        buf.write_u8(id::HANDSHAKE);
        buf.write_str16(hash);
      }
      Packet::Chat { message } => {
        buf.write_u8(id::CHAT);
        buf.write_str16(message);
      }
      Packet::TimeUpdate { time } => {
        buf.write_u8(id::TIME_UPDATE);
        buf.write_i64(*time);
      }
      Packet::SpawnPosition { pos } => {
        buf.write_u8(id::SPAWN_POSITION);
        buf.write_i32(pos.x);
        buf.write_i32(pos.y);
        buf.write_i32(pos.z);
      }
      Packet::PlayerPositionLook { x, y, stance, z, yaw, pitch, on_ground } => {
        buf.write_u8(id::PLAYER_POSITION_LOOK);
        buf.write_f64(*x);
        buf.write_f64(*y);
        buf.write_f64(*stance);
        buf.write_f64(*z);
        buf.write_f32(*yaw);
        buf.write_f32(*pitch);
        buf.write_bool(*on_ground);
      }
      Packet::NamedEntitySpawn { eid, username, pos, look, current_item } => {
        buf.write_u8(id::NAMED_ENTITY_SPAWN);
        buf.write_i32(*eid);
        buf.write_str16(username);
        write_ipos(buf, *pos);
        buf.write_u8(look.yaw);
        buf.write_u8(look.pitch);
        buf.write_i16(*current_item);
      }
      Packet::PickupSpawn { eid, item, count, data, pos, rotation, pitch, roll } => {
        buf.write_u8(id::PICKUP_SPAWN);
        buf.write_i32(*eid);
        buf.write_i16(*item);
        buf.write_u8(*count);
        buf.write_i16(*data);
        write_ipos(buf, *pos);
        buf.write_i8(*rotation);
        buf.write_i8(*pitch);
        buf.write_i8(*roll);
      }
      Packet::MobSpawn { eid, mob_type, pos, look, metadata } => {
        buf.write_u8(id::MOB_SPAWN);
        buf.write_i32(*eid);
        buf.write_u8(*mob_type);
        write_ipos(buf, *pos);
        buf.write_u8(look.yaw);
        buf.write_u8(look.pitch);
        buf.write_buf(metadata);
        buf.write_u8(0x7f);
      }
      Packet::EntityDestroy { eid } => {
        buf.write_u8(id::ENTITY_DESTROY);
        buf.write_i32(*eid);
      }
      Packet::EntityTeleport { eid, pos, look } => {
        buf.write_u8(id::ENTITY_TELEPORT);
        buf.write_i32(*eid);
        write_ipos(buf, *pos);
        buf.write_u8(look.yaw);
        buf.write_u8(look.pitch);
      }
      Packet::PreChunk { chunk, mode } => {
        buf.write_u8(id::PRE_CHUNK);
        buf.write_i32(chunk.x());
        buf.write_i32(chunk.z());
        buf.write_bool(*mode);
      }
      Packet::MapChunk { corner, size_x, size_y, size_z, data } => {
        buf.write_u8(id::MAP_CHUNK);
        buf.write_i32(corner.x);
        buf.write_i8(corner.y as i8);
        buf.write_i32(corner.z);
        buf.write_u8(size_x - 1);
        buf.write_u8(size_y - 1);
        buf.write_u8(size_z - 1);
        let mut enc = ZlibEncoder::new(vec![], Compression::default());
        enc.write_all(data).unwrap();
        let compressed = enc.finish().unwrap();
        buf.write_i32(compressed.len() as i32);
        buf.write_buf(&compressed);
      }
      Packet::MultiBlockChange { chunk, coords, types, data } => {
        buf.write_u8(id::MULTI_BLOCK_CHANGE);
        buf.write_i32(chunk.x());
        buf.write_i32(chunk.z());
        buf.write_i16(coords.len() as i16);
        for c in coords {
          buf.write_i16(*c);
        }
        buf.write_buf(types);
        buf.write_buf(data);
      }
      Packet::BlockChange { pos, block_type, block_data } => {
        buf.write_u8(id::BLOCK_CHANGE);
        buf.write_i32(pos.x);
        buf.write_i8(pos.y as i8);
        buf.write_i32(pos.z);
        buf.write_u8(*block_type);
        buf.write_u8(*block_data);
      }
      Packet::Explosion { x, y, z, radius, blocks } => {
        buf.write_u8(id::EXPLOSION);
        buf.write_f64(*x);
        buf.write_f64(*y);
        buf.write_f64(*z);
        buf.write_f32(*radius);
        buf.write_i32(blocks.len() as i32);
        for (dx, dy, dz) in blocks {
          buf.write_i8(*dx);
          buf.write_i8(*dy);
          buf.write_i8(*dz);
        }
      }
      Packet::WindowOpen { window_id, kind, title, num_slots } => {
        buf.write_u8(id::WINDOW_OPEN);
        buf.write_i8(*window_id);
        buf.write_i8(*kind);
        buf.write_str16(title);
        buf.write_u8(*num_slots);
      }
      Packet::WindowClose { window_id } => {
        buf.write_u8(id::WINDOW_CLOSE);
        buf.write_i8(*window_id);
      }
      Packet::SetSlot { window_id, slot, item } => {
        buf.write_u8(id::SET_SLOT);
        buf.write_i8(*window_id);
        buf.write_i16(*slot);
        item.write(buf);
      }
      Packet::WindowItems { window_id, items } => {
        buf.write_u8(id::WINDOW_ITEMS);
        buf.write_i8(*window_id);
        buf.write_i16(items.len() as i16);
        for it in items {
          it.write(buf);
        }
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

  /// Reads one clientbound packet. The server never parses its own output in
  /// production, but the codec round trips for testing.
  pub fn read<T: AsRef<[u8]>>(buf: &mut Buffer<T>) -> Result<Self, ReadError> {
    let ty = buf.read_u8()?;
    Ok(match ty {
      id::KEEP_ALIVE => Packet::KeepAlive { id: buf.read_i32()? },
      id::LOGIN => Packet::LoginReply(Login::read(buf)?),
      id::HANDSHAKE => Packet::HandshakeReply { hash: buf.read_str16(MAX_STR_LEN)? },
      id::CHAT => Packet::Chat { message: buf.read_str16(MAX_STR_LEN)? },
      id::TIME_UPDATE => Packet::TimeUpdate { time: buf.read_i64()? },
      id::SPAWN_POSITION => Packet::SpawnPosition {
        pos: Pos::new(buf.read_i32()?, buf.read_i32()?, buf.read_i32()?),
      },
      id::PLAYER_POSITION_LOOK => Packet::PlayerPositionLook {
        x:         buf.read_f64()?,
        y:         buf.read_f64()?,
        stance:    buf.read_f64()?,
        z:         buf.read_f64()?,
        yaw:       buf.read_f32()?,
        pitch:     buf.read_f32()?,
        on_ground: buf.read_bool()?,
      },
      id::NAMED_ENTITY_SPAWN => Packet::NamedEntitySpawn {
        eid:          buf.read_i32()?,
        username:     buf.read_str16(MAX_STR_LEN)?,
        pos:          read_ipos(buf)?,
        look:         LookBytes { yaw: buf.read_u8()?, pitch: buf.read_u8()? },
        current_item: buf.read_i16()?,
      },
      id::PICKUP_SPAWN => Packet::PickupSpawn {
        eid:      buf.read_i32()?,
        item:     buf.read_i16()?,
        count:    buf.read_u8()?,
        data:     buf.read_i16()?,
        pos:      read_ipos(buf)?,
        rotation: buf.read_i8()?,
        pitch:    buf.read_i8()?,
        roll:     buf.read_i8()?,
      },
      id::MOB_SPAWN => {
        let eid = buf.read_i32()?;
        let mob_type = buf.read_u8()?;
        let pos = read_ipos(buf)?;
        let look = LookBytes { yaw: buf.read_u8()?, pitch: buf.read_u8()? };
        let mut metadata = vec![];
        loop {
          let b = buf.read_u8()?;
          if b == 0x7f {
            break;
          }
          metadata.push(b);
        }
        Packet::MobSpawn { eid, mob_type, pos, look, metadata }
      }
      id::ENTITY_DESTROY => Packet::EntityDestroy { eid: buf.read_i32()? },
      id::ENTITY_TELEPORT => Packet::EntityTeleport {
        eid:  buf.read_i32()?,
        pos:  read_ipos(buf)?,
        look: LookBytes { yaw: buf.read_u8()?, pitch: buf.read_u8()? },
      },
      id::PRE_CHUNK => Packet::PreChunk {
        chunk: ChunkPos::new(buf.read_i32()?, buf.read_i32()?),
        mode:  buf.read_bool()?,
      },
      id::MAP_CHUNK => {
        let corner = Pos::new(buf.read_i32()?, buf.read_i8()? as i32, buf.read_i32()?);
        let size_x = buf.read_u8()? + 1;
        let size_y = buf.read_u8()? + 1;
        let size_z = buf.read_u8()? + 1;
        let len = buf.read_i32()?;
        if len < 0 {
          return Err(ReadError::InvalidField("negative chunk data length"));
        }
        let compressed = buf.read_buf(len as usize)?;
        let mut data = vec![];
        ZlibDecoder::new(compressed.as_slice())
          .read_to_end(&mut data)
          .map_err(|_| ReadError::InvalidField("bad chunk data compression"))?;
        Packet::MapChunk { corner, size_x, size_y, size_z, data }
      }
      id::MULTI_BLOCK_CHANGE => {
        let chunk = ChunkPos::new(buf.read_i32()?, buf.read_i32()?);
        let count = buf.read_i16()?;
        if count < 0 {
          return Err(ReadError::InvalidField("negative block change count"));
        }
        let mut coords = Vec::with_capacity(count as usize);
        for _ in 0..count {
          coords.push(buf.read_i16()?);
        }
        let types = buf.read_buf(count as usize)?;
        let data = buf.read_buf(count as usize)?;
        Packet::MultiBlockChange { chunk, coords, types, data }
      }
      id::BLOCK_CHANGE => Packet::BlockChange {
        pos:        Pos::new(buf.read_i32()?, buf.read_i8()? as i32, buf.read_i32()?),
        block_type: buf.read_u8()?,
        block_data: buf.read_u8()?,
      },
      id::EXPLOSION => {
        let x = buf.read_f64()?;
        let y = buf.read_f64()?;
        let z = buf.read_f64()?;
        let radius = buf.read_f32()?;
        let count = buf.read_i32()?;
        if count < 0 {
          return Err(ReadError::InvalidField("negative explosion block count"));
        }
        let mut blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
          blocks.push((buf.read_i8()?, buf.read_i8()?, buf.read_i8()?));
        }
        Packet::Explosion { x, y, z, radius, blocks }
      }
      id::WINDOW_OPEN => Packet::WindowOpen {
        window_id: buf.read_i8()?,
        kind:      buf.read_i8()?,
        title:     buf.read_str16(MAX_STR_LEN)?,
        num_slots: buf.read_u8()?,
      },
      id::WINDOW_CLOSE => Packet::WindowClose { window_id: buf.read_i8()? },
      id::SET_SLOT => Packet::SetSlot {
        window_id: buf.read_i8()?,
        slot:      buf.read_i16()?,
        item:      WireSlot::read(buf)?,
      },
      id::WINDOW_ITEMS => {
        let window_id = buf.read_i8()?;
        let count = buf.read_i16()?;
        if count < 0 {
          return Err(ReadError::InvalidField("negative window item count"));
        }
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
          items.push(WireSlot::read(buf)?);
        }
        Packet::WindowItems { window_id, items }
      }
      id::TRANSACTION => Packet::Transaction {
        window_id: buf.read_i8()?,
        action_id: buf.read_i16()?,
        accepted:  buf.read_bool()?,
      },
      id::DISCONNECT => Packet::Disconnect { reason: buf.read_str16(MAX_STR_LEN)? },
      _ => return Err(ReadError::UnknownPacket(ty)),
    })
  }
}

fn write_ipos(buf: &mut Buffer<&mut Vec<u8>>, pos: IPos) {
  buf.write_i32(pos.x);
  buf.write_i32(pos.y);
  buf.write_i32(pos.z);
}

fn read_ipos<T: AsRef<[u8]>>(buf: &mut Buffer<T>) -> Result<IPos, ReadError> {
  Ok(IPos::new(buf.read_i32()?, buf.read_i32()?, buf.read_i32()?))
}
