//! Entities: anything with an entity id. Players are handled by the session
//! and dispatcher; this module covers the entities that live inside chunks
//! (item drops and mobs) plus block-bound tile entities.

mod tile;

pub use tile::TileEntity;

use crate::{item::Slot, proto::cb};
use mg_common::{
  math::{FPos, Look, Pos},
  nbt::Tag,
};
use std::sync::{
  atomic::{AtomicI32, Ordering},
  Arc,
};

/// The entity id allocator. Created by the dispatcher; shards hold a clone of
/// the handle for entities they revive from disk. Ids are monotonic and never
/// reused.
#[derive(Debug, Clone)]
pub struct EntityIds {
  next: Arc<AtomicI32>,
}

impl Default for EntityIds {
  fn default() -> Self { EntityIds::new() }
}

impl EntityIds {
  pub fn new() -> EntityIds {
    // EID 0 is invalid, so we start at 1.
    EntityIds { next: Arc::new(AtomicI32::new(1)) }
  }

  pub fn alloc(&self) -> i32 { self.next.fetch_add(1, Ordering::SeqCst) }
}

/// Every non-player entity kind the server knows. The set is closed; anything
/// unrecognized in a saved chunk is skipped at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
  Item(ItemEntity),
  Mob(Mob),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemEntity {
  pub eid:  i32,
  pub slot: Slot,
  pub pos:  FPos,
  pub vel:  FPos,
  /// Ticks since the drop spawned. Old drops despawn.
  pub age:  u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mob {
  pub eid:      i32,
  pub mob_type: u8,
  pub pos:      FPos,
  pub look:     Look,
}

/// Item drops live this long before despawning: five minutes.
const ITEM_LIFETIME: u32 = 5 * 60 * 20;
/// Per-tick downward acceleration for drops, in blocks/tick^2.
const ITEM_GRAVITY: f64 = 0.04;

/// What an entity wants after its tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
  Still,
  Moved,
  Despawn,
}

impl Entity {
  pub fn eid(&self) -> i32 {
    match self {
      Entity::Item(e) => e.eid,
      Entity::Mob(e) => e.eid,
    }
  }

  pub fn pos(&self) -> FPos {
    match self {
      Entity::Item(e) => e.pos,
      Entity::Mob(e) => e.pos,
    }
  }

  /// The packet announcing this entity to a new subscriber.
  pub fn spawn_packet(&self) -> cb::Packet {
    match self {
      Entity::Item(e) => cb::Packet::PickupSpawn {
        eid:      e.eid,
        item:     e.slot.id,
        count:    e.slot.count,
        data:     e.slot.data,
        pos:      e.pos.fixed(),
        rotation: 0,
        pitch:    0,
        roll:     0,
      },
      Entity::Mob(e) => cb::Packet::MobSpawn {
        eid:      e.eid,
        mob_type: e.mob_type,
        pos:      e.pos.fixed(),
        look:     e.look.to_bytes(),
        metadata: vec![],
      },
    }
  }

  /// Runs one tick of physics. `solid` reports whether a block position is
  /// solid, for items coming to rest. Mob AI is out of scope; mobs stand
  /// still.
  pub fn tick(&mut self, solid: impl Fn(Pos) -> bool) -> TickOutcome {
    match self {
      Entity::Item(e) => {
        e.age += 1;
        if e.age >= ITEM_LIFETIME {
          return TickOutcome::Despawn;
        }
        let below_solid = match e.pos.block().checked_add(0, -1, 0) {
          Some(b) => solid(b),
          // The void: keep falling until despawn.
          None => false,
        };
        if e.vel == FPos::default() && below_solid {
          return TickOutcome::Still;
        }
        e.vel.y -= ITEM_GRAVITY;
        let mut next = e.pos + e.vel;
        if solid(next.block()) {
          // Came down into a solid block: rest on top of it.
          next.y = next.block().y as f64 + 1.0;
          e.vel = FPos::default();
        }
        e.pos = next;
        TickOutcome::Moved
      }
      Entity::Mob(_) => TickOutcome::Still,
    }
  }

  /// Revives an entity from its saved compound, giving it a fresh id.
  /// Unknown kinds return `None`.
  pub fn from_nbt(tag: &Tag, eids: &EntityIds) -> Option<Entity> {
    let name = tag.get("id")?.string().ok()?;
    let pos = pos_from_nbt(tag)?;
    match name.as_str() {
      "Item" => {
        let item = tag.get("Item")?.compound().ok()?;
        let slot = Slot::from_nbt(item).ok()?;
        Some(Entity::Item(ItemEntity {
          eid: eids.alloc(),
          slot,
          pos,
          vel: FPos::default(),
          age: 0,
        }))
      }
      name => {
        let mob_type = mob_type_for_name(name)?;
        Some(Entity::Mob(Mob { eid: eids.alloc(), mob_type, pos, look: Look::default() }))
      }
    }
  }

  pub fn to_nbt(&self) -> Tag {
    match self {
      Entity::Item(e) => Tag::new_compound(&[
        ("id", Tag::String("Item".into())),
        ("Pos", pos_to_nbt(e.pos)),
        ("Item", e.slot.to_nbt()),
      ]),
      Entity::Mob(e) => Tag::new_compound(&[
        ("id", Tag::String(mob_name_for_type(e.mob_type).into())),
        ("Pos", pos_to_nbt(e.pos)),
        (
          "Rotation",
          Tag::List(vec![Tag::Float(e.look.yaw), Tag::Float(e.look.pitch)]),
        ),
      ]),
    }
  }
}

fn pos_from_nbt(tag: &Tag) -> Option<FPos> {
  let list = tag.get("Pos")?.list().ok()?;
  if list.len() != 3 {
    return None;
  }
  Some(FPos::new(list[0].double().ok()?, list[1].double().ok()?, list[2].double().ok()?))
}

fn pos_to_nbt(pos: FPos) -> Tag {
  Tag::List(vec![Tag::Double(pos.x), Tag::Double(pos.y), Tag::Double(pos.z)])
}

fn mob_type_for_name(name: &str) -> Option<u8> {
  Some(match name {
    "Creeper" => 50,
    "Skeleton" => 51,
    "Spider" => 52,
    "Zombie" => 54,
    "Pig" => 90,
    "Sheep" => 91,
    "Cow" => 92,
    "Chicken" => 93,
    _ => return None,
  })
}

fn mob_name_for_type(ty: u8) -> &'static str {
  match ty {
    50 => "Creeper",
    51 => "Skeleton",
    52 => "Spider",
    54 => "Zombie",
    90 => "Pig",
    91 => "Sheep",
    92 => "Cow",
    93 => "Chicken",
    _ => "Mob",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn ids_are_monotonic() {
    let eids = EntityIds::new();
    let a = eids.alloc();
    let b = eids.alloc();
    let c = eids.alloc();
    assert!(a < b && b < c);
    assert_eq!(a, 1);
  }

  #[test]
  fn item_round_trips_through_nbt() {
    let eids = EntityIds::new();
    let item = Entity::Item(ItemEntity {
      eid:  eids.alloc(),
      slot: Slot::new(1, 12, 0),
      pos:  FPos::new(1.5, 64.0, -2.5),
      vel:  FPos::default(),
      age:  0,
    });
    let revived = Entity::from_nbt(&item.to_nbt(), &eids).unwrap();
    match (&item, &revived) {
      (Entity::Item(a), Entity::Item(b)) => {
        assert_eq!(a.slot, b.slot);
        assert_eq!(a.pos, b.pos);
        // A fresh id was allocated.
        assert_ne!(a.eid, b.eid);
      }
      _ => panic!("revived as wrong kind"),
    }
  }

  #[test]
  fn unknown_entities_are_skipped() {
    let eids = EntityIds::new();
    let tag = Tag::new_compound(&[
      ("id", Tag::String("EnderDragon".into())),
      ("Pos", pos_to_nbt(FPos::new(0.0, 64.0, 0.0))),
    ]);
    assert!(Entity::from_nbt(&tag, &eids).is_none());
  }

  #[test]
  fn items_fall_and_rest() {
    let eids = EntityIds::new();
    let mut e = Entity::Item(ItemEntity {
      eid:  eids.alloc(),
      slot: Slot::new(1, 1, 0),
      pos:  FPos::new(0.5, 66.0, 0.5),
      vel:  FPos::default(),
      age:  0,
    });
    // Solid ground at y=63 means entities rest at y=64.
    let solid = |p: Pos| p.y <= 63;
    for _ in 0..200 {
      if e.tick(solid) == TickOutcome::Still {
        break;
      }
    }
    assert_eq!(e.tick(solid), TickOutcome::Still);
    let y = e.pos().y;
    assert!((64.0..65.0).contains(&y), "resting at y={y}");
  }

  #[test]
  fn old_items_despawn() {
    let eids = EntityIds::new();
    let mut e = Entity::Item(ItemEntity {
      eid:  eids.alloc(),
      slot: Slot::new(1, 1, 0),
      pos:  FPos::new(0.5, 64.0, 0.5),
      vel:  FPos::default(),
      age:  ITEM_LIFETIME - 1,
    });
    assert_eq!(e.tick(|_| true), TickOutcome::Despawn);
  }
}
