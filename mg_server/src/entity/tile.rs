use crate::item::{Inventory, Slot};
use mg_common::{math::Pos, nbt::Tag};

/// Block-bound auxiliary state: chests, furnaces and signs. Keyed by absolute
/// block position inside the owning chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum TileEntity {
  Chest { pos: Pos, inv: Inventory },
  Furnace { pos: Pos, slots: [Slot; 3], burn_time: i16, cook_time: i16 },
  Sign { pos: Pos, lines: [String; 4] },
}

pub const CHEST_SLOTS: usize = 27;

impl TileEntity {
  pub fn new_chest(pos: Pos) -> TileEntity {
    TileEntity::Chest { pos, inv: Inventory::new(CHEST_SLOTS) }
  }

  pub fn pos(&self) -> Pos {
    match self {
      TileEntity::Chest { pos, .. } => *pos,
      TileEntity::Furnace { pos, .. } => *pos,
      TileEntity::Sign { pos, .. } => *pos,
    }
  }

  /// Revives a tile entity from its saved compound. Unknown kinds return
  /// `None` and are dropped by the loader.
  pub fn from_nbt(tag: &Tag) -> Option<TileEntity> {
    let name = tag.get("id")?.string().ok()?;
    let pos = Pos::new(
      tag.get("x")?.int().ok()?,
      tag.get("y")?.int().ok()?,
      tag.get("z")?.int().ok()?,
    );
    match name.as_str() {
      "Chest" => {
        let mut inv = Inventory::new(CHEST_SLOTS);
        read_item_list(tag, |i, slot| {
          if i < CHEST_SLOTS {
            *inv.slot_mut(i) = slot;
          }
        });
        Some(TileEntity::Chest { pos, inv })
      }
      "Furnace" => {
        let mut slots = [Slot::EMPTY; 3];
        read_item_list(tag, |i, slot| {
          if i < 3 {
            slots[i] = slot;
          }
        });
        let burn_time = tag.get("BurnTime").and_then(|t| t.short().ok()).unwrap_or(0);
        let cook_time = tag.get("CookTime").and_then(|t| t.short().ok()).unwrap_or(0);
        Some(TileEntity::Furnace { pos, slots, burn_time, cook_time })
      }
      "Sign" => {
        let mut lines: [String; 4] = Default::default();
        for (i, line) in lines.iter_mut().enumerate() {
          if let Some(tag) = tag.get(&format!("Text{}", i + 1)) {
            *line = tag.string().ok()?.clone();
          }
        }
        Some(TileEntity::Sign { pos, lines })
      }
      _ => None,
    }
  }

  pub fn to_nbt(&self) -> Tag {
    let pos = self.pos();
    let mut fields = vec![
      ("x", Tag::Int(pos.x)),
      ("y", Tag::Int(pos.y)),
      ("z", Tag::Int(pos.z)),
    ];
    match self {
      TileEntity::Chest { inv, .. } => {
        fields.push(("id", Tag::String("Chest".into())));
        fields.push(("Items", write_item_list(inv.slots())));
      }
      TileEntity::Furnace { slots, burn_time, cook_time, .. } => {
        fields.push(("id", Tag::String("Furnace".into())));
        fields.push(("Items", write_item_list(slots)));
        fields.push(("BurnTime", Tag::Short(*burn_time)));
        fields.push(("CookTime", Tag::Short(*cook_time)));
      }
      TileEntity::Sign { lines, .. } => {
        fields.push(("id", Tag::String("Sign".into())));
        for (i, line) in lines.iter().enumerate() {
          // Sign text keys are 1-based.
          let key: &'static str = ["Text1", "Text2", "Text3", "Text4"][i];
          fields.push((key, Tag::String(line.clone())));
        }
      }
    }
    Tag::new_compound(&fields)
  }
}

fn read_item_list(tag: &Tag, mut store: impl FnMut(usize, Slot)) {
  let items = match tag.get("Items").and_then(|t| t.list().ok()) {
    Some(list) => list,
    None => return,
  };
  for item in items {
    let compound = match item.compound() {
      Ok(c) => c,
      Err(_) => continue,
    };
    let index = match compound.get("Slot").and_then(|t| t.byte().ok()) {
      Some(i) if i >= 0 => i as usize,
      _ => continue,
    };
    if let Ok(slot) = Slot::from_nbt(compound) {
      store(index, slot);
    }
  }
}

fn write_item_list(slots: &[Slot]) -> Tag {
  let mut items = vec![];
  for (i, slot) in slots.iter().enumerate() {
    if slot.is_empty() {
      continue;
    }
    let mut tag = match slot.to_nbt() {
      Tag::Compound(c) => c,
      _ => unreachable!(),
    };
    tag.insert("Slot".into(), Tag::Byte(i as i8));
    items.push(Tag::Compound(tag));
  }
  Tag::List(items)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn chest_round_trip() {
    let mut chest = TileEntity::new_chest(Pos::new(5, 64, -9));
    if let TileEntity::Chest { inv, .. } = &mut chest {
      *inv.slot_mut(0) = Slot::new(1, 32, 0);
      *inv.slot_mut(26) = Slot::new(4, 7, 0);
    }
    let revived = TileEntity::from_nbt(&chest.to_nbt()).unwrap();
    assert_eq!(revived, chest);
  }

  #[test]
  fn sign_round_trip() {
    let sign = TileEntity::Sign {
      pos:   Pos::new(0, 70, 0),
      lines: ["hello".into(), "".into(), "world".into(), "".into()],
    };
    assert_eq!(TileEntity::from_nbt(&sign.to_nbt()).unwrap(), sign);
  }

  #[test]
  fn unknown_kind_is_skipped() {
    let tag = Tag::new_compound(&[
      ("id", Tag::String("Beacon".into())),
      ("x", Tag::Int(0)),
      ("y", Tag::Int(0)),
      ("z", Tag::Int(0)),
    ]);
    assert!(TileEntity::from_nbt(&tag).is_none());
  }
}
