use crate::{
  item::{Inventory, ItemTypes, Slot},
  proto::WireSlot,
};
use mg_common::nbt::Tag;

pub const ARMOR_SLOTS: usize = 4;
pub const MAIN_SLOTS: usize = 27;
pub const HOTBAR_SLOTS: usize = 9;

// Window 0 slot ranges. Slot 0 is the craft result, 1..=4 the craft grid.
const ARMOR_START: usize = 5;
const MAIN_START: usize = 9;
const HOTBAR_START: usize = 36;
const WINDOW_SLOTS: usize = 45;

/// A player's own inventory: armor, the main grid, and the hotbar. The 2x2
/// craft grid is not simulated; clicks on it are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInventory {
  armor:   Inventory,
  main:    Inventory,
  hotbar:  Inventory,
  holding: usize,
}

impl Default for PlayerInventory {
  fn default() -> Self { PlayerInventory::new() }
}

impl PlayerInventory {
  pub fn new() -> PlayerInventory {
    PlayerInventory {
      armor:   Inventory::new(ARMOR_SLOTS),
      main:    Inventory::new(MAIN_SLOTS),
      hotbar:  Inventory::new(HOTBAR_SLOTS),
      holding: 0,
    }
  }

  /// Chooses the held hotbar slot (0-8). Out of range values have no effect.
  pub fn set_holding(&mut self, slot: i16) -> bool {
    if (0..HOTBAR_SLOTS as i16).contains(&slot) {
      self.holding = slot as usize;
      true
    } else {
      false
    }
  }

  pub fn holding(&self) -> usize { self.holding }
  pub fn held_item(&self) -> Slot { self.hotbar.slot(self.holding) }
  pub fn set_held_item(&mut self, slot: Slot) { *self.hotbar.slot_mut(self.holding) = slot; }

  /// The held slot's index in window 0, for SetSlot packets.
  pub fn held_window_slot(&self) -> i16 { (HOTBAR_START + self.holding) as i16 }

  /// Handles a click in window 0. Returns true if the click was accepted.
  pub fn click(
    &mut self,
    slot: i16,
    cursor: &mut Slot,
    right_click: bool,
    types: &ItemTypes,
  ) -> bool {
    let slot = match usize::try_from(slot) {
      Ok(s) if s < WINDOW_SLOTS => s,
      _ => return false,
    };
    match slot {
      // Crafting is not simulated.
      0..=4 => false,
      s if s < MAIN_START => self.armor.standard_click(s - ARMOR_START, cursor, right_click, types),
      s if s < HOTBAR_START => self.main.standard_click(s - MAIN_START, cursor, right_click, types),
      s => self.hotbar.standard_click(s - HOTBAR_START, cursor, right_click, types),
    }
  }

  /// Distributes a picked-up stack: hotbar first, then the main grid.
  pub fn put_item(&mut self, item: &mut Slot, types: &ItemTypes) {
    self.hotbar.put_item(item, types);
    self.main.put_item(item, types);
  }

  /// All 45 window-0 slots in wire order.
  pub fn wire_slots(&self) -> Vec<WireSlot> {
    let mut out = vec![WireSlot::EMPTY; 5];
    out.extend(self.armor.wire_slots());
    out.extend(self.main.wire_slots());
    out.extend(self.hotbar.wire_slots());
    out
  }

  /// The saved `Inventory` list. Slot numbering follows the player file
  /// format: 0-8 hotbar, 9-35 main, 100-103 armor.
  pub fn to_nbt(&self) -> Tag {
    let mut items = vec![];
    let mut push = |index: i8, slot: Slot| {
      if slot.is_empty() {
        return;
      }
      let mut tag = match slot.to_nbt() {
        Tag::Compound(c) => c,
        _ => unreachable!(),
      };
      tag.insert("Slot".into(), Tag::Byte(index));
      items.push(Tag::Compound(tag));
    };
    for i in 0..HOTBAR_SLOTS {
      push(i as i8, self.hotbar.slot(i));
    }
    for i in 0..MAIN_SLOTS {
      push((9 + i) as i8, self.main.slot(i));
    }
    for i in 0..ARMOR_SLOTS {
      push((100 + i) as i8, self.armor.slot(i));
    }
    Tag::List(items)
  }

  pub fn load_nbt(&mut self, list: &[Tag]) {
    for item in list {
      let compound = match item.compound() {
        Ok(c) => c,
        Err(_) => continue,
      };
      let index = match compound.get("Slot").and_then(|t| t.byte().ok()) {
        Some(i) => i,
        None => continue,
      };
      let slot = match Slot::from_nbt(compound) {
        Ok(s) => s,
        Err(_) => continue,
      };
      match index {
        0..=8 => *self.hotbar.slot_mut(index as usize) = slot,
        9..=35 => *self.main.slot_mut(index as usize - 9) = slot,
        100..=103 => *self.armor.slot_mut(index as usize - 100) = slot,
        _ => {}
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  const STONE: i16 = 1;

  #[test]
  fn holding_selects_hotbar() {
    let mut inv = PlayerInventory::new();
    *inv.hotbar.slot_mut(3) = Slot::new(STONE, 5, 0);
    assert!(inv.set_holding(3));
    assert_eq!(inv.held_item(), Slot::new(STONE, 5, 0));
    assert_eq!(inv.held_window_slot(), 39);
    assert!(!inv.set_holding(9));
    assert!(!inv.set_holding(-1));
    assert_eq!(inv.holding(), 3);
  }

  #[test]
  fn click_routes_by_range() {
    let types = ItemTypes::default_types();
    let mut inv = PlayerInventory::new();
    let mut cursor = Slot::new(STONE, 8, 0);

    // Craft slots reject.
    assert!(!inv.click(0, &mut cursor, false, &types));
    // Main grid slot 9 maps to main[0].
    assert!(inv.click(9, &mut cursor, false, &types));
    assert_eq!(inv.main.slot(0), Slot::new(STONE, 8, 0));
    assert!(cursor.is_empty());
    // Hotbar slot 36 maps to hotbar[0].
    let mut cursor = Slot::new(STONE, 2, 0);
    assert!(inv.click(36, &mut cursor, false, &types));
    assert_eq!(inv.hotbar.slot(0), Slot::new(STONE, 2, 0));
    // Out of range rejects.
    assert!(!inv.click(45, &mut cursor, false, &types));
    assert!(!inv.click(-1, &mut cursor, false, &types));
  }

  #[test]
  fn nbt_round_trip() {
    let mut inv = PlayerInventory::new();
    *inv.hotbar.slot_mut(0) = Slot::new(STONE, 10, 0);
    *inv.main.slot_mut(5) = Slot::new(4, 64, 0);
    *inv.armor.slot_mut(1) = Slot::new(307, 1, 0);

    let mut restored = PlayerInventory::new();
    match inv.to_nbt() {
      Tag::List(items) => restored.load_nbt(&items),
      _ => unreachable!(),
    }
    assert_eq!(restored, inv);
  }

  #[test]
  fn wire_slots_cover_the_window() {
    let inv = PlayerInventory::new();
    assert_eq!(inv.wire_slots().len(), 45);
  }
}
