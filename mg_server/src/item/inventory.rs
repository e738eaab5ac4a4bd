use super::{ItemTypes, Slot};
use crate::proto::WireSlot;

/// A fixed-size run of slots. Player inventory sections, chests and furnaces
/// are all views over one of these.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
  slots: Vec<Slot>,
}

impl Inventory {
  pub fn new(size: usize) -> Inventory { Inventory { slots: vec![Slot::EMPTY; size] } }

  pub fn num_slots(&self) -> usize { self.slots.len() }
  pub fn slot(&self, i: usize) -> Slot { self.slots[i] }
  pub fn slot_mut(&mut self, i: usize) -> &mut Slot { &mut self.slots[i] }
  pub fn slots(&self) -> &[Slot] { &self.slots }

  pub fn wire_slots(&self) -> Vec<WireSlot> { self.slots.iter().map(|s| s.to_wire()).collect() }

  /// The standard window click. Left click merges the cursor into the slot
  /// (or swaps, for incompatible stacks); right click with an empty cursor
  /// takes the larger half, and otherwise places a single item. Returns true
  /// if anything changed.
  pub fn standard_click(
    &mut self,
    i: usize,
    cursor: &mut Slot,
    right_click: bool,
    types: &ItemTypes,
  ) -> bool {
    let slot = &mut self.slots[i];
    if right_click {
      if cursor.is_empty() {
        slot.split(cursor)
      } else {
        slot.add_one(cursor, types)
      }
    } else if cursor.is_empty() || slot.is_compatible(cursor) {
      if cursor.is_empty() {
        slot.swap(cursor)
      } else {
        slot.add(cursor, types)
      }
    } else {
      slot.swap(cursor)
    }
  }

  /// Distributes an item stack into this inventory: first topping up stacks
  /// of the same type, then filling empty slots. The source slot is drained
  /// in place and may come out non-empty if the inventory fills up.
  pub fn put_item(&mut self, item: &mut Slot, types: &ItemTypes) {
    for slot in &mut self.slots {
      if item.is_empty() {
        return;
      }
      if !slot.is_empty() && slot.is_same_type(item) {
        slot.add(item, types);
      }
    }
    for slot in &mut self.slots {
      if item.is_empty() {
        return;
      }
      if slot.is_empty() {
        slot.add(item, types);
      }
    }
  }

  /// Returns true if at least one item from the stack would fit somewhere.
  pub fn can_take_item(&self, item: &Slot, types: &ItemTypes) -> bool {
    if item.is_empty() {
      return false;
    }
    self.slots.iter().any(|slot| {
      slot.is_empty() || (slot.is_same_type(item) && slot.count < slot.max_stack(types))
    })
  }

  /// Moves one item from slot `i` into `into`.
  pub fn take_one_item(&mut self, i: usize, into: &mut Slot, types: &ItemTypes) {
    into.add_one(&mut self.slots[i], types);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  const STONE: i16 = 1;
  const DIRT: i16 = 3;

  #[test]
  fn left_click_picks_up_and_puts_down() {
    let types = ItemTypes::default_types();
    let mut inv = Inventory::new(9);
    *inv.slot_mut(0) = Slot::new(STONE, 10, 0);
    let mut cursor = Slot::EMPTY;

    assert!(inv.standard_click(0, &mut cursor, false, &types));
    assert_eq!(cursor, Slot::new(STONE, 10, 0));
    assert!(inv.slot(0).is_empty());

    assert!(inv.standard_click(3, &mut cursor, false, &types));
    assert_eq!(inv.slot(3), Slot::new(STONE, 10, 0));
    assert!(cursor.is_empty());
  }

  #[test]
  fn left_click_merges_compatible() {
    let types = ItemTypes::default_types();
    let mut inv = Inventory::new(9);
    *inv.slot_mut(0) = Slot::new(STONE, 60, 0);
    let mut cursor = Slot::new(STONE, 10, 0);
    assert!(inv.standard_click(0, &mut cursor, false, &types));
    assert_eq!(inv.slot(0).count, 64);
    assert_eq!(cursor.count, 6);
  }

  #[test]
  fn left_click_swaps_incompatible() {
    let types = ItemTypes::default_types();
    let mut inv = Inventory::new(9);
    *inv.slot_mut(0) = Slot::new(STONE, 5, 0);
    let mut cursor = Slot::new(DIRT, 7, 0);
    assert!(inv.standard_click(0, &mut cursor, false, &types));
    assert_eq!(inv.slot(0), Slot::new(DIRT, 7, 0));
    assert_eq!(cursor, Slot::new(STONE, 5, 0));
  }

  #[test]
  fn right_click_splits_then_places_one() {
    let types = ItemTypes::default_types();
    let mut inv = Inventory::new(9);
    *inv.slot_mut(0) = Slot::new(STONE, 9, 0);
    let mut cursor = Slot::EMPTY;

    assert!(inv.standard_click(0, &mut cursor, true, &types));
    assert_eq!(cursor.count, 5);
    assert_eq!(inv.slot(0).count, 4);

    assert!(inv.standard_click(1, &mut cursor, true, &types));
    assert_eq!(inv.slot(1), Slot::new(STONE, 1, 0));
    assert_eq!(cursor.count, 4);
  }

  #[test]
  fn put_item_tops_up_then_fills() {
    let types = ItemTypes::default_types();
    let mut inv = Inventory::new(3);
    *inv.slot_mut(1) = Slot::new(STONE, 60, 0);
    let mut item = Slot::new(STONE, 10, 0);
    inv.put_item(&mut item, &types);
    assert!(item.is_empty());
    assert_eq!(inv.slot(1).count, 64);
    assert_eq!(inv.slot(0), Slot::new(STONE, 6, 0));
  }

  #[test]
  fn put_item_overflow_left_in_source() {
    let types = ItemTypes::default_types();
    let mut inv = Inventory::new(1);
    *inv.slot_mut(0) = Slot::new(DIRT, 64, 0);
    let mut item = Slot::new(STONE, 10, 0);
    inv.put_item(&mut item, &types);
    assert_eq!(item.count, 10);
    assert!(!inv.can_take_item(&item, &types));
  }
}
