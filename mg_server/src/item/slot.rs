use super::{ItemTypes, MAX_STACK_DEFAULT};
use crate::proto::WireSlot;
use mg_common::nbt::{Tag, WrongTag};
use std::{collections::HashMap, mem};

/// An inventory cell: an item type, a count, and item data (damage value or
/// variant). A slot is empty when either the count or the type id is zero,
/// and every mutation normalizes empty slots back to all-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slot {
  pub id:    i16,
  pub count: u8,
  pub data:  i16,
}

impl Slot {
  pub const EMPTY: Slot = Slot { id: 0, count: 0, data: 0 };

  pub fn new(id: i16, count: u8, data: i16) -> Slot {
    let mut s = Slot { id, count, data };
    s.normalize();
    s
  }

  pub fn clear(&mut self) { *self = Slot::EMPTY; }

  pub fn is_empty(&self) -> bool { self.count == 0 || self.id == 0 }

  pub fn normalize(&mut self) {
    if self.count == 0 || self.id == 0 {
      *self = Slot::EMPTY;
    }
  }

  pub fn is_same_type(&self, other: &Slot) -> bool {
    self.id == other.id && self.data == other.data
  }

  /// Two slots are compatible if either is empty, or both hold the same item
  /// type and data.
  pub fn is_compatible(&self, other: &Slot) -> bool {
    self.is_empty() || other.is_empty() || self.is_same_type(other)
  }

  /// The stack limit for the item currently in this slot. Empty slots report
  /// the default.
  pub fn max_stack(&self, types: &ItemTypes) -> u8 {
    if self.is_empty() {
      MAX_STACK_DEFAULT
    } else {
      types.max_stack(self.id)
    }
  }

  fn set_count(&mut self, count: u8) {
    self.count = count;
    if self.count == 0 {
      *self = Slot::EMPTY;
    }
  }

  /// Moves as many items as fit from `src` into this slot, limited by the
  /// stack size and type compatibility. Returns true if either slot changed.
  pub fn add(&mut self, src: &mut Slot, types: &ItemTypes) -> bool {
    if src.is_empty() || !self.is_compatible(src) {
      return false;
    }

    let max_stack = src.max_stack(types);
    if self.count >= max_stack {
      return false;
    }

    self.id = src.id;

    let to_transfer = src.count.min(max_stack - self.count);
    if to_transfer == 0 {
      return false;
    }
    self.data = src.data;
    self.set_count(self.count + to_transfer);
    src.set_count(src.count - to_transfer);
    true
  }

  /// Like [`add`](Self::add), but moves either the whole of `src` or nothing.
  pub fn add_whole(&mut self, src: &mut Slot, types: &ItemTypes) -> bool {
    if src.is_empty() || !self.is_compatible(src) {
      return false;
    }
    if src.count.saturating_add(self.count) > types.max_stack(src.id) {
      return false;
    }
    self.add(src, types)
  }

  /// Swaps the contents of two slots. Returns true if they differed.
  pub fn swap(&mut self, other: &mut Slot) -> bool {
    if self == other {
      return false;
    }
    mem::swap(self, other);
    true
  }

  /// Splits this slot in half, the spare item of an odd count going to `dst`.
  /// Does nothing unless `dst` is empty. Returns true if the slots changed.
  pub fn split(&mut self, dst: &mut Slot) -> bool {
    if self.is_empty() || !dst.is_empty() {
      return false;
    }
    dst.id = self.id;
    dst.data = self.data;

    let half = self.count >> 1;
    let odd = self.count & 1;
    dst.set_count(half + odd);
    self.set_count(half);
    true
  }

  /// Moves a single item from `src` into this slot. Does nothing if the types
  /// are incompatible or this slot is full.
  pub fn add_one(&mut self, src: &mut Slot, types: &ItemTypes) -> bool {
    if src.is_empty() {
      return false;
    }
    if !self.is_same_type(src) && !self.is_empty() {
      return false;
    }
    if self.count >= src.max_stack(types) {
      return false;
    }
    self.id = src.id;
    self.data = src.data;
    self.set_count(self.count + 1);
    src.set_count(src.count - 1);
    true
  }

  /// Destroys one item from this slot.
  pub fn decrement(&mut self) -> bool {
    if self.count == 0 {
      return false;
    }
    self.set_count(self.count - 1);
    true
  }

  pub fn to_wire(&self) -> WireSlot {
    if self.is_empty() {
      WireSlot::EMPTY
    } else {
      WireSlot { id: self.id, count: self.count, data: self.data }
    }
  }

  pub fn from_wire(w: WireSlot) -> Slot {
    if w.is_empty() {
      Slot::EMPTY
    } else {
      Slot::new(w.id, w.count, w.data)
    }
  }

  /// The saved form: a compound of `id`, `Count` and `Damage`, plus the
  /// window slot index when stored in an inventory list.
  pub fn to_nbt(&self) -> Tag {
    Tag::new_compound(&[
      ("id", Tag::Short(self.id)),
      ("Count", Tag::Byte(self.count as i8)),
      ("Damage", Tag::Short(self.data)),
    ])
  }

  pub fn from_nbt(tag: &HashMap<String, Tag>) -> Result<Slot, WrongTag> {
    let id = tag.get("id").map(|t| t.short()).transpose()?.unwrap_or(0);
    let count = tag.get("Count").map(|t| t.byte()).transpose()?.unwrap_or(0);
    let data = tag.get("Damage").map(|t| t.short()).transpose()?.unwrap_or(0);
    Ok(Slot::new(id, count as u8, data))
  }
}
