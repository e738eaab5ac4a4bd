//! Item types and inventory slots.

mod inventory;
mod slot;

pub use inventory::Inventory;
pub use slot::Slot;

use serde::Deserialize;
use std::{collections::HashMap, io::Read};

/// The stack limit assumed for empty slots and items with no explicit limit.
pub const MAX_STACK_DEFAULT: u8 = 64;

#[derive(Debug, Clone)]
pub struct ItemType {
  pub id:        i16,
  pub name:      String,
  pub max_stack: u8,
}

/// The item catalog. Built once at startup and passed by reference; nothing
/// mutates it afterwards.
#[derive(Debug)]
pub struct ItemTypes {
  types: HashMap<i16, ItemType>,
}

#[derive(Deserialize)]
struct ItemTypeDef {
  name:      String,
  #[serde(default = "default_max_stack")]
  max_stack: u8,
}

fn default_max_stack() -> u8 { MAX_STACK_DEFAULT }

impl ItemTypes {
  /// Loads item definitions from JSON: a map of numeric id strings to
  /// `{"name", "max_stack"}` objects.
  pub fn from_json(reader: impl Read) -> serde_json::Result<ItemTypes> {
    let defs: HashMap<String, ItemTypeDef> = serde_json::from_reader(reader)?;
    let mut types = HashMap::with_capacity(defs.len());
    for (id_str, def) in defs {
      let id: i16 = match id_str.parse() {
        Ok(v) => v,
        Err(_) => {
          warn!("ignoring item def with non-numeric id {id_str:?}");
          continue;
        }
      };
      types.insert(id, ItemType { id, name: def.name, max_stack: def.max_stack });
    }
    Ok(ItemTypes { types })
  }

  /// The built-in catalog, used when no item file is configured. Covers the
  /// block and item ids the server itself places, drops, or interacts with.
  pub fn default_types() -> ItemTypes {
    let defs: &[(i16, &str, u8)] = &[
      (1, "stone", 64),
      (2, "grass", 64),
      (3, "dirt", 64),
      (4, "cobblestone", 64),
      (5, "planks", 64),
      (12, "sand", 64),
      (13, "gravel", 64),
      (17, "log", 64),
      (20, "glass", 64),
      (50, "torch", 64),
      (54, "chest", 64),
      (58, "workbench", 64),
      (61, "furnace", 64),
      (63, "sign_post", 64),
      (257, "iron_pickaxe", 1),
      (267, "iron_sword", 1),
      (323, "sign", 1),
    ];
    ItemTypes {
      types: defs
        .iter()
        .map(|&(id, name, max_stack)| (id, ItemType { id, name: name.into(), max_stack }))
        .collect(),
    }
  }

  pub fn get(&self, id: i16) -> Option<&ItemType> { self.types.get(&id) }

  /// The stack limit for an item id. Unknown ids get the default, so items
  /// from newer worlds still stack somewhat sensibly.
  pub fn max_stack(&self, id: i16) -> u8 {
    self.types.get(&id).map(|t| t.max_stack).unwrap_or(MAX_STACK_DEFAULT)
  }
}
