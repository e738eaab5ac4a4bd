//! Named binary tags. This is the hierarchical format used for everything
//! saved to disk: chunks, player files, and the world's `level.dat`.

mod deserialize;
mod serialize;

use crate::util::BufferError;
use std::{collections::HashMap, error::Error, fmt, string::FromUtf8Error};

/// A parsed NBT file or blob. The root of a file is always a named compound.
#[derive(Debug, Clone, PartialEq)]
pub struct Nbt {
  name: String,
  tag:  Tag,
}

/// A single tag. Compounds are unordered, so two trees compare equal even if
/// their fields were written in a different order.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
  End,
  Byte(i8),
  Short(i16),
  Int(i32),
  Long(i64),
  Float(f32),
  Double(f64),
  ByteArr(Vec<u8>),
  String(String),
  List(Vec<Tag>),
  Compound(HashMap<String, Tag>),
  IntArray(Vec<i32>),
}

#[derive(Debug)]
pub enum ParseError {
  InvalidType(u8),
  InvalidString(FromUtf8Error),
  BufferError(BufferError),
  ListTypeMismatch,
  IO(std::io::Error),
}

/// Returned by the typed accessors when a tag holds a different variant than
/// the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongTag {
  pub expected: &'static str,
  pub got:      &'static str,
}

impl fmt::Display for WrongTag {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "wrong tag: expected {}, got {}", self.expected, self.got)
  }
}

impl Error for WrongTag {}

impl Nbt {
  pub fn new(name: &str, tag: Tag) -> Self { Nbt { name: name.into(), tag } }
  pub const fn empty() -> Self { Nbt { name: String::new(), tag: Tag::End } }

  pub fn name(&self) -> &str { &self.name }
  pub fn tag(&self) -> &Tag { &self.tag }
  pub fn into_tag(self) -> Tag { self.tag }

  /// Looks up a compound child of the root tag.
  pub fn get(&self, name: &str) -> Option<&Tag> { self.tag.get(name) }
}

impl From<HashMap<String, Tag>> for Tag {
  fn from(v: HashMap<String, Tag>) -> Self { Tag::Compound(v) }
}

macro_rules! accessor {
  ($name: ident, $variant: ident, $ty: ty, borrowed) => {
    pub fn $name(&self) -> Result<&$ty, WrongTag> {
      match self {
        Self::$variant(v) => Ok(v),
        _ => Err(WrongTag { expected: stringify!($variant), got: self.ty_name() }),
      }
    }
  };
  ($name: ident, $variant: ident, $ty: ty) => {
    pub fn $name(&self) -> Result<$ty, WrongTag> {
      match self {
        Self::$variant(v) => Ok(*v),
        _ => Err(WrongTag { expected: stringify!($variant), got: self.ty_name() }),
      }
    }
  };
}

impl Tag {
  /// Builds a compound from name/tag pairs. This is mostly useful in tests
  /// and in chunk/entity serializers, where the set of fields is fixed.
  pub fn new_compound(fields: &[(&str, Tag)]) -> Self {
    Tag::Compound(fields.iter().map(|(name, tag)| (name.to_string(), tag.clone())).collect())
  }

  /// Returns the name of this variant, for error messages.
  pub fn ty_name(&self) -> &'static str {
    match self {
      Self::End => "End",
      Self::Byte(_) => "Byte",
      Self::Short(_) => "Short",
      Self::Int(_) => "Int",
      Self::Long(_) => "Long",
      Self::Float(_) => "Float",
      Self::Double(_) => "Double",
      Self::ByteArr(_) => "ByteArr",
      Self::String(_) => "String",
      Self::List(_) => "List",
      Self::Compound(_) => "Compound",
      Self::IntArray(_) => "IntArray",
    }
  }

  accessor!(byte, Byte, i8);
  accessor!(short, Short, i16);
  accessor!(int, Int, i32);
  accessor!(long, Long, i64);
  accessor!(float, Float, f32);
  accessor!(double, Double, f64);
  accessor!(byte_arr, ByteArr, Vec<u8>, borrowed);
  accessor!(string, String, String, borrowed);
  accessor!(list, List, Vec<Tag>, borrowed);
  accessor!(compound, Compound, HashMap<String, Tag>, borrowed);
  accessor!(int_arr, IntArray, Vec<i32>, borrowed);

  /// Looks up a child of a compound. Returns `None` for missing fields and
  /// for non-compound tags; callers decide whether that is a default or an
  /// error.
  pub fn get(&self, name: &str) -> Option<&Tag> {
    match self {
      Self::Compound(v) => v.get(name),
      _ => None,
    }
  }
}
