use crate::util::{Buffer, BufferError};
use flate2::read::{GzDecoder, ZlibDecoder};
use std::{collections::HashMap, error::Error, fmt, io, io::Read, string::FromUtf8Error};

use super::{Nbt, ParseError, Tag};

impl fmt::Display for ParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidType(ty) => write!(f, "invalid tag type: {ty}"),
      Self::InvalidString(e) => write!(f, "invalid string: {e}"),
      Self::IO(e) => write!(f, "io error: {e}"),
      Self::BufferError(e) => write!(f, "buffer error: {e}"),
      Self::ListTypeMismatch => write!(f, "list element type does not match declared type"),
    }
  }
}

impl From<FromUtf8Error> for ParseError {
  fn from(e: FromUtf8Error) -> ParseError { ParseError::InvalidString(e) }
}
impl From<io::Error> for ParseError {
  fn from(e: io::Error) -> ParseError { ParseError::IO(e) }
}
impl From<BufferError> for ParseError {
  fn from(e: BufferError) -> ParseError { ParseError::BufferError(e) }
}

impl Error for ParseError {}

impl Nbt {
  /// Deserializes a file read off disk. Saved files are usually gzipped, and
  /// sometimes zlib compressed; this sniffs the gzip magic and falls back to
  /// zlib, then to raw NBT.
  pub fn deserialize_file(buf: Vec<u8>) -> Result<Self, ParseError> {
    if buf.len() >= 2 && buf[0] == 0x1f && buf[1] == 0x8b {
      let mut d: GzDecoder<&[u8]> = GzDecoder::new(buf.as_ref());
      let mut buf = vec![];
      d.read_to_end(&mut buf)?;
      Self::deserialize(buf)
    } else {
      let mut d: ZlibDecoder<&[u8]> = ZlibDecoder::new(buf.as_ref());
      let mut decompressed = vec![];
      match d.read_to_end(&mut decompressed) {
        Ok(_) => Self::deserialize(decompressed),
        Err(_) => Self::deserialize(buf),
      }
    }
  }

  /// Deserializes the given byte array as nbt data.
  pub fn deserialize(buf: Vec<u8>) -> Result<Self, ParseError> {
    Self::deserialize_buf(&mut Buffer::new(&buf))
  }

  /// Deserializes the given buffer as nbt data. This will continue reading
  /// where this buffer is currently placed, and will advance the reader to be
  /// right after the nbt data. If this function returns an error, then the
  /// buffer will be in an undefined state (it will still be safe, but there are
  /// no guarantees as to how far ahead the buffer will have been advanced).
  pub fn deserialize_buf<T: AsRef<[u8]>>(buf: &mut Buffer<T>) -> Result<Self, ParseError> {
    let ty = buf.read_u8()?;
    if ty == 0 {
      Ok(Nbt::empty())
    } else {
      let name = buf.read_str8()?;
      Ok(Nbt::new(&name, Tag::deserialize(ty, buf)?))
    }
  }
}

impl Tag {
  fn deserialize<T: AsRef<[u8]>>(ty: u8, buf: &mut Buffer<T>) -> Result<Self, ParseError> {
    match ty {
      0 => Ok(Self::End),
      1 => Ok(Self::Byte(buf.read_i8()?)),
      2 => Ok(Self::Short(buf.read_i16()?)),
      3 => Ok(Self::Int(buf.read_i32()?)),
      4 => Ok(Self::Long(buf.read_i64()?)),
      5 => Ok(Self::Float(buf.read_f32()?)),
      6 => Ok(Self::Double(buf.read_f64()?)),
      7 => {
        let len = buf.read_i32()?;
        Ok(Self::ByteArr(buf.read_buf(len as usize)?))
      }
      8 => Ok(Self::String(buf.read_str8()?)),
      9 => {
        let inner_ty = buf.read_u8()?;
        let len = buf.read_i32()?;
        if inner_ty == 0 && len > 0 {
          return Err(ParseError::ListTypeMismatch);
        }
        let mut inner = Vec::with_capacity(len.max(0) as usize);
        for _ in 0..len {
          inner.push(Tag::deserialize(inner_ty, buf)?);
        }
        Ok(Self::List(inner))
      }
      10 => {
        let mut inner = HashMap::new();
        loop {
          let ty = buf.read_u8()?;
          if ty == Self::End.ty() {
            break;
          }
          let name = buf.read_str8()?;
          let tag = Tag::deserialize(ty, buf)?;
          inner.insert(name, tag);
        }
        Ok(inner.into())
      }
      11 => {
        let len = buf.read_i32()?;
        let mut inner = Vec::with_capacity(len.max(0) as usize);
        for _ in 0..len {
          inner.push(buf.read_i32()?);
        }
        Ok(Self::IntArray(inner))
      }
      _ => Err(ParseError::InvalidType(ty)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flate2::{write::GzEncoder, Compression};
  use pretty_assertions::assert_eq;
  use std::io::Write;

  fn sample() -> Nbt {
    Nbt::new(
      "hello",
      Tag::new_compound(&[
        ("small", Tag::Byte(5)),
        ("i is short", Tag::Short(7)),
        ("int time", Tag::Int(12)),
        ("mmmm long", Tag::Long(123564536)),
        ("funny number", Tag::Float(123.0)),
        ("big number", Tag::Double(123.0)),
        ("arrrrrrrr", Tag::ByteArr(vec![0, 4, 5, 7, 7, 7, 8, 9])),
        ("big str", Tag::String("hello i am a string".into())),
        ("ints", Tag::IntArray(vec![3, -7, 1 << 20])),
        (
          "str list time",
          Tag::List(vec![
            Tag::String("list elem 1".into()),
            Tag::String("list elem 2".into()),
            Tag::String("list elem 3".into()),
          ]),
        ),
        (
          "nested compound",
          Tag::new_compound(&[
            ("inner 1", Tag::new_compound(&[("num", Tag::Int(5))])),
            ("inner 2", Tag::new_compound(&[("str", Tag::String("words".into()))])),
            ("compound more", Tag::Long(12313)),
          ]),
        ),
      ]),
    )
  }

  #[test]
  fn round_trip() -> Result<(), ParseError> {
    let v = sample();
    let new = Nbt::deserialize(v.serialize())?;
    assert_eq!(new, v);
    Ok(())
  }

  #[test]
  fn round_trip_gzip() -> Result<(), ParseError> {
    let v = sample();
    let mut enc = GzEncoder::new(vec![], Compression::default());
    enc.write_all(&v.serialize()).unwrap();
    let new = Nbt::deserialize_file(enc.finish().unwrap())?;
    assert_eq!(new, v);
    Ok(())
  }

  #[test]
  fn rejects_truncated() {
    let data = sample().serialize();
    for cut in [1, 5, data.len() / 2, data.len() - 1] {
      assert!(Nbt::deserialize(data[..cut].to_vec()).is_err(), "accepted {cut} byte prefix");
    }
  }

  #[test]
  fn rejects_unknown_tag() {
    // A root "compound" with type id 12, which does not exist.
    let data = vec![12, 0, 1, b'x'];
    assert!(matches!(Nbt::deserialize(data), Err(ParseError::InvalidType(12))));
  }

  #[test]
  fn rejects_end_typed_list() {
    // Root compound holding a list with element type End and length 2.
    let mut data = vec![10, 0, 1, b'r'];
    data.extend([9, 0, 1, b'l']); // list named "l"
    data.extend([0]); // element type End
    data.extend([0, 0, 0, 2]); // length 2
    data.extend([0]); // compound end
    assert!(matches!(Nbt::deserialize(data), Err(ParseError::ListTypeMismatch)));
  }

  #[test]
  fn empty_root() {
    assert_eq!(Nbt::deserialize(vec![0]).unwrap(), Nbt::empty());
  }
}
