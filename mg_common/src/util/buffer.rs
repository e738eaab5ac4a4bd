use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use std::{
  error::Error,
  fmt, io,
  io::{Cursor, Read, Write},
  ops::{Deref, DerefMut},
  string::{FromUtf16Error, FromUtf8Error},
};

pub type Result<T> = std::result::Result<T, BufferError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Reading,
  Writing,
}

use Mode::Reading;

#[derive(Debug)]
pub struct BufferError {
  err:  BufferErrorKind,
  pos:  u64,
  mode: Mode,
}

impl fmt::Display for BufferError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    if self.mode == Mode::Reading {
      write!(f, "error while reading from buffer at index {}: {}", self.pos, self.err)
    } else {
      write!(f, "error while writing to buffer at index {}: {}", self.pos, self.err)
    }
  }
}

#[derive(Debug)]
pub enum BufferErrorKind {
  IO(io::Error),
  FromUtf8Error(FromUtf8Error),
  FromUtf16Error(FromUtf16Error),
  StringTooLong { len: u64, max: u64 },
  NegativeLen(i32),
  Expected(Vec<u8>, Vec<u8>),
}

impl fmt::Display for BufferErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Self::IO(e) => write!(f, "{}", e),
      Self::FromUtf8Error(e) => write!(f, "{}", e),
      Self::FromUtf16Error(e) => write!(f, "{}", e),
      Self::StringTooLong { len, max } => {
        write!(f, "string is `{}` characters, longer than max `{}`", len, max)
      }
      Self::NegativeLen(len) => write!(f, "len `{}` is negative", len),
      Self::Expected(expected, got) => write!(f, "expected bytes {:x?}, got {:x?}", expected, got),
    }
  }
}

impl Error for BufferError {}

impl BufferError {
  /// Returns true if this error is from reading past the end of the buffer.
  /// When parsing a frame out of a socket buffer, this means "wait for more
  /// bytes" rather than "the peer sent garbage".
  pub fn is_eof(&self) -> bool {
    matches!(&self.err, BufferErrorKind::IO(e) if e.kind() == io::ErrorKind::UnexpectedEof)
  }
}

impl From<io::Error> for BufferErrorKind {
  fn from(e: io::Error) -> Self { BufferErrorKind::IO(e) }
}
impl From<FromUtf8Error> for BufferErrorKind {
  fn from(e: FromUtf8Error) -> Self { BufferErrorKind::FromUtf8Error(e) }
}
impl From<FromUtf16Error> for BufferErrorKind {
  fn from(e: FromUtf16Error) -> Self { BufferErrorKind::FromUtf16Error(e) }
}

/// A big-endian byte cursor. All of the protocol and the saved-world formats
/// are big endian, so every multi-byte read/write here is big endian.
#[derive(Debug)]
pub struct Buffer<T> {
  data: Cursor<T>,
}

macro_rules! add_read {
  ($fn: ident, $ty: ty) => {
    pub fn $fn(&mut self) -> Result<$ty> {
      self.data.$fn::<BigEndian>().map_err(|e| self.err(e, Reading))
    }
  };
}
// The same as add_read(), but with no type parameter
macro_rules! add_read_byte {
  ($fn: ident, $ty: ty) => {
    pub fn $fn(&mut self) -> Result<$ty> { self.data.$fn().map_err(|e| self.err(e, Reading)) }
  };
}

macro_rules! add_write {
  ($fn: ident, $ty: ty) => {
    pub fn $fn(&mut self, v: $ty) {
      self.data.$fn::<BigEndian>(v).expect("could not write to buffer")
    }
  };
}
// The same as add_write(), but with no type parameter
macro_rules! add_write_byte {
  ($fn: ident, $ty: ty) => {
    pub fn $fn(&mut self, v: $ty) { self.data.$fn(v).expect("could not write to buffer") }
  };
}

impl<T> Buffer<T> {
  pub fn new(data: T) -> Self { Buffer { data: Cursor::new(data) } }
  pub fn new_index(data: T, index: usize) -> Self {
    let mut cursor = Cursor::new(data);
    cursor.set_position(index as u64);
    Buffer { data: cursor }
  }

  pub fn err(&self, e: impl Into<BufferErrorKind>, mode: Mode) -> BufferError {
    BufferError { err: e.into(), pos: self.data.position(), mode }
  }

  pub fn into_inner(self) -> T { self.data.into_inner() }
}

impl<T> Buffer<T>
where
  T: AsRef<[u8]>,
{
  pub fn len(&self) -> usize { self.data.get_ref().as_ref().len() }
  pub fn is_empty(&self) -> bool { self.len() == 0 }
  pub fn index(&self) -> usize { self.data.position() as usize }
  pub fn remaining(&self) -> usize { self.len().saturating_sub(self.index()) }

  pub fn read_bool(&mut self) -> Result<bool> { Ok(self.read_u8()? != 0) }
  add_read_byte!(read_u8, u8);
  add_read!(read_u16, u16);
  add_read!(read_u32, u32);
  add_read!(read_u64, u64);
  add_read_byte!(read_i8, i8);
  add_read!(read_i16, i16);
  add_read!(read_i32, i32);
  add_read!(read_i64, i64);

  add_read!(read_f32, f32);
  add_read!(read_f64, f64);

  /// Expects the next bytes. Returns an error if the next bytes do not match.
  /// This will read the exact number of bytes that are passed in.
  pub fn expect(&mut self, expected: &[u8]) -> Result<()> {
    let got = self.read_buf(expected.len())?;
    if got == expected {
      Ok(())
    } else {
      Err(self.err(BufferErrorKind::Expected(expected.to_vec(), got), Reading))
    }
  }

  pub fn read_buf(&mut self, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; len];
    self.data.read_exact(&mut buf).map_err(|e| self.err(e, Reading))?;
    Ok(buf)
  }

  /// Reads a length-prefixed UCS-2 string, as used by the client protocol.
  /// The prefix is a big-endian u16 counting 16-bit code units. If the length
  /// is longer than `max_len`, this fails with an error.
  pub fn read_str16(&mut self, max_len: u64) -> Result<String> {
    let len = self.read_u16()? as u64;
    if len > max_len {
      return Err(self.err(BufferErrorKind::StringTooLong { len, max: max_len }, Reading));
    }
    let mut units = Vec::with_capacity(len as usize);
    for _ in 0..len {
      units.push(self.read_u16()?);
    }
    String::from_utf16(&units).map_err(|e| self.err(e, Reading))
  }

  /// Reads a length-prefixed UTF-8 string with a big-endian u16 byte count.
  /// This is the form used inside NBT payloads.
  pub fn read_str8(&mut self) -> Result<String> {
    let len = self.read_u16()?;
    let vec = self.read_buf(len as usize)?;
    String::from_utf8(vec).map_err(|e| self.err(e, Reading))
  }
}

impl<T> Buffer<T>
where
  Cursor<T>: io::Write,
{
  /// Advances the cursor `amount` bytes, without modifying the data.
  pub fn skip(&mut self, amount: u64) {
    let new_pos = self.data.position() + amount;
    self.data.set_position(new_pos);
  }

  pub fn write_bool(&mut self, v: bool) {
    if v {
      self.write_u8(1);
    } else {
      self.write_u8(0);
    }
  }
  add_write_byte!(write_u8, u8);
  add_write!(write_u16, u16);
  add_write!(write_u32, u32);
  add_write!(write_u64, u64);
  add_write_byte!(write_i8, i8);
  add_write!(write_i16, i16);
  add_write!(write_i32, i32);
  add_write!(write_i64, i64);

  add_write!(write_f32, f32);
  add_write!(write_f64, f64);

  /// This doesn't return a result, as the only thing that could go wrong is a
  /// oom error, which isn't even returned as an error.
  pub fn write_buf(&mut self, v: &[u8]) { self.data.write_all(v).unwrap(); }

  /// Writes a UCS-2 string with a big-endian u16 code-unit count prefix.
  pub fn write_str16(&mut self, v: &str) {
    let units: Vec<u16> = v.encode_utf16().collect();
    self.write_u16(units.len() as u16);
    for u in units {
      self.write_u16(u);
    }
  }

  /// Writes a UTF-8 string with a big-endian u16 byte count prefix.
  pub fn write_str8(&mut self, v: &str) {
    self.write_u16(v.len() as u16);
    self.write_buf(v.as_bytes());
  }
}

impl<T> Deref for Buffer<T> {
  type Target = T;

  fn deref(&self) -> &Self::Target { self.data.get_ref() }
}

impl<T> DerefMut for Buffer<T> {
  fn deref_mut(&mut self) -> &mut Self::Target { self.data.get_mut() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  pub fn str16_round_trip() {
    let mut data = vec![];
    let mut buf = Buffer::new(&mut data);
    buf.write_str16("username");
    assert_eq!(
      data,
      b"\x00\x08\x00u\x00s\x00e\x00r\x00n\x00a\x00m\x00e".to_vec(),
    );

    let mut buf = Buffer::new(&data);
    assert_eq!(buf.read_str16(64).unwrap(), "username");
  }

  #[test]
  pub fn str16_non_ascii() {
    let mut data = vec![];
    let mut buf = Buffer::new(&mut data);
    buf.write_str16("üßərnáme");
    assert_eq!(
      data,
      b"\x00\x08\x00\xfc\x00\xdf\x02\x59\x00r\x00n\x00\xe1\x00m\x00e".to_vec(),
    );

    let mut buf = Buffer::new(&data);
    assert_eq!(buf.read_str16(64).unwrap(), "üßərnáme");
  }

  #[test]
  pub fn str16_too_long() {
    let data = b"\x00\x09\x00u".to_vec();
    let mut buf = Buffer::new(&data);
    assert!(buf.read_str16(8).is_err());
  }

  #[test]
  pub fn short_read() {
    let data = vec![0, 1];
    let mut buf = Buffer::new(&data);
    assert!(buf.read_i32().is_err());
  }

  #[test]
  pub fn expect() {
    let data = vec![1, 2, 3];
    let mut buf = Buffer::new(&data);
    assert!(buf.expect(&[1, 2]).is_ok());
    assert!(buf.expect(&[4]).is_err());
  }
}
