//! This module implements the lowest layer: moving runs of 32/64-bit
//! integers and floats between a stream and memory, in ASCII or in binary of
//! either byte order. A "skip" only moves the stream position.

use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::Scalar;
use num::Zero;

use crate::datatype::{ByteOrder, ScalarType};
use crate::error::*;

/// The element types a caller can read into or write from.
pub trait LataScalar: Scalar + Copy + num::NumCast + Zero + Display {
  /// Whether this is an integer type.
  const IS_INT: bool;
  /// The on-disk type with the same width.
  const NATIVE: ScalarType;
}

impl LataScalar for i32 {
  const IS_INT: bool = true;
  const NATIVE: ScalarType = ScalarType::Int32;
}

impl LataScalar for i64 {
  const IS_INT: bool = true;
  const NATIVE: ScalarType = ScalarType::Int64;
}

impl LataScalar for f32 {
  const IS_INT: bool = false;
  const NATIVE: ScalarType = ScalarType::Real32;
}

impl LataScalar for f64 {
  const IS_INT: bool = false;
  const NATIVE: ScalarType = ScalarType::Real64;
}

/// A readable data file: a real file, or the in-memory buffer.
#[derive(derive_more::From)]
pub(crate) enum DataStream<'a> {
  /// A file on disk.
  Disk(BufReader<File>),
  /// The in-memory pseudo-file.
  Memory(Cursor<&'a [u8]>)
}

impl Read for DataStream<'_> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    return match self {
      Self::Disk(r) => r.read(buf),
      Self::Memory(r) => r.read(buf),
    };
  }
}

impl BufRead for DataStream<'_> {
  fn fill_buf(&mut self) -> io::Result<&[u8]> {
    return match self {
      Self::Disk(r) => r.fill_buf(),
      Self::Memory(r) => r.fill_buf(),
    };
  }

  fn consume(&mut self, amt: usize) {
    match self {
      Self::Disk(r) => r.consume(amt),
      Self::Memory(r) => r.consume(amt),
    }
  }
}

impl Seek for DataStream<'_> {
  fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
    return match self {
      Self::Disk(r) => r.seek(pos),
      Self::Memory(r) => r.seek(pos),
    };
  }
}

/// A writable data file: a real file, or the in-memory buffer.
#[derive(derive_more::From)]
pub(crate) enum DataSink<'a> {
  /// A file on disk, positioned at its end.
  Disk(BufWriter<File>),
  /// The in-memory pseudo-file; writes append.
  Memory(&'a mut Vec<u8>)
}

impl DataSink<'_> {
  /// Current byte position, i.e. where the next write lands.
  pub(crate) fn position(&mut self) -> io::Result<u64> {
    return match self {
      Self::Disk(w) => w.stream_position(),
      Self::Memory(v) => Ok(v.len() as u64),
    };
  }
}

impl Write for DataSink<'_> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    return match self {
      Self::Disk(w) => w.write(buf),
      Self::Memory(v) => v.write(buf),
    };
  }

  fn flush(&mut self) -> io::Result<()> {
    return match self {
      Self::Disk(w) => w.flush(),
      Self::Memory(_) => Ok(()),
    };
  }
}

/// Wraps a stream with an encoding and the file name for diagnostics.
pub struct Codec<S> {
  /// The underlying stream.
  stream: S,
  /// File name, for error messages.
  filename: String,
  /// Current byte order.
  byte_order: ByteOrder,
  /// Current element type.
  scalar_type: ScalarType
}

impl<S> Codec<S> {
  /// Wraps a stream. The encoding starts unknown.
  pub fn new<N: Into<String>>(stream: S, filename: N) -> Self {
    return Self {
      stream,
      filename: filename.into(),
      byte_order: ByteOrder::Unknown,
      scalar_type: ScalarType::Unknown
    };
  }

  /// Sets the byte order and element type for the next transfers.
  pub fn set_encoding(&mut self, byte_order: ByteOrder, scalar_type: ScalarType) {
    self.byte_order = byte_order;
    self.scalar_type = scalar_type;
  }

  /// The current byte order.
  pub fn byte_order(&self) -> ByteOrder {
    return self.byte_order;
  }

  /// The current element type.
  pub fn scalar_type(&self) -> ScalarType {
    return self.scalar_type;
  }

  /// The file name this codec reports in errors.
  pub fn filename(&self) -> &str {
    return &self.filename;
  }

  /// Unwraps the stream.
  pub fn into_inner(self) -> S {
    return self.stream;
  }

  /// Maps an i/o failure to a data error with context.
  fn io_err(&self, e: io::Error, count: usize) -> LataError {
    return LataError::from_io(e, &self.filename, count);
  }

  /// Checks the encoding is usable.
  fn check_encoding(&self, ty: ScalarType) -> LataResult<u64> {
    if self.byte_order.is_unknown() {
      return Err(LataError::data(format!(
        "no byte order set for file \"{}\"", self.filename
      )));
    }
    return ty.size_bytes().ok_or_else(|| LataError::data(format!(
      "no data type set for file \"{}\"", self.filename
    )));
  }
}

/// Converts a decoded integer to the caller's type, refusing to lose bits.
fn narrow_int<T: LataScalar>(v: i64, filename: &str) -> LataResult<T> {
  if !T::IS_INT {
    return Err(LataError::data(format!(
      "file \"{}\" holds integers but a float array was requested", filename
    )));
  }
  let t: Option<T> = num::cast(v);
  return match t {
    Some(t) if num::cast::<T, i64>(t) == Some(v) => Ok(t),
    _ => Err(LataError::new(
      ErrorKind::IntegerOverflow,
      format!("value {} from file \"{}\" does not fit", v, filename)
    ))
  };
}

/// Converts a decoded float to the caller's type.
fn narrow_real<T: LataScalar>(v: f64, filename: &str) -> LataResult<T> {
  if T::IS_INT {
    return Err(LataError::data(format!(
      "file \"{}\" holds floats but an integer array was requested", filename
    )));
  }
  let t: Option<T> = num::cast(v);
  return t.ok_or_else(|| LataError::data(format!(
    "value {} from file \"{}\" is not representable", v, filename
  )));
}

/// Widens a caller value to an i64 for writing as an integer.
fn widen_int<T: LataScalar>(v: T, filename: &str) -> LataResult<i64> {
  if !T::IS_INT {
    return Err(LataError::data(format!(
      "cannot write floats to integer data in file \"{}\"", filename
    )));
  }
  return num::cast::<T, i64>(v).ok_or_else(|| LataError::new(
    ErrorKind::IntegerOverflow,
    format!("value {} does not fit in 64 bits", v)
  ));
}

/// Narrows an i64 to an i32 for writing, refusing to lose bits.
fn to_i32(v: i64, filename: &str) -> LataResult<i32> {
  return i32::try_from(v).map_err(|_| LataError::new(
    ErrorKind::IntegerOverflow,
    format!("value {} does not fit in INT32 data for file \"{}\"", v, filename)
  ));
}

/// Widens a caller value to an f64 for writing as a float.
fn widen_real<T: LataScalar>(v: T, filename: &str) -> LataResult<f64> {
  if T::IS_INT {
    return Err(LataError::data(format!(
      "cannot write integers to float data in file \"{}\"", filename
    )));
  }
  return num::cast::<T, f64>(v).ok_or_else(|| LataError::data(format!(
    "value {} cannot be written as a float", v
  )));
}

impl<S: BufRead + Seek> Codec<S> {
  /// Current byte position of the stream.
  pub fn position(&mut self) -> LataResult<u64> {
    let pos = self.stream.stream_position();
    return pos.map_err(|e| self.io_err(e, 0));
  }

  /// Moves the stream to an absolute byte position.
  pub fn seek_to(&mut self, pos: u64) -> LataResult<()> {
    let res = self.stream.seek(SeekFrom::Start(pos));
    return res.map(|_| ()).map_err(|e| self.io_err(e, 0));
  }

  /// Reads the next whitespace-delimited word.
  fn next_word(&mut self) -> LataResult<String> {
    let mut word: Vec<u8> = Vec::new();
    loop {
      let (used, done) = {
        let buf = match self.stream.fill_buf() {
          Ok(buf) => buf,
          Err(e) => return Err(LataError::from_io(e, &self.filename, 1))
        };
        if buf.is_empty() {
          break;
        }
        let mut used = 0;
        let mut done = false;
        for &b in buf {
          used += 1;
          if b.is_ascii_whitespace() {
            if !word.is_empty() {
              done = true;
              break;
            }
          } else {
            word.push(b);
          }
        }
        (used, done)
      };
      self.stream.consume(used);
      if done {
        break;
      }
    }
    if word.is_empty() {
      return Err(LataError::data(format!(
        "unexpected end of file \"{}\"", self.filename
      )));
    }
    return Ok(String::from_utf8_lossy(&word).into_owned());
  }

  /// Reads a string: a word in ASCII mode, a NUL-terminated run in binary.
  pub fn read_string(&mut self) -> LataResult<String> {
    if matches!(self.byte_order, ByteOrder::Ascii) {
      return self.next_word();
    }
    let mut buf: Vec<u8> = Vec::new();
    let res = self.stream.read_until(0, &mut buf);
    res.map_err(|e| self.io_err(e, 1))?;
    if buf.pop() != Some(0) {
      return Err(LataError::data(format!(
        "unterminated string in file \"{}\"", self.filename
      )));
    }
    return Ok(String::from_utf8_lossy(&buf).into_owned());
  }

  /// Reads `n` values with the current encoding.
  pub fn read<T: LataScalar>(&mut self, n: usize) -> LataResult<Vec<T>> {
    return self.read_as(self.scalar_type, n);
  }

  /// Skips `n` values with the current encoding.
  pub fn skip(&mut self, n: usize) -> LataResult<()> {
    return self.skip_as(self.scalar_type, n);
  }

  /// Reads `n` values stored as `ty`, converting them to `T`.
  pub fn read_as<T: LataScalar>(
    &mut self,
    ty: ScalarType,
    n: usize
  ) -> LataResult<Vec<T>> {
    self.check_encoding(ty)?;
    let mut out: Vec<T> = Vec::with_capacity(n);
    match self.byte_order {
      ByteOrder::Ascii => {
        for _ in 0..n {
          let w = self.next_word()?;
          out.push(self.parse_word(ty, &w)?);
        }
      },
      ByteOrder::LittleEndian => {
        self.read_binary::<LittleEndian, T>(ty, n, &mut out)?;
      },
      ByteOrder::BigEndian => self.read_binary::<BigEndian, T>(ty, n, &mut out)?,
      ByteOrder::Unknown => unreachable!("checked above")
    }
    return Ok(out);
  }

  /// Skips `n` values stored as `ty`: a relative seek in binary mode, token
  /// consumption in ASCII mode.
  pub fn skip_as(&mut self, ty: ScalarType, n: usize) -> LataResult<()> {
    let size = self.check_encoding(ty)?;
    if n == 0 {
      return Ok(());
    }
    if matches!(self.byte_order, ByteOrder::Ascii) {
      for _ in 0..n {
        self.next_word()?;
      }
      return Ok(());
    }
    let delta = i64::try_from(size * n as u64).map_err(|_| LataError::data(
      format!("cannot skip {} values in file \"{}\"", n, self.filename)
    ))?;
    let res = self.stream.seek(SeekFrom::Current(delta));
    return res.map(|_| ()).map_err(|e| self.io_err(e, n));
  }

  /// Parses one ASCII token as a value of type `ty`.
  fn parse_word<T: LataScalar>(&self, ty: ScalarType, w: &str) -> LataResult<T> {
    let bad = || LataError::data(format!(
      "bad {} token \"{}\" in file \"{}\"", ty, w, self.filename
    ));
    return match ty {
      ScalarType::Int32 | ScalarType::Int64 => {
        let v = w.parse::<i64>().map_err(|_| bad())?;
        if matches!(ty, ScalarType::Int32) && i32::try_from(v).is_err() {
          return Err(bad());
        }
        narrow_int(v, &self.filename)
      },
      ScalarType::Real32 => {
        let v = w.replace(['D', 'd'], "E").parse::<f32>().map_err(|_| bad())?;
        narrow_real(f64::from(v), &self.filename)
      },
      ScalarType::Real64 => {
        let v = w.replace(['D', 'd'], "E").parse::<f64>().map_err(|_| bad())?;
        narrow_real(v, &self.filename)
      },
      ScalarType::Unknown => Err(bad())
    };
  }

  /// Reads binary values in byte order `B`.
  fn read_binary<B: byteorder::ByteOrder, T: LataScalar>(
    &mut self,
    ty: ScalarType,
    n: usize,
    out: &mut Vec<T>
  ) -> LataResult<()> {
    match ty {
      ScalarType::Int32 => {
        let mut buf = vec![0i32; n];
        let res = self.stream.read_i32_into::<B>(&mut buf);
        res.map_err(|e| self.io_err(e, n))?;
        for v in buf {
          out.push(narrow_int(i64::from(v), &self.filename)?);
        }
      },
      ScalarType::Int64 => {
        let mut buf = vec![0i64; n];
        let res = self.stream.read_i64_into::<B>(&mut buf);
        res.map_err(|e| self.io_err(e, n))?;
        for v in buf {
          out.push(narrow_int(v, &self.filename)?);
        }
      },
      ScalarType::Real32 => {
        let mut buf = vec![0f32; n];
        let res = self.stream.read_f32_into::<B>(&mut buf);
        res.map_err(|e| self.io_err(e, n))?;
        for v in buf {
          out.push(narrow_real(f64::from(v), &self.filename)?);
        }
      },
      ScalarType::Real64 => {
        let mut buf = vec![0f64; n];
        let res = self.stream.read_f64_into::<B>(&mut buf);
        res.map_err(|e| self.io_err(e, n))?;
        for v in buf {
          out.push(narrow_real(v, &self.filename)?);
        }
      },
      ScalarType::Unknown => unreachable!("checked by caller")
    }
    return Ok(());
  }
}

impl<S: Write> Codec<S> {
  /// Writes values with the current encoding, `columns` per line in ASCII.
  pub fn write<T: LataScalar>(
    &mut self,
    values: &[T],
    columns: usize
  ) -> LataResult<()> {
    return self.write_as(self.scalar_type, values, columns);
  }

  /// Writes values as type `ty`, `columns` per line in ASCII mode.
  pub fn write_as<T: LataScalar>(
    &mut self,
    ty: ScalarType,
    values: &[T],
    columns: usize
  ) -> LataResult<()> {
    self.check_encoding(ty)?;
    let n = values.len();
    let res = match self.byte_order {
      ByteOrder::Ascii => self.write_ascii(ty, values, columns.max(1)),
      ByteOrder::LittleEndian => self.write_binary::<LittleEndian, T>(ty, values),
      ByteOrder::BigEndian => self.write_binary::<BigEndian, T>(ty, values),
      ByteOrder::Unknown => unreachable!("checked above")
    };
    return match res {
      Ok(Ok(())) => Ok(()),
      Ok(Err(e)) => Err(self.io_err(e, n)),
      Err(e) => Err(e),
    };
  }

  /// Writes a string: a word and a newline in ASCII, NUL-terminated bytes in
  /// binary.
  pub fn write_string(&mut self, s: &str) -> LataResult<()> {
    let res = if matches!(self.byte_order, ByteOrder::Ascii) {
      writeln!(self.stream, "{}", s)
    } else {
      self.stream.write_all(s.as_bytes())
        .and_then(|_| self.stream.write_all(&[0]))
    };
    return res.map_err(|e| self.io_err(e, 1));
  }

  /// Flushes the stream.
  pub fn flush(&mut self) -> LataResult<()> {
    let res = self.stream.flush();
    return res.map_err(|e| self.io_err(e, 0));
  }

  /// Formats values as text. Conversion errors come out on the outer layer,
  /// stream errors on the inner one.
  fn write_ascii<T: LataScalar>(
    &mut self,
    ty: ScalarType,
    values: &[T],
    columns: usize
  ) -> LataResult<io::Result<()>> {
    for (i, v) in values.iter().enumerate() {
      let text = match ty {
        ScalarType::Int32 => {
          to_i32(widen_int(*v, &self.filename)?, &self.filename)?.to_string()
        },
        ScalarType::Int64 => widen_int(*v, &self.filename)?.to_string(),
        ScalarType::Real32 => {
          (widen_real(*v, &self.filename)? as f32).to_string()
        },
        ScalarType::Real64 => widen_real(*v, &self.filename)?.to_string(),
        ScalarType::Unknown => unreachable!("checked by caller")
      };
      let sep = if (i + 1) % columns == 0 || i + 1 == values.len() {
        "\n"
      } else {
        " "
      };
      if let Err(e) = write!(self.stream, "{}{}", text, sep) {
        return Ok(Err(e));
      }
    }
    return Ok(Ok(()));
  }

  /// Writes binary values in byte order `B`.
  fn write_binary<B: byteorder::ByteOrder, T: LataScalar>(
    &mut self,
    ty: ScalarType,
    values: &[T]
  ) -> LataResult<io::Result<()>> {
    for v in values {
      let res = match ty {
        ScalarType::Int32 => {
          let x = to_i32(widen_int(*v, &self.filename)?, &self.filename)?;
          self.stream.write_i32::<B>(x)
        },
        ScalarType::Int64 => {
          let x = widen_int(*v, &self.filename)?;
          self.stream.write_i64::<B>(x)
        },
        ScalarType::Real32 => {
          let x = widen_real(*v, &self.filename)? as f32;
          self.stream.write_f32::<B>(x)
        },
        ScalarType::Real64 => {
          let x = widen_real(*v, &self.filename)?;
          self.stream.write_f64::<B>(x)
        },
        ScalarType::Unknown => unreachable!("checked by caller")
      };
      if let Err(e) = res {
        return Ok(Err(e));
      }
    }
    return Ok(Ok(()));
  }
}

impl Codec<DataSink<'_>> {
  /// Current byte position of the sink.
  pub(crate) fn sink_position(&mut self) -> LataResult<u64> {
    let pos = self.stream.position();
    return pos.map_err(|e| self.io_err(e, 0));
  }
}
