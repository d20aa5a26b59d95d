//! This module implements reading and writing field data: locating the
//! block of a field in its file, walking its markers and ordering, reading
//! contiguous row ranges or arbitrary row lists, and writing whole fields.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Cursor, Seek, SeekFrom, Write};

use log::debug;
use nalgebra::DMatrix;

use crate::catalog::*;
use crate::codec::*;
use crate::datatype::*;
use crate::error::*;
use crate::idmap::IdMap;
use crate::markers::*;

/// Number of rows fetched at once when reading a row list.
pub const CHUNK_ROWS: usize = 1024;

/// Adds `delta` to an integer value, checking for overflow.
fn shift_index<T: LataScalar>(v: T, delta: i64) -> LataResult<T> {
  let overflow = || LataError::new(
    ErrorKind::IntegerOverflow,
    format!("index {} shifted by {} does not fit", v, delta)
  );
  let wide = num::cast::<T, i64>(v).ok_or_else(overflow)?;
  let shifted = wide.checked_add(delta).ok_or_else(overflow)?;
  return num::cast::<i64, T>(shifted).ok_or_else(overflow);
}

/// Whether values of this field must be shifted when moving to/from disk.
fn one_based<T: LataScalar>(field: &Field) -> bool {
  return T::IS_INT
    && field.datatype.scalar_type.is_int()
    && field.datatype.array_index == ArrayIndex::FIndexing;
}

/// Reads past the whole block of a field, markers included, leaving the
/// stream right after it. Used to compute offsets of packed blocks.
pub(crate) fn skip_field<S: BufRead + Seek>(
  codec: &mut Codec<S>,
  field: &Field
) -> LataResult<()> {
  let (rows, comps) = field.disk_shape()?;
  let dt = &field.datatype;
  codec.set_encoding(dt.byte_order, dt.scalar_type);
  match dt.layout()? {
    Layout::RowMajor { markers } => {
      let mode = if markers { MarkerMode::Whole } else { MarkerMode::Absent };
      skip_marker(codec, mode, MarkerSite::Block, dt.marker_type, rows * comps)?;
      codec.skip(rows * comps)?;
      skip_marker(codec, mode, MarkerSite::Block, dt.marker_type, rows * comps)?;
    },
    Layout::ColumnMajor { markers } => {
      skip_marker(codec, markers, MarkerSite::Block, dt.marker_type, rows * comps)?;
      for _ in 0..comps {
        skip_marker(codec, markers, MarkerSite::Component, dt.marker_type, rows)?;
        codec.skip(rows)?;
        skip_marker(codec, markers, MarkerSite::Component, dt.marker_type, rows)?;
      }
      skip_marker(codec, markers, MarkerSite::Block, dt.marker_type, rows * comps)?;
    }
  }
  return Ok(());
}

/// Reads rows `[start, start+n)` of a field with its on-disk shape. The
/// stream must be at the start of the block.
fn read_range<S: BufRead + Seek, T: LataScalar>(
  codec: &mut Codec<S>,
  field: &Field,
  start: usize,
  n: usize
) -> LataResult<DMatrix<T>> {
  let (rows, comps) = field.disk_shape()?;
  let dt = &field.datatype;
  let rest = rows - start - n;
  return match dt.layout()? {
    Layout::RowMajor { markers } => {
      let mode = if markers { MarkerMode::Whole } else { MarkerMode::Absent };
      skip_marker(codec, mode, MarkerSite::Block, dt.marker_type, rows * comps)?;
      codec.skip(start * comps)?;
      let values: Vec<T> = codec.read(n * comps)?;
      codec.skip(rest * comps)?;
      skip_marker(codec, mode, MarkerSite::Block, dt.marker_type, rows * comps)?;
      Ok(DMatrix::from_row_slice(n, comps, &values))
    },
    Layout::ColumnMajor { markers } => {
      skip_marker(codec, markers, MarkerSite::Block, dt.marker_type, rows * comps)?;
      let mut values: Vec<T> = Vec::with_capacity(n * comps);
      for _ in 0..comps {
        skip_marker(codec, markers, MarkerSite::Component, dt.marker_type, rows)?;
        codec.skip(start)?;
        values.extend(codec.read::<T>(n)?);
        codec.skip(rest)?;
        skip_marker(codec, markers, MarkerSite::Component, dt.marker_type, rows)?;
      }
      skip_marker(codec, markers, MarkerSite::Block, dt.marker_type, rows * comps)?;
      // column-major storage, exactly like the file
      Ok(DMatrix::from_vec(n, comps, values))
    }
  };
}

/// A window of consecutive rows kept in memory while serving a row list.
struct ChunkCache<T> {
  /// First row of the window.
  first: usize,
  /// Number of rows in the window.
  len: usize,
  /// Values, `width` per row.
  values: Vec<T>
}

impl<T: LataScalar> ChunkCache<T> {
  /// An empty window.
  fn new() -> Self {
    return Self { first: 0, len: 0, values: Vec::new() };
  }

  /// Whether a row is in the window.
  fn contains(&self, row: usize) -> bool {
    return row >= self.first && row < self.first + self.len;
  }

  /// Refills the window with up to `CHUNK_ROWS` rows starting at `row`, from
  /// a run of `total` rows of `width` values starting at byte `base`.
  fn load<S: BufRead + Seek>(
    &mut self,
    codec: &mut Codec<S>,
    base: u64,
    row: usize,
    total: usize,
    width: usize
  ) -> LataResult<()> {
    let len = CHUNK_ROWS.min(total - row);
    codec.seek_to(base)?;
    codec.skip(row * width)?;
    self.values = codec.read(len * width)?;
    self.first = row;
    self.len = len;
    debug!(
      "Loaded rows {}..{} of \"{}\".", row, row + len, codec.filename()
    );
    return Ok(());
  }
}

/// Reads an arbitrary list of rows with the field's on-disk shape. The
/// stream must be at the start of the block.
fn read_rows<S: BufRead + Seek, T: LataScalar>(
  codec: &mut Codec<S>,
  field: &Field,
  row_list: &[usize]
) -> LataResult<DMatrix<T>> {
  let (rows, comps) = field.disk_shape()?;
  let dt = &field.datatype;
  let mut out: DMatrix<T> = DMatrix::zeros(row_list.len(), comps);
  match dt.layout()? {
    Layout::RowMajor { markers } => {
      let mode = if markers { MarkerMode::Whole } else { MarkerMode::Absent };
      skip_marker(codec, mode, MarkerSite::Block, dt.marker_type, rows * comps)?;
      let base = codec.position()?;
      let mut cache: ChunkCache<T> = ChunkCache::new();
      for (k, &row) in row_list.iter().enumerate() {
        if !cache.contains(row) {
          cache.load(codec, base, row, rows, comps)?;
        }
        let at = (row - cache.first) * comps;
        for c in 0..comps {
          out[(k, c)] = cache.values[at + c];
        }
      }
    },
    Layout::ColumnMajor { markers } => {
      skip_marker(codec, markers, MarkerSite::Block, dt.marker_type, rows * comps)?;
      let mut bases: Vec<u64> = Vec::with_capacity(comps);
      for _ in 0..comps {
        skip_marker(codec, markers, MarkerSite::Component, dt.marker_type, rows)?;
        bases.push(codec.position()?);
        codec.skip(rows)?;
        skip_marker(codec, markers, MarkerSite::Component, dt.marker_type, rows)?;
      }
      for (c, base) in bases.into_iter().enumerate() {
        let mut cache: ChunkCache<T> = ChunkCache::new();
        for (k, &row) in row_list.iter().enumerate() {
          if !cache.contains(row) {
            cache.load(codec, base, row, rows, 1)?;
          }
          out[(k, c)] = cache.values[row - cache.first];
        }
      }
    }
  }
  return Ok(out);
}

/// Drops padding columns and shifts 1-based indexes back to 0-based.
fn finish_read<T: LataScalar>(
  field: &Field,
  raw: DMatrix<T>
) -> LataResult<DMatrix<T>> {
  let (_, comps) = field.shape()?;
  let mut m = if raw.ncols() > comps {
    raw.columns(0, comps).into_owned()
  } else {
    raw
  };
  if one_based::<T>(field) {
    for v in m.iter_mut() {
      *v = shift_index(*v, -1)?;
    }
  }
  return Ok(m);
}

impl LataDb {
  /// Opens a data file (or the memory pseudo-file) for reading.
  pub(crate) fn open_read(&self, filename: &str) -> LataResult<Codec<DataStream<'_>>> {
    if filename == MEMORY_BUFFER_FILE {
      let stream = DataStream::from(Cursor::new(self.memory.as_slice()));
      return Ok(Codec::new(stream, filename));
    }
    let path = self.path_prefix.join(filename);
    let file = File::open(&path).map_err(|e| LataError::new(
      ErrorKind::FileNotFound,
      format!("cannot open \"{}\": {}", path.display(), e)
    ))?;
    let stream = DataStream::from(BufReader::new(file));
    return Ok(Codec::new(stream, path.display().to_string()));
  }

  /// Opens a data file (or the memory pseudo-file) for writing. Offsets of
  /// zero or less truncate, positive offsets append.
  fn open_write(
    &mut self,
    filename: &str,
    offset: i64
  ) -> LataResult<Codec<DataSink<'_>>> {
    let truncate = offset <= 0;
    if filename == MEMORY_BUFFER_FILE {
      if truncate {
        self.memory.clear();
      }
      return Ok(Codec::new(DataSink::from(&mut self.memory), filename));
    }
    let path = self.path_prefix.join(filename);
    let mut opts = OpenOptions::new();
    if truncate {
      opts.write(true).create(true).truncate(true);
    } else {
      opts.append(true).create(true);
    }
    let mut file = opts.open(&path).map_err(|e| LataError::new(
      ErrorKind::FileNotFound,
      format!("cannot open \"{}\" for writing: {}", path.display(), e)
    ))?;
    // appending files report position 0 until the first write
    file.seek(SeekFrom::End(0))
      .map_err(|e| LataError::from_io(e, &path.display().to_string(), 0))?;
    let sink = DataSink::from(BufWriter::new(file));
    return Ok(Codec::new(sink, path.display().to_string()));
  }

  /// Opens a field's file and positions the stream at its block.
  fn open_field(&self, field: &Field) -> LataResult<Codec<DataStream<'_>>> {
    field.datatype.check_complete()?;
    let mut codec = self.open_read(&field.filename)?;
    if field.datatype.file_offset >= 0 {
      codec.seek_to(field.datatype.file_offset as u64)?;
    }
    let dt = &field.datatype;
    codec.set_encoding(dt.byte_order, dt.scalar_type);
    return Ok(codec);
  }

  /// Reads `count` rows of a field starting at `start` (all remaining rows
  /// if `count` is `None`). The result has one row per field row and one
  /// column per component.
  pub fn read_data<T: LataScalar>(
    &self,
    field: &Field,
    start: usize,
    count: Option<usize>
  ) -> LataResult<DMatrix<T>> {
    let (size, _) = field.shape()?;
    let n = count.unwrap_or(size.saturating_sub(start));
    if start.checked_add(n).filter(|&end| end <= size).is_none() {
      return Err(LataError::data(format!(
        "rows {}..{}+{} out of range for field {} with {} rows",
        start,
        start,
        n,
        field.uname(),
        size
      )));
    }
    let mut codec = self.open_field(field)?;
    let raw = read_range(&mut codec, field, start, n)?;
    return finish_read(field, raw);
  }

  /// Reads a list of rows of a field, in the given order. Rows may repeat
  /// and need not be sorted.
  pub fn read_data_rows<T: LataScalar>(
    &self,
    field: &Field,
    rows: &[usize]
  ) -> LataResult<DMatrix<T>> {
    let (size, _) = field.shape()?;
    if let Some(bad) = rows.iter().find(|&&r| r >= size) {
      return Err(LataError::data(format!(
        "row {} out of range for field {} with {} rows",
        bad,
        field.uname(),
        size
      )));
    }
    let mut codec = self.open_field(field)?;
    let raw = read_rows(&mut codec, field, rows)?;
    return finish_read(field, raw);
  }

  /// Reads a whole integer field and converts every value from an external
  /// identifier to a position, through an id table.
  pub fn read_remapped(&self, field: &Field, ids: &IdMap) -> LataResult<DMatrix<usize>> {
    let raw: DMatrix<i64> = self.read_data(field, 0, None)?;
    let mut out: DMatrix<usize> = DMatrix::zeros(raw.nrows(), raw.ncols());
    for (o, id) in out.iter_mut().zip(raw.iter()) {
      *o = ids.id_to_index(*id).ok_or_else(|| LataError::data(format!(
        "id {} in field {} is not in the id table", id, field.uname()
      )))?;
    }
    return Ok(out);
  }

  /// Writes a whole field. The array must have exactly the declared rows
  /// and components. The field's offset is updated to where the block was
  /// written; the returned offset is where the block ends, i.e. where a
  /// field appended to the same file would start.
  pub fn write_data<T: LataScalar>(
    &mut self,
    ts: usize,
    uname: &FieldUName,
    data: &DMatrix<T>
  ) -> LataResult<u64> {
    let field = self.field_mut(ts, uname)?.clone();
    let (size, comps) = field.shape()?;
    if (data.nrows(), data.ncols()) != (size, comps) {
      return Err(LataError::data(format!(
        "field {} is declared {}x{} but the array is {}x{}",
        uname,
        size,
        comps,
        data.nrows(),
        data.ncols()
      )));
    }
    if field.padding != LegacyPadding::None {
      return Err(LataError::data(format!(
        "cannot write legacy padded field {}", uname
      )));
    }
    let dt = field.datatype;
    dt.check_complete()?;
    let layout = dt.layout()?;
    let shift = one_based::<T>(&field);
    // disk order: row-major for C, column-major (nalgebra's own) for F
    let ordered: Vec<T> = match layout {
      Layout::RowMajor { .. } => data.transpose().iter().copied().collect(),
      Layout::ColumnMajor { .. } => data.iter().copied().collect(),
    };
    let values: Vec<T> = if shift {
      ordered.into_iter()
        .map(|v| shift_index(v, 1))
        .collect::<LataResult<Vec<T>>>()?
    } else {
      ordered
    };
    let mut codec = self.open_write(&field.filename, dt.file_offset)?;
    let start = codec.sink_position()?;
    codec.set_encoding(dt.byte_order, dt.scalar_type);
    let total = size * comps;
    match layout {
      Layout::RowMajor { markers } => {
        let mode = if markers { MarkerMode::Whole } else { MarkerMode::Absent };
        write_marker(&mut codec, mode, MarkerSite::Block, dt.marker_type, total)?;
        codec.write(&values, comps)?;
        write_marker(&mut codec, mode, MarkerSite::Block, dt.marker_type, total)?;
      },
      Layout::ColumnMajor { markers } => {
        write_marker(&mut codec, markers, MarkerSite::Block, dt.marker_type, total)?;
        for c in 0..comps {
          let column = &values[c * size..(c + 1) * size];
          write_marker(
            &mut codec, markers, MarkerSite::Component, dt.marker_type, size
          )?;
          codec.write(column, 1)?;
          write_marker(
            &mut codec, markers, MarkerSite::Component, dt.marker_type, size
          )?;
        }
        write_marker(&mut codec, markers, MarkerSite::Block, dt.marker_type, total)?;
      }
    }
    codec.flush()?;
    let end = codec.sink_position()?;
    drop(codec);
    let offset = i64::try_from(start).map_err(|_| LataError::new(
      ErrorKind::IntegerOverflow,
      format!("offset {} of field {} is too large", start, uname)
    ))?;
    self.field_mut(ts, uname)?.datatype.file_offset = offset;
    self.dirty = true;
    debug!(
      "Wrote field {} to \"{}\" at bytes {}..{}.",
      uname,
      field.filename,
      start,
      end
    );
    return Ok(end);
  }
}

/// Writes `data` to any stream with the layout of `field`, without touching
/// a catalog. Handy to build data files by hand.
pub fn write_block<W: Write, T: LataScalar>(
  sink: W,
  field: &Field,
  data: &DMatrix<T>
) -> LataResult<W> {
  let mut db = LataDb::new();
  let mut fld = field.clone();
  fld.filename = MEMORY_BUFFER_FILE.to_string();
  fld.geometry = String::new();
  fld.timestep = 0;
  fld.datatype.file_offset = 0;
  let uname = fld.uname();
  db.add_field(fld)?;
  db.write_data(0, &uname, data)?;
  let mut sink = sink;
  let res = sink.write_all(&db.memory).and_then(|_| sink.flush());
  res.map_err(|e| LataError::from_io(e, &field.filename, data.len()))?;
  return Ok(sink);
}
