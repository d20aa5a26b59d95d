//! This module implements the on-disk encoding descriptor attached to every
//! field, and the "format flags" mini-language used to describe it in master
//! files (e.g. `LITTLE_ENDIAN,INT32,C_ORDERING,F_MARKERS_SINGLE`).

use std::fmt::Display;

use clap::ValueEnum;
use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::*;

/// Offset value meaning "not known, use the stream where it is".
pub const UNKNOWN_OFFSET: i64 = -1;

/// Generates a closed flag enum with its master-file keyword and an unknown
/// variant that is never written.
macro_rules! gen_flag_enum {
  (
    $desc:literal,
    $tname:ident,
    [
      $(($vn:ident, $kw:literal, $vdesc:literal),)+
    ]
  ) => {
    #[doc = $desc]
    #[derive(
      Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd,
      Ord, Hash
    )]
    pub enum $tname {
      $(
        #[doc = $vdesc]
        $vn,
      )+
      /// Not specified yet.
      Unknown
    }

    impl $tname {
      /// Returns the master-file keyword for this variant, if it has one.
      pub const fn keyword(&self) -> Option<&'static str> {
        return match self {
          $(Self::$vn => Some($kw),)+
          Self::Unknown => None
        };
      }

      /// Returns all the known (i.e. writable) variants.
      pub const fn all() -> &'static [Self] {
        return &[$(Self::$vn,)+];
      }

      /// Returns the first known variant whose keyword appears in a flag
      /// string, or `Unknown`.
      pub(crate) fn detect(flags: &str) -> Self {
        return Self::all()
          .iter()
          .copied()
          .find(|v| v.keyword().is_some_and(|kw| flags.contains(kw)))
          .unwrap_or(Self::Unknown);
      }

      /// True if the value is still unknown.
      pub const fn is_unknown(&self) -> bool {
        return matches!(self, Self::Unknown);
      }
    }

    impl Default for $tname {
      fn default() -> Self {
        return Self::Unknown;
      }
    }

    impl Display for $tname {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}", self.keyword().unwrap_or("UNKNOWN"));
      }
    }
  };
}

gen_flag_enum!(
  "How the numbers are written: text, or binary in some byte order.",
  ByteOrder,
  [
    (Ascii, "ASCII", "Whitespace-separated text."),
    (BigEndian, "BIG_ENDIAN", "Big-endian binary."),
    (LittleEndian, "LITTLE_ENDIAN", "Little-endian binary."),
  ]
);

gen_flag_enum!(
  "The index convention of integer arrays.",
  ArrayIndex,
  [
    (CIndexing, "C_INDEXING", "Indexes start at 0."),
    (FIndexing, "F_INDEXING", "Indexes start at 1."),
    (NotAnIndex, "NO_INDEXING", "The values are not indexes."),
  ]
);

gen_flag_enum!(
  "Layout of a multi-component array on disk.",
  DataOrdering,
  [
    (C, "C_ORDERING", "Row-major: all components of row 0, then row 1..."),
    (Fortran, "F_ORDERING", "Column-major: component 0 of all rows first."),
  ]
);

gen_flag_enum!(
  "Fortran block-marker policy.",
  MarkerPolicy,
  [
    (NoMarkers, "F_MARKERS_NO", "No markers at all."),
    (Single, "F_MARKERS_SINGLE", "One marker pair around the whole array."),
    (Multiple, "F_MARKERS_MULTIPLE", "One marker pair per component."),
  ]
);

/// Element type of a numeric array. Used both for data and for markers.
#[derive(
  Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord,
  Hash, ValueEnum
)]
#[clap(rename_all = "lower")]
pub enum ScalarType {
  /// 32-bit signed integer.
  Int32,
  /// 64-bit signed integer.
  Int64,
  /// 32-bit IEEE-754 float.
  Real32,
  /// 64-bit IEEE-754 float.
  Real64,
  /// Not specified yet.
  Unknown
}

impl Default for ScalarType {
  fn default() -> Self {
    return Self::Unknown;
  }
}

impl ScalarType {
  /// Returns the data keyword for this type.
  pub const fn keyword(&self) -> Option<&'static str> {
    return match self {
      Self::Int32 => Some("INT32"),
      Self::Int64 => Some("INT64"),
      Self::Real32 => Some("REAL32"),
      Self::Real64 => Some("REAL64"),
      Self::Unknown => None
    };
  }

  /// Returns the marker keyword for this type (markers are integers).
  pub const fn marker_keyword(&self) -> Option<&'static str> {
    return match self {
      Self::Int32 => Some("MARKERS32"),
      Self::Int64 => Some("MARKERS64"),
      _ => None
    };
  }

  /// Size of one binary element, in bytes.
  pub const fn size_bytes(&self) -> Option<u64> {
    return match self {
      Self::Int32 | Self::Real32 => Some(4),
      Self::Int64 | Self::Real64 => Some(8),
      Self::Unknown => None
    };
  }

  /// Whether this is an integer type.
  pub const fn is_int(&self) -> bool {
    return matches!(self, Self::Int32 | Self::Int64);
  }

  /// Whether this is a floating point type.
  pub const fn is_real(&self) -> bool {
    return matches!(self, Self::Real32 | Self::Real64);
  }

  /// True if the value is still unknown.
  pub const fn is_unknown(&self) -> bool {
    return matches!(self, Self::Unknown);
  }
}

impl Display for ScalarType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return write!(f, "{}", self.keyword().unwrap_or("UNKNOWN"));
  }
}

/// How block markers bracket the data, once validated against the ordering.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MarkerMode {
  /// No markers.
  Absent,
  /// One pair around the whole block.
  Whole,
  /// One pair around each component (column-major only).
  PerComponent
}

/// A validated combination of ordering and marker policy. Row-major storage
/// cannot carry per-component markers, so that case has no variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Layout {
  /// Row-major storage.
  RowMajor {
    /// Whether a marker pair brackets the block.
    markers: bool
  },
  /// Column-major storage.
  ColumnMajor {
    /// How markers bracket the block.
    markers: MarkerMode
  }
}

/// Everything needed to find and decode a field's values in a file.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataType {
  /// Text or binary byte order.
  pub byte_order: ByteOrder,
  /// Element type.
  pub scalar_type: ScalarType,
  /// Index convention.
  pub array_index: ArrayIndex,
  /// Ordering of multi-component data.
  pub ordering: DataOrdering,
  /// Fortran block-marker policy.
  pub markers: MarkerPolicy,
  /// Type of the block markers.
  pub marker_type: ScalarType,
  /// Byte offset of the block in its file. Negative means "unknown".
  pub file_offset: i64
}

impl Default for DataType {
  fn default() -> Self {
    return Self::unknown();
  }
}

impl DataType {
  /// A datatype with every part unknown. Also used as a "match anything"
  /// pattern by the bulk conversion pass.
  pub const fn unknown() -> Self {
    return Self {
      byte_order: ByteOrder::Unknown,
      scalar_type: ScalarType::Unknown,
      array_index: ArrayIndex::Unknown,
      ordering: DataOrdering::Unknown,
      markers: MarkerPolicy::Unknown,
      marker_type: ScalarType::Unknown,
      file_offset: UNKNOWN_OFFSET
    };
  }

  /// The default integer datatype of a fresh database.
  pub const fn default_int() -> Self {
    return Self {
      byte_order: ByteOrder::LittleEndian,
      scalar_type: ScalarType::Int32,
      array_index: ArrayIndex::CIndexing,
      ordering: DataOrdering::C,
      markers: MarkerPolicy::Single,
      marker_type: ScalarType::Int32,
      file_offset: 0
    };
  }

  /// The default float datatype of a fresh database.
  pub const fn default_float() -> Self {
    return Self {
      scalar_type: ScalarType::Real32,
      array_index: ArrayIndex::NotAnIndex,
      ..Self::default_int()
    };
  }

  /// Checks no part is left unknown.
  pub fn check_complete(&self) -> LataResult<()> {
    let missing: Vec<&str> = [
      (self.byte_order.is_unknown(), "byte order"),
      (self.scalar_type.is_unknown(), "data type"),
      (self.array_index.is_unknown(), "index convention"),
      (self.ordering.is_unknown(), "data ordering"),
      (self.markers.is_unknown(), "marker policy"),
      (!self.marker_type.is_int(), "marker type"),
    ].iter()
      .filter(|(bad, _)| *bad)
      .map(|(_, what)| *what)
      .collect();
    if missing.is_empty() {
      return Ok(());
    }
    return Err(LataError::invalid(format!(
      "datatype has unspecified parts: {}",
      missing.join(", ")
    )));
  }

  /// Resolves the ordering and marker policy into a layout, rejecting the
  /// combinations that cannot be stored.
  pub(crate) fn layout(&self) -> LataResult<Layout> {
    return match (self.ordering, self.markers) {
      (DataOrdering::C, MarkerPolicy::NoMarkers) => {
        Ok(Layout::RowMajor { markers: false })
      },
      (DataOrdering::C, MarkerPolicy::Single) => {
        Ok(Layout::RowMajor { markers: true })
      },
      (DataOrdering::Fortran, MarkerPolicy::NoMarkers) => {
        Ok(Layout::ColumnMajor { markers: MarkerMode::Absent })
      },
      (DataOrdering::Fortran, MarkerPolicy::Single) => {
        Ok(Layout::ColumnMajor { markers: MarkerMode::Whole })
      },
      (DataOrdering::Fortran, MarkerPolicy::Multiple) => {
        Ok(Layout::ColumnMajor { markers: MarkerMode::PerComponent })
      },
      (DataOrdering::C, MarkerPolicy::Multiple) => Err(LataError::data(
        "F_MARKERS_MULTIPLE cannot be used with C_ORDERING"
      )),
      (o, m) => Err(LataError::data(format!(
        "cannot handle data ordering {} with marker policy {}", o, m
      )))
    };
  }

  /// Writes the flags of this datatype that differ from a baseline, joined
  /// by commas. Pass `DataType::unknown()` to get every flag.
  pub fn format_flags(&self, baseline: &DataType) -> String {
    let mut flags: Vec<&str> = Vec::new();
    if self.byte_order != baseline.byte_order {
      flags.extend(self.byte_order.keyword());
    }
    if self.scalar_type != baseline.scalar_type {
      flags.extend(self.scalar_type.keyword());
    }
    if self.array_index != baseline.array_index {
      flags.extend(self.array_index.keyword());
    }
    if self.ordering != baseline.ordering {
      flags.extend(self.ordering.keyword());
    }
    if self.markers != baseline.markers {
      flags.extend(self.markers.keyword());
    }
    if self.marker_type != baseline.marker_type {
      flags.extend(self.marker_type.marker_keyword());
    }
    return flags.iter().join(",");
  }

  /// Layers a set of parsed format flags onto this datatype.
  pub fn apply_flags(&mut self, flags: &FormatFlags) {
    if !flags.byte_order.is_unknown() {
      self.byte_order = flags.byte_order;
    }
    if self.scalar_type.is_int() || self.scalar_type.is_unknown() {
      if !flags.int_type.is_unknown() {
        self.scalar_type = flags.int_type;
      }
    }
    if self.scalar_type.is_real() || self.scalar_type.is_unknown() {
      if !flags.real_type.is_unknown() {
        self.scalar_type = flags.real_type;
      }
    }
    if !flags.array_index.is_unknown() {
      self.array_index = flags.array_index;
    }
    if !flags.ordering.is_unknown() {
      self.ordering = flags.ordering;
    }
    if !flags.markers.is_unknown() {
      self.markers = flags.markers;
    }
    if !flags.marker_type.is_unknown() {
      self.marker_type = flags.marker_type;
    }
  }

  /// Overwrites each part with the one in `new` when `new`'s part is known
  /// and this one equals `old`'s part (or `old`'s part is unknown). Returns
  /// whether anything changed.
  pub fn convert(&mut self, old: &DataType, new: &DataType) -> bool {
    /// Applies the guarded overwrite to one part.
    fn guarded<T: PartialEq + Copy>(
      cur: &mut T, old: T, new: T, unknown: T
    ) -> bool {
      if new != unknown && (old == unknown || *cur == old) && *cur != new {
        *cur = new;
        return true;
      }
      return false;
    }
    let mut changed = false;
    changed |= guarded(
      &mut self.byte_order, old.byte_order, new.byte_order, ByteOrder::Unknown
    );
    changed |= guarded(
      &mut self.scalar_type,
      old.scalar_type,
      new.scalar_type,
      ScalarType::Unknown
    );
    changed |= guarded(
      &mut self.array_index,
      old.array_index,
      new.array_index,
      ArrayIndex::Unknown
    );
    changed |= guarded(
      &mut self.ordering, old.ordering, new.ordering, DataOrdering::Unknown
    );
    changed |= guarded(
      &mut self.markers, old.markers, new.markers, MarkerPolicy::Unknown
    );
    changed |= guarded(
      &mut self.marker_type,
      old.marker_type,
      new.marker_type,
      ScalarType::Unknown
    );
    if new.file_offset >= 0
      && (old.file_offset < 0 || self.file_offset == old.file_offset)
      && self.file_offset != new.file_offset {
      self.file_offset = new.file_offset;
      changed = true;
    }
    return changed;
  }
}

/// The flags found in a format string. Integer and float element types are
/// kept apart because a `Format` line sets both catalog defaults at once.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FormatFlags {
  /// Byte order flag.
  pub byte_order: ByteOrder,
  /// `INT32`/`INT64` flag.
  pub int_type: ScalarType,
  /// `REAL32`/`REAL64` flag.
  pub real_type: ScalarType,
  /// Indexing flag.
  pub array_index: ArrayIndex,
  /// Ordering flag.
  pub ordering: DataOrdering,
  /// Marker policy flag.
  pub markers: MarkerPolicy,
  /// Marker size flag.
  pub marker_type: ScalarType
}

impl FormatFlags {
  /// Parses a format string by looking for every known keyword in it. The
  /// legacy `BINARY` keyword is accepted and means nothing more than "not
  /// ASCII".
  pub fn parse(s: &str) -> Self {
    let up = s.to_ascii_uppercase();
    for piece in up.split(',').filter(|p| !p.is_empty()) {
      if !is_known_flag(piece) {
        warn!("Ignoring unknown format flag \"{}\".", piece);
      }
    }
    let detect_scalar = |candidates: [ScalarType; 2], marker: bool| {
      return candidates.into_iter()
        .find(|t| {
          let kw = if marker { t.marker_keyword() } else { t.keyword() };
          kw.is_some_and(|kw| up.contains(kw))
        })
        .unwrap_or(ScalarType::Unknown);
    };
    let ints = [ScalarType::Int32, ScalarType::Int64];
    return Self {
      byte_order: ByteOrder::detect(&up),
      int_type: detect_scalar(ints, false),
      real_type: detect_scalar([ScalarType::Real32, ScalarType::Real64], false),
      array_index: ArrayIndex::detect(&up),
      ordering: DataOrdering::detect(&up),
      markers: MarkerPolicy::detect(&up),
      marker_type: detect_scalar(ints, true)
    };
  }

  /// Whether these flags explicitly name an integer element type.
  pub const fn names_int(&self) -> bool {
    return !self.int_type.is_unknown();
  }

  /// Whether these flags explicitly name a float element type.
  pub const fn names_real(&self) -> bool {
    return !self.real_type.is_unknown();
  }
}

/// Checks a single comma-separated piece of a format string.
fn is_known_flag(piece: &str) -> bool {
  let piece = piece.trim();
  return piece == "BINARY"
    || ByteOrder::all().iter().any(|v| v.keyword() == Some(piece))
    || ArrayIndex::all().iter().any(|v| v.keyword() == Some(piece))
    || DataOrdering::all().iter().any(|v| v.keyword() == Some(piece))
    || MarkerPolicy::all().iter().any(|v| v.keyword() == Some(piece))
    || [
      ScalarType::Int32,
      ScalarType::Int64,
      ScalarType::Real32,
      ScalarType::Real64
    ].iter().any(|t| {
      t.keyword() == Some(piece) || t.marker_keyword() == Some(piece)
    });
}
