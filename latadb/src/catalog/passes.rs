//! This module implements the passes that work on a whole catalog at once:
//! filtered copies, merges, bulk renames and bulk datatype conversions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::catalog::*;
use crate::datatype::DataType;
use crate::error::*;

/// This specifies a value or sets thereof.
#[derive(
  Debug, Clone, Serialize, Deserialize, PartialOrd, Ord, PartialEq, Eq
)]
pub enum Specifier<A> {
  /// Use all in the database.
  All,
  /// Use a list.
  List(Vec<A>),
  /// Use an exclusion list.
  AllExcept(Vec<A>)
}

impl<A> Default for Specifier<A> {
  fn default() -> Self {
    return Self::All;
  }
}

impl<A: PartialEq> Specifier<A> {
  /// Use this as a filter for an iterator.
  pub fn filter_fn(&self, item: &A) -> bool {
    return match self {
      Self::All => true,
      Self::List(l) => l.contains(item),
      Self::AllExcept(l) => !l.contains(item),
    };
  }

  /// Filters an item known by several names: a list selects it if any name
  /// is listed, an exclusion list drops it if any name is listed.
  pub fn filter_any(&self, names: &[A]) -> bool {
    return match self {
      Self::All => true,
      Self::List(l) => names.iter().any(|n| l.contains(n)),
      Self::AllExcept(l) => !names.iter().any(|n| l.contains(n)),
    };
  }
}

/// Builds the file name a field gets when it is moved under a new prefix.
fn renamed_file(filename: &str, old_prefix: &str, new_prefix: &str) -> String {
  if filename == MEMORY_BUFFER_FILE {
    return format!("{}.memory_buffer", new_prefix);
  }
  if let Some(rest) = filename.strip_prefix(old_prefix) {
    if !old_prefix.is_empty() {
      return format!("{}{}", new_prefix, rest);
    }
  }
  let base = Path::new(filename)
    .file_name()
    .and_then(|s| s.to_str())
    .unwrap_or(filename);
  return format!("{}.{}", new_prefix, base);
}

impl LataDb {
  /// Builds a new database with the selected timesteps, geometries and
  /// fields. Timestep 0 is always kept. Fields are selected by name or by
  /// unique name, and must live on a selected geometry (or on none).
  pub fn filter_db(
    &self,
    timesteps: &Specifier<usize>,
    geometries: &Specifier<String>,
    fields: &Specifier<String>
  ) -> LataResult<LataDb> {
    let mut out = LataDb {
      timesteps: vec![Timestep::default()],
      memory: Vec::new(),
      dirty: false,
      ..self.clone_header()
    };
    for (src_ts, tstep) in self.timesteps.iter().enumerate() {
      let dst_ts = if src_ts == 0 {
        0
      } else if timesteps.filter_fn(&src_ts) {
        out.add_timestep(tstep.time)?
      } else {
        continue;
      };
      for geom in tstep.geometries.iter() {
        if geometries.filter_fn(&geom.name) {
          out.add_geometry(Geometry { timestep: dst_ts, ..geom.clone() })?;
        }
      }
      for field in tstep.fields.iter() {
        let names = [field.name.clone(), field.uname().to_string()];
        let geom_ok = field.geometry.is_empty()
          || geometries.filter_fn(&field.geometry);
        if geom_ok && fields.filter_any(&names) {
          out.add_field(Field { timestep: dst_ts, ..field.clone() })?;
        }
      }
    }
    debug!(
      "Filtered database has {} timesteps (source had {}).",
      out.nb_timesteps(),
      self.nb_timesteps()
    );
    return Ok(out);
  }

  /// Copies everything but the timesteps and scratch state.
  fn clone_header(&self) -> LataDb {
    return LataDb {
      timesteps: Vec::new(),
      path_prefix: self.path_prefix.clone(),
      header: self.header.clone(),
      case_label: self.case_label.clone(),
      software_id: self.software_id.clone(),
      default_int: self.default_int,
      default_float: self.default_float,
      old_style: self.old_style,
      dirty: false,
      memory: Vec::new()
    };
  }

  /// Merges another database into this one. Timestep 0 merges into timestep
  /// 0, other timesteps into the timestep with the same time, or get
  /// appended. Everything goes through the usual uniqueness checks.
  pub fn merge(&mut self, other: LataDb) -> LataResult<()> {
    for (src_ts, tstep) in other.timesteps.into_iter().enumerate() {
      let dst_ts = if src_ts == 0 {
        0
      } else if let Some(i) = self.timesteps
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, t)| t.time == tstep.time)
        .map(|(i, _)| i) {
        i
      } else {
        self.add_timestep(tstep.time)?
      };
      for geom in tstep.geometries {
        self.add_geometry(Geometry { timestep: dst_ts, ..geom })?;
      }
      for field in tstep.fields {
        self.add_field(Field { timestep: dst_ts, ..field })?;
      }
    }
    return Ok(());
  }

  /// Overwrites datatype parts of every field, part by part: a part is
  /// changed when `new`'s part is known and the field's part equals `old`'s
  /// (or `old`'s is unknown). Returns the number of fields changed.
  pub fn change_all_data_types(&mut self, old: &DataType, new: &DataType) -> usize {
    let mut changed = 0;
    for field in self.timesteps.iter_mut().flat_map(|t| t.fields.iter_mut()) {
      if field.datatype.convert(old, new) {
        changed += 1;
      }
    }
    debug!("Converted the datatype of {} fields.", changed);
    return changed;
  }

  /// Moves every data file under a new prefix. Files starting with the old
  /// prefix get it replaced; other files and the memory pseudo-file get a
  /// suffix appended to the new prefix so they stay distinct.
  pub fn change_all_data_filenames(&mut self, old_prefix: &str, new_prefix: &str) {
    for field in self.timesteps.iter_mut().flat_map(|t| t.fields.iter_mut()) {
      field.filename = renamed_file(&field.filename, old_prefix, new_prefix);
    }
  }

  /// Normalises file offsets for a rewrite: the first field using a file
  /// gets offset 0 (truncate), the next ones either offset 1 (append to the
  /// same file) or, with `split_files`, a file of their own at offset 0.
  pub fn check_all_data_fileoffsets(&mut self, split_files: bool) {
    let mut taken: BTreeSet<String> = self.timesteps
      .iter()
      .flat_map(|t| t.fields.iter())
      .map(|f| f.filename.clone())
      .collect();
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for field in self.timesteps.iter_mut().flat_map(|t| t.fields.iter_mut()) {
      let count = seen.entry(field.filename.clone()).or_insert(0);
      *count += 1;
      if *count == 1 {
        field.datatype.file_offset = 0;
      } else if split_files {
        let mut k = *count - 1;
        let mut candidate = format!("{}.{}", field.filename, k);
        while taken.contains(&candidate) {
          k += 1;
          candidate = format!("{}.{}", field.filename, k);
        }
        taken.insert(candidate.clone());
        field.filename = candidate;
        field.datatype.file_offset = 0;
      } else {
        field.datatype.file_offset = 1;
      }
    }
  }
}
