//! This module implements the master-file writer. Output always uses the
//! current dialect, whatever dialect the catalog was read from, and is read
//! back by `read_master_file` into an equivalent catalog.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::catalog::*;
use crate::datatype::DataType;
use crate::error::*;
use crate::elements::ElementType;
use crate::parser::{apply_format, LATA_HEADER};

/// The format string of a field: its differences from the default for its
/// kind, always starting with its element type. The defaults are the ones a
/// reader rebuilds from the `Format` line.
fn field_format(field: &Field, defaults: &(DataType, DataType)) -> String {
  let dt = &field.datatype;
  let baseline = if dt.scalar_type.is_int() { &defaults.0 } else { &defaults.1 };
  let diff = dt.format_flags(&DataType { file_offset: dt.file_offset, ..*baseline });
  let kw = dt.scalar_type.keyword().unwrap_or_default();
  let has_type = diff.split(',').any(|p| p == kw);
  return match (has_type, diff.is_empty()) {
    (true, _) => diff,
    (false, true) => kw.to_string(),
    (false, false) => format!("{},{}", kw, diff),
  };
}

/// One `Champ` line.
fn field_line(field: &Field, defaults: &(DataType, DataType)) -> String {
  let mut line = format!("Champ {} {}", field.name, field.filename);
  if !field.geometry.is_empty() {
    line += &format!(" geometrie={}", field.geometry);
  }
  if !field.localisation.is_empty() {
    line += &format!(" localisation={}", field.localisation);
  }
  if let Some(c) = field.nb_comp {
    line += &format!(" composantes={}", c);
  }
  if let Some(s) = field.size {
    line += &format!(" size={}", s);
  }
  if let Some(n) = field.nature.keyword() {
    line += &format!(" nature={}", n);
  }
  if !field.reference.is_empty() {
    line += &format!(" reference={}", field.reference);
  }
  if !field.component_names.is_empty() {
    line += &format!(" noms_compo={}", field.component_names.join(","));
  }
  line += &format!(" format={}", field_format(field, defaults));
  line += &format!(" file_offset={}", field.datatype.file_offset);
  if let Some(p) = field.padding.keyword() {
    line += &format!(" legacy_padding={}", p);
  }
  return line;
}

impl LataDb {
  /// Renders the master file of this catalog.
  pub fn master_text(&self) -> String {
    let mut out: Vec<String> = vec![
      LATA_HEADER.to_string(),
      self.case_label.clone(),
      self.software_id.clone()
    ];
    let int_flags = self.default_int.format_flags(&DataType::unknown());
    let real = self.default_float.scalar_type.keyword().unwrap_or("REAL32");
    let format = format!("{},{}", int_flags, real);
    let mut defaults = (DataType::default_int(), DataType::default_float());
    apply_format(&mut defaults.0, &mut defaults.1, &format);
    out.push(format!("Format {}", format));
    for (i, tstep) in self.timesteps.iter().enumerate() {
      if i > 0 {
        out.push(format!("TEMPS {}", tstep.time));
      }
      for geom in tstep.geometries.iter() {
        out.push(match geom.elem_type {
          ElementType::Unspecified => format!("Geom {}", geom.name),
          et => format!("Geom {} type_elem={}", geom.name, et.name())
        });
      }
      for field in tstep.fields.iter() {
        out.push(field_line(field, &defaults));
      }
    }
    out.push(String::from("FIN"));
    return out.join("\n") + "\n";
  }

  /// Writes the master file of this catalog. Afterwards the catalog no
  /// longer needs a rewrite.
  pub fn write_master_file<P: AsRef<Path>>(&mut self, path: P) -> LataResult<()> {
    let path = path.as_ref();
    let fail = |e: std::io::Error| LataError::new(
      ErrorKind::FileNotFound,
      format!("cannot write \"{}\": {}", path.display(), e)
    );
    let mut w = BufWriter::new(File::create(path).map_err(fail)?);
    w.write_all(self.master_text().as_bytes()).map_err(fail)?;
    w.flush().map_err(fail)?;
    self.dirty = false;
    info!("Wrote master file \"{}\".", path.display());
    return Ok(());
  }
}
