//! This module implements the master-file reader. A master file has a fixed
//! three-line header followed by keyword statements (`Format`, `Geom`,
//! `Champ`, `Temps`, `import_file`, `Fin`...). The legacy dialect lives in
//! its own submodule.

mod legacy;

use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::catalog::*;
use crate::datatype::*;
use crate::elements::ElementType;
use crate::error::*;
use crate::util::*;

/// Header written at the top of current master files.
pub const LATA_HEADER: &str = "LATA_V2.1";

/// Prefix of the header of current master files.
pub const LATA_MAGIC: &str = "LATA_V2";

/// Prefix of the header of legacy master files.
pub const LEGACY_MAGIC: &str = "Trio_U";

/// How deep `import_file` statements may nest.
const MAX_IMPORT_DEPTH: usize = 16;

/// Names of integer fields holding indexes into other arrays.
const INDEX_FIELDS: &[&str] = &[ELEMENTS_FIELD, FACES_FIELD, ELEM_FACES_FIELD];

/// Whether a field of this name holds integers when nothing else says so.
pub(crate) fn is_int_field(name: &str) -> bool {
  let up = name.to_ascii_uppercase();
  return INDEX_FIELDS.contains(&up.as_str()) || up.starts_with("JOINTS");
}

/// The optional attributes of a `Champ` statement.
#[derive(Clone, Debug, Default)]
pub(crate) struct FieldAttrs {
  /// `geometrie=`
  pub(crate) geometry: Option<String>,
  /// `composantes=`
  pub(crate) nb_comp: Option<usize>,
  /// `size=`
  pub(crate) size: Option<usize>,
  /// `localisation=`
  pub(crate) localisation: Option<String>,
  /// `format=`
  pub(crate) format: Option<FormatFlags>,
  /// `file_offset=`
  pub(crate) file_offset: Option<i64>,
  /// `nature=`
  pub(crate) nature: Option<Nature>,
  /// `reference=`
  pub(crate) reference: Option<String>,
  /// `noms_compo=`
  pub(crate) component_names: Option<Vec<String>>,
  /// `legacy_padding=`
  pub(crate) padding: Option<LegacyPadding>
}

/// One pass over the statements of a master file, filling a database.
pub(crate) struct MasterParser<'d> {
  /// The database being filled.
  db: &'d mut LataDb,
  /// The statements.
  tokens: TokenStream,
  /// Timestep new statements go to.
  current_ts: usize,
  /// Legacy interface files that could not be found.
  missing: Vec<String>,
  /// Import nesting level.
  depth: usize
}

impl<'d> MasterParser<'d> {
  /// Reads the header of a master file into the database and returns a
  /// parser positioned on the first statement.
  fn start(
    db: &'d mut LataDb,
    text: &str,
    source: &str,
    depth: usize
  ) -> LataResult<Self> {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or("").trim();
    if first.starts_with(LATA_MAGIC) {
      db.old_style = false;
    } else if first.starts_with(LEGACY_MAGIC) {
      db.old_style = true;
      db.default_int = DataType {
        array_index: ArrayIndex::FIndexing,
        ..DataType::default_int()
      };
      db.default_float = DataType::default_float();
    } else {
      return Err(LataError::new(
        ErrorKind::BadHeader,
        format!("{}: unknown header \"{}\"", source, first)
      ));
    }
    let mut next_line = |what: &str| lines.next().map(str::to_string).ok_or_else(|| {
      LataError::read(format!("{}: missing {} line", source, what))
    });
    let case_label = next_line("case label")?;
    let software_id = next_line("software id")?;
    db.header = first.to_string();
    db.case_label = case_label.trim().to_string();
    db.software_id = software_id.trim().to_string();
    debug!(
      "Reading {} ({} dialect, case \"{}\").",
      source,
      if db.old_style { "legacy" } else { "current" },
      db.case_label
    );
    let tokens = TokenStream::new(text.lines().skip(3), 4, source);
    return Ok(Self { db, tokens, current_ts: 0, missing: Vec::new(), depth });
  }

  /// Builds a located read error.
  fn error<S: AsRef<str>>(&self, msg: S) -> LataError {
    return LataError::read(format!(
      "{}:{}: {}", self.tokens.source(), self.tokens.line(), msg.as_ref()
    ));
  }

  /// Reads statements until `Fin` or the end of the text.
  fn parse(&mut self) -> LataResult<()> {
    loop {
      let tok = match self.tokens.next_token() {
        Some(t) => t,
        None => {
          warn!("{}: no FIN statement.", self.tokens.source());
          break;
        }
      };
      match tok.text.to_ascii_uppercase().as_str() {
        "FORMAT" => self.read_format()?,
        "TEMPS" => self.read_time()?,
        "GEOM" => self.read_geom()?,
        "GEOMETRIE" => self.read_legacy_geometry()?,
        "CHAMP" if self.db.old_style => self.read_legacy_field()?,
        "CHAMP" => self.read_field()?,
        "IMPORT_FILE" => self.read_import()?,
        "FIN" => break,
        _ => return Err(self.error(format!("unknown keyword \"{}\"", tok.text)))
      }
    }
    return Ok(());
  }

  /// `Format FLAGS`: sets both default datatypes.
  fn read_format(&mut self) -> LataResult<()> {
    let tok = self.tokens.expect("format flags")?;
    apply_format(&mut self.db.default_int, &mut self.db.default_float, &tok.text);
    return Ok(());
  }

  /// `Temps T`: starts a new timestep.
  fn read_time(&mut self) -> LataResult<()> {
    let tok = self.tokens.expect("a time value")?;
    let time: f64 = parse_num(&tok.text.replace(['D', 'd'], "E"), "TEMPS", &self.tokens)?;
    self.current_ts = self.db.add_timestep(time)?;
    return Ok(());
  }

  /// `Geom NAME type_elem=T`: a current-style geometry.
  fn read_geom(&mut self) -> LataResult<()> {
    let name = self.tokens.expect("a geometry name")?.text;
    let mut elem_type = ElementType::Unspecified;
    while let Some((key, value)) = self.tokens.attribute()? {
      match key.as_str() {
        "type_elem" => elem_type = value.parse()?,
        _ => return Err(self.error(format!("unknown geometry attribute \"{}\"", key)))
      }
    }
    return self.db.add_geometry(Geometry::new(name, elem_type, self.current_ts));
  }

  /// Reads the `key=value` attributes of a `Champ` statement.
  fn read_field_attrs(&mut self) -> LataResult<FieldAttrs> {
    let mut attrs = FieldAttrs::default();
    while let Some((key, value)) = self.tokens.attribute()? {
      match key.as_str() {
        "geometrie" => attrs.geometry = Some(value),
        "composantes" => {
          attrs.nb_comp = Some(parse_num(&value, &key, &self.tokens)?);
        },
        "size" => attrs.size = Some(parse_num(&value, &key, &self.tokens)?),
        "localisation" => attrs.localisation = Some(value),
        "format" => attrs.format = Some(FormatFlags::parse(&value)),
        "file_offset" => {
          attrs.file_offset = Some(parse_num(&value, &key, &self.tokens)?);
        },
        "nature" => {
          attrs.nature = Some(match value.to_ascii_lowercase().as_str() {
            "scalar" => Nature::Scalar,
            "vector" => Nature::Vector,
            _ => return Err(self.error(format!("bad nature \"{}\"", value)))
          });
        },
        "reference" => attrs.reference = Some(value),
        "noms_compo" => {
          attrs.component_names = Some(
            value.split(',')
              .filter(|s| !s.is_empty())
              .map(str::to_string)
              .collect()
          );
        },
        "legacy_padding" => {
          attrs.padding = Some(LegacyPadding::from_keyword(&value).ok_or_else(
            || self.error(format!("bad padding \"{}\"", value))
          )?);
        },
        _ => return Err(self.error(format!("unknown field attribute \"{}\"", key)))
      }
    }
    return Ok(attrs);
  }

  /// Picks the default datatype for a field and layers its flags on it.
  fn field_datatype(&self, name: &str, flags: Option<&FormatFlags>) -> DataType {
    let names_int = flags.is_some_and(|f| f.names_int());
    let names_real = flags.is_some_and(|f| f.names_real());
    let mut dt = if names_int || (!names_real && is_int_field(name)) {
      self.db.default_int
    } else {
      self.db.default_float
    };
    if let Some(f) = flags {
      dt.apply_flags(f);
    }
    return dt;
  }

  /// Builds a field from a name, a file and its attributes.
  fn build_field(&self, name: String, filename: String, attrs: FieldAttrs) -> Field {
    let mut datatype = self.field_datatype(&name, attrs.format.as_ref());
    datatype.file_offset = attrs.file_offset.unwrap_or(0);
    return Field {
      geometry: attrs.geometry.unwrap_or_default(),
      localisation: attrs.localisation.unwrap_or_default(),
      size: attrs.size,
      nb_comp: attrs.nb_comp,
      nature: attrs.nature.unwrap_or_default(),
      component_names: attrs.component_names.unwrap_or_default(),
      reference: attrs.reference.unwrap_or_default(),
      padding: attrs.padding.unwrap_or_default(),
      ..Field::new(name, filename, self.current_ts, datatype)
    };
  }

  /// `Champ NAME FILE key=value...`: a current-style field.
  fn read_field(&mut self) -> LataResult<()> {
    let name = self.tokens.expect("a field name")?.text;
    let filename = self.tokens.expect("a field file name")?.text;
    let attrs = self.read_field_attrs()?;
    let field = self.build_field(name, filename, attrs);
    return self.db.add_field(field);
  }

  /// `import_file FILE`: parses another master file and merges it in.
  fn read_import(&mut self) -> LataResult<()> {
    let filename = self.tokens.expect("a file name")?.text;
    if self.depth >= MAX_IMPORT_DEPTH {
      return Err(self.error(format!("imports nested too deep at \"{}\"", filename)));
    }
    let path = self.db.path_prefix.join(&filename);
    let text = read_text(&path)?;
    let mut child = LataDb::new();
    child.path_prefix = self.db.path_prefix.clone();
    let missing = {
      let source = path.display().to_string();
      let mut parser = MasterParser::start(&mut child, &text, &source, self.depth + 1)?;
      parser.parse()?;
      parser.missing
    };
    self.missing.extend(missing);
    debug!("Merging imported file \"{}\".", filename);
    return self.db.merge(child);
  }
}

/// Layers the flags of a `Format` statement onto the two default
/// datatypes. Indexing flags only concern integers.
pub(crate) fn apply_format(int: &mut DataType, float: &mut DataType, text: &str) {
  let flags = FormatFlags::parse(text);
  int.apply_flags(&FormatFlags { real_type: ScalarType::Unknown, ..flags });
  float.apply_flags(&FormatFlags {
    int_type: ScalarType::Unknown,
    array_index: ArrayIndex::Unknown,
    ..flags
  });
}

/// Reads a whole text file, mapping failures to FILE_NOT_FOUND.
fn read_text(path: &Path) -> LataResult<String> {
  return fs::read_to_string(path).map_err(|e| LataError::new(
    ErrorKind::FileNotFound,
    format!("cannot read \"{}\": {}", path.display(), e)
  ));
}

impl LataDb {
  /// Replaces the catalog with the contents of a master file. `prefix` is
  /// the directory the master file and its data files are relative to.
  ///
  /// On error the catalog keeps whatever was read before the failing
  /// statement. Missing legacy interface files do not stop the parse, but
  /// make it fail with FILE_NOT_FOUND once everything else is read.
  pub fn read_master_file<P: AsRef<Path>, F: AsRef<Path>>(
    &mut self,
    prefix: P,
    filename: F
  ) -> LataResult<()> {
    let path = prefix.as_ref().join(filename.as_ref());
    let text = read_text(&path)?;
    return self.read_master_text(prefix, &text, &path.display().to_string());
  }

  /// Like `read_master_file`, from text already in memory. `source` is
  /// only used in messages.
  pub fn read_master_text<P: AsRef<Path>>(
    &mut self,
    prefix: P,
    text: &str,
    source: &str
  ) -> LataResult<()> {
    self.reset();
    self.path_prefix = prefix.as_ref().to_path_buf();
    let mut parser = MasterParser::start(self, text, source, 0)?;
    parser.parse()?;
    if !parser.missing.is_empty() {
      return Err(LataError::new(
        ErrorKind::FileNotFound,
        format!(
          "{}: {} interface file(s) missing: {}",
          source,
          parser.missing.len(),
          parser.missing.join(", ")
        )
      ));
    }
    return Ok(());
  }
}
