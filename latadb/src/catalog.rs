//! This module implements the in-memory database of a lata case: timesteps,
//! each owning geometries and fields. Submodules hold the whole-catalog
//! passes (filtering, merging, renaming, conversions).

pub mod passes;

use std::fmt::Display;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::datatype::DataType;
use crate::elements::ElementType;
use crate::error::*;

/// File name of the in-memory pseudo-file.
pub const MEMORY_BUFFER_FILE: &str = "__memory_buffer__";

/// Name of the node coordinates field of a geometry.
pub const NODES_FIELD: &str = "SOMMETS";

/// Name of the element connectivity field of a geometry.
pub const ELEMENTS_FIELD: &str = "ELEMENTS";

/// Name of the face connectivity field of a geometry.
pub const FACES_FIELD: &str = "FACES";

/// Name of the element-to-face field of a geometry.
pub const ELEM_FACES_FIELD: &str = "ELEM_FACES";

/// Where to look for a geometry or field.
#[derive(
  Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, ValueEnum
)]
#[clap(rename_all = "kebab-case")]
pub enum Scope {
  /// Only the requested timestep.
  Current,
  /// The requested timestep, then timestep 0.
  FirstAndCurrent
}

/// What kind of quantity a field holds.
#[derive(
  Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq
)]
pub enum Nature {
  /// Not said.
  #[default]
  Unknown,
  /// One value (or several unrelated ones) per location.
  Scalar,
  /// A vector per location.
  Vector
}

impl Nature {
  /// Returns the master-file keyword, if any.
  pub const fn keyword(&self) -> Option<&'static str> {
    return match self {
      Self::Unknown => None,
      Self::Scalar => Some("scalar"),
      Self::Vector => Some("vector"),
    };
  }
}

/// How an old writer padded 2D data to 3D. Resolved when the field is
/// declared; the reader drops the padding.
#[derive(
  Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq
)]
pub enum LegacyPadding {
  /// Stored as declared.
  #[default]
  None,
  /// 2D node coordinates stored as twice as many 3D nodes.
  Nodes3D,
  /// Connectivity stored with twice the components (extruded elements).
  DoubledComponents
}

impl LegacyPadding {
  /// Returns the keyword for this padding, if any.
  pub const fn keyword(&self) -> Option<&'static str> {
    return match self {
      Self::None => None,
      Self::Nodes3D => Some("nodes3d"),
      Self::DoubledComponents => Some("doubled"),
    };
  }

  /// Parses a padding keyword.
  pub fn from_keyword(s: &str) -> Option<Self> {
    return match s.to_ascii_lowercase().as_str() {
      "none" => Some(Self::None),
      "nodes3d" => Some(Self::Nodes3D),
      "doubled" => Some(Self::DoubledComponents),
      _ => None
    };
  }

  /// Returns the on-disk (rows, components) of a field with the given
  /// logical shape.
  pub const fn disk_shape(&self, size: usize, nb_comp: usize) -> (usize, usize) {
    return match self {
      Self::None => (size, nb_comp),
      Self::Nodes3D => (2 * size, 3),
      Self::DoubledComponents => (size, 2 * nb_comp),
    };
  }
}

/// The unique name of a field within a timestep.
#[derive(
  Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd,
  Ord, Hash, derive_more::From
)]
pub struct FieldUName {
  /// Geometry name (may be empty).
  pub geometry: String,
  /// Field name.
  pub name: String,
  /// Localisation (may be empty).
  pub loc: String
}

impl FieldUName {
  /// Builds a unique name.
  pub fn new<G: Into<String>, N: Into<String>, L: Into<String>>(
    geometry: G,
    name: N,
    loc: L
  ) -> Self {
    return Self {
      geometry: geometry.into(),
      name: name.into(),
      loc: loc.into()
    };
  }
}

impl Display for FieldUName {
  /// Joins the non-empty parts with underscores, e.g. `dom_VITESSE_SOM`.
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = [&self.geometry, &self.name, &self.loc]
      .iter()
      .filter(|s| !s.is_empty())
      .join("_");
    return write!(f, "{}", s);
  }
}

/// A named mesh.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Geometry {
  /// Name, unique within its timestep.
  pub name: String,
  /// Element type.
  pub elem_type: ElementType,
  /// Owning timestep.
  pub timestep: usize
}

impl Geometry {
  /// Creates a geometry descriptor.
  pub fn new<S: Into<String>>(
    name: S,
    elem_type: ElementType,
    timestep: usize
  ) -> Self {
    return Self { name: name.into(), elem_type, timestep };
  }
}

/// A named, typed array stored somewhere in a data file.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Field {
  /// Field name.
  pub name: String,
  /// Geometry the field lives on (empty if none).
  pub geometry: String,
  /// Localisation tag, e.g. `SOM` or `ELEM`.
  pub localisation: String,
  /// Owning timestep.
  pub timestep: usize,
  /// Data file, relative to the database path prefix.
  pub filename: String,
  /// Number of rows.
  pub size: Option<usize>,
  /// Number of components per row.
  pub nb_comp: Option<usize>,
  /// Scalar or vector.
  pub nature: Nature,
  /// On-disk encoding and location.
  pub datatype: DataType,
  /// Human-readable component names.
  pub component_names: Vec<String>,
  /// Name of another field this one refers to.
  pub reference: String,
  /// Legacy 2D padding to undo when reading.
  pub padding: LegacyPadding
}

impl Field {
  /// Creates a field with the essentials set and the rest defaulted.
  pub fn new<N: Into<String>, F: Into<String>>(
    name: N,
    filename: F,
    timestep: usize,
    datatype: DataType
  ) -> Self {
    return Self {
      name: name.into(),
      filename: filename.into(),
      timestep,
      datatype,
      ..Self::default()
    };
  }

  /// Returns the unique name of this field.
  pub fn uname(&self) -> FieldUName {
    return FieldUName::new(
      self.geometry.as_str(),
      self.name.as_str(),
      self.localisation.as_str()
    );
  }

  /// Returns (rows, components), failing if either is unset.
  pub fn shape(&self) -> LataResult<(usize, usize)> {
    return match (self.size, self.nb_comp) {
      (Some(s), Some(c)) => Ok((s, c)),
      _ => Err(LataError::data(format!(
        "field {} has no size or component count", self.uname()
      )))
    };
  }

  /// Returns the on-disk (rows, components), accounting for padding.
  pub fn disk_shape(&self) -> LataResult<(usize, usize)> {
    let (s, c) = self.shape()?;
    return Ok(self.padding.disk_shape(s, c));
  }
}

/// One timestep: a time, geometries and fields.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Timestep {
  /// Physical time. Meaningless for timestep 0.
  pub time: f64,
  /// Geometries, in declaration order.
  pub geometries: Vec<Geometry>,
  /// Fields, in declaration order.
  pub fields: Vec<Field>
}

impl Timestep {
  /// Finds a geometry by name.
  pub fn geometry(&self, name: &str) -> Option<&Geometry> {
    return self.geometries.iter().find(|g| g.name == name);
  }

  /// Finds a field by unique name.
  pub fn field(&self, uname: &FieldUName) -> Option<&Field> {
    return self.fields.iter().find(|f| {
      f.name == uname.name
        && f.geometry == uname.geometry
        && f.localisation == uname.loc
    });
  }

  /// Finds a field by its unique name string.
  pub fn field_by_string(&self, uname: &str) -> Option<&Field> {
    return self.fields.iter().find(|f| f.uname().to_string() == uname);
  }
}

/// A lata database: the catalog of a case, plus the defaults and path
/// needed to read its data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LataDb {
  /// Timesteps; index 0 holds what does not depend on time.
  pub(crate) timesteps: Vec<Timestep>,
  /// Directory data files (and imports) are relative to.
  pub(crate) path_prefix: PathBuf,
  /// First line of the master file.
  pub(crate) header: String,
  /// Case label (second line).
  pub(crate) case_label: String,
  /// Software identifier (third line).
  pub(crate) software_id: String,
  /// Default datatype for integer data.
  pub(crate) default_int: DataType,
  /// Default datatype for float data.
  pub(crate) default_float: DataType,
  /// Whether the master file used the legacy dialect.
  pub(crate) old_style: bool,
  /// Data was written since the master file was last written.
  #[serde(skip)]
  pub(crate) dirty: bool,
  /// The in-memory pseudo-file.
  #[serde(skip)]
  pub(crate) memory: Vec<u8>
}

impl Default for LataDb {
  fn default() -> Self {
    return Self::new();
  }
}

impl LataDb {
  /// Creates an empty database with just timestep 0.
  pub fn new() -> Self {
    return Self {
      timesteps: vec![Timestep::default()],
      path_prefix: PathBuf::new(),
      header: crate::parser::LATA_HEADER.to_string(),
      case_label: String::from("lata"),
      software_id: String::from("latadb"),
      default_int: DataType::default_int(),
      default_float: DataType::default_float(),
      old_style: false,
      dirty: false,
      memory: Vec::new()
    };
  }

  /// Forgets everything, back to a fresh database.
  pub fn reset(&mut self) {
    *self = Self::new();
  }

  /// The number of timesteps, including timestep 0.
  pub fn nb_timesteps(&self) -> usize {
    return self.timesteps.len();
  }

  /// Returns a timestep.
  pub fn timestep(&self, ts: usize) -> LataResult<&Timestep> {
    return self.timesteps.get(ts).ok_or_else(|| LataError::new(
      ErrorKind::BadTimestep,
      format!("timestep {} out of range (have {})", ts, self.timesteps.len())
    ));
  }

  /// Returns a timestep, mutably.
  pub(crate) fn timestep_mut(&mut self, ts: usize) -> LataResult<&mut Timestep> {
    let n = self.timesteps.len();
    return self.timesteps.get_mut(ts).ok_or_else(|| LataError::new(
      ErrorKind::BadTimestep,
      format!("timestep {} out of range (have {})", ts, n)
    ));
  }

  /// Returns all timesteps.
  pub fn timesteps(&self) -> &[Timestep] {
    return &self.timesteps;
  }

  /// Returns the physical time of a timestep.
  pub fn time(&self, ts: usize) -> LataResult<f64> {
    return Ok(self.timestep(ts)?.time);
  }

  /// The path prefix data files are opened relative to.
  pub fn path_prefix(&self) -> &Path {
    return &self.path_prefix;
  }

  /// Sets the path prefix.
  pub fn set_path_prefix<P: Into<PathBuf>>(&mut self, prefix: P) {
    self.path_prefix = prefix.into();
  }

  /// The master file header line.
  pub fn header(&self) -> &str {
    return &self.header;
  }

  /// The case label.
  pub fn case_label(&self) -> &str {
    return &self.case_label;
  }

  /// The software identifier.
  pub fn software_id(&self) -> &str {
    return &self.software_id;
  }

  /// Sets the case label and software identifier written to master files.
  pub fn set_case<C: Into<String>, S: Into<String>>(&mut self, case: C, sw: S) {
    self.case_label = case.into();
    self.software_id = sw.into();
  }

  /// Whether the catalog was read from a legacy master file.
  pub fn is_old_style(&self) -> bool {
    return self.old_style;
  }

  /// The default datatype for integer data.
  pub fn default_int_type(&self) -> &DataType {
    return &self.default_int;
  }

  /// The default datatype for float data.
  pub fn default_float_type(&self) -> &DataType {
    return &self.default_float;
  }

  /// Sets the default datatypes.
  pub fn set_default_types(&mut self, int: DataType, float: DataType) {
    self.default_int = int;
    self.default_float = float;
  }

  /// Whether data was written and the master file is out of date.
  pub fn needs_master_rewrite(&self) -> bool {
    return self.dirty;
  }

  /// The in-memory pseudo-file contents.
  pub fn memory_buffer(&self) -> &[u8] {
    return &self.memory;
  }

  /// Appends a timestep and returns its index. Times must increase.
  pub fn add_timestep(&mut self, time: f64) -> LataResult<usize> {
    if self.timesteps.len() > 1 {
      let last = self.timesteps[self.timesteps.len() - 1].time;
      if time.is_nan() || time <= last {
        return Err(LataError::invalid(format!(
          "timestep time {} does not follow previous time {}", time, last
        )));
      }
    }
    self.timesteps.push(Timestep { time, ..Timestep::default() });
    let idx = self.timesteps.len() - 1;
    debug!("Added timestep {} at time {}.", idx, time);
    return Ok(idx);
  }

  /// Adds a geometry to its timestep. Names are unique per timestep.
  pub fn add_geometry(&mut self, geom: Geometry) -> LataResult<()> {
    let ts = self.timestep_mut(geom.timestep)?;
    if ts.geometry(&geom.name).is_some() {
      return Err(LataError::invalid(format!(
        "geometry {} already exists in timestep {}", geom.name, geom.timestep
      )));
    }
    if geom.name.is_empty() {
      return Err(LataError::invalid("geometry with an empty name"));
    }
    ts.geometries.push(geom);
    return Ok(());
  }

  /// Adds a field to its timestep, after checking it is complete, that its
  /// geometry exists and that its unique name is free.
  pub fn add_field(&mut self, field: Field) -> LataResult<()> {
    self.timestep(field.timestep)?;
    if field.name.is_empty() {
      return Err(LataError::invalid("field with an empty name"));
    }
    if field.filename.is_empty() {
      return Err(LataError::invalid(format!(
        "field {} has no file name", field.uname()
      )));
    }
    field.datatype.check_complete().map_err(|e| LataError::invalid(format!(
      "field {}: {}", field.uname(), e.message()
    )))?;
    field.datatype.layout()?;
    if !field.geometry.is_empty() && self.find_geometry(
      field.timestep, &field.geometry, Scope::FirstAndCurrent
    ).is_none() {
      return Err(LataError::invalid(format!(
        "field {} refers to unknown geometry {}",
        field.name,
        field.geometry
      )));
    }
    let uname = field.uname();
    let ts = self.timestep_mut(field.timestep)?;
    if ts.field(&uname).is_some() {
      return Err(LataError::invalid(format!(
        "field {} already exists in timestep {}", uname, field.timestep
      )));
    }
    ts.fields.push(field);
    return Ok(());
  }

  /// Lookup without logging misses.
  pub(crate) fn find_geometry(
    &self,
    ts: usize,
    name: &str,
    scope: Scope
  ) -> Option<&Geometry> {
    let here = self.timesteps.get(ts)?.geometry(name);
    if here.is_some() || scope == Scope::Current || ts == 0 {
      return here;
    }
    return self.timesteps[0].geometry(name);
  }

  /// Lookup without logging misses.
  pub(crate) fn find_field(
    &self,
    ts: usize,
    uname: &FieldUName,
    scope: Scope
  ) -> Option<&Field> {
    let here = self.timesteps.get(ts)?.field(uname);
    if here.is_some() || scope == Scope::Current || ts == 0 {
      return here;
    }
    return self.timesteps[0].field(uname);
  }

  /// Returns a geometry by name.
  pub fn get_geometry(
    &self,
    ts: usize,
    name: &str,
    scope: Scope
  ) -> LataResult<&Geometry> {
    self.timestep(ts)?;
    return self.find_geometry(ts, name, scope).ok_or_else(|| {
      LataError::not_found(format!(
        "no geometry {} in timestep {} ({:?})", name, ts, scope
      ))
    });
  }

  /// Returns a field by its unique name string, e.g. `dom_VITESSE_SOM`.
  pub fn get_field(
    &self,
    ts: usize,
    uname: &str,
    scope: Scope
  ) -> LataResult<&Field> {
    let here = self.timestep(ts)?.field_by_string(uname);
    let found = match (here, scope) {
      (Some(f), _) => Some(f),
      (None, Scope::FirstAndCurrent) if ts != 0 => {
        self.timesteps[0].field_by_string(uname)
      },
      _ => None
    };
    return found.ok_or_else(|| LataError::not_found(format!(
      "no field {} in timestep {} ({:?})", uname, ts, scope
    )));
  }

  /// Returns a field by its unique name.
  pub fn get_field_by_uname(
    &self,
    ts: usize,
    uname: &FieldUName,
    scope: Scope
  ) -> LataResult<&Field> {
    self.timestep(ts)?;
    return self.find_field(ts, uname, scope).ok_or_else(|| {
      LataError::not_found(format!(
        "no field {} in timestep {} ({:?})", uname, ts, scope
      ))
    });
  }

  /// Returns the field of a geometry with a given name and no localisation,
  /// e.g. its `SOMMETS`.
  pub fn geometry_field(
    &self,
    ts: usize,
    geometry: &str,
    name: &str
  ) -> LataResult<&Field> {
    let uname = FieldUName::new(geometry, name, "");
    return self.get_field_by_uname(ts, &uname, Scope::FirstAndCurrent);
  }

  /// Lists geometry names, de-duplicated, in declaration order.
  pub fn geometry_names(&self, ts: usize, scope: Scope) -> LataResult<Vec<String>> {
    let mut names: Vec<String> = self.timestep(ts)?
      .geometries
      .iter()
      .map(|g| g.name.clone())
      .collect();
    if scope == Scope::FirstAndCurrent && ts != 0 {
      names.extend(self.timesteps[0].geometries.iter().map(|g| g.name.clone()));
    }
    return Ok(names.into_iter().unique().collect());
  }

  /// Lists field unique names, de-duplicated, in declaration order.
  pub fn field_unames(
    &self,
    ts: usize,
    scope: Scope
  ) -> LataResult<Vec<FieldUName>> {
    let mut names: Vec<FieldUName> = self.timestep(ts)?
      .fields
      .iter()
      .map(|f| f.uname())
      .collect();
    if scope == Scope::FirstAndCurrent && ts != 0 {
      names.extend(self.timesteps[0].fields.iter().map(|f| f.uname()));
    }
    return Ok(names.into_iter().unique().collect());
  }

  /// Changes the element type of an existing geometry.
  pub fn set_geometry_elem_type(
    &mut self,
    ts: usize,
    name: &str,
    elem_type: ElementType
  ) -> LataResult<()> {
    let tstep = self.timestep_mut(ts)?;
    let geom = tstep.geometries.iter_mut().find(|g| g.name == name);
    return match geom {
      Some(g) => {
        g.elem_type = elem_type;
        Ok(())
      },
      None => Err(LataError::not_found(format!(
        "no geometry {} in timestep {}", name, ts
      )))
    };
  }

  /// Returns a field mutably, current timestep only.
  pub(crate) fn field_mut(
    &mut self,
    ts: usize,
    uname: &FieldUName
  ) -> LataResult<&mut Field> {
    let tstep = self.timestep_mut(ts)?;
    let found = tstep.fields.iter_mut().find(|f| {
      f.name == uname.name
        && f.geometry == uname.geometry
        && f.localisation == uname.loc
    });
    return found.ok_or_else(|| LataError::not_found(format!(
      "no field {} in timestep {}", uname, ts
    )));
  }
}
