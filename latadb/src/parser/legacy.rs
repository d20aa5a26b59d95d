//! The legacy dialect: `Geometrie` statements describing a whole mesh file,
//! `Champ` statements whose shape is guessed from names, and self-describing
//! interface files.

use std::io::{BufRead, Seek};
use std::str::FromStr;

use log::{debug, warn};

use super::*;
use crate::codec::{Codec, DataStream};
use crate::io::skip_field;

/// Localisation tags a legacy file name may carry.
const LOCALISATIONS: &[&str] = &["SOM", "ELEM", "FACES"];

/// Known vector fields of legacy files.
const LEGACY_VECTORS: &[&str] = &[
  "VITESSE", "VELOCITY", "GRADIENT_PRESSION", "ACCELERATION", "DEPLACEMENT",
  "NORMALE_UNITAIRE", "FORCE"
];

/// Known scalar fields of legacy files.
const LEGACY_SCALARS: &[&str] = &[
  "PRESSION", "PRESSURE", "TEMPERATURE", "CONCENTRATION", "MASSE_VOLUMIQUE",
  "VISCOSITE_TURBULENTE", "K", "EPS", "INDICATRICE", "DIVERGENCE_U",
  "CHALEUR_SPECIFIQUE", "IRRADIANCE", "ENERGIE_CINETIQUE"
];

/// Joint blocks, in file order.
const JOINTS: &[&str] = &["JOINTS_SOMMETS", "JOINTS_ELEMENTS", "JOINTS_FACES"];

/// Whether a geometry moves with time and brings its own file layout.
pub(crate) fn is_moving_geometry(name: &str) -> bool {
  let up = name.to_ascii_uppercase();
  return up == "INTERFACES" || up == "PARTICULES";
}

/// Guesses the nature of a legacy field from its name.
fn legacy_nature(name: &str) -> Nature {
  let up = name.to_ascii_uppercase();
  if LEGACY_VECTORS.contains(&up.as_str()) {
    return Nature::Vector;
  }
  if !LEGACY_SCALARS.contains(&up.as_str()) {
    warn!("Unknown legacy field {}, assuming a scalar.", name);
  }
  return Nature::Scalar;
}

/// Finds `LOC` and `GEOM` in a file name shaped like `...NAME.LOC.GEOM...`.
/// Falls back to the first localisation tag followed by another part.
fn infer_from_filename(name: &str, filename: &str) -> (Option<String>, Option<String>) {
  let parts: Vec<&str> = filename.split('.').collect();
  let is_loc = |p: &str| LOCALISATIONS.contains(&p.to_ascii_uppercase().as_str());
  for i in 0..parts.len() {
    if parts[i].eq_ignore_ascii_case(name)
      && i + 2 < parts.len()
      && is_loc(parts[i + 1]) {
      return (
        Some(parts[i + 1].to_ascii_uppercase()),
        Some(parts[i + 2].to_string())
      );
    }
  }
  for j in 0..parts.len().saturating_sub(1) {
    if is_loc(parts[j]) {
      return (Some(parts[j].to_ascii_uppercase()), Some(parts[j + 1].to_string()));
    }
  }
  return (None, None);
}

/// Records where a block starts and moves past it.
fn place<S: BufRead + Seek>(codec: &mut Codec<S>, mut field: Field) -> LataResult<Field> {
  let pos = codec.position()?;
  field.datatype.file_offset = i64::try_from(pos).map_err(|_| LataError::new(
    ErrorKind::IntegerOverflow,
    format!("offset {} in \"{}\"", pos, codec.filename())
  ))?;
  skip_field(codec, &field)?;
  return Ok(field);
}

/// The attributes of a `Geometrie` statement.
#[derive(Debug, Default)]
struct GeometryAttrs {
  /// `nb_som_tot`
  nb_som: Option<usize>,
  /// `nb_elem_tot`
  nb_elem: Option<usize>,
  /// `nb_faces_tot`
  nb_faces: Option<usize>,
  /// `type_elem`
  elem_type: Option<String>,
  /// `dimension`
  dimension: Option<usize>,
  /// `nb_som_elem`
  nb_som_elem: Option<usize>,
  /// `format=ASCII`
  ascii: bool,
  /// Joint blocks and their row counts.
  joints: Vec<(&'static str, usize)>
}

impl MasterParser<'_> {
  /// Reads `Geometrie` attributes and bare joint declarations.
  fn read_geometry_attrs(&mut self) -> LataResult<GeometryAttrs> {
    let mut attrs = GeometryAttrs::default();
    loop {
      if let Some((key, value)) = self.tokens.attribute()? {
        match key.as_str() {
          "nb_som_tot" => attrs.nb_som = Some(parse_num(&value, &key, &self.tokens)?),
          "nb_elem_tot" => attrs.nb_elem = Some(parse_num(&value, &key, &self.tokens)?),
          "nb_faces_tot" => {
            attrs.nb_faces = Some(parse_num(&value, &key, &self.tokens)?);
          },
          "type_elem" => attrs.elem_type = Some(value),
          "dimension" => {
            attrs.dimension = Some(parse_num(&value, &key, &self.tokens)?);
          },
          "nb_som_elem" => {
            attrs.nb_som_elem = Some(parse_num(&value, &key, &self.tokens)?);
          },
          "format" => match value.to_ascii_uppercase().as_str() {
            "ASCII" => attrs.ascii = true,
            "BINARY" => attrs.ascii = false,
            _ => return Err(self.error(format!("bad geometry format \"{}\"", value)))
          },
          _ => return Err(self.error(format!("unknown geometry attribute \"{}\"", key)))
        }
        continue;
      }
      let joint = self.tokens.peek().and_then(|t| {
        let up = t.text.to_ascii_uppercase();
        return JOINTS.iter().copied().find(|j| *j == up);
      });
      let Some(joint) = joint else {
        break;
      };
      self.tokens.next_token();
      let n = self.tokens.expect("a joint count")?;
      attrs.joints.push((joint, parse_num(&n.text, joint, &self.tokens)?));
    }
    attrs.joints.sort_by_key(|(j, _)| JOINTS.iter().position(|k| k == j));
    return Ok(attrs);
  }

  /// `Geometrie NAME FILE key=value...`: a mesh whose blocks are packed in
  /// one file. Block offsets are found by walking the file.
  pub(super) fn read_legacy_geometry(&mut self) -> LataResult<()> {
    let name = self.tokens.expect("a geometry name")?.text;
    let filename = self.tokens.expect("a geometry file name")?.text;
    let attrs = self.read_geometry_attrs()?;
    let missing = |what: &str| self.error(format!("geometry {} has no {}", name, what));
    let kw = attrs.elem_type.clone().ok_or_else(|| missing("type_elem"))?;
    let nb_som = attrs.nb_som.ok_or_else(|| missing("nb_som_tot"))?;
    let nb_elem = attrs.nb_elem.ok_or_else(|| missing("nb_elem_tot"))?;
    let elem_type = ElementType::from_str(&kw)?;
    let dimension = attrs.dimension.unwrap_or(
      if elem_type.dimension() == 3 || ElementType::keyword_is_3d(&kw) { 3 } else { 2 }
    );
    let nb_som_elem = attrs.nb_som_elem
      .or(elem_type.nodes_per_element())
      .ok_or_else(|| missing("nb_som_elem"))?;
    let padded = self.db.old_style && dimension == 2 && !is_moving_geometry(&name);

    let ts = self.current_ts;
    let mut int_dt = self.db.default_int;
    let mut float_dt = self.db.default_float;
    if attrs.ascii {
      int_dt.byte_order = ByteOrder::Ascii;
      float_dt.byte_order = ByteOrder::Ascii;
    }
    let block = |fname: &str, rows: usize, comps: usize, dt: DataType, pad: bool| {
      let padding = match (pad, fname) {
        (false, _) => LegacyPadding::None,
        (true, NODES_FIELD) => LegacyPadding::Nodes3D,
        (true, _) => LegacyPadding::DoubledComponents
      };
      return Field {
        geometry: name.clone(),
        size: Some(rows),
        nb_comp: Some(comps),
        padding,
        ..Field::new(fname, filename.as_str(), ts, dt)
      };
    };
    let mut fields = vec![
      block(NODES_FIELD, nb_som, dimension, float_dt, padded),
      block(ELEMENTS_FIELD, nb_elem, nb_som_elem, int_dt, padded)
    ];
    if let Some(nb_faces) = attrs.nb_faces {
      let per_face = elem_type.nodes_per_face()
        .ok_or_else(|| missing("face description"))?;
      let per_elem = elem_type.faces_per_element()
        .ok_or_else(|| missing("face description"))?;
      fields.push(block(FACES_FIELD, nb_faces, per_face, int_dt, padded));
      fields.push(block(ELEM_FACES_FIELD, nb_elem, per_elem, int_dt, false));
    }
    let joint_dt = DataType { array_index: ArrayIndex::NotAnIndex, ..int_dt };
    for (joint, n) in attrs.joints.iter() {
      fields.push(block(*joint, *n, 2, joint_dt, false));
    }

    let fields = {
      let mut codec = self.db.open_read(&filename)?;
      fields.into_iter()
        .map(|f| place(&mut codec, f))
        .collect::<LataResult<Vec<Field>>>()?
    };
    debug!(
      "Legacy geometry {}: {} nodes, {} elements, {} blocks{}.",
      name,
      nb_som,
      nb_elem,
      fields.len(),
      if padded { ", padded" } else { "" }
    );
    self.db.add_geometry(Geometry::new(name.as_str(), elem_type, ts))?;
    for field in fields {
      self.db.add_field(field)?;
    }
    return Ok(());
  }

  /// `Champ NAME FILE [key=value...]`: a legacy field. Whatever the
  /// attributes do not say is inferred from the names involved.
  pub(super) fn read_legacy_field(&mut self) -> LataResult<()> {
    let name = self.tokens.expect("a field name")?.text;
    let filename = self.tokens.expect("a field file name")?.text;
    if is_moving_geometry(&name) {
      return self.read_interface_file(name, filename);
    }
    let mut attrs = self.read_field_attrs()?;
    let (loc, geom) = infer_from_filename(&name, &filename);
    let loc = attrs.localisation.clone().or(loc).ok_or_else(|| {
      self.error(format!("cannot infer the localisation of {}", name))
    })?;
    let geom = attrs.geometry.clone().or(geom).ok_or_else(|| {
      self.error(format!("cannot infer the geometry of {}", name))
    })?;
    let geom_field = |fname: &str| {
      let uname = FieldUName::new(geom.as_str(), fname, "");
      return self.db.find_field(self.current_ts, &uname, Scope::FirstAndCurrent);
    };
    let nodes = geom_field(NODES_FIELD).ok_or_else(|| {
      self.error(format!("field {} is on unknown geometry {}", name, geom))
    })?;
    let dimension = nodes.nb_comp.unwrap_or(0);
    let nature = attrs.nature.unwrap_or_else(|| legacy_nature(&name));
    let nb_comp = attrs.nb_comp.unwrap_or(match nature {
      Nature::Vector => dimension,
      _ => 1
    });
    let size = match attrs.size {
      Some(s) => s,
      None => {
        let source = match loc.to_ascii_uppercase().as_str() {
          "SOM" => NODES_FIELD,
          "ELEM" => ELEMENTS_FIELD,
          "FACES" => FACES_FIELD,
          _ => return Err(self.error(format!("unknown localisation {}", loc)))
        };
        geom_field(source).and_then(|f| f.size).ok_or_else(|| {
          self.error(format!("geometry {} has no {} block", geom, source))
        })?
      }
    };
    attrs.localisation = Some(loc);
    attrs.geometry = Some(geom);
    attrs.nature = Some(nature);
    attrs.nb_comp = Some(nb_comp);
    attrs.size = Some(size);
    let field = self.build_field(name, filename, attrs);
    return self.db.add_field(field);
  }

  /// Reads a self-describing interface file: element type, dimension, node
  /// and element counts, the two mesh blocks, then named fields stored one
  /// component at a time. A missing file is counted, not fatal.
  fn read_interface_file(&mut self, name: String, filename: String) -> LataResult<()> {
    if filename != MEMORY_BUFFER_FILE && !self.db.path_prefix.join(&filename).exists() {
      warn!("Interface file \"{}\" is missing.", filename);
      self.missing.push(filename);
      return Ok(());
    }
    let ts = self.current_ts;
    let int_dt = self.db.default_int;
    let float_dt = self.db.default_float;
    let mut fields: Vec<Field> = Vec::new();
    let elem_type;
    {
      let mut codec = self.db.open_read(&filename)?;
      let header = |codec: &mut Codec<DataStream<'_>>| {
        codec.set_encoding(int_dt.byte_order, int_dt.scalar_type);
      };
      header(&mut codec);
      elem_type = ElementType::from_str(&codec.read_string()?)?;
      let counts: Vec<i64> = codec.read(3)?;
      let count = |i: usize| usize::try_from(counts[i]).map_err(|_| LataError::data(
        format!("negative count {} in \"{}\"", counts[i], filename)
      ));
      let (dim, nb_som, nb_elem) = (count(0)?, count(1)?, count(2)?);
      let per_elem = elem_type.nodes_per_element().ok_or_else(|| LataError::data(
        format!("element type {} in \"{}\" has no fixed node count", elem_type, filename)
      ))?;
      let mesh_block = |fname: &str, rows: usize, comps: usize, dt: DataType| Field {
        geometry: name.clone(),
        size: Some(rows),
        nb_comp: Some(comps),
        ..Field::new(fname, filename.as_str(), ts, dt)
      };
      fields.push(place(&mut codec, mesh_block(NODES_FIELD, nb_som, dim, float_dt))?);
      fields.push(place(&mut codec, mesh_block(ELEMENTS_FIELD, nb_elem, per_elem, int_dt))?);
      header(&mut codec);
      let nb_fields: Vec<i64> = codec.read(1)?;
      for _ in 0..nb_fields[0].max(0) {
        header(&mut codec);
        let fname = codec.read_string()?;
        let loc = codec.read_string()?.to_ascii_uppercase();
        let nb_comp: Vec<i64> = codec.read(1)?;
        let rows = match loc.as_str() {
          "SOM" => nb_som,
          "ELEM" => nb_elem,
          _ => return Err(LataError::data(format!(
            "field {} in \"{}\" has unknown localisation {}", fname, filename, loc
          )))
        };
        for _ in 0..nb_comp[0].max(0) {
          header(&mut codec);
          let cname = codec.read_string()?;
          let sub_name = if nb_comp[0] > 1 {
            format!("{}_{}", fname, cname)
          } else {
            fname.clone()
          };
          let field = Field {
            localisation: loc.clone(),
            nature: Nature::Scalar,
            component_names: vec![cname],
            ..mesh_block(sub_name.as_str(), rows, 1, float_dt)
          };
          fields.push(place(&mut codec, field)?);
        }
      }
    }
    debug!("Interface file \"{}\": {} blocks.", filename, fields.len());
    self.db.add_geometry(Geometry::new(name.as_str(), elem_type, ts))?;
    for field in fields {
      self.db.add_field(field)?;
    }
    return Ok(());
  }
}
