use std::fs::{self, File};
use std::path::Path;

use nalgebra::DMatrix;
use tempfile::TempDir;

use crate::codec::Codec;
use crate::io::write_block;
use crate::prelude::*;

/// A datatype with the usual index convention for its element type.
fn datatype(
  byte_order: ByteOrder,
  scalar_type: ScalarType,
  ordering: DataOrdering,
  markers: MarkerPolicy
) -> DataType {
  let array_index = if scalar_type.is_int() {
    ArrayIndex::CIndexing
  } else {
    ArrayIndex::NotAnIndex
  };
  return DataType {
    byte_order,
    scalar_type,
    array_index,
    ordering,
    markers,
    marker_type: ScalarType::Int32,
    file_offset: 0
  };
}

/// An empty database rooted in a fresh temporary directory.
fn scratch() -> (TempDir, LataDb) {
  let dir = TempDir::new().unwrap();
  let mut db = LataDb::new();
  db.set_path_prefix(dir.path());
  return (dir, db);
}

/// Declares a field without geometry in timestep 0.
fn declare(
  db: &mut LataDb,
  name: &str,
  filename: &str,
  shape: (usize, usize),
  dt: DataType
) -> FieldUName {
  let field = Field {
    size: Some(shape.0),
    nb_comp: Some(shape.1),
    ..Field::new(name, filename, 0, dt)
  };
  let uname = field.uname();
  db.add_field(field).unwrap();
  return uname;
}

/// A `rows x comps` float matrix with distinct values.
fn float_matrix(rows: usize, comps: usize) -> DMatrix<f64> {
  return DMatrix::from_fn(rows, comps, |r, c| (r * 10 + c) as f64 + 0.5);
}

/// Writes a master file next to the data.
fn write_master(dir: &Path, name: &str, text: &str) {
  fs::write(dir.join(name), text).unwrap();
}

#[test]
fn test_layouts_round_trip() {
  let orders = [ByteOrder::LittleEndian, ByteOrder::BigEndian, ByteOrder::Ascii];
  let layouts = [
    (DataOrdering::C, MarkerPolicy::NoMarkers),
    (DataOrdering::C, MarkerPolicy::Single),
    (DataOrdering::Fortran, MarkerPolicy::NoMarkers),
    (DataOrdering::Fortran, MarkerPolicy::Single),
    (DataOrdering::Fortran, MarkerPolicy::Multiple),
  ];
  let data = float_matrix(7, 3);
  for bo in orders.iter() {
    for (ord, mk) in layouts.iter() {
      let (_dir, mut db) = scratch();
      let dt = datatype(*bo, ScalarType::Real64, *ord, *mk);
      let uname = declare(&mut db, "V", "v.bin", (7, 3), dt);
      db.write_data(0, &uname, &data).unwrap();
      let field = db.get_field_by_uname(0, &uname, Scope::Current).unwrap();
      let back: DMatrix<f64> = db.read_data(field, 0, None).unwrap();
      assert_eq!(back, data, "{} {} {}", bo, ord, mk);
      let middle: DMatrix<f64> = db.read_data(field, 2, Some(3)).unwrap();
      assert_eq!(middle, data.rows(2, 3).into_owned(), "{} {} {}", bo, ord, mk);
    }
  }
}

/// Writes `data` to a fresh field of datatype `dt`, then reads it back whole,
/// as a middle range and as an unordered row list.
fn check_round_trip<T: LataScalar + std::fmt::Debug>(dt: DataType, data: &DMatrix<T>) {
  let label = format!("{} {} {} {} {}", dt.byte_order, dt.scalar_type, dt.ordering, dt.markers, dt.marker_type);
  let (_dir, mut db) = scratch();
  let shape = (data.nrows(), data.ncols());
  let uname = declare(&mut db, "V", "v.bin", shape, dt);
  db.write_data(0, &uname, data).unwrap();
  let field = db.get_field_by_uname(0, &uname, Scope::Current).unwrap();
  let back: DMatrix<T> = db.read_data(field, 0, None).unwrap();
  assert_eq!(&back, data, "{}", label);
  let middle: DMatrix<T> = db.read_data(field, 3, Some(CHUNK_ROWS)).unwrap();
  assert_eq!(middle, data.rows(3, CHUNK_ROWS).into_owned(), "{}", label);
  let last = shape.0 - 1;
  let wanted = [last, 0, CHUNK_ROWS, CHUNK_ROWS - 1, 17, CHUNK_ROWS];
  let picked: DMatrix<T> = db.read_data_rows(field, &wanted).unwrap();
  for (k, &r) in wanted.iter().enumerate() {
    let single: DMatrix<T> = db.read_data(field, r, Some(1)).unwrap();
    assert_eq!(picked.row(k), single.row(0), "row {} ({})", r, label);
    assert_eq!(picked.row(k), data.row(r), "row {} ({})", r, label);
  }
}

#[test]
fn test_all_types_and_layouts() {
  let layouts = [
    (DataOrdering::C, MarkerPolicy::NoMarkers),
    (DataOrdering::C, MarkerPolicy::Single),
    (DataOrdering::Fortran, MarkerPolicy::NoMarkers),
    (DataOrdering::Fortran, MarkerPolicy::Single),
    (DataOrdering::Fortran, MarkerPolicy::Multiple),
  ];
  let types = [ScalarType::Int32, ScalarType::Int64, ScalarType::Real32, ScalarType::Real64];
  let rows = CHUNK_ROWS + 300;
  let ints: DMatrix<i64> = DMatrix::from_fn(rows, 2, |r, c| (r * 10 + c) as i64);
  let reals = float_matrix(rows, 2);
  for (k, (ord, mk)) in layouts.iter().enumerate() {
    for ty in types.iter() {
      let bo = if k % 2 == 0 { ByteOrder::LittleEndian } else { ByteOrder::BigEndian };
      let mut dt = datatype(bo, *ty, *ord, *mk);
      if k >= 3 {
        dt.marker_type = ScalarType::Int64;
      }
      if ty.is_int() {
        check_round_trip(dt, &ints);
        let one_based = DataType { array_index: ArrayIndex::FIndexing, ..dt };
        check_round_trip(one_based, &ints);
      } else {
        check_round_trip(dt, &reals);
      }
    }
  }
}

#[test]
fn test_out_of_range_reads() {
  let (_dir, mut db) = scratch();
  let dt = datatype(ByteOrder::LittleEndian, ScalarType::Real64, DataOrdering::C, MarkerPolicy::Single);
  let uname = declare(&mut db, "V", "v.bin", (7, 3), dt);
  db.write_data(0, &uname, &float_matrix(7, 3)).unwrap();
  let field = db.get_field_by_uname(0, &uname, Scope::Current).unwrap();
  for (start, count) in [(usize::MAX, Some(2)), (usize::MAX, None), (5, Some(usize::MAX)), (6, Some(2))] {
    let err = db.read_data::<f64>(field, start, count).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataError, "{} {:?}", start, count);
  }
  let tail: DMatrix<f64> = db.read_data(field, 7, None).unwrap();
  assert_eq!(tail.nrows(), 0);
  let last: DMatrix<f64> = db.read_data(field, 6, None).unwrap();
  assert_eq!(last, float_matrix(7, 3).rows(6, 1).into_owned());
}

#[test]
fn test_scalar_types() {
  let (_dir, mut db) = scratch();
  let ints: DMatrix<i64> = DMatrix::from_row_slice(2, 2, &[1, -2, 3, 40000]);
  for (i, ty) in [ScalarType::Int32, ScalarType::Int64].iter().enumerate() {
    let dt = datatype(ByteOrder::LittleEndian, *ty, DataOrdering::C, MarkerPolicy::Single);
    let uname = declare(&mut db, &format!("I{}", i), &format!("i{}.bin", i), (2, 2), dt);
    db.write_data(0, &uname, &ints).unwrap();
    let field = db.get_field_by_uname(0, &uname, Scope::Current).unwrap();
    let back: DMatrix<i64> = db.read_data(field, 0, None).unwrap();
    assert_eq!(back, ints);
    let narrow: DMatrix<i32> = db.read_data(field, 0, None).unwrap();
    assert_eq!(narrow[(1, 1)], 40000);
  }
  let reals: DMatrix<f32> = DMatrix::from_row_slice(1, 3, &[0.25, -1.5, 8.0]);
  let dt = datatype(
    ByteOrder::BigEndian, ScalarType::Real32, DataOrdering::Fortran, MarkerPolicy::Multiple
  );
  let uname = declare(&mut db, "R", "r.bin", (1, 3), dt);
  db.write_data(0, &uname, &reals).unwrap();
  let field = db.get_field_by_uname(0, &uname, Scope::Current).unwrap();
  let wide: DMatrix<f64> = db.read_data(field, 0, None).unwrap();
  assert_eq!(wide, DMatrix::from_row_slice(1, 3, &[0.25, -1.5, 8.0]));
  // integers cannot come out of a float field
  let err = db.read_data::<i32>(field, 0, None).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::DataError);
}

#[test]
fn test_integer_overflow() {
  let (_dir, mut db) = scratch();
  let dt = datatype(ByteOrder::LittleEndian, ScalarType::Int32, DataOrdering::C, MarkerPolicy::Single);
  let uname = declare(&mut db, "I", "i.bin", (1, 1), dt);
  let big: DMatrix<i64> = DMatrix::from_element(1, 1, i64::from(i32::MAX) + 1);
  let err = db.write_data(0, &uname, &big).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::IntegerOverflow);
  let dt = datatype(ByteOrder::LittleEndian, ScalarType::Int64, DataOrdering::C, MarkerPolicy::Single);
  let uname = declare(&mut db, "J", "j.bin", (1, 1), dt);
  db.write_data(0, &uname, &big).unwrap();
  let field = db.get_field_by_uname(0, &uname, Scope::Current).unwrap();
  let err = db.read_data::<i32>(field, 0, None).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::IntegerOverflow);
}

#[test]
fn test_row_lists_across_chunks() {
  let rows = 3 * CHUNK_ROWS - 72;
  let data = float_matrix(rows, 2);
  let wanted = [rows - 1, 0, 1500, CHUNK_ROWS, CHUNK_ROWS - 1, 0, 2 * CHUNK_ROWS, 7];
  let layouts = [
    (DataOrdering::C, MarkerPolicy::Single),
    (DataOrdering::Fortran, MarkerPolicy::Multiple),
    (DataOrdering::Fortran, MarkerPolicy::NoMarkers),
  ];
  for (ord, mk) in layouts.iter() {
    let (_dir, mut db) = scratch();
    let dt = datatype(ByteOrder::LittleEndian, ScalarType::Real64, *ord, *mk);
    let uname = declare(&mut db, "V", "v.bin", (rows, 2), dt);
    db.write_data(0, &uname, &data).unwrap();
    let field = db.get_field_by_uname(0, &uname, Scope::Current).unwrap();
    let picked: DMatrix<f64> = db.read_data_rows(field, &wanted).unwrap();
    for (k, &r) in wanted.iter().enumerate() {
      assert_eq!(picked.row(k), data.row(r), "row {} ({} {})", r, ord, mk);
    }
    let err = db.read_data_rows::<f64>(field, &[rows]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataError);
  }
}

#[test]
fn test_one_based_indexes() {
  let (dir, mut db) = scratch();
  let dt = DataType {
    array_index: ArrayIndex::FIndexing,
    ..DataType::default_int()
  };
  let uname = declare(&mut db, ELEMENTS_FIELD, "e.bin", (2, 2), dt);
  let elems: DMatrix<i32> = DMatrix::from_row_slice(2, 2, &[0, 1, 2, 3]);
  db.write_data(0, &uname, &elems).unwrap();
  // marker, then the shifted values
  let raw = fs::read(dir.path().join("e.bin")).unwrap();
  assert_eq!(raw.len(), 6 * 4);
  assert_eq!(raw[0..4], 4i32.to_le_bytes());
  assert_eq!(raw[4..8], 1i32.to_le_bytes());
  assert_eq!(raw[16..20], 4i32.to_le_bytes());
  let field = db.get_field_by_uname(0, &uname, Scope::Current).unwrap();
  let back: DMatrix<i32> = db.read_data(field, 0, None).unwrap();
  assert_eq!(back, elems);
  // float requests are not shifted, and fail on integer data anyway
  assert!(db.read_data::<f32>(field, 0, None).is_err());
}

#[test]
fn test_remapped_ids() {
  let (_dir, mut db) = scratch();
  let dt = DataType {
    scalar_type: ScalarType::Int64,
    array_index: ArrayIndex::NotAnIndex,
    ..DataType::default_int()
  };
  let uname = declare(&mut db, "IDS", "ids.bin", (2, 2), dt);
  let ids: DMatrix<i64> = DMatrix::from_row_slice(2, 2, &[10, 12, 11, 10]);
  db.write_data(0, &uname, &ids).unwrap();
  let field = db.get_field_by_uname(0, &uname, Scope::Current).unwrap();
  let table = IdMap::new(&[10, 11, 12]);
  let positions = db.read_remapped(field, &table).unwrap();
  assert_eq!(positions, DMatrix::from_row_slice(2, 2, &[0, 2, 1, 0]));
  let short = IdMap::new(&[10, 11]);
  let err = db.read_remapped(field, &short).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::DataError);
}

#[test]
fn test_id_tables() {
  let seq = IdMap::new(&[5, 6, 7, 8]);
  assert!(matches!(seq, IdMap::Sequential { first: 5, count: 4 }));
  assert_eq!(seq.id_to_index(7), Some(2));
  assert_eq!(seq.id_to_index(4), None);
  assert_eq!(seq.id_to_index(9), None);
  let rev = IdMap::new(&[3, 1, 4, 2, 6]);
  assert!(matches!(rev, IdMap::Reverse { .. }));
  assert_eq!(rev.id_to_index(4), Some(2));
  assert_eq!(rev.id_to_index(5), None);
  assert_eq!(rev.id_to_index(0), None);
  assert_eq!(rev.len(), 5);
  let sparse = IdMap::new(&[1000, 3, 999_999, 3]);
  assert!(matches!(sparse, IdMap::Sorted(_)));
  // repeated ids keep their last position
  assert_eq!(sparse.id_to_index(3), Some(3));
  assert_eq!(sparse.id_to_index(999_999), Some(2));
  assert_eq!(sparse.id_to_index(4), None);
  assert_eq!(sparse.len(), 3);
  let runs: [Vec<i64>; 3] = [
    (100..400).collect(),
    (0..300).map(|i| if i % 2 == 0 { 1000 + i } else { 1000 + 600 - i }).collect(),
    (0..300).map(|i| (i * 7919) % 100_003 - 50_000).collect(),
  ];
  for ids in runs.iter() {
    let table = IdMap::new(ids);
    assert_eq!(table.len(), ids.len());
    for (i, id) in ids.iter().enumerate() {
      assert_eq!(table.id_to_index(*id), Some(i), "id {} in {:?}", id, table);
    }
    let max = ids.iter().copied().max().unwrap();
    let min = ids.iter().copied().min().unwrap();
    assert_eq!(table.id_to_index(max + 1), None);
    assert_eq!(table.id_to_index(min - 1), None);
  }
  assert!(matches!(IdMap::new(&runs[0]), IdMap::Sequential { first: 100, count: 300 }));
  assert!(matches!(IdMap::new(&runs[1]), IdMap::Reverse { .. }));
  assert!(matches!(IdMap::new(&runs[2]), IdMap::Sorted(_)));
  // holes inside the dense span
  assert_eq!(IdMap::new(&runs[1]).id_to_index(1299), None);
  let empty = IdMap::new(&[]);
  assert!(empty.is_empty());
  assert_eq!(empty.id_to_index(0), None);
}

#[test]
fn test_catalog_invariants() {
  let (_dir, mut db) = scratch();
  db.add_geometry(Geometry::new("dom", ElementType::Triangle, 0)).unwrap();
  let dup = db.add_geometry(Geometry::new("dom", ElementType::Triangle, 0));
  assert_eq!(dup.unwrap_err().kind(), ErrorKind::InvalidOperation);
  let field = Field {
    geometry: String::from("dom"),
    localisation: String::from("SOM"),
    size: Some(3),
    nb_comp: Some(1),
    ..Field::new("T", "t.bin", 0, DataType::default_float())
  };
  db.add_field(field.clone()).unwrap();
  let err = db.add_field(field.clone()).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidOperation);
  // same name, other localisation: a different field
  db.add_field(Field { localisation: String::from("ELEM"), ..field.clone() }).unwrap();
  let orphan = Field { geometry: String::from("nope"), ..field.clone() };
  assert_eq!(db.add_field(orphan).unwrap_err().kind(), ErrorKind::InvalidOperation);
  let incomplete = Field {
    name: String::from("U"),
    datatype: DataType::unknown(),
    ..field.clone()
  };
  assert_eq!(db.add_field(incomplete).unwrap_err().kind(), ErrorKind::InvalidOperation);
  let bad_layout = Field {
    name: String::from("W"),
    datatype: datatype(
      ByteOrder::LittleEndian, ScalarType::Real32, DataOrdering::C, MarkerPolicy::Multiple
    ),
    ..field.clone()
  };
  assert_eq!(db.add_field(bad_layout).unwrap_err().kind(), ErrorKind::DataError);
  assert_eq!(db.field_unames(0, Scope::Current).unwrap().len(), 2);
  let ts = db.add_timestep(0.5).unwrap();
  // the same field in another timestep is fine, once
  db.add_field(Field { timestep: ts, ..field.clone() }).unwrap();
  let again = db.add_field(Field { timestep: ts, ..field.clone() });
  assert_eq!(again.unwrap_err().kind(), ErrorKind::InvalidOperation);
  assert_eq!(db.field_unames(ts, Scope::Current).unwrap().len(), 1);
  let err = db.add_timestep(0.5).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidOperation);
  assert_eq!(db.timestep(5).unwrap_err().kind(), ErrorKind::BadTimestep);
}

#[test]
fn test_first_timestep_fallback() {
  let (_dir, mut db) = scratch();
  db.add_geometry(Geometry::new("dom", ElementType::Hexahedron, 0)).unwrap();
  let nodes = Field {
    geometry: String::from("dom"),
    size: Some(8),
    nb_comp: Some(3),
    ..Field::new(NODES_FIELD, "dom.bin", 0, DataType::default_float())
  };
  db.add_field(nodes).unwrap();
  let ts = db.add_timestep(1.0).unwrap();
  let p = Field {
    geometry: String::from("dom"),
    localisation: String::from("ELEM"),
    size: Some(1),
    nb_comp: Some(1),
    ..Field::new("P", "p.bin", ts, DataType::default_float())
  };
  db.add_field(p).unwrap();
  assert!(db.get_field(ts, "dom_SOMMETS", Scope::FirstAndCurrent).is_ok());
  let err = db.get_field(ts, "dom_SOMMETS", Scope::Current).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NameNotFound);
  assert!(db.get_geometry(ts, "dom", Scope::FirstAndCurrent).is_ok());
  assert!(db.get_geometry(ts, "dom", Scope::Current).is_err());
  assert_eq!(db.geometry_field(ts, "dom", NODES_FIELD).unwrap().size, Some(8));
  let unames = db.field_unames(ts, Scope::FirstAndCurrent).unwrap();
  let names: Vec<String> = unames.iter().map(|u| u.to_string()).collect();
  assert_eq!(names, ["dom_P_ELEM", "dom_SOMMETS"]);
  assert_eq!(db.geometry_names(ts, Scope::FirstAndCurrent).unwrap(), ["dom"]);
  db.set_geometry_elem_type(0, "dom", ElementType::Polyhedron).unwrap();
  assert_eq!(
    db.get_geometry(0, "dom", Scope::Current).unwrap().elem_type,
    ElementType::Polyhedron
  );
}

#[test]
fn test_master_file_scenario() {
  let dir = TempDir::new().unwrap();
  let mut bytes: Vec<u8> = Vec::new();
  bytes.extend(4i32.to_le_bytes());
  for v in [1.0f32, 2.0, 3.0, 4.0] {
    bytes.extend(v.to_le_bytes());
  }
  bytes.extend(4i32.to_le_bytes());
  fs::write(dir.path().join("datafile.bin"), bytes).unwrap();
  write_master(dir.path(), "case.lata", "LATA_V2.1\ncase\nsolver 1.0\n\
    Format INT32,REAL32,C_ORDERING,F_MARKERS_SINGLE\n\
    Geom M type_elem=HEXAEDRE\n\
    Champ V datafile.bin geometrie=M composantes=1 size=4 localisation=ELEM\n\
    Fin\n");
  let mut db = LataDb::new();
  db.read_master_file(dir.path(), "case.lata").unwrap();
  assert!(!db.is_old_style());
  assert_eq!(db.case_label(), "case");
  assert_eq!(db.software_id(), "solver 1.0");
  assert_eq!(db.nb_timesteps(), 1);
  assert_eq!(
    db.get_geometry(0, "M", Scope::Current).unwrap().elem_type,
    ElementType::Hexahedron
  );
  let field = db.get_field(0, "M_V_ELEM", Scope::Current).unwrap();
  assert_eq!(field.shape().unwrap(), (4, 1));
  let values: DMatrix<f32> = db.read_data(field, 0, None).unwrap();
  assert_eq!(values.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_master_file_errors() {
  let dir = TempDir::new().unwrap();
  let mut db = LataDb::new();
  let err = db.read_master_text(dir.path(), "LATA_V3\na\nb\nFin\n", "x").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::BadHeader);
  let text = "LATA_V2.1\na\nb\nGeom dom type_elem=TRIANGLE\nBogus 3\nFin\n";
  let err = db.read_master_text(dir.path(), text, "x").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::ReadError);
  // what came before the failure stays
  assert!(db.get_geometry(0, "dom", Scope::Current).is_ok());
  let text = "LATA_V2.1\na\nb\nGeom dom type_elem=PRISME\nFin\n";
  let err = db.read_master_text(dir.path(), text, "x").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::BadElemType);
  let text = "LATA_V2.1\na\nb\nTemps 1.0\nTemps 0.5\nFin\n";
  let err = db.read_master_text(dir.path(), text, "x").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidOperation);
  let err = db.read_master_file(dir.path(), "missing.lata").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::FileNotFound);
}

#[test]
fn test_master_file_round_trip() {
  let (dir, mut db) = scratch();
  db.set_case("cavity", "tester");
  db.add_geometry(Geometry::new("dom", ElementType::Triangle, 0)).unwrap();
  let nodes = Field {
    geometry: String::from("dom"),
    size: Some(3),
    nb_comp: Some(2),
    ..Field::new(
      NODES_FIELD,
      "cavity.dom",
      0,
      DataType { scalar_type: ScalarType::Real64, byte_order: ByteOrder::BigEndian, ..DataType::default_float() }
    )
  };
  let elems = Field {
    geometry: String::from("dom"),
    size: Some(1),
    nb_comp: Some(3),
    ..Field::new(
      ELEMENTS_FIELD,
      "cavity.dom",
      0,
      DataType { array_index: ArrayIndex::FIndexing, scalar_type: ScalarType::Int64, file_offset: 1, ..DataType::default_int() }
    )
  };
  db.add_field(nodes.clone()).unwrap();
  db.add_field(elems.clone()).unwrap();
  let ts = db.add_timestep(0.125).unwrap();
  let vel = Field {
    geometry: String::from("dom"),
    localisation: String::from("SOM"),
    size: Some(3),
    nb_comp: Some(2),
    nature: Nature::Vector,
    component_names: vec![String::from("U"), String::from("V")],
    ..Field::new(
      "VITESSE",
      "cavity.VITESSE.0.125",
      ts,
      datatype(ByteOrder::Ascii, ScalarType::Real32, DataOrdering::Fortran, MarkerPolicy::Multiple)
    )
  };
  db.add_field(vel.clone()).unwrap();
  let coords = float_matrix(3, 2);
  let conn: DMatrix<i64> = DMatrix::from_row_slice(1, 3, &[0, 1, 2]);
  let speed: DMatrix<f32> = DMatrix::from_row_slice(3, 2, &[0.5, 1.0, 1.5, 2.0, 2.5, 3.0]);
  db.write_data(0, &nodes.uname(), &coords).unwrap();
  db.write_data(0, &elems.uname(), &conn).unwrap();
  db.write_data(ts, &vel.uname(), &speed).unwrap();
  assert!(db.needs_master_rewrite());
  db.write_master_file(dir.path().join("cavity.lata")).unwrap();
  assert!(!db.needs_master_rewrite());

  let mut back = LataDb::new();
  back.read_master_file(dir.path(), "cavity.lata").unwrap();
  assert_eq!(back.timesteps(), db.timesteps());
  assert_eq!(back.case_label(), "cavity");
  let field = back.get_field(0, "dom_ELEMENTS", Scope::Current).unwrap();
  assert_eq!(back.read_data::<i64>(field, 0, None).unwrap(), conn);
  let field = back.get_field(ts, "dom_VITESSE_SOM", Scope::Current).unwrap();
  assert_eq!(back.read_data::<f32>(field, 0, None).unwrap(), speed);
  let field = back.get_field(ts, "dom_SOMMETS", Scope::FirstAndCurrent).unwrap();
  assert_eq!(back.read_data::<f64>(field, 0, None).unwrap(), coords);
}

#[test]
fn test_import_file() {
  let dir = TempDir::new().unwrap();
  write_master(dir.path(), "geom.lata", "LATA_V2.1\ngeom\nx\n\
    Geom dom type_elem=QUADRANGLE\n\
    Champ SOMMETS dom.bin geometrie=dom composantes=2 size=4\n\
    Fin\n");
  write_master(dir.path(), "case.lata", "LATA_V2.1\ncase\nx\n\
    import_file geom.lata\n\
    Temps 2\n\
    Champ P p.bin geometrie=dom localisation=ELEM composantes=1 size=1 format=REAL64\n\
    Fin\n");
  let mut db = LataDb::new();
  db.read_master_file(dir.path(), "case.lata").unwrap();
  assert_eq!(db.case_label(), "case");
  assert_eq!(db.nb_timesteps(), 2);
  assert!(db.get_geometry(0, "dom", Scope::Current).is_ok());
  let p = db.get_field(1, "dom_P_ELEM", Scope::Current).unwrap();
  assert_eq!(p.datatype.scalar_type, ScalarType::Real64);
  // a file importing itself stops after a bounded depth
  write_master(dir.path(), "loop.lata", "LATA_V2.1\nl\nx\nimport_file loop.lata\nFin\n");
  let err = db.read_master_file(dir.path(), "loop.lata").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::ReadError);
}

#[test]
fn test_memory_buffer() {
  let mut db = LataDb::new();
  let dt = datatype(ByteOrder::LittleEndian, ScalarType::Real32, DataOrdering::C, MarkerPolicy::Single);
  let a = declare(&mut db, "A", MEMORY_BUFFER_FILE, (2, 1), dt);
  let b = declare(&mut db, "B", MEMORY_BUFFER_FILE, (3, 1), DataType { file_offset: 1, ..dt });
  let ma: DMatrix<f32> = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
  let mb: DMatrix<f32> = DMatrix::from_row_slice(3, 1, &[3.0, 4.0, 5.0]);
  let end_a = db.write_data(0, &a, &ma).unwrap();
  db.write_data(0, &b, &mb).unwrap();
  assert_eq!(end_a, 16);
  assert_eq!(db.memory_buffer().len(), 16 + 20);
  let fb = db.get_field_by_uname(0, &b, Scope::Current).unwrap();
  assert_eq!(fb.datatype.file_offset, 16);
  assert_eq!(db.read_data::<f32>(fb, 1, None).unwrap().as_slice(), &[4.0, 5.0]);
}

#[test]
fn test_legacy_geometry_and_fields() {
  let dir = TempDir::new().unwrap();
  let raw_int = DataType::default_int();
  let raw_float = DataType::default_float();
  // a 2D triangle, padded to 3D the old way
  let nodes = Field {
    size: Some(6),
    nb_comp: Some(3),
    ..Field::new("N", "dom.geom", 0, raw_float)
  };
  let elems = Field {
    size: Some(1),
    nb_comp: Some(6),
    ..Field::new("E", "dom.geom", 0, raw_int)
  };
  let padded_nodes: DMatrix<f32> = DMatrix::from_row_slice(6, 3, &[
    0.0, 0.0, 0.0,
    1.0, 0.0, 0.0,
    0.0, 1.0, 0.0,
    0.0, 0.0, 1.0,
    1.0, 0.0, 1.0,
    0.0, 1.0, 1.0
  ]);
  let padded_elems: DMatrix<i32> = DMatrix::from_row_slice(1, 6, &[1, 2, 3, 4, 5, 6]);
  let file = File::create(dir.path().join("dom.geom")).unwrap();
  let file = write_block(file, &nodes, &padded_nodes).unwrap();
  write_block(file, &elems, &padded_elems).unwrap();
  let pressure = Field {
    size: Some(1),
    nb_comp: Some(1),
    ..Field::new("P", "x", 0, raw_float)
  };
  let velocity = Field {
    size: Some(3),
    nb_comp: Some(2),
    ..Field::new("V", "x", 0, raw_float)
  };
  let p = File::create(dir.path().join("cas.PRESSION.ELEM.dom.0.5")).unwrap();
  write_block(p, &pressure, &DMatrix::from_element(1, 1, 7.5f32)).unwrap();
  let v = File::create(dir.path().join("cas.VITESSE.SOM.dom.0.5")).unwrap();
  let speeds = DMatrix::from_row_slice(3, 2, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
  write_block(v, &velocity, &speeds).unwrap();
  write_master(dir.path(), "cas.lata", "Trio_U verbosity=0\ncas\nTrio_U\n\
    Geometrie dom dom.geom type_elem=TRIANGLE nb_som_tot=3 nb_elem_tot=1\n\
    TEMPS 0.5\n\
    Champ PRESSION cas.PRESSION.ELEM.dom.0.5\n\
    Champ VITESSE cas.VITESSE.SOM.dom.0.5\n\
    FIN\n");

  let mut db = LataDb::new();
  db.read_master_file(dir.path(), "cas.lata").unwrap();
  assert!(db.is_old_style());
  let sommets = db.get_field(1, "dom_SOMMETS", Scope::FirstAndCurrent).unwrap();
  assert_eq!(sommets.padding, LegacyPadding::Nodes3D);
  let coords: DMatrix<f32> = db.read_data(sommets, 0, None).unwrap();
  assert_eq!(coords, DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0]));
  let elements = db.geometry_field(0, "dom", ELEMENTS_FIELD).unwrap();
  assert_eq!(elements.datatype.file_offset, 4 + 18 * 4 + 4);
  let conn: DMatrix<i32> = db.read_data(elements, 0, None).unwrap();
  assert_eq!(conn, DMatrix::from_row_slice(1, 3, &[0, 1, 2]));
  let p = db.get_field(1, "dom_PRESSION_ELEM", Scope::Current).unwrap();
  assert_eq!(p.shape().unwrap(), (1, 1));
  assert_eq!(db.read_data::<f32>(p, 0, None).unwrap()[(0, 0)], 7.5);
  let v = db.get_field(1, "dom_VITESSE_SOM", Scope::Current).unwrap();
  assert_eq!(v.nature, Nature::Vector);
  assert_eq!(db.read_data::<f32>(v, 0, None).unwrap(), speeds);

  // rewriting gives a current master file describing the same data
  db.write_master_file(dir.path().join("new.lata")).unwrap();
  let mut back = LataDb::new();
  back.read_master_file(dir.path(), "new.lata").unwrap();
  assert!(!back.is_old_style());
  assert_eq!(back.timesteps(), db.timesteps());
  let sommets = back.get_field(0, "dom_SOMMETS", Scope::Current).unwrap();
  assert_eq!(back.read_data::<f32>(sommets, 0, None).unwrap(), coords);
}

/// Builds a binary interface file with one two-component element field.
fn interface_file(path: &Path, legacy_int: DataType) {
  let mut codec = Codec::new(Vec::<u8>::new(), "interfaces");
  codec.set_encoding(ByteOrder::LittleEndian, ScalarType::Int32);
  codec.write_string("TRIANGLE_3D").unwrap();
  codec.write(&[3i32, 3, 1], 1).unwrap();
  let nodes = Field {
    size: Some(3),
    nb_comp: Some(3),
    ..Field::new("N", "x", 0, DataType::default_float())
  };
  let elems = Field {
    size: Some(1),
    nb_comp: Some(3),
    ..Field::new("E", "x", 0, legacy_int)
  };
  let comp = Field {
    size: Some(1),
    nb_comp: Some(1),
    ..Field::new("C", "x", 0, DataType::default_float())
  };
  let coords = DMatrix::from_row_slice(3, 3, &[0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
  let buf = write_block(codec.into_inner(), &nodes, &coords).unwrap();
  let buf = write_block(buf, &elems, &DMatrix::from_row_slice(1, 3, &[0i32, 1, 2])).unwrap();
  let mut codec = Codec::new(buf, "interfaces");
  codec.set_encoding(ByteOrder::LittleEndian, ScalarType::Int32);
  codec.write(&[1i32], 1).unwrap();
  codec.write_string("NORMALE").unwrap();
  codec.write_string("ELEM").unwrap();
  codec.write(&[2i32], 1).unwrap();
  codec.write_string("X").unwrap();
  let buf = write_block(codec.into_inner(), &comp, &DMatrix::from_element(1, 1, 0.25f32)).unwrap();
  let mut codec = Codec::new(buf, "interfaces");
  codec.set_encoding(ByteOrder::LittleEndian, ScalarType::Int32);
  codec.write_string("Y").unwrap();
  let buf = write_block(codec.into_inner(), &comp, &DMatrix::from_element(1, 1, 0.75f32)).unwrap();
  fs::write(path, buf).unwrap();
}

#[test]
fn test_legacy_interfaces() {
  let dir = TempDir::new().unwrap();
  let legacy_int = DataType { array_index: ArrayIndex::FIndexing, ..DataType::default_int() };
  interface_file(&dir.path().join("cas.interf.1"), legacy_int);
  write_master(dir.path(), "cas.lata", "Trio_U\ncas\nTrio_U\n\
    TEMPS 1\n\
    Champ INTERFACES cas.interf.1\n\
    FIN\n");
  let mut db = LataDb::new();
  db.read_master_file(dir.path(), "cas.lata").unwrap();
  let geom = db.get_geometry(1, "INTERFACES", Scope::Current).unwrap();
  assert_eq!(geom.elem_type, ElementType::Triangle);
  let elems = db.geometry_field(1, "INTERFACES", ELEMENTS_FIELD).unwrap();
  assert_eq!(elems.padding, LegacyPadding::None);
  let conn: DMatrix<i32> = db.read_data(elems, 0, None).unwrap();
  assert_eq!(conn.as_slice(), &[0, 1, 2]);
  let x = db.get_field(1, "INTERFACES_NORMALE_X_ELEM", Scope::Current).unwrap();
  assert_eq!(x.component_names, ["X"]);
  assert_eq!(db.read_data::<f32>(x, 0, None).unwrap()[(0, 0)], 0.25);
  let y = db.get_field(1, "INTERFACES_NORMALE_Y_ELEM", Scope::Current).unwrap();
  assert_eq!(db.read_data::<f32>(y, 0, None).unwrap()[(0, 0)], 0.75);
}

#[test]
fn test_missing_interfaces_fail_at_the_end() {
  let dir = TempDir::new().unwrap();
  let legacy_int = DataType { array_index: ArrayIndex::FIndexing, ..DataType::default_int() };
  interface_file(&dir.path().join("cas.interf.2"), legacy_int);
  write_master(dir.path(), "cas.lata", "Trio_U\ncas\nTrio_U\n\
    TEMPS 1\n\
    Champ INTERFACES cas.interf.1\n\
    TEMPS 2\n\
    Champ INTERFACES cas.interf.2\n\
    FIN\n");
  let mut db = LataDb::new();
  let err = db.read_master_file(dir.path(), "cas.lata").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::FileNotFound);
  // the rest of the file was still read
  assert_eq!(db.nb_timesteps(), 3);
  assert!(db.get_geometry(2, "INTERFACES", Scope::Current).is_ok());
  assert!(db.get_geometry(1, "INTERFACES", Scope::Current).is_err());
}

/// A small two-timestep catalog with fields sharing files.
fn small_case() -> LataDb {
  let mut db = LataDb::new();
  db.set_path_prefix("/data");
  db.add_geometry(Geometry::new("dom", ElementType::Tetrahedron, 0)).unwrap();
  let geo = |name: &str, dt: DataType| Field {
    geometry: String::from("dom"),
    size: Some(4),
    nb_comp: Some(3),
    ..Field::new(name, "case.lata.dom", 0, dt)
  };
  db.add_field(geo(NODES_FIELD, DataType::default_float())).unwrap();
  db.add_field(geo(ELEMENTS_FIELD, DataType::default_int())).unwrap();
  for (k, time) in [0.1, 0.2].iter().enumerate() {
    let ts = db.add_timestep(*time).unwrap();
    for (name, file) in [("PRESSION", "case.p"), ("VITESSE", "/elsewhere/v.bin")] {
      let f = Field {
        geometry: String::from("dom"),
        localisation: String::from("ELEM"),
        size: Some(1),
        nb_comp: Some(1),
        ..Field::new(name, format!("{}.{}", file, k), ts, DataType::default_float())
      };
      db.add_field(f).unwrap();
    }
  }
  return db;
}

#[test]
fn test_filter_db() {
  let db = small_case();
  let only_last = db.filter_db(
    &Specifier::List(vec![2]),
    &Specifier::All,
    &Specifier::AllExcept(vec![String::from("VITESSE")])
  ).unwrap();
  assert_eq!(only_last.nb_timesteps(), 2);
  assert_eq!(only_last.time(1).unwrap(), 0.2);
  assert_eq!(only_last.timestep(0).unwrap().fields.len(), 2);
  let names: Vec<String> = only_last.field_unames(1, Scope::Current)
    .unwrap()
    .iter()
    .map(|u| u.to_string())
    .collect();
  assert_eq!(names, ["dom_PRESSION_ELEM"]);
  let by_uname = db.filter_db(
    &Specifier::All,
    &Specifier::All,
    &Specifier::List(vec![String::from("dom_VITESSE_ELEM")])
  ).unwrap();
  assert_eq!(by_uname.nb_timesteps(), 3);
  assert!(by_uname.timestep(0).unwrap().fields.is_empty());
  assert_eq!(by_uname.timestep(2).unwrap().fields.len(), 1);
  let no_geom = db.filter_db(
    &Specifier::All,
    &Specifier::AllExcept(vec![String::from("dom")]),
    &Specifier::All
  ).unwrap();
  assert!(no_geom.timesteps().iter().all(|t| t.fields.is_empty()));
}

#[test]
fn test_bulk_conversions() {
  let mut db = small_case();
  let old = DataType { scalar_type: ScalarType::Real32, ..DataType::unknown() };
  let new = DataType {
    scalar_type: ScalarType::Real64,
    byte_order: ByteOrder::BigEndian,
    ..DataType::unknown()
  };
  // every field changes: the byte order is converted wherever the old part
  // is unknown
  assert_eq!(db.change_all_data_types(&old, &new), 6);
  let nodes = db.geometry_field(0, "dom", NODES_FIELD).unwrap();
  assert_eq!(nodes.datatype.scalar_type, ScalarType::Real64);
  let elems = db.geometry_field(0, "dom", ELEMENTS_FIELD).unwrap();
  assert_eq!(elems.datatype.scalar_type, ScalarType::Int32);
  assert_eq!(elems.datatype.byte_order, ByteOrder::BigEndian);
  assert_eq!(db.change_all_data_types(&old, &new), 0);

  db.change_all_data_filenames("case", "run2");
  let files: Vec<&str> = db.timesteps()
    .iter()
    .flat_map(|t| t.fields.iter())
    .map(|f| f.filename.as_str())
    .collect();
  assert_eq!(files, [
    "run2.lata.dom", "run2.lata.dom", "run2.p.0", "run2.v.bin.0", "run2.p.1", "run2.v.bin.1"
  ]);
  let mut mem = LataDb::new();
  declare(&mut mem, "M", MEMORY_BUFFER_FILE, (1, 1), DataType::default_float());
  mem.change_all_data_filenames("x", "out");
  assert_eq!(mem.timestep(0).unwrap().fields[0].filename, "out.memory_buffer");
}

#[test]
fn test_file_offsets() {
  let mut db = small_case();
  db.check_all_data_fileoffsets(false);
  let offsets: Vec<i64> = db.timestep(0)
    .unwrap()
    .fields
    .iter()
    .map(|f| f.datatype.file_offset)
    .collect();
  assert_eq!(offsets, [0, 1]);
  let mut split = small_case();
  split.check_all_data_fileoffsets(true);
  let f = &split.timestep(0).unwrap().fields;
  assert_eq!((f[0].filename.as_str(), f[0].datatype.file_offset), ("case.lata.dom", 0));
  assert_eq!((f[1].filename.as_str(), f[1].datatype.file_offset), ("case.lata.dom.1", 0));

  // appended fields land after each other
  let (_dir, mut disk) = scratch();
  let dt = DataType::default_float();
  let names: Vec<FieldUName> = (0..3)
    .map(|i| declare(&mut disk, &format!("F{}", i), "all.bin", (2, 1), dt))
    .collect();
  disk.check_all_data_fileoffsets(false);
  for (i, uname) in names.iter().enumerate() {
    let m = DMatrix::from_element(2, 1, i as f32);
    disk.write_data(0, uname, &m).unwrap();
  }
  for (i, uname) in names.iter().enumerate() {
    let field = disk.get_field_by_uname(0, uname, Scope::Current).unwrap();
    assert_eq!(field.datatype.file_offset, 16 * i as i64);
    let m: DMatrix<f32> = disk.read_data(field, 0, None).unwrap();
    assert_eq!(m, DMatrix::from_element(2, 1, i as f32));
  }
}

#[test]
fn test_merge() {
  let mut db = small_case();
  let mut other = LataDb::new();
  let ts = other.add_timestep(0.2).unwrap();
  other.add_geometry(Geometry::new("surf", ElementType::Triangle, ts)).unwrap();
  let late = other.add_timestep(0.3).unwrap();
  let f = Field {
    size: Some(1),
    nb_comp: Some(1),
    ..Field::new("T", "t.bin", late, DataType::default_float())
  };
  other.add_field(f).unwrap();
  db.merge(other).unwrap();
  assert_eq!(db.nb_timesteps(), 4);
  assert!(db.get_geometry(2, "surf", Scope::Current).is_ok());
  assert!(db.get_field(3, "T", Scope::Current).is_ok());
  // merging the same thing twice breaks uniqueness
  let dup = small_case();
  assert_eq!(db.merge(dup).unwrap_err().kind(), ErrorKind::InvalidOperation);
}

#[test]
fn test_format_flags() {
  let flags = FormatFlags::parse("big_endian,INT64,F_INDEXING,F_ORDERING,F_MARKERS_MULTIPLE,MARKERS64");
  assert_eq!(flags.byte_order, ByteOrder::BigEndian);
  assert_eq!(flags.int_type, ScalarType::Int64);
  assert_eq!(flags.real_type, ScalarType::Unknown);
  assert_eq!(flags.array_index, ArrayIndex::FIndexing);
  assert_eq!(flags.ordering, DataOrdering::Fortran);
  assert_eq!(flags.markers, MarkerPolicy::Multiple);
  assert_eq!(flags.marker_type, ScalarType::Int64);
  let mut dt = DataType::default_float();
  dt.apply_flags(&flags);
  // an integer flag does not turn a float into an integer
  assert_eq!(dt.scalar_type, ScalarType::Real32);
  assert_eq!(dt.byte_order, ByteOrder::BigEndian);
  let base = DataType::default_int();
  let diff = DataType { scalar_type: ScalarType::Int64, ..base }.format_flags(&base);
  assert_eq!(diff, "INT64");
  assert_eq!(base.format_flags(&base), "");
  assert_eq!("hexaedre_vef".parse::<ElementType>().unwrap(), ElementType::Hexahedron);
  assert_eq!("POLYEDRE_12".parse::<ElementType>().unwrap(), ElementType::Polyhedron);
}
