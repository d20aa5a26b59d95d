//! Dumps the values of one field of a lata database, as text or JSON.

#![allow(clippy::needless_return)]
#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt::Display;
use std::path::{Path, PathBuf};

use clap::Parser;
use latadb::prelude::*;
use log::{LevelFilter, error, info};
use nalgebra::DMatrix;

/// The arguments passed to the dumper.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
struct Cli {
  /// Timestep to read the field from.
  #[arg(short = 't', long = "timestep", default_value_t = 0)]
  timestep: usize,
  /// Where to look for the field.
  #[arg(short = 's', long = "scope", value_enum, default_value = "first-and-current")]
  scope: Scope,
  /// First row to dump.
  #[arg(long = "start", default_value_t = 0)]
  start: usize,
  /// How many rows to dump. All remaining rows if absent.
  #[arg(short = 'n', long = "count")]
  count: Option<usize>,
  /// Dump exactly these rows, in this order. Overrides the range options.
  #[arg(short = 'r', long = "rows", num_args = 0.., value_delimiter = ',')]
  rows: Vec<usize>,
  /// Print JSON (an array of rows) instead of text.
  #[arg(short = 'j', long = "json")]
  json: bool,
  /// Output extra/debug info while reading.
  #[arg(short, long)]
  verbose: bool,
  /// Path to the master file.
  file: PathBuf,
  /// Unique name of the field, e.g. `dom_VITESSE_SOM`.
  field: String
}

/// Reads the selected rows of a field.
fn fetch<T: LataScalar>(db: &LataDb, field: &Field, args: &Cli) -> LataResult<DMatrix<T>> {
  if args.rows.is_empty() {
    return db.read_data(field, args.start, args.count);
  }
  return db.read_data_rows(field, &args.rows);
}

/// Prints a matrix, one row per line.
fn print_matrix<T: LataScalar + Display + serde::Serialize>(m: &DMatrix<T>, json: bool) {
  if json {
    let rows: Vec<Vec<T>> = m.row_iter()
      .map(|r| r.iter().copied().collect())
      .collect();
    match serde_json::to_string(&rows) {
      Ok(s) => println!("{}", s),
      Err(e) => error!("Could not serialise the values: {}", e)
    }
    return;
  }
  for r in m.row_iter() {
    let line: Vec<String> = r.iter().map(|v| v.to_string()).collect();
    println!("{}", line.join("\t"));
  }
}

fn main() {
  // init cli stuff
  let args = Cli::parse();
  let log_level = if args.verbose {
    LevelFilter::Debug
  } else {
    LevelFilter::Warn
  };
  env_logger::builder().filter_level(log_level).init();
  let prefix = args.file.parent().map(Path::to_path_buf).unwrap_or_default();
  let Some(name) = args.file.file_name() else {
    error!("Provided path is not a file!");
    std::process::exit(1);
  };
  let mut db = LataDb::new();
  if db.read_master_file(&prefix, name).is_err() {
    std::process::exit(1);
  }
  let Ok(field) = db.get_field(args.timestep, &args.field, args.scope) else {
    std::process::exit(1);
  };
  info!(
    "Field {}: {:?} rows, {:?} components, {}.",
    args.field,
    field.size,
    field.nb_comp,
    field.datatype.scalar_type
  );
  let res = if field.datatype.scalar_type.is_int() {
    fetch::<i64>(&db, field, &args).map(|m| print_matrix(&m, args.json))
  } else {
    fetch::<f64>(&db, field, &args).map(|m| print_matrix(&m, args.json))
  };
  if res.is_err() {
    std::process::exit(1);
  }
}
