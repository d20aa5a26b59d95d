//! Dumps information on a lata database: its header, default datatypes,
//! timesteps, geometries and fields.

#![allow(clippy::needless_return)]
#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use clap::Parser;
use latadb::prelude::*;
use log::{LevelFilter, info, error};
use serde::Serialize;

/// The arguments passed to the inspector.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
struct Cli {
  /// Only show these timesteps. Can be specified more than once, or
  /// comma-separated. Timestep 0 is always shown.
  #[arg(short = 't', long = "timesteps", num_args = 0.., value_delimiter = ',')]
  timesteps: Vec<usize>,
  /// Only show these geometries.
  #[arg(short = 'g', long = "geometries", num_args = 0.., value_delimiter = ',')]
  geometries: Vec<String>,
  /// Only show these fields (by name or unique name).
  #[arg(short = 'f', long = "fields", num_args = 0.., value_delimiter = ',')]
  fields: Vec<String>,
  /// Also list what timestep 0 provides under every timestep.
  #[arg(short = 's', long = "scope", value_enum, default_value = "current")]
  scope: Scope,
  /// Print the (filtered) catalog as JSON instead.
  #[arg(short = 'j', long = "json")]
  json: bool,
  /// Write the (filtered) catalog as a current-dialect master file here.
  #[arg(short = 'o')]
  output: Option<PathBuf>,
  /// Output extra/debug info while parsing.
  #[arg(short, long)]
  verbose: bool,
  /// Path to the master file.
  file: PathBuf
}

/// One line of the field listing.
#[derive(Serialize)]
struct FieldSummary<'a> {
  /// Unique name.
  uname: String,
  /// Data file.
  file: &'a str,
  /// Rows.
  size: Option<usize>,
  /// Components.
  nb_comp: Option<usize>,
  /// Full format string.
  format: String,
  /// Byte offset.
  offset: i64
}

/// Turns a CLI list into a filter.
fn specifier<A: Clone>(items: &[A]) -> Specifier<A> {
  return if items.is_empty() {
    Specifier::All
  } else {
    Specifier::List(items.to_vec())
  };
}

/// Indentation unit.
const INDENT: &str = "  ";

/// Reads the master file, exiting on failure.
fn open(file: &Path) -> LataDb {
  let prefix = file.parent().map(Path::to_path_buf).unwrap_or_default();
  let name = match file.file_name() {
    Some(n) => n.to_os_string(),
    None => {
      error!("Provided path is not a file!");
      std::process::exit(1);
    }
  };
  let mut db = LataDb::new();
  if let Err(e) = db.read_master_file(&prefix, &name) {
    if e.kind() != ErrorKind::FileNotFound || db.nb_timesteps() <= 1 {
      std::process::exit(1);
    }
    info!("Continuing with what could be read.");
  }
  return db;
}

fn main() {
  // init cli stuff
  let args = Cli::parse();
  let log_level = if args.verbose {
    LevelFilter::Debug
  } else {
    LevelFilter::Info
  };
  env_logger::builder().filter_level(log_level).init();
  let full = open(&args.file);
  let db = match full.filter_db(
    &specifier(&args.timesteps),
    &specifier(&args.geometries),
    &specifier(&args.fields)
  ) {
    Ok(db) => db,
    Err(_) => std::process::exit(1)
  };
  if let Some(ref out) = args.output {
    let mut db = db.clone();
    if db.write_master_file(out).is_err() {
      std::process::exit(1);
    }
  }
  if args.json {
    match serde_json::to_string_pretty(&db) {
      Ok(s) => println!("{}", s),
      Err(e) => {
        error!("Could not serialise the catalog: {}", e);
        std::process::exit(1);
      }
    }
    return;
  }
  info!("Header: {}", db.header());
  info!("Case: {} (written by {})", db.case_label(), db.software_id());
  if db.is_old_style() {
    info!("Legacy dialect.");
  }
  let all = DataType::unknown();
  info!("Default integer format: {}", db.default_int_type().format_flags(&all));
  info!("Default float format: {}", db.default_float_type().format_flags(&all));
  for ts in 0..db.nb_timesteps() {
    let time = db.time(ts).unwrap_or_default();
    if ts == 0 {
      info!("- Timestep 0 (time-independent):");
    } else {
      info!("- Timestep {} (t = {}):", ts, time);
    }
    let geoms = db.geometry_names(ts, args.scope).unwrap_or_default();
    for name in geoms.iter() {
      if let Ok(g) = db.get_geometry(ts, name, args.scope) {
        info!("{}- Geometry {}: {}", INDENT, g.name, g.elem_type);
      }
    }
    let unames = db.field_unames(ts, args.scope).unwrap_or_default();
    for uname in unames.iter() {
      let Ok(f) = db.get_field_by_uname(ts, uname, args.scope) else {
        continue;
      };
      let summary = FieldSummary {
        uname: uname.to_string(),
        file: &f.filename,
        size: f.size,
        nb_comp: f.nb_comp,
        format: f.datatype.format_flags(&all),
        offset: f.datatype.file_offset
      };
      info!(
        "{}- Field {}: {:?} x {:?} in \"{}\" at {} ({})",
        INDENT,
        summary.uname,
        summary.size,
        summary.nb_comp,
        summary.file,
        summary.offset,
        summary.format
      );
      if args.verbose {
        if let Ok(s) = serde_json::to_string(&summary) {
          info!("{}{}{}", INDENT, INDENT, s);
        }
      }
    }
  }
}
