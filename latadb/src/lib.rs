//! This library implements types and functions to read and write "lata"
//! simulation databases: a text master file cataloguing geometries and
//! fields per timestep, and binary or ASCII data files holding their arrays.
//!
//! The catalog (`LataDb`) is filled by parsing a master file (both the
//! current and the legacy dialect are understood) or built by hand, and can
//! be filtered, merged, converted and written back. Field values come out as
//! `nalgebra` matrices with one row per location and one column per
//! component, whatever the on-disk ordering, byte order or block markers.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]
#![allow(clippy::needless_return)]

pub mod catalog;
pub mod codec;
pub mod datatype;
pub mod elements;
pub mod error;
pub mod idmap;
pub mod io;
mod markers;
pub mod parser;
mod util;
pub mod writer;

/// Everything most users need, in one import.
pub mod prelude {
  pub use crate::catalog::passes::Specifier;
  pub use crate::catalog::*;
  pub use crate::codec::{Codec, LataScalar};
  pub use crate::datatype::*;
  pub use crate::elements::ElementType;
  pub use crate::error::*;
  pub use crate::idmap::IdMap;
  pub use crate::io::{write_block, CHUNK_ROWS};
}

#[cfg(test)]
mod tests;
