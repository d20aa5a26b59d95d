//! Fortran block markers: the integers an unformatted Fortran write puts
//! before and after a record. Here they hold the element count of the block
//! (byte counts are tolerated when reading).

use std::io::{BufRead, Seek, Write};

use log::warn;

use crate::codec::Codec;
use crate::datatype::{MarkerMode, ScalarType};
use crate::error::*;

/// Where a marker would go.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MarkerSite {
  /// Around the whole array.
  Block,
  /// Around one component of a column-major array.
  Component
}

/// Whether a marker mode puts a marker at a site.
fn applies(mode: MarkerMode, site: MarkerSite) -> bool {
  return matches!(
    (mode, site),
    (MarkerMode::Whole, MarkerSite::Block)
      | (MarkerMode::PerComponent, MarkerSite::Component)
  );
}

/// Reads past a marker if the mode puts one at this site. `count` is the
/// number of elements the marker should describe.
pub(crate) fn skip_marker<S: BufRead + Seek>(
  codec: &mut Codec<S>,
  mode: MarkerMode,
  site: MarkerSite,
  marker_type: ScalarType,
  count: usize
) -> LataResult<()> {
  if !applies(mode, site) {
    return Ok(());
  }
  let v: Vec<i64> = codec.read_as(marker_type, 1)?;
  let bytes = codec.scalar_type().size_bytes().unwrap_or(0) * count as u64;
  let found = v.first().copied().unwrap_or(-1);
  if found != count as i64 && found != bytes as i64 {
    warn!(
      "Block marker in \"{}\" says {}, expected {} values.",
      codec.filename(),
      found,
      count
    );
  }
  return Ok(());
}

/// Writes a marker if the mode puts one at this site.
pub(crate) fn write_marker<S: Write>(
  codec: &mut Codec<S>,
  mode: MarkerMode,
  site: MarkerSite,
  marker_type: ScalarType,
  count: usize
) -> LataResult<()> {
  if !applies(mode, site) {
    return Ok(());
  }
  let v = i64::try_from(count).map_err(|_| LataError::new(
    ErrorKind::IntegerOverflow,
    format!("block of {} values is too large for a marker", count)
  ))?;
  return codec.write_as(marker_type, &[v], 1);
}
