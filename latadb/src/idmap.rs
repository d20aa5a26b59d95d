//! This module implements the table turning sparse external identifiers
//! (node or element numbers from a solver) into dense 0-based positions.
//! The representation is picked once, from how dense the ids are.

use serde::{Deserialize, Serialize};

/// Maps ids to their position in the list the table was built from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum IdMap {
  /// The ids are `first, first+1, ...`: no storage needed.
  Sequential {
    /// The first id.
    first: i64,
    /// How many ids.
    count: usize
  },
  /// The ids span at most twice their count: a reverse lookup array.
  Reverse {
    /// The smallest id.
    min: i64,
    /// Position of `min + k` at `k`, or `None`.
    table: Vec<Option<usize>>
  },
  /// Sparse ids: `(id, position)` pairs sorted by id.
  Sorted(Vec<(i64, usize)>)
}

impl IdMap {
  /// Builds the cheapest adequate table for a list of ids. If an id is
  /// repeated, its last position wins.
  pub fn new(ids: &[i64]) -> Self {
    let first = ids.first().copied().unwrap_or(0);
    if ids.windows(2).all(|w| w[0].checked_add(1) == Some(w[1])) {
      return Self::Sequential { first, count: ids.len() };
    }
    let min = ids.iter().copied().min().unwrap_or(0);
    let max = ids.iter().copied().max().unwrap_or(0);
    let span = (i128::from(max) - i128::from(min) + 1) as u128;
    if span <= 2 * ids.len() as u128 {
      let mut table: Vec<Option<usize>> = vec![None; span as usize];
      for (i, id) in ids.iter().enumerate() {
        table[(id - min) as usize] = Some(i);
      }
      return Self::Reverse { min, table };
    }
    let mut pairs: Vec<(i64, usize)> = ids.iter()
      .copied()
      .enumerate()
      .map(|(i, id)| (id, i))
      .collect();
    pairs.sort();
    pairs.reverse();
    pairs.dedup_by_key(|p| p.0);
    pairs.reverse();
    return Self::Sorted(pairs);
  }

  /// Returns the position of an id, or `None` if it is not in the table.
  pub fn id_to_index(&self, id: i64) -> Option<usize> {
    return match self {
      Self::Sequential { first, count } => {
        let k = id.checked_sub(*first)?;
        if k >= 0 && (k as u64) < *count as u64 {
          Some(k as usize)
        } else {
          None
        }
      },
      Self::Reverse { min, table } => {
        let k = id.checked_sub(*min)?;
        if k < 0 {
          return None;
        }
        table.get(k as usize).copied().flatten()
      },
      Self::Sorted(pairs) => {
        pairs.binary_search_by_key(&id, |p| p.0)
          .ok()
          .map(|i| pairs[i].1)
      }
    };
  }

  /// The number of ids the table knows.
  pub fn len(&self) -> usize {
    return match self {
      Self::Sequential { count, .. } => *count,
      Self::Reverse { table, .. } => table.iter().filter(|t| t.is_some()).count(),
      Self::Sorted(pairs) => pairs.len(),
    };
  }

  /// Whether the table is empty.
  pub fn is_empty(&self) -> bool {
    return self.len() == 0;
  }
}
