//! This module defines the closed set of element types a lata geometry can be
//! made of, along with their topology (dimension, nodes, faces) and the
//! keywords used for them in master files.

use std::fmt::Display;
use core::str::FromStr;

use clap::ValueEnum;
use serde::{Serialize, Deserialize};

use crate::error::*;

/// Generates the ElementType enum.
macro_rules! gen_elems {
  (
    $((
      $vn:ident,
      $nm:literal,
      $dim:literal,
      $nodes:expr,
      $face_nodes:expr,
      $faces:expr,
      [$($alias:literal),*]
    ),)*
  ) => {
    /// Known element types.
    #[derive(
      Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash,
      ValueEnum
    )]
    #[clap(rename_all = "lower")]
    pub enum ElementType {
      /// Not specified (yet). Legacy files may set it later.
      Unspecified,
      $(
        #[doc = $nm]
        $vn,
      )*
    }

    impl ElementType {
      /// Returns the canonical all-caps keyword of the element type.
      pub const fn name(&self) -> &'static str {
        return match self {
          Self::Unspecified => "UNSPECIFIED",
          $(Self::$vn => $nm,)*
        };
      }

      /// Returns the topological dimension of the element.
      pub const fn dimension(&self) -> usize {
        return match self {
          Self::Unspecified => 0,
          $(Self::$vn => $dim,)*
        };
      }

      /// Returns the number of nodes per element, if it is fixed.
      pub const fn nodes_per_element(&self) -> Option<usize> {
        return match self {
          Self::Unspecified => None,
          $(Self::$vn => $nodes,)*
        };
      }

      /// Returns the number of nodes per face, if it is fixed.
      pub const fn nodes_per_face(&self) -> Option<usize> {
        return match self {
          Self::Unspecified => None,
          $(Self::$vn => $face_nodes,)*
        };
      }

      /// Returns the number of faces per element, if it is fixed.
      pub const fn faces_per_element(&self) -> Option<usize> {
        return match self {
          Self::Unspecified => None,
          $(Self::$vn => $faces,)*
        };
      }

      /// Returns a static slice with all specified element types.
      pub const fn all() -> &'static [Self] {
        return &[
          $(Self::$vn,)*
        ];
      }

      /// Matches a keyword exactly against the known spellings.
      fn from_keyword(kw: &str) -> Option<Self> {
        return match kw {
          $(
            $nm $(| $alias)* => Some(Self::$vn),
          )*
          _ => None
        };
      }
    }
  };
}

gen_elems!(
  (Line, "SEGMENT", 1, Some(2), Some(1), Some(2), ["SEGMENT_2D"]),
  (
    Triangle, "TRIANGLE", 2, Some(3), Some(2), Some(3),
    ["TRIANGLE_3D"]
  ),
  (
    Quadrilateral, "QUADRANGLE", 2, Some(4), Some(2), Some(4),
    [
      "QUADRANGLE_3D", "RECTANGLE", "RECTANGLE_AXI", "RECTANGLE_2D_AXI"
    ]
  ),
  (Tetrahedron, "TETRAEDRE", 3, Some(4), Some(3), Some(4), []),
  (
    Hexahedron, "HEXAEDRE", 3, Some(8), Some(4), Some(6),
    ["HEXAEDRE_AXI", "HEXAEDRE_VEF"]
  ),
  (Polyhedron, "POLYEDRE", 3, None, None, None, []),
);

impl ElementType {
  /// Whether a keyword spells a surface element embedded in 3D.
  pub fn keyword_is_3d(kw: &str) -> bool {
    return kw.trim().to_ascii_uppercase().ends_with("_3D");
  }
}

impl FromStr for ElementType {
  type Err = LataError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let kw = s.trim().to_ascii_uppercase();
    if let Some(et) = Self::from_keyword(&kw) {
      return Ok(et);
    }
    if kw.starts_with("POLYEDRE") {
      return Ok(Self::Polyhedron);
    }
    return Err(LataError::new(
      ErrorKind::BadElemType,
      format!("unknown element type \"{}\"", s)
    ));
  }
}

impl Default for ElementType {
  fn default() -> Self {
    return Self::Unspecified;
  }
}

impl Display for ElementType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return write!(f, "{}", self.name());
  }
}
