//! This module defines the single error type used across the library. Every
//! error is logged when it is built, so the journal always holds the message
//! even if the caller swallows the value.

use std::error::Error;
use std::fmt::Display;
use std::io;

use log::error;
use serde::{Deserialize, Serialize};

/// The kinds of errors, without their messages. Handy for matching.
#[derive(
  Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord
)]
pub enum ErrorKind {
  /// A master-file grammar violation.
  ReadError,
  /// The first line of a master file is not a known header.
  BadHeader,
  /// A timestep index is out of range.
  BadTimestep,
  /// A geometry or field lookup missed.
  NameNotFound,
  /// A codec, stream, offset or shape problem.
  DataError,
  /// A file could not be opened.
  FileNotFound,
  /// An unknown element type keyword.
  BadElemType,
  /// A catalog invariant would be violated.
  InvalidOperation,
  /// A value does not fit in the requested integer type.
  IntegerOverflow
}

impl ErrorKind {
  /// Returns the all-caps name of the error kind.
  pub const fn name(&self) -> &'static str {
    return match self {
      Self::ReadError => "READ_ERROR",
      Self::BadHeader => "BAD_HEADER",
      Self::BadTimestep => "BAD_TIMESTEP",
      Self::NameNotFound => "NAME_NOT_FOUND",
      Self::DataError => "DATA_ERROR",
      Self::FileNotFound => "FILE_NOT_FOUND",
      Self::BadElemType => "BAD_ELEM_TYPE",
      Self::InvalidOperation => "INVALID_OPERATION",
      Self::IntegerOverflow => "INTEGER_OVERFLOW",
    };
  }
}

impl Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return write!(f, "{}", self.name());
  }
}

/// Errors raised while reading or writing a lata database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LataError {
  /// Grammar or keyword violation in a master file.
  ReadError(String),
  /// The master file header was not recognised.
  BadHeader(String),
  /// Timestep index out of range.
  BadTimestep(String),
  /// Geometry or field not found.
  NameNotFound(String),
  /// Stream failure, shape mismatch, bad marker/ordering combination...
  DataError(String),
  /// Could not open a file.
  FileNotFound(String),
  /// Unknown element type keyword.
  BadElemType(String),
  /// Catalog invariant violation.
  InvalidOperation(String),
  /// Integer narrowing failed.
  IntegerOverflow(String)
}

impl LataError {
  /// Builds an error of the given kind, logging its message.
  pub fn new<S: Into<String>>(kind: ErrorKind, msg: S) -> Self {
    let msg: String = msg.into();
    error!("{}: {}", kind, msg);
    return match kind {
      ErrorKind::ReadError => Self::ReadError(msg),
      ErrorKind::BadHeader => Self::BadHeader(msg),
      ErrorKind::BadTimestep => Self::BadTimestep(msg),
      ErrorKind::NameNotFound => Self::NameNotFound(msg),
      ErrorKind::DataError => Self::DataError(msg),
      ErrorKind::FileNotFound => Self::FileNotFound(msg),
      ErrorKind::BadElemType => Self::BadElemType(msg),
      ErrorKind::InvalidOperation => Self::InvalidOperation(msg),
      ErrorKind::IntegerOverflow => Self::IntegerOverflow(msg),
    };
  }

  /// Shorthand for a logged read error.
  pub(crate) fn read<S: Into<String>>(msg: S) -> Self {
    return Self::new(ErrorKind::ReadError, msg);
  }

  /// Shorthand for a logged data error.
  pub(crate) fn data<S: Into<String>>(msg: S) -> Self {
    return Self::new(ErrorKind::DataError, msg);
  }

  /// Shorthand for a logged invalid operation.
  pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
    return Self::new(ErrorKind::InvalidOperation, msg);
  }

  /// Shorthand for a logged lookup miss.
  pub(crate) fn not_found<S: Into<String>>(msg: S) -> Self {
    return Self::new(ErrorKind::NameNotFound, msg);
  }

  /// Wraps a stream failure on a given file.
  pub(crate) fn from_io(e: io::Error, filename: &str, count: usize) -> Self {
    return Self::data(format!(
      "i/o failure on file \"{}\" while transferring {} values: {}",
      filename, count, e
    ));
  }

  /// Returns the kind of this error.
  pub const fn kind(&self) -> ErrorKind {
    return match self {
      Self::ReadError(_) => ErrorKind::ReadError,
      Self::BadHeader(_) => ErrorKind::BadHeader,
      Self::BadTimestep(_) => ErrorKind::BadTimestep,
      Self::NameNotFound(_) => ErrorKind::NameNotFound,
      Self::DataError(_) => ErrorKind::DataError,
      Self::FileNotFound(_) => ErrorKind::FileNotFound,
      Self::BadElemType(_) => ErrorKind::BadElemType,
      Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
      Self::IntegerOverflow(_) => ErrorKind::IntegerOverflow,
    };
  }

  /// Returns the human-readable message.
  pub fn message(&self) -> &str {
    return match self {
      Self::ReadError(m)
      | Self::BadHeader(m)
      | Self::BadTimestep(m)
      | Self::NameNotFound(m)
      | Self::DataError(m)
      | Self::FileNotFound(m)
      | Self::BadElemType(m)
      | Self::InvalidOperation(m)
      | Self::IntegerOverflow(m) => m,
    };
  }
}

impl Display for LataError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return write!(f, "{}: {}", self.kind(), self.message());
  }
}

impl Error for LataError {}

/// Result alias used throughout the crate.
pub type LataResult<T> = Result<T, LataError>;
