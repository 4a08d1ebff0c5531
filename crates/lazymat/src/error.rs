//! Client-facing error type.

use thiserror::Error;

use crate::backend::spec::BackendError;

/// Malformed array input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("ragged rows: row {row} has {found} columns, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("data length {len} does not match shape {rows}x{cols}")]
    LengthMismatch { rows: usize, cols: usize, len: usize },
    #[error("shape {rows}x{cols} overflows the addressable element count")]
    Overflow { rows: usize, cols: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("session {0} is closed")]
    SessionClosed(u64),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("matrix belongs to session {found}, not session {expected}")]
    SessionMismatch { expected: u64, found: u64 },
    #[error("no backend registered under '{name}' (available: {available:?})")]
    UnknownBackend { name: String, available: Vec<String> },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, Error>;
