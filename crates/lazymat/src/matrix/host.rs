//! Host-backed dense matrix used for inputs, results, and local reference computations.

use crate::backend::spec::{BackendError, BackendResult, Shape, TensorLiteral};
use crate::error::ShapeError;

/// Default relative tolerance for [`HostMatrix::allclose`].
pub const DEFAULT_RTOL: f64 = 1e-5;
/// Default absolute tolerance for [`HostMatrix::allclose`].
pub const DEFAULT_ATOL: f64 = 1e-8;

/// Row-major `f64` matrix. Either extent may be zero.
#[derive(Debug, Clone, PartialEq)]
pub struct HostMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl HostMatrix {
    /// Wraps a flat row-major buffer, validating its length against the shape.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, ShapeError> {
        let expected = rows
            .checked_mul(cols)
            .ok_or(ShapeError::Overflow { rows, cols })?;
        if data.len() != expected {
            return Err(ShapeError::LengthMismatch {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(HostMatrix { rows, cols, data })
    }

    /// Builds a matrix from nested rows; every row must have the same length.
    ///
    /// An empty outer collection yields a `0 x 0` matrix.
    pub fn from_rows<R, I>(rows: I) -> Result<Self, ShapeError>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[f64]>,
    {
        let mut data = Vec::new();
        let mut cols = None;
        let mut count = 0usize;
        for (index, row) in rows.into_iter().enumerate() {
            let row = row.as_ref();
            match cols {
                None => cols = Some(row.len()),
                Some(expected) if expected != row.len() => {
                    return Err(ShapeError::Ragged {
                        row: index,
                        expected,
                        found: row.len(),
                    })
                }
                Some(_) => {}
            }
            data.extend_from_slice(row);
            count += 1;
        }
        Ok(HostMatrix {
            rows: count,
            cols: cols.unwrap_or(0),
            data,
        })
    }

    /// Returns a zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self, ShapeError> {
        let len = rows
            .checked_mul(cols)
            .ok_or(ShapeError::Overflow { rows, cols })?;
        Ok(HostMatrix {
            rows,
            cols,
            data: vec![0.0; len],
        })
    }

    /// Builds a matrix by evaluating `f(row, col)` for every cell.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> Result<Self, ShapeError>
    where
        F: FnMut(usize, usize) -> f64,
    {
        let mut matrix = Self::zeros(rows, cols)?;
        for r in 0..rows {
            for c in 0..cols {
                matrix.data[r * cols + c] = f(r, c);
            }
        }
        Ok(matrix)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrows the row-major buffer.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Borrows one row, or `None` when out of range.
    pub fn row(&self, index: usize) -> Option<&[f64]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.cols;
        Some(&self.data[start..start + self.cols])
    }

    /// Local reference for the reverse operation: row `i` becomes row `rows - 1 - i`.
    pub fn flip_rows(&self) -> HostMatrix {
        let mut data = Vec::with_capacity(self.data.len());
        for r in (0..self.rows).rev() {
            let start = r * self.cols;
            data.extend_from_slice(&self.data[start..start + self.cols]);
        }
        HostMatrix {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    /// Local reference transpose.
    pub fn transpose(&self) -> HostMatrix {
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..self.cols {
            for r in 0..self.rows {
                data.push(self.data[r * self.cols + c]);
            }
        }
        HostMatrix {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }

    /// Element-wise `|a - b| <= atol + rtol * |b|` with the default tolerances.
    pub fn allclose(&self, other: &HostMatrix) -> bool {
        self.allclose_tol(other, DEFAULT_RTOL, DEFAULT_ATOL)
    }

    /// Like [`allclose`](Self::allclose) with explicit tolerances. Shapes must match.
    pub fn allclose_tol(&self, other: &HostMatrix, rtol: f64, atol: f64) -> bool {
        if self.shape() != other.shape() {
            return false;
        }
        self.data
            .iter()
            .zip(other.data.iter())
            .all(|(&a, &b)| (a - b).abs() <= atol + rtol * b.abs())
    }

    /// Encodes the matrix as a rank-2 `F64` literal.
    pub fn to_literal(&self) -> TensorLiteral {
        TensorLiteral::from_f64(Shape::new([self.rows, self.cols]), &self.data)
    }

    /// Decodes a rank-2 `F64` literal produced by a backend.
    pub fn from_literal(literal: &TensorLiteral) -> BackendResult<Self> {
        let dims = literal.spec.shape.dims();
        if dims.len() != 2 {
            return Err(BackendError::execution(format!(
                "backend produced rank-{} result, expected a matrix",
                dims.len()
            )));
        }
        let values = literal.to_f64_vec()?;
        HostMatrix::from_vec(dims[0], dims[1], values)
            .map_err(|err| BackendError::execution(err.to_string()))
    }
}
