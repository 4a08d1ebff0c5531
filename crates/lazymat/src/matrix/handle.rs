//! Symbolic matrix operand bound to a session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::HostMatrix;
use crate::error::Result;
use crate::ops::{lower, Expression};
use crate::session::Session;

static MATRIX_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_matrix_id() -> u64 {
    MATRIX_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Handle to a host array registered with a [`Session`].
///
/// The data is shared, not copied, between clones of the handle and the nodes that read it.
#[derive(Debug, Clone)]
pub struct Matrix {
    id: u64,
    session: Session,
    data: Arc<HostMatrix>,
}

impl Matrix {
    /// Wraps `host` in `session`. Fails with `SessionClosed` once the session is closed.
    pub fn new(session: &Session, host: HostMatrix) -> Result<Self> {
        session.ensure_open()?;
        let id = next_matrix_id();
        debug!(
            session = session.id(),
            matrix = id,
            rows = host.rows(),
            cols = host.cols(),
            "matrix handle created"
        );
        Ok(Matrix {
            id,
            session: session.clone(),
            data: Arc::new(host),
        })
    }

    /// Builds a handle from nested rows, rejecting ragged input with a `ShapeError`.
    pub fn from_rows<R, I>(session: &Session, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[f64]>,
    {
        let host = HostMatrix::from_rows(rows)?;
        Self::new(session, host)
    }

    /// Builds a handle from a row-major buffer.
    pub fn from_vec(session: &Session, rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        let host = HostMatrix::from_vec(rows, cols, data)?;
        Self::new(session, host)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Borrows the wrapped host data.
    pub fn host(&self) -> &HostMatrix {
        &self.data
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }

    /// Round-trips the wrapped values through the session's backend.
    pub fn compute(&self) -> Result<HostMatrix> {
        self.evaluate(&self.session)
    }
}

impl Expression for Matrix {
    fn output_shape(&self) -> (usize, usize) {
        self.shape()
    }

    fn evaluate(&self, session: &Session) -> Result<HostMatrix> {
        session.ensure_same(&self.session)?;
        let program = lower::lower_identity(self.shape())?;
        session.execute(&program, &[self.host()], self.shape())
    }
}
