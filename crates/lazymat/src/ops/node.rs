use std::fmt;

use tracing::debug;

use crate::backend::spec::{Operation, ReverseSpec, TransposeSpec};
use crate::error::Result;
use crate::matrix::{HostMatrix, Matrix};
use crate::session::Session;

use super::lower;

/// Anything that evaluates to a matrix within a session.
pub trait Expression {
    /// Shape of the value [`evaluate`](Self::evaluate) produces, known without evaluating.
    fn output_shape(&self) -> (usize, usize);

    /// Executes the expression on `session`'s backend and returns the materialized result.
    fn evaluate(&self, session: &Session) -> Result<HostMatrix>;
}

/// Operations a node can apply to its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixOp {
    /// Reverse along the first axis.
    Reverse,
    Transpose,
}

impl MatrixOp {
    pub fn name(self) -> &'static str {
        match self {
            MatrixOp::Reverse => "rev",
            MatrixOp::Transpose => "t",
        }
    }

    pub fn output_shape(self, (rows, cols): (usize, usize)) -> (usize, usize) {
        match self {
            MatrixOp::Reverse => (rows, cols),
            MatrixOp::Transpose => (cols, rows),
        }
    }

    pub(crate) fn to_operation(self) -> Operation {
        match self {
            MatrixOp::Reverse => Operation::Reverse(ReverseSpec { axes: vec![0] }),
            MatrixOp::Transpose => Operation::Transpose(TransposeSpec { perm: vec![1, 0] }),
        }
    }
}

impl fmt::Display for MatrixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single deferred operation over one matrix handle. Immutable once built.
#[derive(Debug, Clone)]
pub struct OperationNode {
    session: Session,
    op: MatrixOp,
    input: Matrix,
    shape: (usize, usize),
}

impl OperationNode {
    /// Records `op` over `input`. The input must belong to `session`, which must be open.
    pub fn new(session: &Session, op: MatrixOp, input: &Matrix) -> Result<Self> {
        session.ensure_open()?;
        session.ensure_same(input.session())?;
        let shape = op.output_shape(input.shape());
        debug!(
            session = session.id(),
            op = op.name(),
            input = input.id(),
            rows = shape.0,
            cols = shape.1,
            "operation node recorded"
        );
        Ok(OperationNode {
            session: session.clone(),
            op,
            input: input.clone(),
            shape,
        })
    }

    pub fn op(&self) -> MatrixOp {
        self.op
    }

    pub fn input(&self) -> &Matrix {
        &self.input
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Declared output shape.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Evaluates the node on its own session. Every call re-executes the program.
    pub fn compute(&self) -> Result<HostMatrix> {
        self.evaluate(&self.session)
    }
}

impl Expression for OperationNode {
    fn output_shape(&self) -> (usize, usize) {
        self.shape
    }

    fn evaluate(&self, session: &Session) -> Result<HostMatrix> {
        session.ensure_same(&self.session)?;
        let program = lower::lower_node(self.op, self.input.shape())?;
        session.execute(&program, &[self.input.host()], self.shape)
    }
}
