//! Deferred matrix operations.
//!
//! Functional constructors such as [`rev`] record an [`OperationNode`] without touching the
//! backend. Evaluation happens in [`OperationNode::compute`], which lowers the node to a
//! single-function [`Program`](crate::backend::spec::Program) and runs it on the session's
//! backend.

mod functional;
pub(crate) mod lower;
mod node;

pub use functional::{rev, t};
pub use node::{Expression, MatrixOp, OperationNode};
