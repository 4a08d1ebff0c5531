use crate::error::Result;
use crate::matrix::Matrix;
use crate::session::Session;

use super::{MatrixOp, OperationNode};

/// Reverses the row order of `input`: output row `i` is input row `rows - 1 - i`.
///
/// Zero-row and single-row inputs come back unchanged; the column count is preserved.
pub fn rev(session: &Session, input: &Matrix) -> Result<OperationNode> {
    OperationNode::new(session, MatrixOp::Reverse, input)
}

/// Transposes `input`: output `[j][i]` is input `[i][j]`.
pub fn t(session: &Session, input: &Matrix) -> Result<OperationNode> {
    OperationNode::new(session, MatrixOp::Transpose, input)
}
