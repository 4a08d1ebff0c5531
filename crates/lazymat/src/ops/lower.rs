//! Lowering of expressions into backend programs.

use crate::backend::spec::{
    DType, Operand, Program, ProgramBuilder, Shape, TensorSpec, ValueType,
};
use crate::error::Result;

use super::MatrixOp;

pub(crate) const ENTRY: &str = "main";

fn matrix_type((rows, cols): (usize, usize)) -> ValueType {
    ValueType::Tensor(TensorSpec::new(DType::F64, Shape::new([rows, cols])))
}

/// Program whose single result is its single parameter.
pub(crate) fn lower_identity(shape: (usize, usize)) -> Result<Program> {
    let mut builder = ProgramBuilder::new();
    let input = builder.add_parameter(matrix_type(shape));
    let function = builder.finish(ENTRY, vec![input])?;
    Ok(Program::new(ENTRY).with_functions(vec![function]))
}

/// Program applying `op` once to a single matrix parameter of `input_shape`.
pub(crate) fn lower_node(op: MatrixOp, input_shape: (usize, usize)) -> Result<Program> {
    let mut builder = ProgramBuilder::new();
    let input = builder.add_parameter(matrix_type(input_shape));
    let output = builder.emit_single(
        op.to_operation(),
        vec![Operand::Value(input)],
        matrix_type(op.output_shape(input_shape)),
    );
    let function = builder.finish(ENTRY, vec![output])?;
    tracing::trace!(op = op.name(), rows = input_shape.0, cols = input_shape.1, "lowered node");
    Ok(Program::new(ENTRY).with_functions(vec![function]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::spec::{Operation, ReverseSpec, TransposeSpec};

    #[test]
    fn reverse_lowers_to_single_instruction() {
        let program = lower_node(MatrixOp::Reverse, (3, 2)).unwrap();
        let main = program.entry_function().unwrap();
        assert_eq!(main.parameters, vec![matrix_type((3, 2))]);
        assert_eq!(main.body.len(), 1);
        assert_eq!(
            main.body[0].op,
            Operation::Reverse(ReverseSpec { axes: vec![0] })
        );
        assert_eq!(main.results, vec![matrix_type((3, 2))]);
    }

    #[test]
    fn transpose_swaps_result_shape() {
        let program = lower_node(MatrixOp::Transpose, (4, 1)).unwrap();
        let main = program.entry_function().unwrap();
        assert_eq!(
            main.body[0].op,
            Operation::Transpose(TransposeSpec { perm: vec![1, 0] })
        );
        assert_eq!(main.results, vec![matrix_type((1, 4))]);
    }

    #[test]
    fn identity_returns_its_parameter() {
        let program = lower_identity((1, 0)).unwrap();
        let main = program.entry_function().unwrap();
        assert!(main.body.is_empty());
        assert_eq!(main.result_ids, main.parameter_ids);
    }
}
