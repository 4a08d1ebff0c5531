use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazymat::backend::spec::{
    BackendError, BackendResult, DType, ExecutionBackend, Instruction, Operand, Operation,
    Program, ReverseSpec, Shape, SpecErrorCode, TensorInit, TensorLiteral, TensorSpec,
    TransposeSpec, ValueId, ValueType,
};

#[derive(Debug, Clone)]
pub struct CpuTensor {
    pub spec: TensorSpec,
    pub data: TensorData,
}

#[derive(Debug, Clone)]
pub enum TensorData {
    F32(Arc<[f32]>),
    F64(Arc<[f64]>),
}

/// Reference backend that executes programs on host memory.
#[derive(Debug, Default)]
pub struct CpuBackend {
    shut_down: AtomicBool,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> BackendResult<()> {
        if self.is_shut_down() {
            Err(BackendError::execution("cpu backend has been shut down"))
        } else {
            Ok(())
        }
    }
}

impl ExecutionBackend for CpuBackend {
    type TensorHandle = CpuTensor;

    fn backend_name(&self) -> &str {
        "cpu-ref"
    }

    fn materialize(&self, init: TensorInit) -> BackendResult<Self::TensorHandle> {
        self.ensure_running()?;
        match init {
            TensorInit::Literal(lit) => literal_to_tensor(&lit),
            TensorInit::Zeroed(spec) => zeroed_tensor(&spec),
        }
    }

    fn to_literal(&self, tensor: &Self::TensorHandle) -> BackendResult<TensorLiteral> {
        Ok(tensor_to_literal(tensor))
    }

    fn execute_instruction(
        &self,
        instruction: &Instruction,
        inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>> {
        self.ensure_running()?;
        execute_operation(instruction, inputs)
    }

    fn run_program(
        &self,
        program: &Program,
        entry_inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>> {
        self.ensure_running()?;
        let function = program
            .entry_function()
            .ok_or_else(|| BackendError::execution("entry function not found"))?;

        if function.parameter_ids.len() != entry_inputs.len() {
            return Err(BackendError::execution(format!(
                "entry input arity mismatch: expected {}, got {}",
                function.parameter_ids.len(),
                entry_inputs.len()
            )));
        }

        let mut values: HashMap<ValueId, CpuTensor> = HashMap::new();
        for ((param_id, param_ty), handle) in function
            .parameter_ids
            .iter()
            .zip(function.parameters.iter())
            .zip(entry_inputs.iter())
        {
            if param_ty.tensor_spec() != &handle.spec {
                return Err(BackendError::execution(format!(
                    "entry input %{} has spec {:?}, expected {:?}",
                    param_id.0,
                    handle.spec,
                    param_ty.tensor_spec()
                )));
            }
            values.insert(*param_id, handle.clone());
        }

        for (instr_index, instruction) in function.body.iter().enumerate() {
            let mut inputs = Vec::with_capacity(instruction.operands.len());
            for operand in &instruction.operands {
                let tensor = match operand {
                    Operand::Value(id) => values.get(id).cloned().ok_or_else(|| {
                        BackendError::execution(format!("operand value %{} missing", id.0))
                    })?,
                    Operand::Literal(lit) => literal_to_tensor(lit)?,
                };
                inputs.push(tensor);
            }
            let mut outputs = execute_operation(instruction, &inputs).map_err(|err| {
                augment_backend_error(err, &function.name, instr_index, instruction, &inputs)
            })?;
            let output = match (outputs.pop(), outputs.is_empty()) {
                (Some(output), true) => output,
                _ => {
                    return Err(BackendError::execution(
                        "instructions must produce exactly one result",
                    ))
                }
            };
            values.insert(instruction.id, output);
        }

        function
            .result_ids
            .iter()
            .map(|id| {
                values.get(id).cloned().ok_or_else(|| {
                    BackendError::execution(format!("missing function result value %{}", id.0))
                })
            })
            .collect()
    }

    fn shutdown(&self) -> BackendResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Err(BackendError::execution("cpu backend already shut down"));
        }
        tracing::debug!("cpu backend shut down");
        Ok(())
    }
}

fn literal_to_tensor(literal: &TensorLiteral) -> BackendResult<CpuTensor> {
    literal.check_len()?;
    let data = match literal.spec.dtype {
        DType::F32 => TensorData::F32(Arc::from(
            literal
                .bytes
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect::<Vec<_>>(),
        )),
        DType::F64 => TensorData::F64(Arc::from(literal.to_f64_vec()?)),
    };
    Ok(CpuTensor {
        spec: literal.spec.clone(),
        data,
    })
}

fn zeroed_tensor(spec: &TensorSpec) -> BackendResult<CpuTensor> {
    let elem_count = element_count(&spec.shape)?;
    let data = match spec.dtype {
        DType::F32 => TensorData::F32(Arc::from(vec![0.0f32; elem_count])),
        DType::F64 => TensorData::F64(Arc::from(vec![0.0f64; elem_count])),
    };
    Ok(CpuTensor {
        spec: spec.clone(),
        data,
    })
}

fn tensor_to_literal(tensor: &CpuTensor) -> TensorLiteral {
    let bytes: Vec<u8> = match &tensor.data {
        TensorData::F32(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        TensorData::F64(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    };
    TensorLiteral::new(tensor.spec.clone(), Arc::from(bytes))
}

fn execute_operation(
    instruction: &Instruction,
    inputs: &[CpuTensor],
) -> BackendResult<Vec<CpuTensor>> {
    let output = match &instruction.output {
        ValueType::Tensor(spec) => spec,
    };
    let _span = tracing::trace_span!("cpu.op", op = instruction.op.label()).entered();
    let result = match &instruction.op {
        Operation::Constant(literal) => literal_to_tensor(literal)?,
        Operation::Reverse(spec) => op_reverse(inputs, output, spec)?,
        Operation::Transpose(spec) => op_transpose(inputs, output, spec)?,
    };
    Ok(vec![result])
}

fn augment_backend_error(
    error: BackendError,
    function_name: &str,
    instruction_index: usize,
    instruction: &Instruction,
    inputs: &[CpuTensor],
) -> BackendError {
    let context = format!(
        "at function `{}` instruction #{}, {} id %{} operands [{}]",
        function_name,
        instruction_index,
        instruction.op.label(),
        instruction.id.0,
        format_operands(&instruction.operands, inputs)
    );
    match error {
        BackendError::Execution { message } => BackendError::Execution {
            message: format!("{message} ({context})"),
        },
        BackendError::Unimplemented { op, reason } => BackendError::Unimplemented {
            op,
            reason: format!("{reason} (while executing {context})"),
        },
        other => other,
    }
}

fn format_operands(operands: &[Operand], inputs: &[CpuTensor]) -> String {
    if operands.is_empty() {
        return String::from("<none>");
    }
    operands
        .iter()
        .zip(inputs.iter())
        .map(|(operand, tensor)| {
            let dims = tensor
                .spec
                .shape
                .dims()
                .iter()
                .map(|dim| dim.to_string())
                .collect::<Vec<_>>()
                .join("x");
            match operand {
                Operand::Value(id) => {
                    format!("value %{} [{}] dtype={:?}", id.0, dims, tensor.spec.dtype)
                }
                Operand::Literal(_) => format!("literal [{}] dtype={:?}", dims, tensor.spec.dtype),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn op_reverse(
    inputs: &[CpuTensor],
    output: &TensorSpec,
    spec: &ReverseSpec,
) -> BackendResult<CpuTensor> {
    let input = expect_single(inputs)?;
    let dims = input.spec.shape.dims();
    let mut seen = HashSet::new();
    for &axis in &spec.axes {
        if axis >= dims.len() || !seen.insert(axis) {
            return Err(BackendError::spec(
                SpecErrorCode::InvalidAttributeValue,
                format!("reverse axes {:?} invalid for rank {}", spec.axes, dims.len()),
            ));
        }
    }
    if output != &input.spec {
        return Err(BackendError::execution(format!(
            "reverse output spec {:?} does not match input {:?}",
            output, input.spec
        )));
    }
    let strides = compute_strides(dims);
    let gather = |out_index: usize| {
        let mut coords = unravel_index(out_index, dims);
        for &axis in &spec.axes {
            coords[axis] = dims[axis] - 1 - coords[axis];
        }
        ravel_index(&coords, &strides)
    };
    Ok(CpuTensor {
        spec: output.clone(),
        data: gather_data(&input.data, element_count(&output.shape)?, gather),
    })
}

fn op_transpose(
    inputs: &[CpuTensor],
    output: &TensorSpec,
    spec: &TransposeSpec,
) -> BackendResult<CpuTensor> {
    let input = expect_single(inputs)?;
    let input_dims = input.spec.shape.dims();
    let mut sorted = spec.perm.clone();
    sorted.sort_unstable();
    if sorted != (0..input_dims.len()).collect::<Vec<_>>() {
        return Err(BackendError::spec(
            SpecErrorCode::InvalidAttributeValue,
            format!(
                "transpose perm {:?} is not a permutation of rank {}",
                spec.perm,
                input_dims.len()
            ),
        ));
    }
    let expected: Vec<usize> = spec.perm.iter().map(|&axis| input_dims[axis]).collect();
    if output.shape.dims() != expected.as_slice() || output.dtype != input.spec.dtype {
        return Err(BackendError::execution(format!(
            "transpose output spec {:?} does not match permuted input {:?}",
            output, expected
        )));
    }
    let out_dims = output.shape.dims();
    let input_strides = compute_strides(input_dims);
    let gather = |out_index: usize| {
        let out_coord = unravel_index(out_index, out_dims);
        out_coord
            .iter()
            .enumerate()
            .map(|(out_axis, &c)| c * input_strides[spec.perm[out_axis]])
            .sum::<usize>()
    };
    Ok(CpuTensor {
        spec: output.clone(),
        data: gather_data(&input.data, element_count(&output.shape)?, gather),
    })
}

/// Builds a new buffer where element `i` is `source[index_of(i)]`.
fn gather_data<F>(source: &TensorData, len: usize, index_of: F) -> TensorData
where
    F: Fn(usize) -> usize,
{
    match source {
        TensorData::F32(values) => {
            TensorData::F32((0..len).map(|i| values[index_of(i)]).collect())
        }
        TensorData::F64(values) => {
            TensorData::F64((0..len).map(|i| values[index_of(i)]).collect())
        }
    }
}

fn expect_single(inputs: &[CpuTensor]) -> BackendResult<&CpuTensor> {
    match inputs {
        [single] => Ok(single),
        _ => Err(BackendError::execution(format!(
            "operation expects single input, got {}",
            inputs.len()
        ))),
    }
}

fn element_count(shape: &Shape) -> BackendResult<usize> {
    shape.element_count().ok_or_else(|| {
        BackendError::spec(
            SpecErrorCode::InvalidShape,
            format!("element count overflows for {:?}", shape.dims()),
        )
    })
}

fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (i, dim) in dims.iter().enumerate().rev() {
        coords[i] = index % *dim;
        index /= *dim;
    }
    coords
}

fn ravel_index(coords: &[usize], strides: &[usize]) -> usize {
    coords.iter().zip(strides).map(|(c, s)| c * s).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazymat::backend::spec::ProgramBuilder;

    fn f64_tensor(dims: &[usize], values: &[f64]) -> CpuTensor {
        literal_to_tensor(&TensorLiteral::from_f64(Shape::new(dims), values)).unwrap()
    }

    fn f64_values(tensor: &CpuTensor) -> Vec<f64> {
        match &tensor.data {
            TensorData::F64(values) => values.to_vec(),
            other => panic!("expected f64 data, got {other:?}"),
        }
    }

    fn single_op_program(op: Operation, input: TensorSpec, output: TensorSpec) -> Program {
        let mut builder = ProgramBuilder::new();
        let param = builder.add_parameter(ValueType::Tensor(input));
        let out = builder.emit_single(op, vec![Operand::Value(param)], ValueType::Tensor(output));
        let function = builder.finish("main", vec![out]).unwrap();
        Program::new("main").with_functions(vec![function])
    }

    fn reverse(axes: &[usize]) -> Operation {
        Operation::Reverse(ReverseSpec {
            axes: axes.to_vec(),
        })
    }

    #[test]
    fn reverse_first_axis_flips_rows() {
        let backend = CpuBackend::new();
        let input = f64_tensor(&[3, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let program = single_op_program(reverse(&[0]), input.spec.clone(), input.spec.clone());
        let out = backend.run_program(&program, &[input]).unwrap();
        assert_eq!(f64_values(&out[0]), vec![5.0, 6.0, 3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn reverse_multiple_axes() {
        let input = f64_tensor(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = op_reverse(
            std::slice::from_ref(&input),
            &input.spec,
            &ReverseSpec { axes: vec![0, 1] },
        )
        .unwrap();
        assert_eq!(f64_values(&out), vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn reverse_zero_extent_is_empty() {
        let input = f64_tensor(&[1, 0], &[]);
        let out = op_reverse(
            std::slice::from_ref(&input),
            &input.spec,
            &ReverseSpec { axes: vec![0] },
        )
        .unwrap();
        assert!(f64_values(&out).is_empty());
        assert_eq!(out.spec.shape.dims(), &[1, 0]);
    }

    #[test]
    fn reverse_rejects_out_of_range_and_duplicate_axes() {
        let input = f64_tensor(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        for axes in [vec![2], vec![0, 0]] {
            let err = op_reverse(
                std::slice::from_ref(&input),
                &input.spec,
                &ReverseSpec { axes },
            )
            .unwrap_err();
            assert!(matches!(err, BackendError::SpecViolation(_)));
        }
    }

    #[test]
    fn reverse_handles_f32() {
        let bytes: Vec<u8> = [1.0f32, 2.0, 3.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let spec = TensorSpec::new(DType::F32, Shape::new([3, 1]));
        let input = literal_to_tensor(&TensorLiteral::new(spec.clone(), Arc::from(bytes))).unwrap();
        let out = op_reverse(&[input], &spec, &ReverseSpec { axes: vec![0] }).unwrap();
        match out.data {
            TensorData::F32(values) => assert_eq!(values.as_ref(), &[3.0f32, 2.0, 1.0]),
            other => panic!("expected f32 data, got {other:?}"),
        }
    }

    #[test]
    fn transpose_permutes_axes() {
        let input = f64_tensor(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let output = TensorSpec::new(DType::F64, Shape::new([3, 2]));
        let out = op_transpose(
            std::slice::from_ref(&input),
            &output,
            &TransposeSpec { perm: vec![1, 0] },
        )
        .unwrap();
        assert_eq!(f64_values(&out), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        let err = op_transpose(&[input], &output, &TransposeSpec { perm: vec![0, 0] }).unwrap_err();
        assert!(matches!(err, BackendError::SpecViolation(_)));
    }

    #[test]
    fn execution_errors_carry_instruction_context() {
        let backend = CpuBackend::new();
        let input = f64_tensor(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let wrong = TensorSpec::new(DType::F64, Shape::new([4, 1]));
        let program = single_op_program(reverse(&[0]), input.spec.clone(), wrong);
        let err = backend.run_program(&program, &[input]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("function `main` instruction #0"), "{message}");
        assert!(message.contains("value %0 [2x2] dtype=F64"), "{message}");
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let backend = CpuBackend::new();
        let input = f64_tensor(&[1, 1], &[1.0]);
        let program = single_op_program(reverse(&[0]), input.spec.clone(), input.spec.clone());
        assert!(backend.run_program(&program, &[]).is_err());
    }

    #[test]
    fn shutdown_rejects_further_work() {
        let backend = CpuBackend::new();
        backend.shutdown().unwrap();
        assert!(backend.is_shut_down());
        let lit = TensorLiteral::from_f64(Shape::new([1, 1]), &[1.0]);
        assert!(backend.materialize(TensorInit::Literal(lit)).is_err());
        assert!(backend.shutdown().is_err());
    }

    #[test]
    fn zeroed_materialization() {
        let backend = CpuBackend::new();
        let spec = TensorSpec::new(DType::F64, Shape::new([2, 3]));
        let tensor = backend.materialize(TensorInit::Zeroed(spec)).unwrap();
        assert_eq!(f64_values(&tensor), vec![0.0; 6]);
    }
}
