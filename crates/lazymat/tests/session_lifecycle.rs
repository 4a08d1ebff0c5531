mod session_support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use lazymat::backend::registry;
use lazymat::backend::spec::{
    BackendResult, ExecutionBackend, Instruction, Program, TensorInit, TensorLiteral,
};
use lazymat::{ops, Error, HostMatrix, Matrix, Session, SessionConfig, ShapeError};
use lazymat_backend_ref_cpu::{CpuBackend, CpuTensor};
use session_support::SessionFixture;

struct CountingBackend {
    inner: CpuBackend,
    runs: Arc<AtomicUsize>,
}

impl ExecutionBackend for CountingBackend {
    type TensorHandle = CpuTensor;

    fn backend_name(&self) -> &str {
        "cpu-counting"
    }

    fn materialize(&self, init: TensorInit) -> BackendResult<Self::TensorHandle> {
        self.inner.materialize(init)
    }

    fn to_literal(&self, tensor: &Self::TensorHandle) -> BackendResult<TensorLiteral> {
        self.inner.to_literal(tensor)
    }

    fn execute_instruction(
        &self,
        instruction: &Instruction,
        inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>> {
        self.inner.execute_instruction(instruction, inputs)
    }

    fn run_program(
        &self,
        program: &Program,
        entry_inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.run_program(program, entry_inputs)
    }
}

fn counting_session() -> (Session, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let session = Session::with_backend(CountingBackend {
        inner: CpuBackend::new(),
        runs: Arc::clone(&runs),
    });
    (session, runs)
}

#[test]
fn nodes_defer_work_until_compute() -> Result<()> {
    let (session, runs) = counting_session();
    let m = Matrix::from_rows(&session, [[1.0, 2.0], [3.0, 4.0]])?;

    let node = ops::rev(&session, &m)?;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    node.compute()?;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    node.compute()?;
    assert_eq!(runs.load(Ordering::SeqCst), 2, "each compute re-executes");

    session.close()?;
    Ok(())
}

#[test]
fn matrix_on_closed_session_fails() -> Result<()> {
    let fixture = SessionFixture::open()?;
    let sds = &fixture.session;
    sds.close()?;

    let err = Matrix::from_rows(sds, [[1.0]]).unwrap_err();
    assert!(matches!(err, Error::SessionClosed(id) if id == sds.id()));
    Ok(())
}

#[test]
fn compute_after_close_fails() -> Result<()> {
    let fixture = SessionFixture::open()?;
    let sds = &fixture.session;
    let m = Matrix::from_rows(sds, [[1.0, 2.0], [3.0, 4.0]])?;
    let node = ops::rev(sds, &m)?;
    sds.close()?;

    assert!(matches!(node.compute(), Err(Error::SessionClosed(_))));
    assert!(matches!(m.compute(), Err(Error::SessionClosed(_))));
    assert!(matches!(ops::rev(sds, &m), Err(Error::SessionClosed(_))));
    Ok(())
}

#[test]
fn close_happens_exactly_once() -> Result<()> {
    let fixture = SessionFixture::open()?;
    let sds = &fixture.session;
    let clone = sds.clone();

    assert!(!clone.is_closed());
    sds.close()?;
    assert!(clone.is_closed());
    assert!(matches!(clone.close(), Err(Error::SessionClosed(_))));
    Ok(())
}

#[test]
fn ragged_rows_are_a_shape_error() -> Result<()> {
    let fixture = SessionFixture::open()?;
    let rows: Vec<Vec<f64>> = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0]];

    let err = Matrix::from_rows(&fixture.session, rows).unwrap_err();
    assert!(matches!(
        err,
        Error::Shape(ShapeError::Ragged {
            row: 1,
            expected: 3,
            found: 2
        })
    ));
    assert!(matches!(
        Matrix::from_vec(&fixture.session, 2, 3, vec![0.0; 5]),
        Err(Error::Shape(ShapeError::LengthMismatch { .. }))
    ));
    Ok(())
}

#[test]
fn handles_cannot_cross_sessions() -> Result<()> {
    let first = SessionFixture::open()?;
    let second = SessionFixture::open()?;
    let m = Matrix::from_rows(&first.session, [[1.0]])?;

    let err = ops::rev(&second.session, &m).unwrap_err();
    assert!(matches!(
        err,
        Error::SessionMismatch { expected, found }
            if expected == second.session.id() && found == first.session.id()
    ));
    Ok(())
}

#[test]
fn unknown_backend_is_reported() {
    let err = Session::open_with(SessionConfig::new().backend("no-such-backend")).unwrap_err();
    assert!(matches!(err, Error::UnknownBackend { ref name, .. } if name == "no-such-backend"));
}

#[test]
fn registry_exposes_cpu_backend() -> Result<()> {
    lazymat_backend_ref_cpu::register_cpu_backend();
    assert!(registry::has_backend("cpu"));
    assert!(registry::list_backends().contains(&"cpu-ref".to_string()));

    let session = Session::open_with(SessionConfig::new().backend("cpu-ref"))?;
    assert_eq!(session.backend_name(), "cpu-ref");
    assert!(registry::get_typed_backend::<CpuBackend>(session.backend()).is_some());
    session.close()?;
    Ok(())
}

#[test]
fn dropping_last_clone_releases_backend() -> Result<()> {
    lazymat_backend_ref_cpu::register_cpu_backend();
    let session = Session::open_with(SessionConfig::new().backend("cpu"))?;
    let backend = registry::get_typed_backend::<CpuBackend>(session.backend())
        .expect("session opened on the cpu backend");
    let m = Matrix::from_rows(&session, [[1.0]])?;

    drop(session);
    assert!(!backend.is_shut_down(), "matrix still holds the session");
    drop(m);
    assert!(backend.is_shut_down());
    Ok(())
}

#[test]
fn dump_dir_receives_lowered_programs() -> Result<()> {
    lazymat_backend_ref_cpu::register_cpu_backend();
    let dir = tempfile::tempdir()?;
    let session = Session::open_with(
        SessionConfig::new()
            .backend("cpu")
            .dump_programs(dir.path().join("programs")),
    )?;
    let m = session.matrix(HostMatrix::from_rows([[1.0, 2.0], [3.0, 4.0]])?)?;
    ops::rev(&session, &m)?.compute()?;
    session.close()?;

    let dumped: Vec<_> = std::fs::read_dir(dir.path().join("programs"))?
        .collect::<std::io::Result<Vec<_>>>()?;
    assert_eq!(dumped.len(), 1);
    let program = Program::load_json(dumped[0].path())?;
    assert_eq!(program.entry, "main");
    assert!(program.to_text().contains("reverse[axes = [0]]"));
    Ok(())
}

#[test]
fn open_uses_default_backend_when_unset() -> Result<()> {
    if std::env::var_os(lazymat::env::BACKEND_VAR).is_some() {
        return Ok(());
    }
    lazymat_backend_ref_cpu::register_cpu_backend();
    let session = Session::open()?;
    assert_eq!(session.backend_name(), "cpu-ref");
    session.close()?;
    Ok(())
}
