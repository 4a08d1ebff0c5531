//! Sessions own the connection to an execution backend.
//!
//! A [`Session`] is opened once, shared by cloning, and closed exactly once. Matrix handles
//! and operation nodes keep a clone of the session they were created in; once the session is
//! closed every further handle construction or evaluation fails with
//! [`Error::SessionClosed`]. Dropping the last clone of a session that was never closed
//! releases the backend as if [`Session::close`] had been called.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::registry::{self, ErasedBackend};
use crate::backend::spec::{BackendError, ExecutionBackend, Program, TensorInit};
use crate::env::SessionConfig;
use crate::error::{Error, Result};
use crate::matrix::{HostMatrix, Matrix};

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> u64 {
    SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct SessionInner {
    id: u64,
    backend: Box<dyn ErasedBackend>,
    closed: AtomicBool,
    dump_dir: Option<PathBuf>,
    programs_run: AtomicU64,
}

impl SessionInner {
    fn release(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SessionClosed(self.id));
        }
        self.backend.shutdown()?;
        info!(
            session = self.id,
            backend = self.backend.backend_name(),
            programs = self.programs_run.load(Ordering::Relaxed),
            "session closed"
        );
        Ok(())
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            if let Err(err) = self.release() {
                warn!(session = self.id, error = %err, "failed to release backend on drop");
            }
        }
    }
}

/// Handle to an open backend context. Cheap to clone; clones share lifecycle state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("backend", &self.inner.backend.backend_name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    /// Opens a session using [`SessionConfig::from_env`].
    pub fn open() -> Result<Self> {
        Self::open_with(SessionConfig::from_env())
    }

    /// Opens a session against the registered backend named in `config`.
    pub fn open_with(config: SessionConfig) -> Result<Self> {
        let name = config.backend_name();
        let backend = registry::create_backend(name).ok_or_else(|| Error::UnknownBackend {
            name: name.to_string(),
            available: registry::list_backends(),
        })?;
        Ok(Self::from_erased(backend, config.dump_dir().cloned()))
    }

    /// Opens a session over an explicit backend instance, bypassing the registry.
    pub fn with_backend<B: ExecutionBackend + 'static>(backend: B) -> Self {
        Self::from_erased(registry::erase_backend(backend), None)
    }

    fn from_erased(backend: Box<dyn ErasedBackend>, dump_dir: Option<PathBuf>) -> Self {
        let id = next_session_id();
        info!(session = id, backend = backend.backend_name(), "session opened");
        Session {
            inner: Arc::new(SessionInner {
                id,
                backend,
                closed: AtomicBool::new(false),
                dump_dir,
                programs_run: AtomicU64::new(0),
            }),
        }
    }

    /// Closes the session and shuts the backend down. Fails if already closed.
    pub fn close(&self) -> Result<()> {
        self.inner.release()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.backend_name()
    }

    /// Returns the backend behind this session, e.g. for [`registry::get_typed_backend`].
    pub fn backend(&self) -> &dyn ErasedBackend {
        self.inner.backend.as_ref()
    }

    /// Number of programs this session has executed so far.
    pub fn programs_run(&self) -> u64 {
        self.inner.programs_run.load(Ordering::Relaxed)
    }

    /// Wraps a host matrix as a handle bound to this session.
    pub fn matrix(&self, host: HostMatrix) -> Result<Matrix> {
        Matrix::new(self, host)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::SessionClosed(self.inner.id))
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_same(&self, other: &Session) -> Result<()> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            Ok(())
        } else {
            Err(Error::SessionMismatch {
                expected: self.inner.id,
                found: other.inner.id,
            })
        }
    }

    /// Runs a single-result program over host inputs and reads the result back.
    ///
    /// The result must have the `expected` shape.
    pub(crate) fn execute(
        &self,
        program: &Program,
        inputs: &[&HostMatrix],
        expected: (usize, usize),
    ) -> Result<HostMatrix> {
        self.ensure_open()?;
        let sequence = self.inner.programs_run.fetch_add(1, Ordering::Relaxed);
        if let Some(dir) = &self.inner.dump_dir {
            self.dump_program(dir, sequence, program);
        }

        let backend = self.inner.backend.as_ref();
        let handles = inputs
            .iter()
            .map(|host| backend.materialize(TensorInit::Literal(host.to_literal())))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(
            session = self.inner.id,
            program = sequence,
            inputs = handles.len(),
            "running program"
        );
        let outputs = backend.run_program(program, &handles)?;
        let [output] = outputs.as_slice() else {
            return Err(BackendError::execution(format!(
                "program produced {} results, expected exactly one",
                outputs.len()
            ))
            .into());
        };
        let literal = backend.to_literal(output)?;
        let result = HostMatrix::from_literal(&literal)?;
        if result.shape() != expected {
            return Err(BackendError::execution(format!(
                "backend returned a {}x{} matrix, expected {}x{}",
                result.rows(),
                result.cols(),
                expected.0,
                expected.1
            ))
            .into());
        }
        Ok(result)
    }

    fn dump_program(&self, dir: &Path, sequence: u64, program: &Program) {
        let path = dir.join(format!(
            "session{}-program{:04}.json",
            self.inner.id, sequence
        ));
        let outcome = fs::create_dir_all(dir)
            .map_err(|err| err.to_string())
            .and_then(|_| program.save_json(&path).map_err(|err| err.to_string()));
        match outcome {
            Ok(()) => debug!(path = %path.display(), "dumped program"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to dump program"),
        }
    }
}
