//! Runtime backend registry for selecting execution backends by name.
//!
//! Backend crates register a constructor under one or more names; sessions then open a
//! backend from a configured name without naming the concrete type.

use super::spec::{
    BackendError, BackendResult, ExecutionBackend, Instruction, Program, TensorInit,
    TensorLiteral,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Type-erased, shareable backend handle that is downcast to the concrete handle type.
pub type BackendHandle = Arc<dyn Any + Send + Sync>;

/// Factory function that creates a new backend instance.
pub type BackendConstructor = Box<dyn Fn() -> Box<dyn ErasedBackend> + Send + Sync>;

/// Object-safe view over an [`ExecutionBackend`].
pub trait ErasedBackend: Send + Sync {
    /// Returns a human-readable backend identifier.
    fn backend_name(&self) -> &str;

    /// Materializes a tensor handle from host initialization data.
    fn materialize(&self, init: TensorInit) -> BackendResult<BackendHandle>;

    /// Reads back a tensor handle into a dense literal.
    fn to_literal(&self, handle: &BackendHandle) -> BackendResult<TensorLiteral>;

    /// Executes a single instruction with type-erased handles.
    fn execute_instruction(
        &self,
        instruction: &Instruction,
        inputs: &[BackendHandle],
    ) -> BackendResult<Vec<BackendHandle>>;

    /// Executes an entire program starting from the entry function.
    fn run_program(
        &self,
        program: &Program,
        entry_inputs: &[BackendHandle],
    ) -> BackendResult<Vec<BackendHandle>>;

    /// Releases backend resources.
    fn shutdown(&self) -> BackendResult<()>;

    /// Downcast to Any for type recovery when needed.
    fn as_any(&self) -> &dyn Any;
}

/// Wrapper that implements [`ErasedBackend`] for any concrete backend.
struct BackendWrapper<B: ExecutionBackend> {
    inner: Arc<B>,
}

impl<B: ExecutionBackend> BackendWrapper<B> {
    fn backend(&self) -> &Arc<B> {
        &self.inner
    }

    fn downcast<'h>(&self, handle: &'h BackendHandle) -> BackendResult<&'h B::TensorHandle> {
        handle.downcast_ref::<B::TensorHandle>().ok_or_else(|| {
            BackendError::execution(format!(
                "handle type mismatch for backend {}",
                self.inner.backend_name()
            ))
        })
    }

    fn downcast_all(&self, handles: &[BackendHandle]) -> BackendResult<Vec<B::TensorHandle>> {
        handles
            .iter()
            .map(|handle| self.downcast(handle).cloned())
            .collect()
    }

    fn erase(outputs: Vec<B::TensorHandle>) -> Vec<BackendHandle> {
        outputs
            .into_iter()
            .map(|h| Arc::new(h) as BackendHandle)
            .collect()
    }
}

impl<B: ExecutionBackend + 'static> ErasedBackend for BackendWrapper<B> {
    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn materialize(&self, init: TensorInit) -> BackendResult<BackendHandle> {
        let handle = self.inner.materialize(init)?;
        Ok(Arc::new(handle) as BackendHandle)
    }

    fn to_literal(&self, handle: &BackendHandle) -> BackendResult<TensorLiteral> {
        self.inner.to_literal(self.downcast(handle)?)
    }

    fn execute_instruction(
        &self,
        instruction: &Instruction,
        inputs: &[BackendHandle],
    ) -> BackendResult<Vec<BackendHandle>> {
        let typed_inputs = self.downcast_all(inputs)?;
        let outputs = self.inner.execute_instruction(instruction, &typed_inputs)?;
        Ok(Self::erase(outputs))
    }

    fn run_program(
        &self,
        program: &Program,
        entry_inputs: &[BackendHandle],
    ) -> BackendResult<Vec<BackendHandle>> {
        let typed_inputs = self.downcast_all(entry_inputs)?;
        let outputs = self.inner.run_program(program, &typed_inputs)?;
        Ok(Self::erase(outputs))
    }

    fn shutdown(&self) -> BackendResult<()> {
        self.inner.shutdown()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Erases a concrete backend so it can be stored behind `dyn ErasedBackend`.
pub fn erase_backend<B: ExecutionBackend + 'static>(backend: B) -> Box<dyn ErasedBackend> {
    Box::new(BackendWrapper {
        inner: Arc::new(backend),
    })
}

/// Global backend registry mapping backend names to constructors.
struct BackendRegistry {
    backends: RwLock<HashMap<String, BackendConstructor>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: BackendConstructor) {
        let mut backends = self
            .backends
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if backends.insert(name.clone(), constructor).is_some() {
            tracing::debug!(backend = %name, "replaced registered backend constructor");
        }
    }

    fn create(&self, name: &str) -> Option<Box<dyn ErasedBackend>> {
        let backends = self
            .backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let constructor = backends.get(name)?;
        Some(constructor())
    }

    fn list_backends(&self) -> Vec<String> {
        let backends = self
            .backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = backends.keys().cloned().collect();
        names.sort();
        names
    }

    fn has_backend(&self, name: &str) -> bool {
        self.backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

fn global_registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

/// Register a backend by name with a constructor function.
///
/// The constructor runs each time a session opens the backend. Registering a name twice
/// replaces the earlier constructor.
pub fn register_backend<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Box<dyn ErasedBackend> + Send + Sync + 'static,
{
    global_registry().register(name.into(), Box::new(constructor));
}

/// Register a concrete [`ExecutionBackend`] implementation.
pub fn register_execution_backend<B, F>(name: impl Into<String>, constructor: F)
where
    B: ExecutionBackend + 'static,
    F: Fn() -> B + Send + Sync + 'static,
{
    register_backend(name, move || erase_backend(constructor()));
}

/// Create a backend instance by name, or `None` if nothing is registered under it.
pub fn create_backend(name: &str) -> Option<Box<dyn ErasedBackend>> {
    global_registry().create(name)
}

/// List all registered backend names, sorted.
pub fn list_backends() -> Vec<String> {
    global_registry().list_backends()
}

pub fn has_backend(name: &str) -> bool {
    global_registry().has_backend(name)
}

/// Recovers the typed backend from an erased one created by this module.
pub fn get_typed_backend<B: ExecutionBackend + 'static>(
    backend: &dyn ErasedBackend,
) -> Option<Arc<B>> {
    backend
        .as_any()
        .downcast_ref::<BackendWrapper<B>>()
        .map(|wrapper| Arc::clone(wrapper.backend()))
}
