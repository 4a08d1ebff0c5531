//! Reference execution backend for `lazymat`, running programs on host memory.

pub mod cpu;

pub use cpu::{CpuBackend, CpuTensor, TensorData};

/// Registers [`CpuBackend`] with the global backend registry under `"cpu"` and `"cpu-ref"`.
///
/// Runs automatically at load time on Linux; call it explicitly elsewhere. Repeated calls
/// simply replace the constructors.
pub fn register_cpu_backend() {
    lazymat::backend::registry::register_execution_backend("cpu", CpuBackend::new);
    lazymat::backend::registry::register_execution_backend("cpu-ref", CpuBackend::new);
}

#[cfg(target_os = "linux")]
#[used]
#[link_section = ".init_array"]
static REGISTER_CPU_BACKEND: extern "C" fn() = {
    extern "C" fn register() {
        register_cpu_backend();
    }
    register
};
