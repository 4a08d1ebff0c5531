//! Host matrices and the session-bound handles that wrap them.

mod handle;
mod host;

pub use handle::Matrix;
pub use host::{HostMatrix, DEFAULT_ATOL, DEFAULT_RTOL};
