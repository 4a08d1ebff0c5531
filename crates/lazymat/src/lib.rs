//! Client library for lazily evaluated matrix expressions.
//!
//! Open a [`Session`] against a registered backend, wrap host arrays as [`Matrix`] handles,
//! record operations such as [`ops::rev`], and call `compute` to run them.
//!
//! ```rust,ignore
//! let session = Session::open()?;
//! let m = Matrix::from_rows(&session, [[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]])?;
//! let flipped = ops::rev(&session, &m)?.compute()?;
//! assert_eq!(flipped.row(0), Some(&[5.0, 6.0][..]));
//! session.close()?;
//! ```

pub mod backend;
pub mod env;
pub mod error;
pub mod logging;
pub mod matrix;
pub mod ops;
pub mod session;

pub use env::SessionConfig;
pub use error::{Error, Result, ShapeError};
pub use matrix::{HostMatrix, Matrix};
pub use ops::{rev, t, Expression, MatrixOp, OperationNode};
pub use session::Session;
