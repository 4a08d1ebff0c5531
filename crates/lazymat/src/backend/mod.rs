//! Backend contract and runtime selection.
//!
//! [`spec`] defines the program representation and the [`spec::ExecutionBackend`] trait;
//! [`registry`] lets backend crates register themselves under a name.

pub mod registry;
pub mod spec;

pub use spec::ExecutionBackend;
