//! Runtime scaffolding for the receive workers.
//!
//! - `executor`: where stream workers and readers run, with optional CPU
//!   pinning.

pub mod executor;

pub use executor::{CpuConfig, Executor, Task, ThreadExecutor};
