//! Executors that run stream workers and readers.
//!
//! The receive core does not schedule work itself; it hands named tasks to an
//! [`Executor`]. [`ThreadExecutor`] runs each task on its own OS thread and
//! can pin those threads to CPU cores.
//!
//! # Placement
//!
//! Stream workers are long-lived and hot, so with many streams it pays to
//! spread them over distinct cores. [`CpuConfig::Auto`] round-robins over the
//! cores reported by `core_affinity`; [`CpuConfig::Manual`] round-robins over
//! an explicit list.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use core_affinity::CoreId;

use crate::trace::{debug, warn};

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks concurrently with the caller.
pub trait Executor: Send + Sync {
    /// Starts `task`. `name` identifies the task in logs and thread names.
    ///
    /// # Errors
    ///
    /// Returns an error if the task could not be started.
    fn execute(&self, name: String, task: Task) -> io::Result<()>;
}

/// CPU pinning behaviour of a [`ThreadExecutor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CpuConfig {
    /// Leave placement to the OS.
    #[default]
    Disabled,
    /// Round-robin over every core `core_affinity` reports.
    Auto,
    /// Round-robin over the given core ids.
    Manual(Vec<usize>),
}

impl CpuConfig {
    /// Resolves the config to the list of cores to cycle through.
    #[must_use]
    pub fn resolve(&self) -> Vec<usize> {
        match self {
            Self::Disabled => Vec::new(),
            Self::Auto => core_affinity::get_core_ids()
                .map(|ids| ids.into_iter().map(|id| id.id).collect())
                .unwrap_or_default(),
            Self::Manual(cores) => cores.clone(),
        }
    }
}

/// Executor that spawns one named OS thread per task.
#[derive(Debug, Default)]
pub struct ThreadExecutor {
    cores: Vec<usize>,
    next: AtomicUsize,
}

impl ThreadExecutor {
    #[must_use]
    pub fn new(cpu: &CpuConfig) -> Self {
        Self {
            cores: cpu.resolve(),
            next: AtomicUsize::new(0),
        }
    }

    /// Core the next task will be pinned to, if pinning is enabled.
    fn next_core(&self) -> Option<usize> {
        if self.cores.is_empty() {
            return None;
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Some(self.cores[n % self.cores.len()])
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, name: String, task: Task) -> io::Result<()> {
        let core = self.next_core();
        debug!(task = %name, core = ?core, "spawning task thread");
        thread::Builder::new().name(name).spawn(move || {
            if let Some(id) = core
                && !pin_to_core(id)
            {
                warn!(core = id, "failed to pin task thread");
            }
            task();
        })?;
        Ok(())
    }
}

/// Pins the current thread to the specified core.
///
/// Returns `true` if pinning succeeded. Pinning may fail if the core id is
/// invalid or the OS denies the request.
pub fn pin_to_core(core_id: usize) -> bool {
    core_affinity::set_for_current(CoreId { id: core_id })
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn disabled_config_resolves_to_nothing() {
        assert!(CpuConfig::Disabled.resolve().is_empty());
        assert!(ThreadExecutor::default().next_core().is_none());
    }

    #[test]
    fn manual_config_round_robins() {
        let executor = ThreadExecutor::new(&CpuConfig::Manual(vec![3, 5]));
        assert_eq!(executor.next_core(), Some(3));
        assert_eq!(executor.next_core(), Some(5));
        assert_eq!(executor.next_core(), Some(3));
    }

    #[test]
    fn task_runs_on_named_thread() {
        let executor = ThreadExecutor::new(&CpuConfig::Disabled);
        let (tx, rx) = mpsc::channel();
        executor
            .execute(
                "braid-test".into(),
                Box::new(move || {
                    let name = thread::current().name().map(str::to_owned);
                    tx.send(name).unwrap();
                }),
            )
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("braid-test"));
    }
}
