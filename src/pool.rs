//! Bounded worker pool shared by all stages.
//!
//! Tasks are independent; completion order is unconstrained. Each finished
//! task updates a mutex-guarded tally and reports progress while still holding
//! the lock, so sinks observe a strictly increasing `completed` count. A task
//! that panics is counted as [`Outcome::worker_fault`] and does not disturb
//! its neighbours.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};

use rayon::prelude::*;

use crate::error::Result;
use crate::outcome::{Outcome, Tally};
use crate::progress::ProgressSink;

/// Default width of a CPU-bound pool: every core but one, at least one.
#[must_use]
pub fn default_cpu_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .saturating_sub(1)
        .max(1)
}

struct Progress<O> {
    completed: usize,
    tally: Tally<O>,
}

/// Run `task` over every item on a pool of `workers` threads.
///
/// `init` builds per-worker scratch state (for example a template cache). It
/// runs lazily, at most once per pool thread, and `task` receives the
/// thread's state by mutable reference. State used by a task that panics is
/// dropped and rebuilt for that thread's next task.
///
/// # Errors
///
/// Returns [`crate::Error::ThreadPool`] if the pool cannot be created.
pub fn run_pool<T, O, S, I, F>(
    workers: usize,
    items: &[T],
    sink: &dyn ProgressSink<O>,
    init: I,
    task: F,
) -> Result<Tally<O>>
where
    T: Sync,
    O: Outcome,
    S: Send,
    I: Fn() -> S + Sync + Send,
    F: Fn(&mut S, &T) -> O + Sync + Send,
{
    let workers = workers.max(1);
    let total = items.len();
    let state = Mutex::new(Progress {
        completed: 0,
        tally: Tally::new(),
    });
    let slots: Vec<Mutex<Option<S>>> = (0..workers).map(|_| Mutex::new(None)).collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("triage-worker-{i}"))
        .build()?;

    pool.install(|| {
        items.par_iter().for_each(|item| {
            let slot = &slots[rayon::current_thread_index().unwrap_or(0) % workers];
            // Taken out of the slot while the task runs, so the lock is never
            // held across user code.
            let scratch = slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();

            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
                let mut scratch = scratch.unwrap_or_else(&init);
                let outcome = task(&mut scratch, item);
                (scratch, outcome)
            })) {
                Ok((scratch, outcome)) => {
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(scratch);
                    outcome
                }
                Err(_) => {
                    tracing::error!("worker task panicked");
                    O::worker_fault()
                }
            };

            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            guard.completed += 1;
            guard.tally.record(outcome);
            sink.progress(guard.completed, total, &guard.tally);
        });
    });

    let state = state.into_inner().unwrap_or_else(PoisonError::into_inner);
    Ok(state.tally)
}
