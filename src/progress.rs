//! Progress reporting port for whatever front end drives the pipeline.

use crate::outcome::{Outcome, Tally};

/// Receives `(completed, total, tally)` after every finished task.
///
/// Calls are serialized by the worker pool, and `completed` increases by one
/// per call.
pub trait ProgressSink<O: Outcome>: Sync {
    /// Called once per finished task.
    fn progress(&self, completed: usize, total: usize, tally: &Tally<O>);
}

/// A sink that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl<O: Outcome> ProgressSink<O> for NoProgress {
    fn progress(&self, _completed: usize, _total: usize, _tally: &Tally<O>) {}
}

impl<O, F> ProgressSink<O> for F
where
    O: Outcome,
    F: Fn(usize, usize, &Tally<O>) + Sync,
{
    fn progress(&self, completed: usize, total: usize, tally: &Tally<O>) {
        self(completed, total, tally);
    }
}
