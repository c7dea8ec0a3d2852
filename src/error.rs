use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::executor::Outcome;

/// Errors raised synchronously by constructors and handle queries.
///
/// None of these are retried. The first two point at a caller bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("failed to spawn task thread {0}")]
    Spawn(String),
}

impl ExecError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        ExecError::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        ExecError::InvalidState(msg.into())
    }
}

/// Why a run ended without every task reporting back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The run was cancelled from outside before all tasks terminated.
    Interrupted,
    /// The deadline passed with tasks still in flight or queued.
    NotDone,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Interrupted => "INTERRUPTED",
            FailureKind::NotDone => "NOT_DONE",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-level failure carrying the outcomes gathered before the run stopped.
///
/// `outcomes` always has one entry per submitted task, in submission order.
/// Tasks that never started, or were still running when the run ended, hold
/// [`Outcome::NotDone`].
#[derive(Debug)]
pub struct RunFailure<V> {
    pub kind: FailureKind,
    pub outcomes: Vec<Outcome<V>>,
    pub elapsed: Duration,
}

impl<V> RunFailure<V> {
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn outcomes(&self) -> &[Outcome<V>] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<Outcome<V>> {
        self.outcomes
    }

    /// Indices of tasks without a recorded outcome; the natural resubmission set.
    pub fn not_done_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_not_done())
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.outcomes.len() - self.not_done_indices().len()
    }
}

impl<V> fmt::Display for RunFailure<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: {} of {} task(s) terminated after {} ms",
            self.kind,
            self.completed_count(),
            self.outcomes.len(),
            self.elapsed.as_millis()
        )
    }
}

impl<V: fmt::Debug> std::error::Error for RunFailure<V> {}
