//! Bounded parallel executor.
//!
//! A run moves through four phases:
//! - fill: start `min(ceiling, tasks)` handles
//! - poll: sweep in-flight handles with short bounded waits; every terminated
//!   handle frees its host slot, records its outcome at its submission index,
//!   and is replaced by the next queued task if one remains
//! - drain: on deadline or interrupt, signal every in-flight handle to stop
//!   and return without waiting for them
//! - done
//!
//! Only the thread calling `run*` touches the outcome array and the host
//! counters. Task threads write nothing but their own handle's result slot.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::ExecutorConfig;
use crate::error::{ExecError, FailureKind, RunFailure};
use crate::handle::{PanicPolicy, TaskHandle};
use crate::hosts::{ConcurrencyPolicy, HostSpec, HostTable};
use crate::task::Task;
use crate::trace::Trace;

pub const DEFAULT_POLL_QUANTUM: Duration = Duration::from_millis(20);

/// Per-task result of a run, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome<V> {
    Done(V),
    /// Never started, or still running when the run ended.
    NotDone,
    /// The task panicked (only under [`PanicPolicy::Capture`]) or its thread
    /// could not be spawned.
    Failed(String),
}

impl<V> Outcome<V> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn is_not_done(&self) -> bool {
        matches!(self, Outcome::NotDone)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Outcome::Done(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Outcome::Done(v) => Some(v),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Done(_) => "DONE",
            Outcome::NotDone => "NOT_DONE",
            Outcome::Failed(_) => "FAILED",
        }
    }
}

pub type RunResult<V> = Result<Vec<Outcome<V>>, RunFailure<V>>;

struct InFlight<T: Task> {
    index: usize,
    handle: TaskHandle<T>,
}

/// Per-run scheduling state.
struct RunContext<V> {
    next: usize,
    outcomes: Vec<Outcome<V>>,
    started: Instant,
}

impl<V> RunContext<V> {
    fn new(task_count: usize) -> Self {
        Self {
            next: 0,
            outcomes: (0..task_count).map(|_| Outcome::NotDone).collect(),
            started: Instant::now(),
        }
    }

    fn pending(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_not_done()).count()
    }
}

pub struct BoundedExecutor<T: Task> {
    tasks: Vec<Arc<T>>,
    ceiling: usize,
    deadline: Duration,
    poll_quantum: Duration,
    panic_policy: PanicPolicy,
    // Held for the whole run; concurrent `run*` calls queue up here.
    run_guard: Mutex<Option<HostTable>>,
}

impl<T: Task> BoundedExecutor<T> {
    /// Flat policy: at most `max_parallel` tasks at once, all local.
    pub fn new(tasks: Vec<T>, max_parallel: usize, deadline: Duration) -> Result<Self, ExecError> {
        Self::with_policy(tasks, ConcurrencyPolicy::MaxParallel(max_parallel), deadline)
    }

    /// Host policy: the ceiling is the sum of per-host slot limits.
    pub fn with_hosts(
        tasks: Vec<T>,
        deadline: Duration,
        hosts: Vec<HostSpec>,
    ) -> Result<Self, ExecError> {
        Self::with_policy(tasks, ConcurrencyPolicy::Hosts(hosts), deadline)
    }

    pub fn with_policy(
        tasks: Vec<T>,
        policy: ConcurrencyPolicy,
        deadline: Duration,
    ) -> Result<Self, ExecError> {
        if tasks.is_empty() {
            return Err(ExecError::invalid_argument("task list must not be empty"));
        }
        if deadline.is_zero() {
            return Err(ExecError::invalid_argument("deadline must be > 0"));
        }
        let resolved = policy.resolve()?;

        Ok(Self {
            tasks: tasks.into_iter().map(Arc::new).collect(),
            ceiling: resolved.ceiling,
            deadline,
            poll_quantum: DEFAULT_POLL_QUANTUM,
            panic_policy: PanicPolicy::default(),
            run_guard: Mutex::new(resolved.table),
        })
    }

    pub fn from_config(tasks: Vec<T>, cfg: &ExecutorConfig) -> Result<Self, ExecError> {
        cfg.validate()?;
        Ok(Self::with_policy(tasks, cfg.policy()?, cfg.deadline())?
            .with_poll_quantum(cfg.poll_quantum())
            .with_panic_policy(cfg.panic_policy))
    }

    /// Upper bound on a single wait inside a polling sweep.
    ///
    /// Zero is clamped to 1 ms here; [`ExecutorConfig::validate`] rejects a
    /// zero `poll_ms` instead.
    pub fn with_poll_quantum(mut self, quantum: Duration) -> Self {
        self.poll_quantum = quantum.max(Duration::from_millis(1));
        self
    }

    pub fn with_panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    pub fn concurrency_ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn tasks(&self) -> &[Arc<T>] {
        &self.tasks
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn poll_quantum(&self) -> Duration {
        self.poll_quantum
    }

    /// Snapshot of the host table. Blocks while a run is in progress.
    pub fn host_table(&self) -> Option<HostTable> {
        self.run_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn run(&self) -> RunResult<T::Output> {
        self.run_until(&CancelToken::new())
    }

    /// Run until every task terminates, the deadline passes, or `cancel` fires.
    pub fn run_until(&self, cancel: &CancelToken) -> RunResult<T::Output> {
        let mut tr = Trace::new("run");
        self.run_traced(cancel, &mut tr)
    }

    pub fn run_traced(&self, cancel: &CancelToken, tr: &mut Trace) -> RunResult<T::Output> {
        let mut guard = self
            .run_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut table = guard.as_mut();
        if let Some(t) = table.as_deref_mut() {
            t.reset();
        }

        let mut ctx = RunContext::new(self.tasks.len());
        tr.run_started(self.tasks.len(), self.ceiling);
        info!(
            "run started: tasks={} ceiling={} deadline_ms={}",
            self.tasks.len(),
            self.ceiling,
            self.deadline.as_millis()
        );

        let initial = self.ceiling.min(self.tasks.len());
        let mut in_flight: Vec<InFlight<T>> = Vec::with_capacity(initial);
        while in_flight.len() < initial && self.may_start(&ctx, cancel) {
            match self.dispatch(&mut ctx, table.as_deref_mut(), tr) {
                Some(f) => in_flight.push(f),
                None => break,
            }
        }

        let failure = loop {
            if in_flight.is_empty() {
                if ctx.next == self.tasks.len() {
                    break None;
                }
                // Queued work was held back by the deadline or cancel.
                break Some(if cancel.is_cancelled() {
                    FailureKind::Interrupted
                } else {
                    FailureKind::NotDone
                });
            }
            if cancel.is_cancelled() {
                break Some(FailureKind::Interrupted);
            }
            if ctx.started.elapsed() >= self.deadline {
                break Some(FailureKind::NotDone);
            }

            let mut slot = 0;
            while slot < in_flight.len() {
                if cancel.is_cancelled() {
                    break;
                }
                let budget = self.deadline.saturating_sub(ctx.started.elapsed());
                if !in_flight[slot].handle.wait_timeout(self.poll_quantum.min(budget)) {
                    slot += 1;
                    continue;
                }

                let done = in_flight.remove(slot);
                self.harvest(&mut ctx, table.as_deref_mut(), tr, done);
                if !self.may_start(&ctx, cancel) {
                    continue;
                }
                if let Some(next) = self.dispatch(&mut ctx, table.as_deref_mut(), tr) {
                    in_flight.insert(slot, next);
                    slot += 1;
                }
            }
        };

        let elapsed = ctx.started.elapsed();
        match failure {
            None => {
                tr.run_finished(true);
                info!("run finished: elapsed_ms={}", elapsed.as_millis());
                Ok(ctx.outcomes)
            }
            Some(kind) => {
                for f in &in_flight {
                    f.handle.cancel();
                }
                let pending = ctx.pending();
                warn!(
                    "run {kind}: cancelled {} in-flight task(s), {pending} without outcome, elapsed_ms={}",
                    in_flight.len(),
                    elapsed.as_millis()
                );
                tr.run_failed(kind, pending);
                tr.run_finished(false);
                Err(RunFailure {
                    kind,
                    outcomes: ctx.outcomes,
                    elapsed,
                })
            }
        }
    }

    /// New tasks start only before the deadline and while not cancelled.
    fn may_start(&self, ctx: &RunContext<T::Output>, cancel: &CancelToken) -> bool {
        !cancel.is_cancelled() && ctx.started.elapsed() < self.deadline
    }

    /// Start the next queued task. Tasks whose thread cannot be spawned are
    /// recorded as failed and skipped.
    fn dispatch(
        &self,
        ctx: &mut RunContext<T::Output>,
        mut table: Option<&mut HostTable>,
        tr: &mut Trace,
    ) -> Option<InFlight<T>> {
        while ctx.next < self.tasks.len() {
            let index = ctx.next;
            ctx.next += 1;

            let task = Arc::clone(&self.tasks[index]);
            let host = allocate_host(table.as_deref_mut(), &*task, index);

            let mut handle = TaskHandle::with_label(task, format!("task-{index}"))
                .panic_policy(self.panic_policy);
            match handle.start() {
                Ok(()) => {
                    debug!("task {index} started on {}", host.as_deref().unwrap_or("local"));
                    tr.task_started(index, host);
                    return Some(InFlight { index, handle });
                }
                Err(err) => {
                    warn!("task {index} could not start: {err}");
                    free_host(table.as_deref_mut(), &**handle.task(), index);
                    tr.task_started(index, host.clone());
                    tr.task_finished(index, host, false);
                    ctx.outcomes[index] = Outcome::Failed(err.to_string());
                }
            }
        }
        None
    }

    fn harvest(
        &self,
        ctx: &mut RunContext<T::Output>,
        table: Option<&mut HostTable>,
        tr: &mut Trace,
        done: InFlight<T>,
    ) {
        let InFlight { index, mut handle } = done;
        let host = handle
            .task()
            .as_host_aware()
            .and_then(|aware| aware.assigned_host());
        free_host(table, &**handle.task(), index);

        let outcome = match handle.take_result() {
            Ok(Ok(value)) => Outcome::Done(value),
            Ok(Err(panic)) => {
                warn!("task {index} panicked: {panic}");
                Outcome::Failed(panic)
            }
            Err(err) => Outcome::Failed(err.to_string()),
        };
        debug!("task {index} finished: {}", outcome.label());
        tr.task_finished(index, host, outcome.is_done());
        ctx.outcomes[index] = outcome;
    }
}

fn allocate_host<T: Task>(table: Option<&mut HostTable>, task: &T, index: usize) -> Option<String> {
    let (Some(table), Some(aware)) = (table, task.as_host_aware()) else {
        return None;
    };
    if table.allocate(aware).is_none() {
        warn!("task {index}: every host is at its slot limit");
        return None;
    }
    aware.assigned_host()
}

fn free_host<T: Task>(table: Option<&mut HostTable>, task: &T, index: usize) {
    let (Some(table), Some(aware)) = (table, task.as_host_aware()) else {
        return;
    };
    if !table.free(aware) {
        warn!(
            "task {index}: host '{}' does not match any allocated host slot",
            aware.assigned_host().as_deref().unwrap_or("local")
        );
    }
}
