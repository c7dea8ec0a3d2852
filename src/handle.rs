use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::{self, CancelToken};
use crate::error::ExecError;
use crate::task::Task;

/// What a task thread hands back: its value, or the panic message when caught.
pub type TaskResult<V> = Result<V, String>;

/// How a panic inside `compute_result` is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanicPolicy {
    /// Catch the panic; the handle terminates with `Err(message)`.
    #[default]
    Capture,
    /// Let the panic unwind the task thread. The handle then never terminates
    /// and the run can only end through its deadline or an interrupt.
    Propagate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    NotStarted,
    Running,
    Terminated,
}

struct Completion<V> {
    slot: Mutex<Option<TaskResult<V>>>,
    done: Condvar,
}

impl<V> Completion<V> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn finish(&self, result: TaskResult<V>) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(result);
        self.done.notify_all();
    }

    fn is_finished(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// One task bound to its own execution thread.
///
/// The thread writes only into the handle's private completion slot; callers
/// observe it through [`TaskHandle::wait_timeout`] and [`TaskHandle::state`].
pub struct TaskHandle<T: Task> {
    task: Arc<T>,
    label: String,
    completion: Arc<Completion<T::Output>>,
    cancel: CancelToken,
    panic_policy: PanicPolicy,
    started: bool,
    harvested: bool,
    thread: Option<JoinHandle<()>>,
}

impl<T: Task> TaskHandle<T> {
    pub fn new(task: Arc<T>) -> Self {
        Self::with_label(task, "task")
    }

    pub fn with_label(task: Arc<T>, label: impl Into<String>) -> Self {
        Self {
            task,
            label: label.into(),
            completion: Arc::new(Completion::new()),
            cancel: CancelToken::new(),
            panic_policy: PanicPolicy::default(),
            started: false,
            harvested: false,
            thread: None,
        }
    }

    pub fn panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    pub fn task(&self) -> &Arc<T> {
        &self.task
    }

    /// Spawn the execution thread. A handle can be started exactly once.
    pub fn start(&mut self) -> Result<(), ExecError> {
        if self.started {
            return Err(ExecError::invalid_state(format!(
                "{} has already been started",
                self.label
            )));
        }

        let task = Arc::clone(&self.task);
        let completion = Arc::clone(&self.completion);
        let token = self.cancel.clone();
        let policy = self.panic_policy;

        let thread = thread::Builder::new()
            .name(format!("parexec-{}", self.label))
            .spawn(move || {
                cancel::install(token);
                let result = match policy {
                    PanicPolicy::Capture => {
                        panic::catch_unwind(AssertUnwindSafe(|| task.compute_result()))
                            .map_err(panic_message)
                    }
                    PanicPolicy::Propagate => Ok(task.compute_result()),
                };
                completion.finish(result);
            })
            .map_err(|err| ExecError::Spawn(format!("{}: {err}", self.label)))?;

        self.thread = Some(thread);
        self.started = true;
        Ok(())
    }

    pub fn state(&self) -> HandleState {
        if !self.started {
            HandleState::NotStarted
        } else if self.harvested || self.completion.is_finished() {
            HandleState::Terminated
        } else {
            HandleState::Running
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == HandleState::Running
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == HandleState::Terminated
    }

    /// Block up to `timeout` for the task to terminate. Returns whether it has.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if !self.started {
            return false;
        }
        if self.harvested {
            return true;
        }
        let slot = self
            .completion
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (slot, _) = self
            .completion
            .done
            .wait_timeout_while(slot, timeout, |s| s.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.is_some()
    }

    /// Move the captured result out of the handle.
    ///
    /// Fails with `InvalidState` before `start`, while the task is running,
    /// and on a second call.
    pub fn take_result(&mut self) -> Result<TaskResult<T::Output>, ExecError> {
        if !self.started {
            return Err(ExecError::invalid_state(format!(
                "{} has not been started",
                self.label
            )));
        }
        if self.harvested {
            return Err(ExecError::invalid_state(format!(
                "result of {} was already taken",
                self.label
            )));
        }

        let result = self
            .completion
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ExecError::invalid_state(format!("{} is still running", self.label)))?;

        self.harvested = true;
        if let Some(thread) = self.thread.take() {
            // The slot is written as the thread's last action.
            let _ = thread.join();
        }
        Ok(result)
    }

    /// Ask the task to stop. Best-effort: only tasks polling
    /// [`cancel::is_cancelled`] notice.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task_fn;
    use std::time::Instant;

    #[test]
    fn result_is_unavailable_before_start() {
        let mut h = TaskHandle::new(Arc::new(task_fn(|| 1usize)));
        assert_eq!(h.state(), HandleState::NotStarted);
        assert!(!h.wait_timeout(Duration::from_millis(1)));
        let err = h.take_result().unwrap_err();
        assert!(matches!(err, ExecError::InvalidState(_)), "{err}");
    }

    #[test]
    fn result_is_unavailable_while_running() {
        let gate = Arc::new(std::sync::Barrier::new(2));
        let inner = Arc::clone(&gate);
        let mut h = TaskHandle::new(Arc::new(task_fn(move || {
            inner.wait();
            7usize
        })));
        h.start().expect("start");
        assert!(h.is_running());
        let err = h.take_result().unwrap_err();
        assert!(err.to_string().contains("still running"), "{err}");

        gate.wait();
        assert!(h.wait_timeout(Duration::from_secs(5)));
        assert_eq!(h.take_result().expect("result"), Ok(7));
        assert!(h.is_terminated());
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut h = TaskHandle::new(Arc::new(task_fn(|| ())));
        h.start().expect("first start");
        let err = h.start().unwrap_err();
        assert!(err.to_string().contains("already been started"), "{err}");
    }

    #[test]
    fn second_take_is_rejected() {
        let mut h = TaskHandle::new(Arc::new(task_fn(|| 3u8)));
        h.start().expect("start");
        assert!(h.wait_timeout(Duration::from_secs(5)));
        assert_eq!(h.take_result().expect("first take"), Ok(3));
        assert!(h.take_result().is_err());
    }

    #[test]
    fn none_output_is_a_real_result() {
        let mut h = TaskHandle::new(Arc::new(task_fn(|| None::<u32>)));
        h.start().expect("start");
        assert!(h.wait_timeout(Duration::from_secs(5)));
        assert_eq!(h.take_result().expect("result"), Ok(None));
    }

    #[test]
    fn captured_panic_terminates_with_message() {
        let mut h = TaskHandle::new(Arc::new(task_fn(|| -> u32 { panic!("boom") })));
        h.start().expect("start");
        assert!(h.wait_timeout(Duration::from_secs(5)));
        assert_eq!(h.take_result().expect("result"), Err("boom".to_string()));
    }

    #[test]
    fn propagated_panic_never_terminates() {
        let mut h = TaskHandle::new(Arc::new(task_fn(|| -> u32 { panic!("boom") })))
            .panic_policy(PanicPolicy::Propagate);
        h.start().expect("start");
        assert!(!h.wait_timeout(Duration::from_millis(100)));
        assert!(h.is_running());
    }

    #[test]
    fn wait_timeout_is_bounded() {
        let mut h = TaskHandle::new(Arc::new(task_fn(|| {
            std::thread::sleep(Duration::from_millis(300));
        })));
        h.start().expect("start");
        let t0 = Instant::now();
        assert!(!h.wait_timeout(Duration::from_millis(20)));
        assert!(t0.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn cancel_reaches_the_task_thread() {
        let mut h = TaskHandle::new(Arc::new(task_fn(|| {
            let t0 = Instant::now();
            while !cancel::is_cancelled() {
                if t0.elapsed() > Duration::from_secs(5) {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            true
        })));
        h.start().expect("start");
        h.cancel();
        assert!(h.wait_timeout(Duration::from_secs(6)));
        assert_eq!(h.take_result().expect("result"), Ok(true));
    }
}
