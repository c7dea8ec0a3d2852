use std::fmt;
use std::sync::{Mutex, PoisonError};

/// A unit of work the executor can run on its own thread.
///
/// `compute_result` blocks until the work is done. It is called at most once
/// per run. Tasks are shared with their execution thread, so any state the
/// task mutates needs interior mutability.
pub trait Task: Send + Sync + 'static {
    type Output: Send + 'static;

    fn compute_result(&self) -> Self::Output;

    /// Host-assignment capability. Tasks that return `Some` take part in
    /// host slot bookkeeping; all others always run "wherever".
    fn as_host_aware(&self) -> Option<&dyn HostAware> {
        None
    }
}

/// Optional capability for tasks that care which host they were placed on.
///
/// The executor only records the choice; dispatching to the host is up to the task.
pub trait HostAware: Send + Sync {
    /// `None` means the local host.
    fn set_assigned_host(&self, host: Option<String>);

    fn assigned_host(&self) -> Option<String>;
}

/// Interior-mutable host assignment a task can embed and delegate to.
#[derive(Default)]
pub struct HostCell {
    host: Mutex<Option<String>>,
}

impl HostCell {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for HostCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostCell").field(&self.assigned_host()).finish()
    }
}

impl HostAware for HostCell {
    fn set_assigned_host(&self, host: Option<String>) {
        *self.host.lock().unwrap_or_else(PoisonError::into_inner) = host;
    }

    fn assigned_host(&self) -> Option<String> {
        self.host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Adapter turning a closure into a [`Task`].
pub struct FnTask<F> {
    f: F,
}

pub fn task_fn<F, V>(f: F) -> FnTask<F>
where
    F: Fn() -> V + Send + Sync + 'static,
    V: Send + 'static,
{
    FnTask { f }
}

impl<F, V> Task for FnTask<F>
where
    F: Fn() -> V + Send + Sync + 'static,
    V: Send + 'static,
{
    type Output = V;

    fn compute_result(&self) -> V {
        (self.f)()
    }
}

impl<V: Send + 'static> Task for Box<dyn Task<Output = V>> {
    type Output = V;

    fn compute_result(&self) -> V {
        (**self).compute_result()
    }

    fn as_host_aware(&self) -> Option<&dyn HostAware> {
        (**self).as_host_aware()
    }
}
