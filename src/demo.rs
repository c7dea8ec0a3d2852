use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cancel;
use crate::task::{HostAware, HostCell, Task};

const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Demo workload: sleeps for a fixed time, then returns its own index.
///
/// Sleeps in short slices so a cancelled run stops it quickly.
#[derive(Debug)]
pub struct SleepTask {
    pub index: usize,
    pub duration: Duration,
    pub panics: bool,
    host: Option<HostCell>,
}

impl SleepTask {
    pub fn new(index: usize, duration: Duration) -> Self {
        Self {
            index,
            duration,
            panics: false,
            host: None,
        }
    }

    pub fn host_aware(mut self) -> Self {
        self.host = Some(HostCell::new());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

impl Task for SleepTask {
    type Output = usize;

    fn compute_result(&self) -> usize {
        let started = Instant::now();
        while !cancel::is_cancelled() {
            let left = self.duration.saturating_sub(started.elapsed());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(SLEEP_SLICE));
        }
        if self.panics {
            panic!("task {} failed on purpose", self.index);
        }
        self.index
    }

    fn as_host_aware(&self) -> Option<&dyn HostAware> {
        self.host.as_ref().map(|h| h as &dyn HostAware)
    }
}

#[derive(Debug, Clone)]
pub struct DemoPlan {
    pub tasks: usize,
    pub task_ms: u64,
    /// Randomize durations within +/-50% of `task_ms`.
    pub scramble: bool,
    pub seed: u64,
    pub panic_at: Option<usize>,
    pub host_aware: bool,
}

impl Default for DemoPlan {
    fn default() -> Self {
        Self {
            tasks: 5,
            task_ms: 100,
            scramble: false,
            seed: 7,
            panic_at: None,
            host_aware: false,
        }
    }
}

pub fn build_sleep_tasks(plan: &DemoPlan) -> Vec<SleepTask> {
    let mut rng = StdRng::seed_from_u64(plan.seed);
    (0..plan.tasks)
        .map(|index| {
            let ms = if plan.scramble && plan.task_ms > 1 {
                rng.gen_range(plan.task_ms / 2..=plan.task_ms.saturating_add(plan.task_ms / 2))
            } else {
                plan.task_ms
            };
            let mut task = SleepTask::new(index, Duration::from_millis(ms));
            if plan.host_aware {
                task = task.host_aware();
            }
            if plan.panic_at == Some(index) {
                task = task.panicking();
            }
            task
        })
        .collect()
}
