use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use parexec::demo::SleepTask;
use parexec::{
    task_fn, BoundedExecutor, ExecError, FailureKind, HostAware, HostCell, HostSpec, Outcome,
    Task,
};

const FAR: Duration = Duration::from_secs(30);

#[derive(Default)]
struct HostLoad {
    active: HashMap<String, usize>,
    peak: HashMap<String, usize>,
    seen: Vec<String>,
}

/// Host-aware task that records per-host concurrency while it runs.
struct Probe {
    index: usize,
    host: HostCell,
    load: Arc<Mutex<HostLoad>>,
    ms: u64,
}

impl Task for Probe {
    type Output = String;

    fn compute_result(&self) -> String {
        let host = self
            .host
            .assigned_host()
            .unwrap_or_else(|| "local".to_string());
        {
            let mut load = self.load.lock().unwrap();
            let now = {
                let a = load.active.entry(host.clone()).or_default();
                *a += 1;
                *a
            };
            let peak = load.peak.entry(host.clone()).or_default();
            *peak = (*peak).max(now);
            load.seen.push(host.clone());
        }
        thread::sleep(Duration::from_millis(self.ms));
        *self.load.lock().unwrap().active.get_mut(&host).unwrap() -= 1;
        format!("{}@{host}", self.index)
    }

    fn as_host_aware(&self) -> Option<&dyn HostAware> {
        Some(&self.host)
    }
}

fn probes(n: usize, ms: u64, load: &Arc<Mutex<HostLoad>>) -> Vec<Probe> {
    (0..n)
        .map(|index| Probe {
            index,
            host: HostCell::new(),
            load: Arc::clone(load),
            ms,
        })
        .collect()
}

#[test]
fn per_host_limits_hold_while_tasks_run() {
    let load = Arc::new(Mutex::new(HostLoad::default()));
    let exec = BoundedExecutor::with_hosts(
        probes(9, 40, &load),
        FAR,
        vec![HostSpec::new("A", 2), HostSpec::new("B", 1)],
    )
    .unwrap();
    assert_eq!(exec.concurrency_ceiling(), 3);

    let out = exec.run().expect("run should succeed");
    assert_eq!(out.len(), 9);
    assert!(out.iter().all(Outcome::is_done));

    let load = load.lock().unwrap();
    assert!(load.peak.get("A").copied().unwrap_or(0) <= 2, "{:?}", load.peak);
    assert!(load.peak.get("B").copied().unwrap_or(0) <= 1, "{:?}", load.peak);
    assert!(!load.seen.iter().any(|h| h == "local"), "{:?}", load.seen);
}

#[test]
fn first_three_tasks_spread_across_hosts_and_fourth_reuses_a_freed_slot() {
    let load = Arc::new(Mutex::new(HostLoad::default()));
    let exec = BoundedExecutor::with_hosts(
        probes(4, 60, &load),
        FAR,
        vec![HostSpec::new("A", 2), HostSpec::new("B", 1)],
    )
    .unwrap();

    let out = exec.run().expect("run should succeed");
    let labels: Vec<String> = out.into_iter().filter_map(Outcome::into_value).collect();
    assert_eq!(labels[0], "0@A");
    assert_eq!(labels[1], "1@A");
    assert_eq!(labels[2], "2@B");
    assert_eq!(labels.len(), 4);

    let table = exec.host_table().expect("remote hosts build a table");
    assert_eq!(table.used_slots(), 0, "every slot should be released");
}

#[test]
fn local_slots_join_the_table_after_remote_hosts() {
    let load = Arc::new(Mutex::new(HostLoad::default()));
    let exec = BoundedExecutor::with_hosts(
        probes(6, 30, &load),
        FAR,
        vec![
            HostSpec::new("localhost", 1),
            HostSpec::new("remote", 1),
            HostSpec::new("dead", 0),
        ],
    )
    .unwrap();
    assert_eq!(exec.concurrency_ceiling(), 2);

    let table = exec.host_table().expect("table");
    let names: Vec<_> = table.hosts().iter().map(|h| h.display_name()).collect();
    assert_eq!(names, vec!["remote", "localhost"]);

    exec.run().expect("run should succeed");
    let load = load.lock().unwrap();
    assert!(load.peak.get("remote").copied().unwrap_or(0) <= 1);
    assert!(load.peak.get("local").copied().unwrap_or(0) <= 1);
    assert!(load.seen.iter().any(|h| h == "local"), "{:?}", load.seen);
}

#[test]
fn local_only_hosts_run_without_a_table() {
    let exec = BoundedExecutor::with_hosts(
        vec![SleepTask::new(0, Duration::ZERO).host_aware()],
        FAR,
        vec![HostSpec::local(3), HostSpec::new("LOCALHOST", 1)],
    )
    .unwrap();
    assert_eq!(exec.concurrency_ceiling(), 4);
    assert!(exec.host_table().is_none());

    let task = &exec.tasks()[0];
    exec.run().expect("run");
    let assigned = task.as_host_aware().and_then(|h| h.assigned_host());
    assert_eq!(assigned, None);
}

#[test]
fn tasks_without_host_capability_ignore_the_table() {
    let tasks: Vec<_> = (0..5usize).map(|i| task_fn(move || i)).collect();
    let exec =
        BoundedExecutor::with_hosts(tasks, FAR, vec![HostSpec::new("A", 1), HostSpec::local(1)])
            .unwrap();
    let out = exec.run().expect("run");
    assert_eq!(out.len(), 5);
    assert_eq!(exec.host_table().unwrap().used_slots(), 0);
}

#[test]
fn abandoned_tasks_keep_slots_until_the_next_run_resets_them() {
    let exec = BoundedExecutor::with_hosts(
        vec![
            SleepTask::new(0, Duration::from_secs(5)).host_aware(),
            SleepTask::new(1, Duration::from_secs(5)).host_aware(),
        ],
        Duration::from_millis(50),
        vec![HostSpec::new("A", 1), HostSpec::new("B", 1)],
    )
    .unwrap();

    let failure = exec.run().unwrap_err();
    assert_eq!(failure.kind(), FailureKind::NotDone);
    assert_eq!(exec.host_table().unwrap().used_slots(), 2);

    let failure = exec.run().unwrap_err();
    assert_eq!(failure.kind(), FailureKind::NotDone);
    assert_eq!(exec.host_table().unwrap().used_slots(), 2);
}

#[test]
fn parallel_host_arrays_must_line_up() {
    let err = HostSpec::zip(&[Some("A"), Some("B")], &[2]).unwrap_err();
    assert!(matches!(err, ExecError::InvalidArgument(_)));

    let hosts = HostSpec::zip(&[Some("A"), Some("B")], &[2, 1]).unwrap();
    let exec = BoundedExecutor::with_hosts(vec![task_fn(|| 1u8)], FAR, hosts).unwrap();
    assert_eq!(exec.concurrency_ceiling(), 3);
}
