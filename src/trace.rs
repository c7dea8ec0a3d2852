use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::FailureKind;

#[derive(Debug, Clone)]
pub struct Trace {
    pub run_id: String,
    pub events: Vec<TraceEvent>,
    run_started_ms: u128,
    task_started_ms: HashMap<usize, u128>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    RunStarted {
        ts_ms: u128,
        tasks: usize,
        ceiling: usize,
    },
    TaskStarted {
        ts_ms: u128,
        index: usize,
        host: Option<String>,
    },
    TaskFinished {
        ts_ms: u128,
        index: usize,
        host: Option<String>,
        success: bool,
        elapsed_ms: u128,
    },
    RunFailed {
        ts_ms: u128,
        kind: FailureKind,
        pending: usize,
    },
    RunFinished {
        ts_ms: u128,
        success: bool,
        elapsed_ms: u128,
    },
}

impl TraceEvent {
    pub fn summarize(&self) -> String {
        match self {
            TraceEvent::RunStarted {
                ts_ms,
                tasks,
                ceiling,
            } => format!("{ts_ms} RunStarted tasks={tasks} ceiling={ceiling}"),
            TraceEvent::TaskStarted { ts_ms, index, host } => {
                format!("{ts_ms} TaskStarted task={index} host={}", host_label(host))
            }
            TraceEvent::TaskFinished {
                ts_ms,
                index,
                host,
                success,
                elapsed_ms,
            } => format!(
                "{ts_ms} TaskFinished task={index} host={} success={success} elapsed={}",
                host_label(host),
                format_elapsed_ms(*elapsed_ms)
            ),
            TraceEvent::RunFailed {
                ts_ms,
                kind,
                pending,
            } => format!("{ts_ms} RunFailed kind={kind} pending={pending}"),
            TraceEvent::RunFinished {
                ts_ms,
                success,
                elapsed_ms,
            } => format!(
                "{ts_ms} RunFinished success={success} elapsed={}",
                format_elapsed_ms(*elapsed_ms)
            ),
        }
    }
}

impl Trace {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            events: Vec::new(),
            run_started_ms: Self::now_ms(),
            task_started_ms: HashMap::new(),
        }
    }

    fn now_ms() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    pub fn run_started(&mut self, tasks: usize, ceiling: usize) {
        let ts_ms = Self::now_ms();
        self.run_started_ms = ts_ms;
        self.events.push(TraceEvent::RunStarted {
            ts_ms,
            tasks,
            ceiling,
        });
    }

    pub fn task_started(&mut self, index: usize, host: Option<String>) {
        let ts_ms = Self::now_ms();
        self.events
            .push(TraceEvent::TaskStarted { ts_ms, index, host });
        self.task_started_ms.insert(index, ts_ms);
    }

    pub fn task_finished(&mut self, index: usize, host: Option<String>, success: bool) {
        let ts_ms = Self::now_ms();
        let elapsed_ms = self
            .task_started_ms
            .remove(&index)
            .map(|started| ts_ms.saturating_sub(started))
            .unwrap_or(0);
        self.events.push(TraceEvent::TaskFinished {
            ts_ms,
            index,
            host,
            success,
            elapsed_ms,
        });
    }

    pub fn run_failed(&mut self, kind: FailureKind, pending: usize) {
        self.events.push(TraceEvent::RunFailed {
            ts_ms: Self::now_ms(),
            kind,
            pending,
        });
    }

    pub fn run_finished(&mut self, success: bool) {
        let ts_ms = Self::now_ms();
        let elapsed_ms = ts_ms.saturating_sub(self.run_started_ms);
        self.events.push(TraceEvent::RunFinished {
            ts_ms,
            success,
            elapsed_ms,
        });
    }

    /// Task indices in the order they were started.
    pub fn start_order(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|ev| match ev {
                TraceEvent::TaskStarted { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    /// Task indices in the order the executor observed them finishing.
    pub fn finish_order(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|ev| match ev {
                TraceEvent::TaskFinished { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }
}

/// Print a human-readable trace to stdout (stable + diff-friendly).
pub fn print_trace(tr: &Trace) {
    println!("TRACE run_id={}", tr.run_id);
    for ev in &tr.events {
        println!("{}", ev.summarize());
    }
}

fn host_label(host: &Option<String>) -> &str {
    host.as_deref().unwrap_or("local")
}

fn format_elapsed_ms(elapsed_ms: u128) -> String {
    let secs = elapsed_ms as f64 / 1000.0;
    format!("{secs:.2}s")
}
