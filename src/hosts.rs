//! Host slot bookkeeping.
//!
//! A [`HostTable`] only records which host a task was placed on and how many
//! slots each host has in use. Getting work to that host is the task's job.

use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::task::HostAware;

/// One host entry as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSpec {
    /// Missing, blank, or "localhost" (any case) all mean the local host.
    #[serde(default)]
    pub name: Option<String>,
    pub slots: usize,
}

impl HostSpec {
    pub fn new(name: impl Into<String>, slots: usize) -> Self {
        Self {
            name: Some(name.into()),
            slots,
        }
    }

    pub fn local(slots: usize) -> Self {
        Self { name: None, slots }
    }

    /// Build specs from parallel `names` / `slots` arrays.
    pub fn zip(names: &[Option<&str>], slots: &[usize]) -> Result<Vec<HostSpec>, ExecError> {
        if names.is_empty() || slots.is_empty() {
            return Err(ExecError::invalid_argument(
                "host names and slot counts must not be empty",
            ));
        }
        if names.len() != slots.len() {
            return Err(ExecError::invalid_argument(format!(
                "host names and slot counts differ in length ({} vs {})",
                names.len(),
                slots.len()
            )));
        }
        Ok(names
            .iter()
            .zip(slots)
            .map(|(name, slots)| HostSpec {
                name: name.map(str::to_string),
                slots: *slots,
            })
            .collect())
    }

    pub fn is_local(&self) -> bool {
        is_local_name(self.name.as_deref())
    }
}

pub fn is_local_name(name: Option<&str>) -> bool {
    match name.map(str::trim) {
        None => true,
        Some(n) => n.is_empty() || n.eq_ignore_ascii_case("localhost"),
    }
}

/// A host with a fixed slot limit and a live usage counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDescriptor {
    /// `None` for the local host.
    pub name: Option<String>,
    pub max_slots: usize,
    pub used_slots: usize,
}

impl HostDescriptor {
    pub fn free_slots(&self) -> usize {
        self.max_slots.saturating_sub(self.used_slots)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("localhost")
    }
}

/// Remote hosts in caller order, followed by at most one local entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTable {
    hosts: Vec<HostDescriptor>,
}

impl HostTable {
    pub fn hosts(&self) -> &[HostDescriptor] {
        &self.hosts
    }

    pub fn total_slots(&self) -> usize {
        self.hosts.iter().map(|h| h.max_slots).sum()
    }

    pub fn used_slots(&self) -> usize {
        self.hosts.iter().map(|h| h.used_slots).sum()
    }

    pub fn reset(&mut self) {
        for h in &mut self.hosts {
            h.used_slots = 0;
        }
    }

    fn local_index(&self) -> Option<usize> {
        match self.hosts.last() {
            Some(h) if h.name.is_none() => Some(self.hosts.len() - 1),
            _ => None,
        }
    }

    /// Place `task` on the host with the most free slots; ties go to the
    /// earlier entry. Returns the chosen entry's index, or `None` when every
    /// host is full.
    pub fn allocate(&mut self, task: &dyn HostAware) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, h) in self.hosts.iter().enumerate() {
            let better = match best {
                None => true,
                Some(b) => h.free_slots() > self.hosts[b].free_slots(),
            };
            if better {
                best = Some(idx);
            }
        }

        let idx = best.filter(|&b| self.hosts[b].free_slots() > 0)?;
        let host = &mut self.hosts[idx];
        host.used_slots += 1;
        task.set_assigned_host(host.name.clone());
        Some(idx)
    }

    /// Release the slot held by `task` on its currently assigned host.
    ///
    /// Names match case-insensitively; a local name matches the local entry.
    /// Returns false, changing nothing, when no entry matches.
    pub fn free(&mut self, task: &dyn HostAware) -> bool {
        let assigned = task.assigned_host();
        let idx = if is_local_name(assigned.as_deref()) {
            self.local_index()
        } else {
            let wanted = assigned.as_deref().map(str::trim).unwrap_or_default();
            self.hosts.iter().position(|h| {
                h.name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(wanted))
            })
        };

        match idx {
            Some(idx) if self.hosts[idx].used_slots > 0 => {
                self.hosts[idx].used_slots -= 1;
                true
            }
            _ => false,
        }
    }
}

/// How many tasks may run at once, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    MaxParallel(usize),
    Hosts(Vec<HostSpec>),
}

/// A policy after validation: the ceiling, plus a table when remote hosts exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub ceiling: usize,
    pub table: Option<HostTable>,
}

impl ConcurrencyPolicy {
    pub fn resolve(&self) -> Result<ResolvedPolicy, ExecError> {
        match self {
            ConcurrencyPolicy::MaxParallel(0) => Err(ExecError::invalid_argument(
                "concurrency ceiling must be >= 1",
            )),
            ConcurrencyPolicy::MaxParallel(n) => Ok(ResolvedPolicy {
                ceiling: *n,
                table: None,
            }),
            ConcurrencyPolicy::Hosts(specs) => resolve_hosts(specs),
        }
    }
}

fn resolve_hosts(specs: &[HostSpec]) -> Result<ResolvedPolicy, ExecError> {
    if specs.is_empty() {
        return Err(ExecError::invalid_argument("host list must not be empty"));
    }

    let mut local_processes = 0usize;
    let mut remotes = Vec::new();
    for spec in specs {
        if spec.is_local() {
            local_processes += spec.slots;
        } else if spec.slots > 0 {
            remotes.push(HostDescriptor {
                name: spec.name.as_ref().map(|n| n.trim().to_string()),
                max_slots: spec.slots,
                used_slots: 0,
            });
        }
    }

    if remotes.is_empty() {
        return Ok(ResolvedPolicy {
            ceiling: local_processes.max(1),
            table: None,
        });
    }

    if local_processes > 0 {
        remotes.push(HostDescriptor {
            name: None,
            max_slots: local_processes,
            used_slots: 0,
        });
    }
    let table = HostTable { hosts: remotes };
    Ok(ResolvedPolicy {
        ceiling: table.total_slots(),
        table: Some(table),
    })
}
