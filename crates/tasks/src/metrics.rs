//! Per-task lifecycle metrics.
//!
//! Every spawned task is counted under its kind and name:
//!
//! - `vela_tasks_spawned_total{kind, task}`
//! - `vela_tasks_finished_total{kind, task}`, counted on drop, so a cancelled
//!   or panicking task is still counted
//! - `vela_tasks_running{kind, task}`
//! - `vela_tasks_panicked_total{task}` for critical tasks

/// How a task was spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    Regular,
    Critical,
    Graceful,
}

impl TaskKind {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Critical => "critical",
            Self::Graceful => "graceful",
        }
    }
}

/// Name used for regular tasks, which are spawned without one.
pub(crate) const UNNAMED_TASK: &str = "unnamed";

/// Held by a task for as long as it runs.
#[derive(Debug)]
pub(crate) struct TaskLifetime {
    kind: TaskKind,
    name: &'static str,
}

impl TaskLifetime {
    pub(crate) fn start(kind: TaskKind, name: &'static str) -> Self {
        let kind_label = kind.as_str();
        metrics::counter!("vela_tasks_spawned_total", "kind" => kind_label, "task" => name)
            .increment(1);
        metrics::gauge!("vela_tasks_running", "kind" => kind_label, "task" => name).increment(1.0);
        Self { kind, name }
    }
}

impl Drop for TaskLifetime {
    fn drop(&mut self) {
        let (kind, name) = (self.kind.as_str(), self.name);
        metrics::counter!("vela_tasks_finished_total", "kind" => kind, "task" => name).increment(1);
        metrics::gauge!("vela_tasks_running", "kind" => kind, "task" => name).decrement(1.0);
    }
}

pub(crate) fn record_panic(name: &'static str) {
    metrics::counter!("vela_tasks_panicked_total", "task" => name).increment(1);
}
