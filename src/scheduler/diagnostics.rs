use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use crate::output::Artifact;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
    pub inputs: usize,
    pub artifacts: Vec<Artifact>,
}

/// Per-task timings and artifacts collected during one successful run.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    pub execution_times: BTreeMap<String, TaskExecution>,
}

impl Diagnostics {
    pub(crate) fn record(&mut self, task: &str, execution: TaskExecution) {
        self.execution_times.insert(task.to_string(), execution);
    }

    pub(crate) fn merge(&mut self, other: Diagnostics) {
        self.execution_times.extend(other.execution_times);
    }

    pub fn len(&self) -> usize {
        self.execution_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.execution_times.is_empty()
    }

    /// Artifacts whose content actually changed in this run.
    pub fn written(&self) -> impl Iterator<Item = &Artifact> {
        self.execution_times
            .values()
            .flat_map(|exec| exec.artifacts.iter())
            .filter(|artifact| artifact.written)
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self
            .execution_times
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(0);

        for (name, exec) in &self.execution_times {
            let written = exec.artifacts.iter().filter(|a| a.written).count();
            writeln!(
                f,
                "{name:<width$}  {:>8.2?}  {} in, {}/{} written",
                exec.duration,
                exec.inputs,
                written,
                exec.artifacts.len(),
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(inputs: usize) -> TaskExecution {
        TaskExecution {
            start: Instant::now(),
            duration: Duration::from_millis(12),
            inputs,
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn merge_keeps_every_task() {
        let mut a = Diagnostics::default();
        a.record("styles", exec(1));
        let mut b = Diagnostics::default();
        b.record("scripts", exec(3));

        a.merge(b);
        assert_eq!(a.len(), 2);

        let table = a.to_string();
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("scripts"));
        assert!(lines[1].contains("1 in, 0/0 written"));
    }
}
