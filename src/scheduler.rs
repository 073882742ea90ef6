mod diagnostics;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::channel;
use std::thread;
use std::time::Instant;

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::{TaskError, TaskFailure};
use crate::task::{BoundTask, Stage, TaskGroup, Unit};

pub use diagnostics::{Diagnostics, TaskExecution};

/// Outcome of one scheduler run: diagnostics on success, the first failing
/// task otherwise.
pub type RunResult = Result<Diagnostics, TaskFailure>;

/// Executes task groups. Holds no state between runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Self
    }

    /// Runs the stages of `group` in order. Every unit of a stage gets its own
    /// thread; the stage is joined before the next one starts. The first
    /// failure reported within a stage ends the run and later stages are
    /// never started.
    pub fn execute(&self, group: &TaskGroup) -> RunResult {
        let mut diagnostics = Diagnostics::default();

        for (i, stage) in group.stages().iter().enumerate() {
            if stage.is_empty() {
                continue;
            }

            let span = tracing::span!(Level::INFO, "stage", index = i);
            span.pb_set_length(stage.units().len() as u64);
            if let Ok(style) = crate::utils::get_style_stage() {
                span.pb_set_style(&style);
            }
            span.pb_set_message(&format!("stage {}/{}", i + 1, group.stages().len()));
            let _enter = span.enter();

            run_stage(stage, &span, &mut diagnostics)?;
        }

        Ok(diagnostics)
    }
}

fn run_stage(
    stage: &Stage,
    span: &tracing::Span,
    diagnostics: &mut Diagnostics,
) -> Result<(), TaskFailure> {
    let (tx, rx) = channel::<RunResult>();

    thread::scope(|s| {
        for unit in stage.units() {
            let tx = tx.clone();
            let parent = span.clone();

            s.spawn(move || {
                let _enter = parent.enter();
                let result = match unit {
                    Unit::Task(bound) => run_task(bound),
                    Unit::Group(group) => Scheduler.execute(group),
                };
                // The receiver outlives every worker in this scope.
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let mut failure: Option<TaskFailure> = None;

        // Join-all: keep draining until every worker has reported.
        for result in rx {
            span.pb_inc(1);
            match result {
                Ok(done) => diagnostics.merge(done),
                Err(err) if failure.is_none() => {
                    tracing::error!(task = %err.task, "task failed, remaining stages are skipped");
                    failure = Some(err);
                }
                Err(err) => {
                    tracing::error!(task = %err.task, error = %err.error, "task also failed");
                }
            }
        }

        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    })
}

fn run_task(bound: &BoundTask) -> RunResult {
    let task = &bound.task;

    let span = tracing::span!(Level::INFO, "task", name = %task.name);
    if let Ok(style) = crate::utils::get_style_task() {
        span.pb_set_style(&style);
    }
    span.pb_set_message(&format!("Running {}", task.name));
    let _enter = span.enter();

    let start = Instant::now();

    // A panicking processor only touches its own output path, so unwinding
    // cannot leave state shared with sibling tasks inconsistent.
    let result = catch_unwind(AssertUnwindSafe(|| bound.processor.process(task)))
        .unwrap_or_else(|panic| {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                String::from("unknown payload")
            };
            Err(TaskError::Panic(msg))
        });

    let duration = start.elapsed();

    match result {
        Ok(outcome) => {
            tracing::info!(
                task = %task.name,
                inputs = outcome.inputs,
                written = outcome.written(),
                "finished in {}",
                crate::utils::as_overhead(start),
            );

            let mut diagnostics = Diagnostics::default();
            diagnostics.record(&task.name, TaskExecution {
                start,
                duration,
                inputs: outcome.inputs,
                artifacts: outcome.artifacts,
            });
            Ok(diagnostics)
        }
        Err(error) => Err(TaskFailure {
            task: task.name.clone(),
            error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::processor::{Outcome, Processor};
    use crate::task::{PathPattern, ProcessorKind, Task, TaskRegistry};

    #[derive(Debug, Clone)]
    struct Span {
        name: String,
        start: Instant,
        end: Instant,
    }

    /// Sleeps per task, fails the tasks it is told to, records timings.
    #[derive(Default)]
    struct Fake {
        delays: HashMap<String, Duration>,
        failing: Vec<String>,
        panicking: Vec<String>,
        log: Mutex<Vec<Span>>,
    }

    impl Fake {
        fn spans(&self) -> Vec<Span> {
            self.log.lock().unwrap().clone()
        }

        fn ran(&self, name: &str) -> bool {
            self.spans().iter().any(|s| s.name == name)
        }
    }

    impl Processor for Fake {
        fn process(&self, task: &Task) -> Result<Outcome, TaskError> {
            let start = Instant::now();
            if let Some(delay) = self.delays.get(&task.name) {
                thread::sleep(*delay);
            }
            self.log.lock().unwrap().push(Span {
                name: task.name.clone(),
                start,
                end: Instant::now(),
            });

            if self.panicking.contains(&task.name) {
                panic!("processor blew up");
            }
            if self.failing.contains(&task.name) {
                return Err(TaskError::io(
                    task.output_path(),
                    std::io::Error::other("disk full"),
                ));
            }
            Ok(Outcome::default())
        }
    }

    fn registry(fake: Arc<Fake>, names: &[&str]) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.set_processor(ProcessorKind::CustomScript, fake);
        for name in names {
            registry
                .register(Task::new(
                    *name,
                    ProcessorKind::CustomScript,
                    PathPattern::new("src/*.js").unwrap(),
                    "out",
                    format!("{name}.js"),
                ))
                .unwrap();
        }
        registry
    }

    #[test]
    fn all_stages_succeed() {
        let fake = Arc::new(Fake::default());
        let registry = registry(fake.clone(), &["a", "b", "c"]);
        let group = registry.group(&[vec!["a", "b"], vec!["c"]]).unwrap();

        let diagnostics = Scheduler::new().execute(&group).unwrap();
        assert_eq!(diagnostics.len(), 3);
        assert!(fake.ran("a") && fake.ran("b") && fake.ran("c"));
    }

    #[test]
    fn tasks_in_a_stage_overlap() {
        let delay = Duration::from_millis(200);
        let fake = Arc::new(Fake {
            delays: HashMap::from([("a".into(), delay), ("b".into(), delay)]),
            ..Default::default()
        });
        let registry = registry(fake.clone(), &["a", "b"]);
        let group = registry.group(&[vec!["a", "b"]]).unwrap();

        Scheduler::new().execute(&group).unwrap();

        let spans = fake.spans();
        let (a, b) = (&spans[0], &spans[1]);
        assert!(a.start < b.end && b.start < a.end, "stage members ran sequentially");
    }

    #[test]
    fn next_stage_waits_for_previous() {
        let fake = Arc::new(Fake {
            delays: HashMap::from([("slow".into(), Duration::from_millis(150))]),
            ..Default::default()
        });
        let registry = registry(fake.clone(), &["slow", "fast", "after"]);
        let group = registry
            .group(&[vec!["slow", "fast"], vec!["after"]])
            .unwrap();

        Scheduler::new().execute(&group).unwrap();

        let spans = fake.spans();
        let slow = spans.iter().find(|s| s.name == "slow").unwrap();
        let after = spans.iter().find(|s| s.name == "after").unwrap();
        assert!(after.start >= slow.end);
    }

    #[test]
    fn failure_stops_later_stages() {
        let fake = Arc::new(Fake {
            failing: vec!["b".into()],
            ..Default::default()
        });
        let registry = registry(fake.clone(), &["a", "b", "c"]);
        let group = registry.group(&[vec!["a", "b"], vec!["c"]]).unwrap();

        let failure = Scheduler::new().execute(&group).unwrap_err();
        assert_eq!(failure.task, "b");
        assert!(fake.ran("a"), "siblings of a failing task still run to completion");
        assert!(!fake.ran("c"));
    }

    #[test]
    fn simultaneous_failures_report_one_of_them() {
        let fake = Arc::new(Fake {
            failing: vec!["a".into(), "b".into()],
            ..Default::default()
        });
        let registry = registry(fake.clone(), &["a", "b", "c"]);
        let group = registry.group(&[vec!["a", "b"], vec!["c"]]).unwrap();

        let failure = Scheduler::new().execute(&group).unwrap_err();
        assert!(failure.task == "a" || failure.task == "b");
        assert!(!fake.ran("c"));
    }

    #[test]
    fn panic_becomes_failure() {
        let fake = Arc::new(Fake {
            panicking: vec!["a".into()],
            ..Default::default()
        });
        let registry = registry(fake.clone(), &["a", "b"]);
        let group = registry.group(&[vec!["a"], vec!["b"]]).unwrap();

        let failure = Scheduler::new().execute(&group).unwrap_err();
        assert_eq!(failure.task, "a");
        assert!(matches!(failure.error, TaskError::Panic(ref msg) if msg == "processor blew up"));
        assert!(!fake.ran("b"));
    }

    #[test]
    fn nested_group_runs_inside_its_stage() {
        let fake = Arc::new(Fake {
            delays: HashMap::from([("inner1".into(), Duration::from_millis(50))]),
            ..Default::default()
        });
        let registry = registry(fake.clone(), &["inner1", "inner2", "side", "last"]);

        let inner = registry.group(&[vec!["inner1"], vec!["inner2"]]).unwrap();
        let side = registry.group(&[vec!["side"]]).unwrap();
        let last = registry.group(&[vec!["last"]]).unwrap();

        let mut first = Stage::new().with_group(inner);
        for unit in side.stages()[0].units() {
            if let Unit::Task(bound) = unit {
                first = first.with_task(bound.clone());
            }
        }
        let group = TaskGroup::new()
            .then(first)
            .then(Stage::new().with_group(last));

        let diagnostics = Scheduler::new().execute(&group).unwrap();
        assert_eq!(diagnostics.len(), 4);

        let spans = fake.spans();
        let at = |n: &str| spans.iter().find(|s| s.name == n).unwrap().clone();
        assert!(at("inner2").start >= at("inner1").end);
        assert!(at("last").start >= at("inner2").end);
    }

    #[test]
    fn empty_group_succeeds() {
        let diagnostics = Scheduler::new().execute(&TaskGroup::new()).unwrap();
        assert_eq!(diagnostics.len(), 0);
    }
}
