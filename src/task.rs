//! Task definitions and the registry that wires them into task groups.
//!
//! A [`TaskGroup`] is an explicit value: an ordered list of stages, each stage
//! a set of units that may run at the same time. Groups are built once at
//! configuration time through [`TaskRegistry::group`] and never change
//! afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::error::ConfigError;
use crate::processor::Processor;

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Glob identifying source files, relative to the project root.
#[derive(Clone)]
pub struct PathPattern {
    raw: Arc<str>,
    compiled: Pattern,
}

impl PathPattern {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ConfigError> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(ConfigError::EmptyPattern);
        }

        let compiled = Pattern::new(raw).map_err(|source| ConfigError::InvalidPattern {
            pattern: raw.to_string(),
            source,
        })?;

        Ok(Self {
            raw: raw.into(),
            compiled,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches a path relative to the project root. `*` stays within one
    /// directory, `**` crosses directories.
    pub fn matches(&self, path: &Utf8Path) -> bool {
        self.compiled.matches_with(path.as_str(), MATCH)
    }

    /// Splits the pattern into the leading components free of wildcards and
    /// whether the remainder crosses directory boundaries.
    pub(crate) fn split_static(&self) -> (Utf8PathBuf, bool) {
        let path = Utf8Path::new(self.as_str());
        let components: Vec<_> = path.components().collect();
        let split = components
            .iter()
            .position(|c| c.as_str().contains(['*', '?', '[']))
            .unwrap_or(components.len());

        let root: Utf8PathBuf = components.iter().take(split).collect();
        let rest = &components[split..];
        let deep = rest.len() > 1 || rest.iter().any(|c| c.as_str().contains("**"));

        (root, deep)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PathPattern {}

impl std::hash::Hash for PathPattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathPattern({})", self.raw)
    }
}

impl Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// The four kinds of processors a task can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    VendorStyle,
    CustomStyle,
    VendorScript,
    CustomScript,
}

impl ProcessorKind {
    pub const ALL: [ProcessorKind; 4] = [
        ProcessorKind::VendorStyle,
        ProcessorKind::CustomStyle,
        ProcessorKind::VendorScript,
        ProcessorKind::CustomScript,
    ];

    pub fn is_style(self) -> bool {
        matches!(self, ProcessorKind::VendorStyle | ProcessorKind::CustomStyle)
    }
}

impl Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessorKind::VendorStyle => "style-vendor",
            ProcessorKind::CustomStyle => "style-custom",
            ProcessorKind::VendorScript => "script-vendor",
            ProcessorKind::CustomScript => "script-custom",
        };
        f.write_str(name)
    }
}

/// What a processor does when its input pattern matches no files. Either way
/// the task succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyMatch {
    /// Write nothing.
    #[default]
    Skip,
    /// Write an empty bundle so references to it keep resolving.
    Marker,
}

/// A single build step: one processor invocation over one input pattern,
/// producing one bundle.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub kind: ProcessorKind,
    pub input: PathPattern,
    /// Changes to files matching this pattern re-trigger the task. Falls back
    /// to `input`.
    pub watch: Option<PathPattern>,
    pub output_dir: Utf8PathBuf,
    pub output_file: String,
    pub on_empty: EmptyMatch,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        kind: ProcessorKind,
        input: PathPattern,
        output_dir: impl Into<Utf8PathBuf>,
        output_file: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            input,
            watch: None,
            output_dir: output_dir.into(),
            output_file: output_file.into(),
            on_empty: EmptyMatch::default(),
        }
    }

    pub fn watching(mut self, pattern: PathPattern) -> Self {
        self.watch = Some(pattern);
        self
    }

    pub fn on_empty(mut self, policy: EmptyMatch) -> Self {
        self.on_empty = policy;
        self
    }

    pub fn watch_pattern(&self) -> &PathPattern {
        self.watch.as_ref().unwrap_or(&self.input)
    }

    /// Output path of the bundle, relative to the project root.
    pub fn output_path(&self) -> Utf8PathBuf {
        self.output_dir.join(&self.output_file)
    }
}

/// A task paired with the processor that runs it.
#[derive(Clone)]
pub struct BoundTask {
    pub task: Arc<Task>,
    pub processor: Arc<dyn Processor>,
}

impl fmt::Debug for BoundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundTask({})", self.task.name)
    }
}

/// One member of a stage.
#[derive(Debug, Clone)]
pub enum Unit {
    Task(BoundTask),
    Group(TaskGroup),
}

impl Unit {
    pub fn name(&self) -> String {
        match self {
            Unit::Task(bound) => bound.task.name.clone(),
            Unit::Group(group) => group.to_string(),
        }
    }
}

/// A set of units eligible to run concurrently.
#[derive(Debug, Clone, Default)]
pub struct Stage {
    units: Vec<Unit>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, bound: BoundTask) -> Self {
        self.units.push(Unit::Task(bound));
        self
    }

    pub fn with_group(mut self, group: TaskGroup) -> Self {
        self.units.push(Unit::Group(group));
        self
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Ordered stages; stage `n + 1` starts only once every unit of stage `n`
/// has finished.
#[derive(Debug, Clone, Default)]
pub struct TaskGroup {
    stages: Vec<Stage>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(Stage::is_empty)
    }

    /// Every task in the group, nested groups included.
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        let mut acc = Vec::new();
        for stage in &self.stages {
            for unit in &stage.units {
                match unit {
                    Unit::Task(bound) => acc.push(bound.task.clone()),
                    Unit::Group(group) => acc.extend(group.tasks()),
                }
            }
        }
        acc
    }
}

impl Display for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<_> = self
            .stages
            .iter()
            .map(|stage| {
                let names: Vec<_> = stage.units.iter().map(Unit::name).collect();
                format!("[{}]", names.join(", "))
            })
            .collect();
        write!(f, "{}", stages.join(" -> "))
    }
}

/// Owns every task definition and the processor bound to each kind.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Vec<Arc<Task>>,
    index: HashMap<String, usize>,
    processors: HashMap<ProcessorKind, Arc<dyn Processor>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: Task) -> Result<(), ConfigError> {
        if task.name.trim().is_empty() || task.output_file.trim().is_empty() {
            return Err(ConfigError::IncompleteTask(task.name));
        }

        if self.index.contains_key(&task.name) {
            return Err(ConfigError::DuplicateTask(task.name));
        }

        tracing::debug!(task = %task.name, kind = %task.kind, input = %task.input, "registered task");
        self.index.insert(task.name.clone(), self.tasks.len());
        self.tasks.push(Arc::new(task));
        Ok(())
    }

    pub fn set_processor(&mut self, kind: ProcessorKind, processor: Arc<dyn Processor>) {
        self.processors.insert(kind, processor);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Task>> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    /// Resolves task names into a group: one stage per inner slice, in order.
    pub fn group<S, N>(&self, stages: &[S]) -> Result<TaskGroup, ConfigError>
    where
        S: AsRef<[N]>,
        N: AsRef<str>,
    {
        let mut group = TaskGroup::new();

        for (i, names) in stages.iter().enumerate() {
            let names = names.as_ref();
            if names.is_empty() {
                return Err(ConfigError::EmptyStage(i));
            }

            let mut stage = Stage::new();
            let mut outputs: HashMap<Utf8PathBuf, &str> = HashMap::new();

            for name in names {
                let name = name.as_ref();
                let task = self
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownTask(name.to_string()))?;

                let processor = self
                    .processors
                    .get(&task.kind)
                    .ok_or(ConfigError::MissingProcessor(task.kind))?;

                if let Some(other) = outputs.insert(task.output_path(), &task.name) {
                    return Err(ConfigError::OutputConflict(
                        other.to_string(),
                        task.name.clone(),
                        task.output_path(),
                    ));
                }

                stage = stage.with_task(BoundTask {
                    task: task.clone(),
                    processor: processor.clone(),
                });
            }

            group = group.then(stage);
        }

        Ok(group)
    }

    /// Union of the watch patterns of every task in `group`, in first-seen
    /// order.
    pub fn watch_patterns(group: &TaskGroup) -> Vec<PathPattern> {
        let mut seen = HashSet::new();
        group
            .tasks()
            .iter()
            .map(|task| task.watch_pattern().clone())
            .filter(|pattern| seen.insert(pattern.clone()))
            .collect()
    }
}
