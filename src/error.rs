use camino::Utf8PathBuf;
use thiserror::Error;

use crate::task::ProcessorKind;

/// Invalid pattern, task or configuration file. Always fatal, reported before
/// the first build starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Path pattern is empty")]
    EmptyPattern,

    #[error("Invalid pattern '{pattern}':\n{source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Task '{0}' has an empty name or output file")]
    IncompleteTask(String),

    #[error("Task '{0}' is registered more than once")]
    DuplicateTask(String),

    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Stage {0} of the task group is empty")]
    EmptyStage(usize),

    #[error("Tasks '{0}' and '{1}' write the same output '{2}' in one stage")]
    OutputConflict(String, String, Utf8PathBuf),

    #[error("No processor is bound for {0}")]
    MissingProcessor(ProcessorKind),

    #[error("Couldn't read config file '{path}':\n{source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't parse config file '{path}':\n{source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Project root '{path}' is not usable:\n{source}")]
    Root {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A transform step rejected its input.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    #[error("Couldn't start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}:\n{stderr}")]
    Command {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Transform produced invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Couldn't encode source map: {0}")]
    SourceMap(#[from] serde_json::Error),
}

/// Failure of a single task, as reported by its processor.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{path}:\n{source}")]
    Transform {
        path: Utf8PathBuf,
        #[source]
        source: TransformError,
    },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Task panicked: {0}")]
    Panic(String),
}

impl TaskError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        TaskError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transform(path: impl Into<Utf8PathBuf>, source: impl Into<TransformError>) -> Self {
        TaskError::Transform {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Whether the task failed on its input rather than on the filesystem.
    pub fn is_transform(&self) -> bool {
        matches!(self, TaskError::Transform { .. } | TaskError::Panic(_))
    }
}

/// The failure that ends a scheduler run: the first task that failed.
#[derive(Debug, Error)]
#[error("Task '{task}':\n{error}")]
pub struct TaskFailure {
    pub task: String,
    #[source]
    pub error: TaskError,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Couldn't bind the HTTP server to port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't bind the live-reload socket: {0}")]
    BindReload(#[source] std::io::Error),

    #[error("Failed to build the server runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't resolve watch root '{path}': {source}")]
    Root {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't start a watch worker: {0}")]
    Worker(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum KilnError {
    #[error("Configuration error:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Build failed.\n{0}")]
    Build(#[from] TaskFailure),

    #[error("Dev server error:\n{0}")]
    Server(#[from] ServerError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}
