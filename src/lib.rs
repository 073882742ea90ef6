#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
mod error;
pub mod output;
pub mod pipeline;
pub mod processor;
pub mod scheduler;
#[cfg(feature = "server")]
pub mod server;
pub mod task;
mod utils;
pub mod watch;

pub use crate::config::Config;
pub use crate::error::*;
pub use crate::pipeline::{Mode, Pipeline};
pub use crate::processor::{Outcome, Processor};
pub use crate::scheduler::{Diagnostics, RunResult, Scheduler};
#[cfg(feature = "server")]
pub use crate::server::DevServer;
pub use crate::task::{
    BoundTask, EmptyMatch, PathPattern, ProcessorKind, Stage, Task, TaskGroup, TaskRegistry, Unit,
};
pub use crate::watch::{WatchCoordinator, WatchSession};
