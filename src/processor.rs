//! Processors turn the files matched by a task's input pattern into a bundle.
//!
//! Each processor reads its inputs, runs the whole transform chain in memory
//! and only then hands the finished artifacts to [`crate::output`], which
//! commits them atomically. A failing transform therefore never leaves a
//! half-written bundle behind.

mod external;
mod scripts;
mod sourcemap;
mod styles;

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::error::TaskError;
use crate::output::{Artifact, Staged};
use crate::task::{EmptyMatch, PathPattern, Task};

pub use external::ExternalCommand;
pub use scripts::ScriptProcessor;
pub use styles::StyleProcessor;

/// Black-box transform from a set of input files to a set of output files.
pub trait Processor: Send + Sync {
    fn process(&self, task: &Task) -> Result<Outcome, TaskError>;
}

/// What a processor did.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Number of files matched by the input pattern.
    pub inputs: usize,
    pub artifacts: Vec<Artifact>,
}

impl Outcome {
    pub fn written(&self) -> usize {
        self.artifacts.iter().filter(|a| a.written).count()
    }
}

/// Lists the files matching `pattern` under `root`, sorted so bundles come
/// out the same on every run. Directories are skipped.
pub fn resolve_inputs(root: &Utf8Path, pattern: &PathPattern) -> Result<Vec<Utf8PathBuf>, TaskError> {
    let glob = format!("{}/{}", glob::Pattern::escape(root.as_str()), pattern.as_str());
    let entries = glob::glob(&glob).map_err(|e| {
        TaskError::io(
            root.join(pattern.as_str()),
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        )
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = Utf8PathBuf::try_from(entry?)?;
        if path.is_file() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

/// Reads all inputs in parallel, preserving order.
pub(crate) fn read_inputs(paths: &[Utf8PathBuf]) -> Result<Vec<(Utf8PathBuf, String)>, TaskError> {
    paths
        .to_vec()
        .into_par_iter()
        .map(|path| {
            let text = fs::read_to_string(&path).map_err(|e| TaskError::io(path.clone(), e))?;
            Ok((path, text))
        })
        .collect()
}

/// Handles the zero-match case according to the task's policy.
pub(crate) fn empty_outcome(root: &Utf8Path, task: &Task) -> Result<Outcome, TaskError> {
    tracing::debug!(task = %task.name, pattern = %task.input, "no input files matched");

    match task.on_empty {
        EmptyMatch::Skip => Ok(Outcome::default()),
        EmptyMatch::Marker => {
            let mut staged = Staged::new(root.join(&task.output_dir));
            staged.add(&task.output_file, Vec::new());
            Ok(Outcome {
                inputs: 0,
                artifacts: staged.commit()?,
            })
        }
    }
}
