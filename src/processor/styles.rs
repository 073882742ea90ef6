use camino::Utf8PathBuf;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use super::{ExternalCommand, Outcome, Processor, empty_outcome, resolve_inputs};
use crate::error::TaskError;
use crate::output::Staged;
use crate::task::Task;

/// Compiles Sass/SCSS entry files to compressed CSS with `grass`.
///
/// Every file matched by the task's input is an entry point; partials are
/// pulled in through `@import`/`@use`. The compiled entries are joined in
/// path order and optionally piped through a prefixer command.
#[derive(Debug, Clone)]
pub struct StyleProcessor {
    root: Utf8PathBuf,
    prefixer: Option<ExternalCommand>,
}

impl StyleProcessor {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefixer: None,
        }
    }

    pub fn prefixer(mut self, command: Option<ExternalCommand>) -> Self {
        self.prefixer = command;
        self
    }
}

impl Processor for StyleProcessor {
    fn process(&self, task: &Task) -> Result<Outcome, TaskError> {
        let paths = resolve_inputs(&self.root, &task.input)?;
        if paths.is_empty() {
            return empty_outcome(&self.root, task);
        }

        let compiled = paths
            .par_iter()
            .map(|path| {
                let opts = grass::Options::default().style(grass::OutputStyle::Compressed);
                grass::from_path(path, &opts).map_err(|e| TaskError::transform(path.clone(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut css = compiled.join("\n").into_bytes();

        if let Some(prefixer) = &self.prefixer {
            tracing::debug!(task = %task.name, program = prefixer.program(), "prefixing styles");
            css = prefixer
                .run(css)
                .map_err(|e| TaskError::transform(task.output_path(), e))?;
        }

        let mut staged = Staged::new(self.root.join(&task.output_dir));
        staged.add(&task.output_file, css);

        Ok(Outcome {
            inputs: paths.len(),
            artifacts: staged.commit()?,
        })
    }
}
