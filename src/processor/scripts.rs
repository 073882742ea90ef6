use camino::{Utf8Path, Utf8PathBuf};

use super::sourcemap::ConcatMap;
use super::{ExternalCommand, Outcome, Processor, empty_outcome, read_inputs, resolve_inputs};
use crate::error::{TaskError, TransformError};
use crate::output::Staged;
use crate::task::Task;

/// Concatenates scripts into a single bundle, optionally minified.
///
/// Files are joined in path order with a newline between them. When a
/// minifier is configured the joined bundle is piped through it; otherwise a
/// source map can be written next to the bundle.
#[derive(Debug, Clone)]
pub struct ScriptProcessor {
    root: Utf8PathBuf,
    minifier: Option<ExternalCommand>,
    sourcemaps: bool,
}

impl ScriptProcessor {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            minifier: None,
            sourcemaps: false,
        }
    }

    pub fn minifier(mut self, command: Option<ExternalCommand>) -> Self {
        self.minifier = command;
        self
    }

    pub fn sourcemaps(mut self, enabled: bool) -> Self {
        self.sourcemaps = enabled;
        self
    }

    fn concat(&self, inputs: &[(Utf8PathBuf, String)]) -> (String, ConcatMap) {
        let mut bundle = String::new();
        let mut map = ConcatMap::new();

        for (i, (path, text)) in inputs.iter().enumerate() {
            if i > 0 {
                bundle.push('\n');
            }
            bundle.push_str(text);
            map.push(source_name(&self.root, path), text);

            let last = i + 1 == inputs.len();
            if !last && (text.is_empty() || text.ends_with('\n')) {
                map.skip_line();
            }
        }

        (bundle, map)
    }
}

impl Processor for ScriptProcessor {
    fn process(&self, task: &Task) -> Result<Outcome, TaskError> {
        let paths = resolve_inputs(&self.root, &task.input)?;
        if paths.is_empty() {
            return empty_outcome(&self.root, task);
        }

        let inputs = read_inputs(&paths)?;
        let (bundle, map) = self.concat(&inputs);
        let out_path = task.output_path();
        let mut staged = Staged::new(self.root.join(&task.output_dir));

        match &self.minifier {
            Some(minifier) => {
                tracing::debug!(task = %task.name, program = minifier.program(), "minifying bundle");
                let minified = minifier
                    .run(bundle.into_bytes())
                    .map_err(|e| TaskError::transform(out_path.clone(), e))?;
                staged.add(&task.output_file, minified);
            }
            None if self.sourcemaps => {
                let map_name = format!("{}.map", task.output_file);
                let json = map
                    .to_json(&task.output_file)
                    .map_err(|e| TaskError::transform(out_path.clone(), TransformError::from(e)))?;

                let mut bundle = bundle;
                if !bundle.is_empty() && !bundle.ends_with('\n') {
                    bundle.push('\n');
                }
                bundle.push_str(&format!("//# sourceMappingURL={map_name}\n"));

                staged.add(&task.output_file, bundle.into_bytes());
                staged.add(map_name, json.into_bytes());
            }
            None => staged.add(&task.output_file, bundle.into_bytes()),
        }

        Ok(Outcome {
            inputs: paths.len(),
            artifacts: staged.commit()?,
        })
    }
}

fn source_name(root: &Utf8Path, path: &Utf8Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .as_str()
        .replace('\\', "/")
}
