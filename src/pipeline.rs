//! The predefined asset pipeline: two stylesheet bundles and two script
//! bundles built side by side, plus the three ways of running them.

use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Config;
use crate::error::{ConfigError, KilnError};
use crate::processor::{ExternalCommand, ScriptProcessor, StyleProcessor};
use crate::scheduler::{RunResult, Scheduler};
use crate::task::{EmptyMatch, PathPattern, ProcessorKind, Task, TaskGroup, TaskRegistry};
use crate::watch::{
    EventSource, NativeSource, OnChange, PollingSource, WatchCoordinator, WatchSession,
};

#[cfg(feature = "server")]
use crate::server::DevServer;

pub const STYLE_VENDOR: &str = "style-vendor";
pub const STYLE_CUSTOM: &str = "style-custom";
pub const SCRIPT_VENDOR: &str = "script-vendor";
pub const SCRIPT_CUSTOM: &str = "script-custom";

/// How the pipeline runs after the initial build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// Build, then rebuild on source changes.
    #[default]
    Default,
    /// Build, serve the project root, then rebuild and reload browsers on
    /// changes.
    Bs,
    /// Build once and exit.
    Build,
}

pub struct Pipeline {
    config: Config,
    root: Utf8PathBuf,
    registry: TaskRegistry,
    group: TaskGroup,
    markup: PathPattern,
}

impl Pipeline {
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let root = config
            .root
            .canonicalize_utf8()
            .map_err(|source| ConfigError::Root {
                path: config.root.clone(),
                source,
            })?;

        let sources = &config.sources;
        let output = &config.output;

        let mut registry = TaskRegistry::new();

        let tasks = [
            (
                STYLE_VENDOR,
                ProcessorKind::VendorStyle,
                &sources.vendor_styles,
                Some(&sources.vendor_styles_watch),
                &output.css,
                &output.vendor_styles,
            ),
            (
                STYLE_CUSTOM,
                ProcessorKind::CustomStyle,
                &sources.custom_styles,
                Some(&sources.custom_styles_watch),
                &output.css,
                &output.custom_styles,
            ),
            (
                SCRIPT_VENDOR,
                ProcessorKind::VendorScript,
                &sources.vendor_scripts,
                None,
                &output.js,
                &output.vendor_scripts,
            ),
            (
                SCRIPT_CUSTOM,
                ProcessorKind::CustomScript,
                &sources.custom_scripts,
                None,
                &output.js,
                &output.custom_scripts,
            ),
        ];

        for (name, kind, input, watch, dir, file) in tasks {
            // Pages link every bundle, so an empty source set still yields a
            // file to keep those links resolving.
            let mut task = Task::new(name, kind, PathPattern::new(input)?, dir, file)
                .on_empty(EmptyMatch::Marker);
            if let Some(watch) = watch {
                task = task.watching(PathPattern::new(watch)?);
            }
            registry.register(task)?;
        }

        let styles = Arc::new(
            StyleProcessor::new(&root)
                .prefixer(ExternalCommand::from_argv(&config.transform.prefixer)),
        );
        let scripts = Arc::new(
            ScriptProcessor::new(&root)
                .minifier(ExternalCommand::from_argv(&config.transform.minifier))
                .sourcemaps(config.transform.sourcemaps),
        );

        for kind in ProcessorKind::ALL {
            if kind.is_style() {
                registry.set_processor(kind, styles.clone());
            } else {
                registry.set_processor(kind, scripts.clone());
            }
        }

        let group = registry.group(&[[STYLE_VENDOR, STYLE_CUSTOM, SCRIPT_VENDOR, SCRIPT_CUSTOM]])?;
        let markup = PathPattern::new(&sources.markup)?;

        Ok(Self {
            config,
            root,
            registry,
            group,
            markup,
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn group(&self) -> &TaskGroup {
        &self.group
    }

    /// Runs every task once.
    pub fn build(&self) -> RunResult {
        let start = Instant::now();
        tracing::info!("building {}", self.group);

        let result = Scheduler::new().execute(&self.group);
        match &result {
            Ok(diagnostics) => {
                tracing::info!("build finished in {}", crate::utils::as_overhead(start));
                tracing::debug!("\n{diagnostics}");
            }
            Err(failure) => tracing::error!("build failed\n{failure}"),
        }

        result
    }

    pub fn run(&self, mode: Mode) -> Result<(), KilnError> {
        match mode {
            Mode::Build => {
                self.build()?;
                Ok(())
            }
            Mode::Default => {
                // A broken initial build is reported and fixed by the next
                // save, like any later one.
                let _ = self.build();
                self.watch(None)?.wait();
                Ok(())
            }
            #[cfg(feature = "server")]
            Mode::Bs => {
                let _ = self.build();
                let server = Arc::new(DevServer::start(&self.root, self.config.server.port)?);
                self.watch(Some(server))?.wait();
                Ok(())
            }
            #[cfg(not(feature = "server"))]
            Mode::Bs => {
                tracing::warn!("built without the dev server, watching only");
                let _ = self.build();
                self.watch(None)?.wait();
                Ok(())
            }
        }
    }

    fn event_source(&self) -> Box<dyn EventSource> {
        match self.config.watch.poll_interval() {
            Some(interval) => Box::new(PollingSource { interval }),
            None => Box::new(NativeSource),
        }
    }

    #[cfg(feature = "server")]
    fn watch(&self, server: Option<Arc<DevServer>>) -> Result<WatchSession, KilnError> {
        let debounce = self.config.watch.debounce();
        let mut coordinator = WatchCoordinator::new(&self.root);

        match server {
            Some(server) => {
                let on_build: OnChange = {
                    let server = server.clone();
                    Box::new(move |result: &RunResult| {
                        if result.is_ok() {
                            server.notify_reload();
                        }
                    })
                };
                let on_markup: OnChange = Box::new(move |_: &RunResult| server.notify_reload());

                coordinator
                    .arm(self.sources(), Some(self.group.clone()), debounce, Some(on_build))
                    .arm(vec![self.markup.clone()], None, debounce, Some(on_markup));
            }
            None => {
                coordinator.arm(self.sources(), Some(self.group.clone()), debounce, None);
            }
        }

        Ok(coordinator.start(self.event_source().as_ref())?)
    }

    #[cfg(not(feature = "server"))]
    fn watch(&self, _: Option<()>) -> Result<WatchSession, KilnError> {
        let mut coordinator = WatchCoordinator::new(&self.root);
        coordinator.arm(
            self.sources(),
            Some(self.group.clone()),
            self.config.watch.debounce(),
            None,
        );
        Ok(coordinator.start(self.event_source().as_ref())?)
    }

    fn sources(&self) -> Vec<PathPattern> {
        TaskRegistry::watch_patterns(&self.group)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn project() -> (tempfile::TempDir, Config) {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let config = Config {
            root,
            ..Config::default()
        };
        (tmp, config)
    }

    #[test]
    fn registers_the_four_bundles_in_one_stage() {
        let (_tmp, config) = project();
        let pipeline = Pipeline::from_config(config).unwrap();

        assert_eq!(pipeline.registry().tasks().len(), 4);
        assert_eq!(
            pipeline.group().to_string(),
            "[style-vendor, style-custom, script-vendor, script-custom]"
        );

        let vendor = pipeline.registry().get(STYLE_VENDOR).unwrap();
        assert_eq!(vendor.watch_pattern().as_str(), "src/scss/vendor/**/*.scss");
        assert_eq!(vendor.output_path(), "assets/css/vendor.css");
    }

    #[test]
    fn watches_partials_and_scripts() {
        let (_tmp, config) = project();
        let pipeline = Pipeline::from_config(config).unwrap();

        let patterns: Vec<_> = pipeline.sources().iter().map(|p| p.to_string()).collect();
        assert_eq!(
            patterns,
            vec![
                "src/scss/vendor/**/*.scss",
                "src/scss/custom/**/*.scss",
                "src/js/vendor/*.js",
                "src/js/custom/*.js",
            ]
        );
    }

    #[test]
    fn conflicting_outputs_are_rejected() {
        let (_tmp, mut config) = project();
        config.output.custom_scripts = "vendor.js".into();

        assert!(matches!(
            Pipeline::from_config(config),
            Err(ConfigError::OutputConflict(..))
        ));
    }

    #[test]
    fn missing_root_is_rejected() {
        let (tmp, mut config) = project();
        config.root = Utf8PathBuf::try_from(tmp.path().join("gone")).unwrap();

        assert!(matches!(
            Pipeline::from_config(config),
            Err(ConfigError::Root { .. })
        ));
    }

    #[test]
    fn build_mode_reports_failure() {
        let (_tmp, config) = project();
        let root = config.root.clone();
        fs::create_dir_all(root.join("src/scss/custom")).unwrap();
        fs::write(root.join("src/scss/custom/style.scss"), "a { b: $missing; }").unwrap();

        let pipeline = Pipeline::from_config(config).unwrap();
        let err = pipeline.run(Mode::Build).unwrap_err();
        assert!(matches!(err, KilnError::Build(ref failure) if failure.task == STYLE_CUSTOM));
    }
}
