//! Rebuild-on-change.
//!
//! A [`WatchCoordinator`] collects arms, each a set of patterns bound to an
//! optional task group and callback. Starting it subscribes one
//! [`EventSource`] to the union of their watch roots and spawns one trigger
//! worker per arm. Every arm debounces independently, so a markup change never
//! delays a style rebuild and vice versa.

mod debounce;
mod source;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use console::style;

use crate::error::WatchError;
use crate::scheduler::{Diagnostics, RunResult, Scheduler};
use crate::task::{PathPattern, TaskGroup};

pub use debounce::{Debouncer, Phase};
pub use source::{
    EventSink, EventSource, NativeSource, PollingSource, Subscription, WatchRoot,
    collapse_watch_roots, resolve_watch_root,
};

/// Called after every triggered run with its result.
pub type OnChange = Box<dyn Fn(&RunResult) + Send + Sync + 'static>;

struct Arm {
    patterns: Vec<PathPattern>,
    group: Option<TaskGroup>,
    debouncer: Arc<Debouncer>,
    on_change: Option<OnChange>,
}

impl Arm {
    fn matches(&self, path: &Utf8Path) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(path))
    }

    fn label(&self) -> String {
        match &self.group {
            Some(group) => group.to_string(),
            None => self
                .patterns
                .iter()
                .map(PathPattern::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

pub struct WatchCoordinator {
    root: Utf8PathBuf,
    arms: Vec<Arm>,
}

impl WatchCoordinator {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            arms: Vec::new(),
        }
    }

    /// Registers patterns to watch. A settled batch of matching changes runs
    /// `group` (when given) and then `on_change` with the result. Runs of one
    /// arm never overlap.
    pub fn arm(
        &mut self,
        patterns: Vec<PathPattern>,
        group: Option<TaskGroup>,
        debounce: Duration,
        on_change: Option<OnChange>,
    ) -> &mut Self {
        self.arms.push(Arm {
            patterns,
            group,
            debouncer: Arc::new(Debouncer::new(debounce)),
            on_change,
        });
        self
    }

    pub fn start(self, source: &dyn EventSource) -> Result<WatchSession, WatchError> {
        let root = self
            .root
            .canonicalize_utf8()
            .map_err(|source| WatchError::Root {
                path: self.root.clone(),
                source,
            })?;

        let mut roots = Vec::new();
        for arm in &self.arms {
            for pattern in &arm.patterns {
                roots.push(resolve_watch_root(&root, pattern)?);
            }
        }
        let roots = collapse_watch_roots(roots);

        let arms: Arc<[Arm]> = self.arms.into();

        // Dropping the session on an early return closes the workers again.
        let mut session = WatchSession {
            subscription: None,
            debouncers: arms.iter().map(|arm| arm.debouncer.clone()).collect(),
            workers: Vec::with_capacity(arms.len()),
        };

        for i in 0..arms.len() {
            let arms = arms.clone();
            let handle = thread::Builder::new()
                .name(format!("kiln-watch-{i}"))
                .spawn(move || trigger_loop(&arms[i]))
                .map_err(WatchError::Worker)?;
            session.workers.push(handle);
        }

        let sink: EventSink = {
            let root = root.clone();
            let arms = arms.clone();
            Box::new(move |paths| dispatch(&root, &arms, paths))
        };

        session.subscription = Some(source.subscribe(&roots, sink)?);

        tracing::info!("watching {} for changes", style(&root).cyan());
        Ok(session)
    }
}

fn dispatch(root: &Utf8Path, arms: &[Arm], paths: Vec<std::path::PathBuf>) {
    for path in paths {
        let Ok(path) = Utf8PathBuf::try_from(path) else {
            continue;
        };
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };

        for arm in arms.iter().filter(|arm| arm.matches(rel)) {
            tracing::debug!(path = %rel, "change");
            arm.debouncer.push(rel.to_path_buf());
        }
    }
}

fn trigger_loop(arm: &Arm) {
    while let Some(batch) = arm.debouncer.next_batch() {
        let start = Instant::now();
        tracing::info!(
            changed = batch.len(),
            "change detected in {}",
            style(arm.label()).yellow()
        );

        let result = match &arm.group {
            Some(group) => Scheduler::new().execute(group),
            None => Ok(Diagnostics::default()),
        };

        match &result {
            Ok(diagnostics) if arm.group.is_some() => {
                tracing::info!(
                    written = diagnostics.written().count(),
                    "rebuilt in {}",
                    crate::utils::as_overhead(start)
                );
            }
            Ok(_) => {}
            Err(failure) => tracing::error!("rebuild failed\n{failure}"),
        }

        if let Some(on_change) = &arm.on_change {
            on_change(&result);
        }

        arm.debouncer.finish();
    }
}

/// A running watch. Dropping it stops delivery and joins the workers.
pub struct WatchSession {
    subscription: Option<Subscription>,
    debouncers: Vec<Arc<Debouncer>>,
    workers: Vec<JoinHandle<()>>,
}

impl WatchSession {
    /// Blocks for as long as the session is alive.
    pub fn wait(mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("watch worker panicked");
            }
        }
    }

    /// Stops event delivery, discards pending changes and waits for a run in
    /// progress to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.subscription.take();
        for debouncer in &self.debouncers {
            debouncer.close();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("watch worker panicked");
            }
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.stop();
    }
}
