//! Filesystem event sources.
//!
//! An [`EventSource`] turns a set of [`WatchRoot`]s into a stream of changed
//! paths delivered to a sink. Two backends ship with the crate: native
//! notifications and polling, both built on `notify`.

use std::path::PathBuf;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::WatchError;
use crate::task::PathPattern;

/// Receives the paths touched by each relevant filesystem event.
pub type EventSink = Box<dyn Fn(Vec<PathBuf>) + Send + Sync + 'static>;

/// Keeps a backend alive; dropping it stops event delivery.
pub struct Subscription {
    _inner: Box<dyn std::any::Any + Send>,
}

impl Subscription {
    pub fn new<T: Send + 'static>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish()
    }
}

/// A directory to observe.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchRoot {
    pub path: Utf8PathBuf,
    pub recursive: bool,
}

/// Capability to observe directories and report changes.
pub trait EventSource {
    fn subscribe(&self, roots: &[WatchRoot], sink: EventSink) -> Result<Subscription, WatchError>;
}

/// Native OS notifications (inotify, FSEvents, ReadDirectoryChangesW).
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSource;

impl EventSource for NativeSource {
    fn subscribe(&self, roots: &[WatchRoot], sink: EventSink) -> Result<Subscription, WatchError> {
        let mut watcher = RecommendedWatcher::new(handler(sink), notify::Config::default())?;
        add_roots(&mut watcher, roots)?;
        Ok(Subscription::new(watcher))
    }
}

/// Periodic directory scans, for filesystems that do not deliver native
/// events (network mounts, containers).
#[derive(Debug, Clone, Copy)]
pub struct PollingSource {
    pub interval: Duration,
}

impl EventSource for PollingSource {
    fn subscribe(&self, roots: &[WatchRoot], sink: EventSink) -> Result<Subscription, WatchError> {
        let config = notify::Config::default().with_poll_interval(self.interval);
        let mut watcher = PollWatcher::new(handler(sink), config)?;
        add_roots(&mut watcher, roots)?;
        Ok(Subscription::new(watcher))
    }
}

fn handler(sink: EventSink) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(
                event.kind,
                EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
            ) {
                sink(event.paths);
            }
        }
        Err(e) => tracing::error!("watch error: {e}"),
    }
}

fn add_roots(watcher: &mut impl Watcher, roots: &[WatchRoot]) -> Result<(), WatchError> {
    for root in roots {
        let mode = if root.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        tracing::info!(path = %root.path, recursive = root.recursive, "watching");
        watcher.watch(root.path.as_std_path(), mode)?;
    }
    Ok(())
}

/// Directory to observe for `pattern`: its wildcard-free prefix, or the
/// closest existing ancestor when that prefix is a file or does not exist
/// yet. Patterns reaching into subdirectories are watched recursively.
pub fn resolve_watch_root(root: &Utf8Path, pattern: &PathPattern) -> Result<WatchRoot, WatchError> {
    let (prefix, deep) = pattern.split_static();
    let mut path = root.join(&prefix);
    let mut recursive = deep;

    while !path.is_dir() {
        // Climbing above the prefix means the pattern's own directory is
        // missing; watch the ancestor recursively so it is seen once created.
        if path != root.join(&prefix) || !path.exists() {
            recursive = true;
        }
        match path.parent() {
            Some(parent) if parent.starts_with(root) => path = parent.to_path_buf(),
            _ => {
                path = root.to_path_buf();
                break;
            }
        }
    }

    // A concrete file only needs its own directory.
    if prefix.as_str() == pattern.as_str() && root.join(&prefix).is_file() {
        recursive = false;
    }

    let path = path
        .canonicalize_utf8()
        .map_err(|source| WatchError::Root { path, source })?;

    Ok(WatchRoot { path, recursive })
}

/// Reduces a set of roots to the minimal set of watches.
///
/// A recursive watch on `/a` covers every root below it; a non-recursive
/// watch only covers itself. Duplicate paths keep the recursive variant.
pub fn collapse_watch_roots(roots: impl IntoIterator<Item = WatchRoot>) -> Vec<WatchRoot> {
    let mut roots: Vec<_> = roots.into_iter().collect();
    // Recursive first for equal paths.
    roots.sort_by(|a, b| a.path.cmp(&b.path).then(b.recursive.cmp(&a.recursive)));

    let mut filtered: Vec<WatchRoot> = Vec::new();
    for root in roots {
        let covered = filtered.iter().any(|kept| {
            kept.path == root.path || (kept.recursive && root.path.starts_with(&kept.path))
        });
        if !covered {
            filtered.push(root);
        }
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn root(path: &str, recursive: bool) -> WatchRoot {
        WatchRoot {
            path: Utf8PathBuf::from(path),
            recursive,
        }
    }

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().canonicalize().unwrap()).unwrap();
        fs::create_dir_all(path.join("src/js/vendor")).unwrap();
        fs::create_dir_all(path.join("src/scss/custom")).unwrap();
        fs::write(path.join("src/scss/custom/style.scss"), "").unwrap();
        (tmp, path)
    }

    fn resolve(root: &Utf8Path, pattern: &str) -> WatchRoot {
        resolve_watch_root(root, &PathPattern::new(pattern).unwrap()).unwrap()
    }

    #[test]
    fn concrete_file_watches_parent() {
        let (_tmp, root) = project();
        let watch = resolve(&root, "src/scss/custom/style.scss");
        assert_eq!(watch.path, root.join("src/scss/custom"));
        assert!(!watch.recursive);
    }

    #[test]
    fn directory_wildcard_watches_directory() {
        let (_tmp, root) = project();
        let watch = resolve(&root, "src/js/vendor/*.js");
        assert_eq!(watch.path, root.join("src/js/vendor"));
        assert!(!watch.recursive);
    }

    #[test]
    fn double_star_is_recursive() {
        let (_tmp, root) = project();
        let watch = resolve(&root, "src/scss/**/*.scss");
        assert_eq!(watch.path, root.join("src/scss"));
        assert!(watch.recursive);
    }

    #[test]
    fn missing_directory_falls_back_to_ancestor() {
        let (_tmp, root) = project();
        let watch = resolve(&root, "src/js/custom/*.js");
        assert_eq!(watch.path, root.join("src/js"));
        assert!(watch.recursive);
    }

    #[test]
    fn root_level_glob_watches_root_only() {
        let (_tmp, root) = project();
        let watch = resolve(&root, "*.html");
        assert_eq!(watch.path, root);
        assert!(!watch.recursive);
    }

    #[test]
    fn collapse_nested_recursive() {
        let collapsed = collapse_watch_roots([
            root("/a", true),
            root("/a/b", false),
            root("/a/b/c", true),
            root("/b", false),
            root("/c/d", true),
        ]);

        assert_eq!(
            collapsed,
            vec![root("/a", true), root("/b", false), root("/c/d", true)]
        );
    }

    #[test]
    fn collapse_keeps_children_of_non_recursive() {
        let collapsed = collapse_watch_roots([root("/a", false), root("/a/b", false)]);
        assert_eq!(collapsed, vec![root("/a", false), root("/a/b", false)]);
    }

    #[test]
    fn collapse_prefers_recursive_duplicate() {
        let collapsed = collapse_watch_roots([root("/a", false), root("/a", true)]);
        assert_eq!(collapsed, vec![root("/a", true)]);
    }

    #[test]
    fn collapse_similar_names() {
        let collapsed = collapse_watch_roots([root("/foo", true), root("/foo-bar", true)]);
        // /foo-bar is not a subdirectory of /foo
        assert_eq!(collapsed, vec![root("/foo", true), root("/foo-bar", true)]);
    }
}
