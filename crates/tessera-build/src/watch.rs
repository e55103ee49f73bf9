/// Rebuilds on project file changes
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{BuildError, Orchestrator};

/// Whether a changed path should not trigger a build
///
/// Anything inside the build directory or under a hidden component
/// (relative to the project root) is ignored.
pub fn is_ignored(root: &Path, out_dir: &Path, path: &Path) -> bool {
    if path.starts_with(out_dir) {
        return true;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(part) => part.to_str().map_or(false, |s| s.starts_with('.')),
        _ => false,
    })
}

/// Watches the project root and calls [`Orchestrator::run`] on changes
///
/// Dropping the watcher stops it.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl FileWatcher {
    pub fn start(orchestrator: Arc<Orchestrator>, out_dir: PathBuf) -> Result<Self, BuildError> {
        let root = orchestrator.root().to_path_buf();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<PathBuf>(100);

        let filter_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            for path in event.paths {
                if is_ignored(&filter_root, &out_dir, &path) {
                    continue;
                }
                let _ = tx.blocking_send(path);
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "watching for changes");

        let task = tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                debug!(file = %path.display(), "file changed");
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.run().await });
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignored_paths() {
        let root = Path::new("/app");
        let out = Path::new("/app/.tessera");
        assert!(is_ignored(root, out, Path::new("/app/.tessera/routes.js")));
        assert!(is_ignored(root, out, Path::new("/app/.git/index")));
        assert!(is_ignored(root, out, Path::new("/app/routes/.draft.jsx")));
        assert!(!is_ignored(root, out, Path::new("/app/routes/index.jsx")));
        assert!(!is_ignored(root, out, Path::new("/app/tessera.toml")));
    }
}
