//! File watching for the dev server.
//!
//! Raw notify events are debounced by `notify-debouncer-mini`, filtered
//! through the configured ignore globs and forwarded as paths on a tokio
//! channel, where a [`ChangeCoalescer`](crate::hmr::ChangeCoalescer) batches them.

use brisk_core::{BriskError, BriskResult};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Compiled ignore patterns
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    globs: GlobSet,
}

impl IgnoreSet {
    pub fn new(patterns: &[String]) -> BriskResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| BriskError::Watch(format!("Invalid ignore pattern '{}': {}", pattern, e)))?;
            builder.add(glob);
        }
        let globs = builder
            .build()
            .map_err(|e| BriskError::Watch(format!("Invalid ignore patterns: {}", e)))?;
        Ok(Self { globs })
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.globs.is_match(path)
    }
}

/// Keeps the OS watcher alive; dropping it stops watching
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    roots: Vec<PathBuf>,
}

impl FileWatcher {
    /// Watch `roots` recursively and send every non-ignored changed path to `tx`.
    ///
    /// Roots that do not exist are skipped with a warning.
    pub fn start(
        roots: &[PathBuf],
        ignore: IgnoreSet,
        debounce: Duration,
        tx: mpsc::Sender<PathBuf>,
    ) -> BriskResult<Self> {
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
            Ok(events) => {
                for event in events {
                    if ignore.is_ignored(&event.path) {
                        continue;
                    }
                    debug!("Changed: {}", event.path.display());
                    // the receiver is gone once the server shuts down
                    if tx.blocking_send(event.path).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!("Watch error: {:?}", e),
        })
        .map_err(|e| BriskError::Watch(format!("Failed to create file watcher: {}", e)))?;

        let mut watched = Vec::new();
        for root in roots {
            if !root.exists() {
                warn!("Not watching {}: directory does not exist", root.display());
                continue;
            }
            debouncer
                .watcher()
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| BriskError::Watch(format!("Failed to watch {}: {}", root.display(), e)))?;
            watched.push(root.clone());
        }

        Ok(Self {
            _debouncer: debouncer,
            roots: watched,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn default_ignore() -> IgnoreSet {
        IgnoreSet::new(&brisk_core::DevConfig::default().ignore).unwrap()
    }

    #[test]
    fn test_default_ignore_patterns() {
        let ignore = default_ignore();
        assert!(ignore.is_ignored(Path::new("/app/node_modules/react/index.js")));
        assert!(ignore.is_ignored(Path::new("/app/.git/HEAD")));
        assert!(ignore.is_ignored(Path::new("/app/src/index.ts.swp")));
        assert!(ignore.is_ignored(Path::new("/app/src/index.ts~")));
        assert!(!ignore.is_ignored(Path::new("/app/src/index.ts")));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let err = IgnoreSet::new(&["src/[".to_string()]).unwrap_err();
        assert!(matches!(err, BriskError::Watch(_)));
    }

    #[tokio::test]
    async fn test_missing_roots_are_skipped() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let watcher = FileWatcher::start(
            &[temp.path().join("src"), temp.path().join("missing")],
            default_ignore(),
            Duration::from_millis(50),
            tx,
        )
        .unwrap();
        assert_eq!(watcher.roots(), &[temp.path().join("src")]);
    }
}
