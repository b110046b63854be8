use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Wakes a waiting thread when the database (or its -wal/-shm/-journal
/// siblings) is modified by any process.
pub struct DbWatcher {
    // Dropping the watcher stops event delivery.
    _watcher: RecommendedWatcher,
    rx: Receiver<()>,
}

impl DbWatcher {
    pub fn new(db_path: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let db_filename = Path::new(db_path)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            // Reads by other processes would otherwise wake us in a loop.
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let ours = event.paths.iter().any(|p| {
                p.file_name()
                    .map(|f| f.to_string_lossy().starts_with(&*db_filename))
                    .unwrap_or(false)
            });
            if ours {
                let _ = tx.send(());
            }
        })
        .context("failed to create file watcher")?;

        // SQLite writes through temp files next to the database, so watch the directory.
        let path = Path::new(db_path);
        let watch_path = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", watch_path.display()))?;

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Block until the database changes or `timeout` passes, then swallow any
    /// burst of events that arrived with the first. Returns true on change.
    pub fn wait(&self, timeout: Duration) -> bool {
        let changed = self.rx.recv_timeout(timeout).is_ok();
        while self.rx.try_recv().is_ok() {}
        changed
    }
}
