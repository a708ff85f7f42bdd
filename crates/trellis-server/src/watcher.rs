//! File watching for live reload.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

/// Events emitted by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A JSON content document was modified
    ContentModified(PathBuf),

    /// File was created
    Created(PathBuf),

    /// File was deleted
    Deleted(PathBuf),

    /// Any other modification
    Modified(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            Self::ContentModified(p) | Self::Created(p) | Self::Deleted(p) | Self::Modified(p) => p,
        }
    }
}

/// File watcher for detecting changes.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Create a new file watcher for the given paths.
    ///
    /// Returns the watcher and a channel to receive events. Events stop when
    /// the watcher is dropped.
    pub fn new(paths: &[PathBuf]) -> Result<(Self, async_mpsc::Receiver<WatchEvent>), std::io::Error> {
        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = sync_tx.send(event);
            }
        })
        .map_err(std::io::Error::other)?;

        for path in paths {
            if path.exists() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(std::io::Error::other)?;
            }
        }

        std::thread::spawn(move || {
            let debounce = Duration::from_millis(100);
            let mut last: Option<(PathBuf, std::time::Instant)> = None;

            while let Ok(event) = sync_rx.recv() {
                for path in event.paths {
                    let Some(watch_event) = classify_event(&path, &event.kind) else {
                        continue;
                    };

                    // Editors often write a file several times in a row
                    let now = std::time::Instant::now();
                    if let Some((last_path, at)) = &last {
                        if *last_path == path && now.duration_since(*at) < debounce {
                            continue;
                        }
                    }
                    last = Some((path.clone(), now));

                    if async_tx.blocking_send(watch_event).is_err() {
                        return;
                    }
                }
            }
        });

        Ok((Self { _watcher: watcher }, async_rx))
    }
}

/// Classify a notify event into a WatchEvent.
fn classify_event(path: &Path, kind: &notify::EventKind) -> Option<WatchEvent> {
    use notify::EventKind;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match kind {
        EventKind::Create(_) => Some(WatchEvent::Created(path.to_path_buf())),
        EventKind::Remove(_) => Some(WatchEvent::Deleted(path.to_path_buf())),
        EventKind::Modify(_) if ext == "json" => Some(WatchEvent::ContentModified(path.to_path_buf())),
        EventKind::Modify(_) => Some(WatchEvent::Modified(path.to_path_buf())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn classifies_content_changes() {
        let json = Path::new("/site/content/index.json");
        let css = Path::new("/site/content/theme.css");

        assert_eq!(
            classify_event(json, &notify::EventKind::Modify(ModifyKind::Any)),
            Some(WatchEvent::ContentModified(json.to_path_buf()))
        );
        assert_eq!(
            classify_event(css, &notify::EventKind::Modify(ModifyKind::Any)),
            Some(WatchEvent::Modified(css.to_path_buf()))
        );
        assert_eq!(
            classify_event(json, &notify::EventKind::Create(CreateKind::File)),
            Some(WatchEvent::Created(json.to_path_buf()))
        );
        assert_eq!(classify_event(json, &notify::EventKind::Any), None);
    }

    #[tokio::test]
    async fn watches_file_changes() {
        let temp = tempdir().unwrap();
        let test_file = temp.path().join("index.json");

        let (watcher, mut rx) = FileWatcher::new(&[temp.path().to_path_buf()]).unwrap();

        // Give inotify time to set up
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::write(&test_file, "{}").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await;

        drop(watcher);

        assert!(event.is_ok(), "timeout waiting for file watch event");
        assert!(event.unwrap().is_some(), "channel should not be closed");
    }
}
