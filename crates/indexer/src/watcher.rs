use crate::error::{IndexerError, Result};
use crate::scheduler::{RebuildOutcome, RebuildScheduler};
use crate::staleness::StalenessTracker;
use log::{debug, error, info, warn};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

const MANUAL_REASON: &str = "manual";

/// Drives [`RebuildScheduler::maybe_rebuild`] on a fixed interval.
///
/// Ticks are handled one at a time on a single task, so a slow build delays the
/// next check instead of overlapping it. The first tick fires immediately.
#[derive(Clone)]
pub struct RebuildWatcher {
    inner: Arc<RebuildWatcherInner>,
}

struct RebuildWatcherInner {
    command_tx: mpsc::Sender<WatcherCommand>,
    scheduler: Arc<RebuildScheduler>,
}

enum WatcherCommand {
    Trigger { reason: String },
    Shutdown,
}

impl RebuildWatcher {
    pub fn start(scheduler: Arc<RebuildScheduler>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(IndexerError::Other(
                "rebuild interval must be positive".to_string(),
            ));
        }
        let (command_tx, command_rx) = mpsc::channel(16);
        spawn_rebuild_loop(scheduler.clone(), interval, command_rx);
        info!("Rebuild watcher started (interval {}s)", interval.as_secs());

        Ok(Self {
            inner: Arc::new(RebuildWatcherInner {
                command_tx,
                scheduler,
            }),
        })
    }

    /// Requests an unconditional rebuild on the watcher task.
    pub async fn trigger(&self, reason: impl Into<String>) -> Result<()> {
        self.inner
            .command_tx
            .send(WatcherCommand::Trigger {
                reason: reason.into(),
            })
            .await
            .map_err(|e| IndexerError::Other(format!("failed to send trigger: {e}")))?;
        Ok(())
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<RebuildScheduler> {
        &self.inner.scheduler
    }
}

impl Drop for RebuildWatcher {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(WatcherCommand::Shutdown);
        }
    }
}

fn spawn_rebuild_loop(
    scheduler: Arc<RebuildScheduler>,
    interval: Duration,
    mut command_rx: mpsc::Receiver<WatcherCommand>,
) {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    log_outcome("scheduled", &scheduler.maybe_rebuild().await);
                }
                cmd = command_rx.recv() => match cmd {
                    Some(WatcherCommand::Trigger { reason }) => {
                        let reason = if reason.is_empty() { MANUAL_REASON.to_string() } else { reason };
                        log_outcome(&reason, &scheduler.rebuild_now(&reason).await);
                    }
                    Some(WatcherCommand::Shutdown) | None => break,
                },
            }
        }
        debug!("Rebuild watcher stopped");
    });
}

fn log_outcome(reason: &str, outcome: &RebuildOutcome) {
    match outcome {
        RebuildOutcome::NotNeeded => debug!("Rebuild check ({reason}): index is fresh"),
        RebuildOutcome::AlreadyRunning => info!("Rebuild check ({reason}): build already running"),
        RebuildOutcome::Published(report) => info!(
            "Rebuild ({reason}) published {} items",
            report.item_count
        ),
        RebuildOutcome::Failed(err) => {
            error!("Rebuild ({reason}) failed; will retry on the next tick: {err}");
        }
    }
}

/// Marks the index stale whenever the catalog file changes on disk.
pub struct CatalogWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl CatalogWatcher {
    pub fn start(catalog_path: &Path, tracker: Arc<StalenessTracker>) -> Result<Self> {
        let catalog_path = catalog_path.to_path_buf();
        let (event_tx, mut event_rx) = mpsc::channel(256);
        let watcher = create_fs_watcher(&catalog_path, event_tx)?;

        let task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    Ok(event) if is_catalog_change(&event, &catalog_path) => {
                        match tracker.mark_stale().await {
                            Ok(true) => info!(
                                "Catalog {} changed; index marked for rebuild",
                                catalog_path.display()
                            ),
                            Ok(false) => {}
                            Err(err) => error!("Failed to mark index stale: {err}"),
                        }
                    }
                    Ok(_) => {}
                    Err(err) => warn!("Catalog watcher error: {err}"),
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for CatalogWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn watch_root(catalog_path: &Path) -> PathBuf {
    match catalog_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn create_fs_watcher(
    catalog_path: &Path,
    sender: mpsc::Sender<notify::Result<Event>>,
) -> Result<RecommendedWatcher> {
    let root = watch_root(catalog_path);
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default(),
    )
    .map_err(|e| IndexerError::Other(format!("watcher init failed: {e}")))?;
    watcher
        .watch(&root, RecursiveMode::NonRecursive)
        .map_err(|e| IndexerError::Other(format!("failed to watch {}: {e}", root.display())))?;
    Ok(watcher)
}

/// Writes, creations and removals of the catalog file itself. Rename-into-place
/// editors surface as a create or modify on the final name.
fn is_catalog_change(event: &Event, catalog_path: &Path) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    let Some(name) = catalog_path.file_name() else {
        return false;
    };
    event.paths.iter().any(|p| p.file_name() == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    #[test]
    fn only_catalog_mutations_count() {
        let catalog = Path::new("/data/catalog.json");
        let modify =
            Event::new(EventKind::Modify(ModifyKind::Any)).add_path("/data/catalog.json".into());
        let create =
            Event::new(EventKind::Create(CreateKind::File)).add_path("/data/catalog.json".into());
        let other =
            Event::new(EventKind::Modify(ModifyKind::Any)).add_path("/data/notes.txt".into());
        let access =
            Event::new(EventKind::Access(AccessKind::Any)).add_path("/data/catalog.json".into());

        assert!(is_catalog_change(&modify, catalog));
        assert!(is_catalog_change(&create, catalog));
        assert!(!is_catalog_change(&other, catalog));
        assert!(!is_catalog_change(&access, catalog));
    }

    #[test]
    fn bare_file_name_watches_working_directory() {
        assert_eq!(watch_root(Path::new("catalog.json")), PathBuf::from("."));
        assert_eq!(
            watch_root(Path::new("/srv/app/catalog.json")),
            PathBuf::from("/srv/app")
        );
    }
}
