use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use similar_vector_store::FileLock;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as TokioMutex, MutexGuard};

pub const STALENESS_FILE_NAME: &str = "staleness.json";

/// Process-wide record of whether the persisted index is known to be outdated.
///
/// `revision` grows with every staleness notification from any process, so a
/// rebuild can tell whether the catalog changed while it was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessRecord {
    pub needs_rebuild: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_build_unix_ms: Option<u64>,
    #[serde(default)]
    pub revision: u64,
}

impl StalenessRecord {
    /// A record that has never seen a build asks for one.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            needs_rebuild: true,
            last_build_unix_ms: None,
            revision: 0,
        }
    }
}

/// Storage for the single [`StalenessRecord`].
#[async_trait]
pub trait StalenessRepository: Send + Sync {
    async fn read(&self) -> Result<Option<StalenessRecord>>;
    async fn write(&self, record: &StalenessRecord) -> Result<()>;

    /// Exclusive access shared with other processes using the same storage.
    /// Storage private to one process needs none.
    async fn lock(&self) -> Result<Option<FileLock>> {
        Ok(None)
    }
}

/// Keeps the record as JSON next to the index artifacts.
#[derive(Debug, Clone)]
pub struct JsonFileStalenessRepository {
    path: PathBuf,
}

impl JsonFileStalenessRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STALENESS_FILE_NAME))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }
}

#[async_trait]
impl StalenessRepository for JsonFileStalenessRepository {
    async fn read(&self) -> Result<Option<StalenessRecord>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                log::warn!(
                    "Unreadable staleness record at {} ({err}); treating index as stale",
                    self.path.display()
                );
                Ok(None)
            }
        }
    }

    async fn write(&self, record: &StalenessRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn lock(&self) -> Result<Option<FileLock>> {
        Ok(Some(FileLock::acquire(&self.lock_path()).await?))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStalenessRepository {
    record: TokioMutex<Option<StalenessRecord>>,
}

impl MemoryStalenessRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_record(record: StalenessRecord) -> Self {
        Self {
            record: TokioMutex::new(Some(record)),
        }
    }
}

#[async_trait]
impl StalenessRepository for MemoryStalenessRepository {
    async fn read(&self) -> Result<Option<StalenessRecord>> {
        Ok(*self.record.lock().await)
    }

    async fn write(&self, record: &StalenessRecord) -> Result<()> {
        *self.record.lock().await = Some(*record);
        Ok(())
    }
}

/// The persisted revision observed when a rebuild started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildTicket {
    revision: u64,
}

impl RebuildTicket {
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }
}

/// Read-modify-write access to the staleness record.
///
/// Updates are serialized within the process by a mutex and across processes
/// by the repository lock. Every `mark_stale` bumps the persisted revision, so
/// a rebuild that raced with a catalog change in any process does not clear
/// the flag.
pub struct StalenessTracker {
    repo: Arc<dyn StalenessRepository>,
    lock: TokioMutex<()>,
}

impl std::fmt::Debug for StalenessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StalenessTracker").finish_non_exhaustive()
    }
}

impl StalenessTracker {
    pub fn new(repo: Arc<dyn StalenessRepository>) -> Self {
        Self {
            repo,
            lock: TokioMutex::new(()),
        }
    }

    /// Records that the index no longer reflects the catalog.
    ///
    /// Returns `true` when the flag flipped. Repeated calls leave the flag set
    /// but still advance the revision.
    pub async fn mark_stale(&self) -> Result<bool> {
        let _held = self.exclusive().await?;
        let (mut record, created) = self.get_or_create().await?;
        let flipped = !record.needs_rebuild;
        record.needs_rebuild = true;
        record.revision = record.revision.wrapping_add(1);
        self.repo.write(&record).await?;
        if flipped {
            log::info!("Index rebuild flag set after catalog change");
        }
        Ok(flipped || created)
    }

    /// `true` when a rebuild is required. The first check ever is always stale.
    pub async fn is_stale(&self) -> Result<bool> {
        let _held = self.exclusive().await?;
        let (record, _) = self.get_or_create().await?;
        Ok(record.needs_rebuild)
    }

    /// Captures the persisted revision before a build reads the catalog.
    pub async fn begin_rebuild(&self) -> Result<RebuildTicket> {
        let _held = self.exclusive().await?;
        let (record, _) = self.get_or_create().await?;
        Ok(RebuildTicket {
            revision: record.revision,
        })
    }

    /// Clears the flag unconditionally after a successful build.
    pub async fn mark_rebuilt(&self, at_unix_ms: u64) -> Result<()> {
        let _held = self.exclusive().await?;
        let (mut record, _) = self.get_or_create().await?;
        record.needs_rebuild = false;
        record.last_build_unix_ms = Some(at_unix_ms);
        self.repo.write(&record).await
    }

    /// Clears the flag only if the persisted revision still equals the one in
    /// `ticket`. The build time is recorded either way. Returns whether the
    /// flag was cleared.
    pub async fn mark_rebuilt_since(&self, ticket: RebuildTicket, at_unix_ms: u64) -> Result<bool> {
        let _held = self.exclusive().await?;
        let (mut record, _) = self.get_or_create().await?;
        let unchanged = record.revision == ticket.revision;
        if unchanged {
            record.needs_rebuild = false;
        } else {
            log::info!(
                "Catalog changed during rebuild (revision {} -> {}); leaving rebuild flag set",
                ticket.revision,
                record.revision
            );
        }
        record.last_build_unix_ms = Some(at_unix_ms);
        self.repo.write(&record).await?;
        Ok(unchanged)
    }

    pub async fn status(&self) -> Result<StalenessRecord> {
        let _held = self.exclusive().await?;
        Ok(self.get_or_create().await?.0)
    }

    async fn exclusive(&self) -> Result<(MutexGuard<'_, ()>, Option<FileLock>)> {
        let guard = self.lock.lock().await;
        let file_lock = self.repo.lock().await?;
        Ok((guard, file_lock))
    }

    async fn get_or_create(&self) -> Result<(StalenessRecord, bool)> {
        if let Some(record) = self.repo.read().await? {
            return Ok((record, false));
        }
        let record = StalenessRecord::initial();
        self.repo.write(&record).await?;
        log::info!("Created staleness record; first check forces a build");
        Ok((record, true))
    }
}

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tracker_with(record: Option<StalenessRecord>) -> StalenessTracker {
        let repo = match record {
            Some(record) => MemoryStalenessRepository::with_record(record),
            None => MemoryStalenessRepository::new(),
        };
        StalenessTracker::new(Arc::new(repo))
    }

    const FRESH: StalenessRecord = StalenessRecord {
        needs_rebuild: false,
        last_build_unix_ms: Some(1_000),
        revision: 0,
    };

    #[tokio::test]
    async fn first_check_is_stale() {
        let tracker = tracker_with(None);
        assert!(tracker.is_stale().await.unwrap());
        assert_eq!(tracker.status().await.unwrap(), StalenessRecord::initial());
    }

    #[tokio::test]
    async fn mark_stale_is_idempotent() {
        let tracker = tracker_with(Some(FRESH));
        assert!(!tracker.is_stale().await.unwrap());
        assert!(tracker.mark_stale().await.unwrap());
        assert!(!tracker.mark_stale().await.unwrap());
        assert!(tracker.is_stale().await.unwrap());
        let status = tracker.status().await.unwrap();
        assert_eq!(status.last_build_unix_ms, Some(1_000));
        assert_eq!(status.revision, 2);
    }

    #[tokio::test]
    async fn mark_rebuilt_clears_flag_and_records_time() {
        let tracker = tracker_with(None);
        tracker.mark_rebuilt(5_000).await.unwrap();
        assert_eq!(
            tracker.status().await.unwrap(),
            StalenessRecord {
                needs_rebuild: false,
                last_build_unix_ms: Some(5_000),
                revision: 0,
            }
        );
    }

    #[tokio::test]
    async fn notification_during_rebuild_keeps_flag() {
        let tracker = tracker_with(Some(StalenessRecord::initial()));
        let ticket = tracker.begin_rebuild().await.unwrap();
        tracker.mark_stale().await.unwrap();

        assert!(!tracker.mark_rebuilt_since(ticket, 2_000).await.unwrap());
        let status = tracker.status().await.unwrap();
        assert!(status.needs_rebuild);
        assert_eq!(status.last_build_unix_ms, Some(2_000));

        let ticket = tracker.begin_rebuild().await.unwrap();
        assert!(tracker.mark_rebuilt_since(ticket, 3_000).await.unwrap());
        assert!(!tracker.is_stale().await.unwrap());
    }

    #[tokio::test]
    async fn json_repository_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileStalenessRepository::in_dir(&dir.path().join("nested"));
        assert_eq!(repo.read().await.unwrap(), None);

        repo.write(&FRESH).await.unwrap();
        assert_eq!(repo.read().await.unwrap(), Some(FRESH));
        assert!(!repo.path().with_extension("json.tmp").exists());

        let tracker = StalenessTracker::new(Arc::new(repo.clone()));
        tracker.mark_stale().await.unwrap();
        assert!(repo.read().await.unwrap().unwrap().needs_rebuild);
    }

    #[tokio::test]
    async fn change_marked_by_another_process_keeps_flag() {
        let dir = tempfile::tempdir().unwrap();
        let serve = StalenessTracker::new(Arc::new(JsonFileStalenessRepository::in_dir(dir.path())));
        let cli = StalenessTracker::new(Arc::new(JsonFileStalenessRepository::in_dir(dir.path())));
        serve.mark_rebuilt(1_000).await.unwrap();

        let ticket = serve.begin_rebuild().await.unwrap();
        assert!(cli.mark_stale().await.unwrap());
        assert!(!serve.mark_rebuilt_since(ticket, 2_000).await.unwrap());
        assert!(serve.is_stale().await.unwrap());
        assert!(cli.is_stale().await.unwrap());

        let ticket = serve.begin_rebuild().await.unwrap();
        assert!(serve.mark_rebuilt_since(ticket, 3_000).await.unwrap());
        assert!(!cli.is_stale().await.unwrap());
    }

    #[tokio::test]
    async fn unreadable_record_is_treated_as_stale_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileStalenessRepository::in_dir(dir.path());
        tokio::fs::write(repo.path(), b"").await.unwrap();

        let tracker = StalenessTracker::new(Arc::new(repo.clone()));
        assert!(tracker.is_stale().await.unwrap());
        assert_eq!(repo.read().await.unwrap(), Some(StalenessRecord::initial()));
    }

    #[tokio::test]
    async fn record_without_revision_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileStalenessRepository::in_dir(dir.path());
        tokio::fs::write(repo.path(), br#"{"needs_rebuild":false,"last_build_unix_ms":7}"#)
            .await
            .unwrap();
        assert_eq!(
            repo.read().await.unwrap(),
            Some(StalenessRecord {
                needs_rebuild: false,
                last_build_unix_ms: Some(7),
                revision: 0,
            })
        );
    }
}
