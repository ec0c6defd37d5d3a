use crate::builder::{elapsed_ms, BuildReport, IndexBuilder};
use crate::error::{IndexerError, Result};
use crate::staleness::{unix_now_ms, StalenessRecord, StalenessTracker};
use serde::Serialize;
use similar_vector_store::{ActiveIndex, GenerationSummary, VectorCatalogReader};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::{broadcast, watch, Mutex as TokioMutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPhase {
    Idle,
    Checking,
    Building,
}

/// Result of one pass through the rebuild state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    NotNeeded,
    Published(BuildReport),
    Failed(String),
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub struct IndexUpdate {
    pub completed_at: SystemTime,
    pub duration_ms: u64,
    pub report: Option<BuildReport>,
    pub success: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerHealth {
    pub phase: RebuildPhase,
    pub last_success_unix_ms: Option<u64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_duration_ms: Option<u64>,
    pub last_item_count: Option<usize>,
    pub p95_duration_ms: Option<u64>,
}

impl SchedulerHealth {
    const fn initial() -> Self {
        Self {
            phase: RebuildPhase::Idle,
            last_success_unix_ms: None,
            last_error: None,
            consecutive_failures: 0,
            last_duration_ms: None,
            last_item_count: None,
            p95_duration_ms: None,
        }
    }
}

/// Operational view of the index for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub needs_rebuild: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_build_unix_ms: Option<u64>,
    pub active: GenerationSummary,
    pub scheduler: SchedulerHealth,
}

/// Decides when to rebuild, runs the build, and publishes the result.
///
/// At most one build runs at a time; a trigger that arrives while a build is in
/// flight returns [`RebuildOutcome::AlreadyRunning`] without waiting.
pub struct RebuildScheduler {
    builder: IndexBuilder,
    catalog: Arc<dyn VectorCatalogReader>,
    tracker: Arc<StalenessTracker>,
    active: Arc<ActiveIndex>,
    durations: TokioMutex<VecDeque<u64>>,
    health_tx: watch::Sender<SchedulerHealth>,
    update_tx: broadcast::Sender<IndexUpdate>,
}

impl std::fmt::Debug for RebuildScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildScheduler")
            .field("builder", &self.builder)
            .field("health", &*self.health_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl RebuildScheduler {
    pub fn new(
        builder: IndexBuilder,
        catalog: Arc<dyn VectorCatalogReader>,
        tracker: Arc<StalenessTracker>,
        active: Arc<ActiveIndex>,
    ) -> Self {
        let (health_tx, _) = watch::channel(SchedulerHealth::initial());
        let (update_tx, _) = broadcast::channel(32);
        Self {
            builder,
            catalog,
            tracker,
            active,
            durations: TokioMutex::new(VecDeque::new()),
            health_tx,
            update_tx,
        }
    }

    #[must_use]
    pub fn active(&self) -> &Arc<ActiveIndex> {
        &self.active
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<StalenessTracker> {
        &self.tracker
    }

    /// Scheduled entry point: rebuilds only when the tracker reports staleness.
    pub async fn maybe_rebuild(&self) -> RebuildOutcome {
        let Ok(mut durations) = self.durations.try_lock() else {
            log::info!("Index rebuild already in progress; skipping check");
            return RebuildOutcome::AlreadyRunning;
        };

        self.set_phase(RebuildPhase::Checking);
        log::info!("Checking if index rebuild is needed...");
        match self.tracker.is_stale().await {
            Ok(true) => self.run_build(&mut durations, "stale").await,
            Ok(false) => {
                log::info!("Index rebuild not needed");
                self.set_phase(RebuildPhase::Idle);
                RebuildOutcome::NotNeeded
            }
            Err(err) => {
                log::error!("Error checking index staleness: {err}");
                self.set_phase(RebuildPhase::Idle);
                RebuildOutcome::Failed(err.to_string())
            }
        }
    }

    /// Manual entry point: rebuilds regardless of the staleness flag.
    pub async fn rebuild_now(&self, reason: &str) -> RebuildOutcome {
        let Ok(mut durations) = self.durations.try_lock() else {
            log::info!("Index rebuild already in progress; ignoring '{reason}' trigger");
            return RebuildOutcome::AlreadyRunning;
        };
        self.run_build(&mut durations, reason).await
    }

    async fn run_build(&self, durations: &mut VecDeque<u64>, reason: &str) -> RebuildOutcome {
        self.set_phase(RebuildPhase::Building);
        log::info!("Index rebuild required ({reason}). Starting build...");

        let started = Instant::now();
        let result = match self.tracker.begin_rebuild().await {
            Ok(ticket) => self
                .builder
                .build(self.catalog.as_ref())
                .await
                .map(|output| (ticket, output)),
            Err(err) => Err(err),
        };
        let duration = elapsed_ms(started);

        if matches!(result, Err(IndexerError::AlreadyRunning)) {
            log::info!("Index rebuild ({reason}) skipped; another process is building");
            self.set_phase(RebuildPhase::Idle);
            return RebuildOutcome::AlreadyRunning;
        }

        let mut health = self.health_tx.borrow().clone();
        health.phase = RebuildPhase::Idle;
        health.last_duration_ms = Some(duration);

        let outcome = match result {
            Ok((ticket, output)) => {
                let report = output.report;
                self.active.publish(output.generation);
                let finished_at = unix_now_ms();
                if let Err(err) = self.tracker.mark_rebuilt_since(ticket, finished_at).await {
                    log::warn!("Index published but the rebuild flag could not be cleared: {err}");
                }

                record_duration(durations, duration);
                health.last_success_unix_ms = Some(finished_at);
                health.last_error = None;
                health.consecutive_failures = 0;
                health.last_item_count = Some(report.item_count);
                health.p95_duration_ms = compute_p95(durations);
                log::info!(
                    "Index successfully rebuilt with {} items in {duration}ms",
                    report.item_count
                );
                RebuildOutcome::Published(report)
            }
            Err(err) => {
                log::error!("Error during index rebuild: {err}");
                health.last_error = Some(err.to_string());
                health.consecutive_failures += 1;
                RebuildOutcome::Failed(err.to_string())
            }
        };

        self.health_tx.send_replace(health);
        let (report, success) = match &outcome {
            RebuildOutcome::Published(report) => (Some(report.clone()), true),
            _ => (None, false),
        };
        let _ = self.update_tx.send(IndexUpdate {
            completed_at: SystemTime::now(),
            duration_ms: duration,
            report,
            success,
            reason: reason.to_string(),
        });
        outcome
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let StalenessRecord {
            needs_rebuild,
            last_build_unix_ms,
            ..
        } = self.tracker.status().await?;
        Ok(IndexStatus {
            needs_rebuild,
            last_build_unix_ms,
            active: self.active.current().summary(),
            scheduler: self.health_snapshot(),
        })
    }

    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<IndexUpdate> {
        self.update_tx.subscribe()
    }

    #[must_use]
    pub fn health_snapshot(&self) -> SchedulerHealth {
        self.health_tx.borrow().clone()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<SchedulerHealth> {
        self.health_tx.subscribe()
    }

    fn set_phase(&self, phase: RebuildPhase) {
        self.health_tx.send_modify(|health| health.phase = phase);
    }
}

fn record_duration(history: &mut VecDeque<u64>, duration: u64) {
    const MAX_HISTORY: usize = 20;
    history.push_back(duration);
    if history.len() > MAX_HISTORY {
        history.pop_front();
    }
}

fn compute_p95(history: &VecDeque<u64>) -> Option<u64> {
    if history.is_empty() {
        return None;
    }
    let mut sorted: Vec<u64> = history.iter().copied().collect();
    sorted.sort_unstable();
    let idx = ((sorted.len() as f32 - 1.0) * 0.95).round() as usize;
    sorted.get(idx).copied()
}
