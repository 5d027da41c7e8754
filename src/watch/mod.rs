//! Artifact discovery.
//!
//! New files under the camera root are picked up through `notify` once they
//! stop changing. On startup the recent past is rescanned so a restart does
//! not lose what arrived while the process was down.

pub mod settle;

pub use settle::FileSettleTracker;

use crate::pipeline::{measure_or_zero, DurationProbe};
use crate::queue::{
    day_directory, parse_artifact_path, Artifact, ArtifactError, ArtifactType, SharedQueue,
};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// What happened to a discovered path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverOutcome {
    Queued(ArtifactType),
    /// Already queued or processed.
    Duplicate,
    /// Neither a snapshot nor a recording.
    Skipped,
    /// Looked like an artifact but its capture time could not be parsed.
    Rejected,
}

/// Turns discovered paths into queued artifacts.
pub struct Discovery {
    queue: SharedQueue,
    probe: Arc<dyn DurationProbe>,
}

impl Discovery {
    pub fn new(queue: SharedQueue, probe: Arc<dyn DurationProbe>) -> Self {
        Self { queue, probe }
    }

    pub async fn discover(&self, path: &Path) -> DiscoverOutcome {
        let (capture_time, artifact_type) = match parse_artifact_path(path) {
            Ok(parsed) => parsed,
            Err(ArtifactError::UnsupportedFile(_)) => {
                tracing::debug!(
                    "Neither a snapshot nor a recording, skipping: {}",
                    path.display()
                );
                return DiscoverOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Dropping artifact");
                return DiscoverOutcome::Rejected;
            }
        };
        self.enqueue(path, capture_time, artifact_type).await
    }

    async fn enqueue(
        &self,
        path: &Path,
        capture_time: NaiveDateTime,
        artifact_type: ArtifactType,
    ) -> DiscoverOutcome {
        if self.queue.lock().is_known(path) {
            return DiscoverOutcome::Duplicate;
        }

        let artifact = match artifact_type {
            ArtifactType::Snapshot => Artifact::snapshot(capture_time, path),
            ArtifactType::Recording => {
                let secs = measure_or_zero(self.probe.as_ref(), path).await;
                Artifact::recording(capture_time, path, secs)
            }
        };

        if self.queue.lock().push(artifact) {
            DiscoverOutcome::Queued(artifact_type)
        } else {
            DiscoverOutcome::Duplicate
        }
    }
}

/// Queue artifacts captured within `horizon` before `now`.
///
/// Every day directory the window touches is listed in name order. Returns
/// how many artifacts were queued.
pub async fn rescan_recent(
    root: &Path,
    horizon: Duration,
    now: NaiveDateTime,
    discovery: &Discovery,
) -> usize {
    let span = chrono::Duration::from_std(horizon).unwrap_or_else(|_| chrono::Duration::days(7));
    let start = now.checked_sub_signed(span).unwrap_or(now);

    let mut queued = 0;
    let mut day = start.date();
    while day <= now.date() {
        let dir = day_directory(root, day);
        if dir.is_dir() {
            tracing::debug!("Rescanning {}", dir.display());
            for entry in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path();
                let Ok((capture_time, artifact_type)) = parse_artifact_path(path) else {
                    continue;
                };
                if capture_time < start || capture_time > now {
                    continue;
                }
                if let DiscoverOutcome::Queued(_) =
                    discovery.enqueue(path, capture_time, artifact_type).await
                {
                    queued += 1;
                }
            }
        }
        let Some(next) = day.succ_opt() else { break };
        day = next;
    }

    tracing::info!("Startup rescan queued {} artifact(s)", queued);
    queued
}

/// Watches the camera root and feeds settled files to [`Discovery`].
pub struct FileWatcher {
    root: PathBuf,
    settle_time: Duration,
    discovery: Arc<Discovery>,
}

impl FileWatcher {
    pub fn new(root: impl Into<PathBuf>, settle_time: Duration, discovery: Arc<Discovery>) -> Self {
        Self {
            root: root.into(),
            settle_time,
            discovery,
        }
    }

    /// Watch until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<PathBuf>(256);

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        for path in event.paths {
                            let _ = event_tx.blocking_send(path);
                        }
                    }
                }
                Err(e) => tracing::warn!("File watch error: {}", e),
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", self.root.display()))?;
        tracing::info!("Watching directory: {}", self.root.display());

        let mut tracker = FileSettleTracker::new(self.settle_time);
        let mut check = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(path) = event_rx.recv() => {
                    if path.is_file() {
                        tracing::trace!("File event: {}", path.display());
                        tracker.file_changed(path, Instant::now());
                    }
                }
                _ = check.tick() => {
                    for path in tracker.take_settled(Instant::now()) {
                        if path.is_file() {
                            tracing::info!("Detected new file: {}", path.display());
                            self.discovery.discover(&path).await;
                        }
                    }
                }
            }
        }

        drop(watcher);
        tracing::info!("File watcher stopped");
        Ok(())
    }
}
