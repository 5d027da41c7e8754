//! Pipeline driver: due artifacts in, playlist segments out.
//!
//! Items are popped in capture order, transcoded outside every lock and then
//! appended to the non-active playlist through the scheduler. Between drains
//! the driver sweeps stale segments and reports on the transport process.

pub mod media;

pub use media::{measure_or_zero, DurationProbe, FfmpegBackend, Transcoder};

use crate::cleanup::StaleSegmentCleaner;
use crate::clock::Clock;
use crate::queue::{Artifact, ArtifactKind, SharedQueue};
use crate::scheduler::Scheduler;
use crate::transport::SupervisorHandle;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Pause between queue drains.
    pub poll_interval: Duration,
    /// Extra append attempts for a segment that is not readable yet.
    pub append_retries: u32,
    pub append_retry_delay: Duration,
    pub cleanup_interval: Duration,
    /// How long consumed paths are remembered to reject rediscovery.
    pub history_retention: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            append_retries: 3,
            append_retry_delay: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(300),
            history_retention: Duration::from_secs(3600),
        }
    }
}

/// Result of handling one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Appended { segment: PathBuf, duration_secs: f64 },
    /// Already consumed earlier; nothing was done.
    AlreadyProcessed,
    /// Consumed but produced nothing playable.
    Skipped { reason: String },
    /// Segment never became readable; the artifact is lost.
    NotReady { segment: PathBuf },
}

pub struct PipelineDriver {
    queue: SharedQueue,
    scheduler: Arc<Scheduler>,
    probe: Arc<dyn DurationProbe>,
    transcoder: Arc<dyn Transcoder>,
    clock: Arc<dyn Clock>,
    settings: DriverSettings,
    cleaner: Option<StaleSegmentCleaner>,
    supervisor: Option<SupervisorHandle>,
}

impl PipelineDriver {
    pub fn new(
        queue: SharedQueue,
        scheduler: Arc<Scheduler>,
        probe: Arc<dyn DurationProbe>,
        transcoder: Arc<dyn Transcoder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            scheduler,
            probe,
            transcoder,
            clock,
            settings: DriverSettings::default(),
            cleaner: None,
            supervisor: None,
        }
    }

    pub fn with_settings(mut self, settings: DriverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cleaner(mut self, cleaner: StaleSegmentCleaner) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    /// Watch this supervisor between drains.
    pub fn attach_supervisor(&mut self, handle: SupervisorHandle) {
        self.supervisor = Some(handle);
    }

    /// Transcode one artifact and append the result to the non-active playlist.
    pub async fn process(&self, artifact: Artifact) -> ProcessOutcome {
        if self.queue.lock().is_processed(&artifact.path) {
            return ProcessOutcome::AlreadyProcessed;
        }

        tracing::info!(
            "Processing {} {}",
            artifact.artifact_type().as_str(),
            artifact.file_name()
        );

        let transformed = self.transform(&artifact).await;
        self.queue.lock().mark_processed(&artifact.path);

        let (segment, duration_secs) = match transformed {
            Ok(result) => result,
            Err(reason) => {
                tracing::warn!("Skipping {}: {}", artifact.path.display(), reason);
                return ProcessOutcome::Skipped { reason };
            }
        };

        self.append_with_retry(segment, duration_secs).await
    }

    async fn transform(&self, artifact: &Artifact) -> Result<(PathBuf, f64), String> {
        match artifact.kind {
            ArtifactKind::Snapshot { assigned_secs } => {
                let secs = assigned_secs.unwrap_or_else(|| self.queue.lock().window_secs());
                if !secs.is_finite() || secs <= 0.0 {
                    return Err(format!("no playtime assigned ({secs:.1}s)"));
                }
                let segment = self
                    .transcoder
                    .snapshot_segment(&artifact.path, secs)
                    .await
                    .map_err(|e| format!("snapshot conversion failed: {e:#}"))?;
                Ok((segment, secs))
            }
            ArtifactKind::Recording { duration_secs } => {
                let segment = self
                    .transcoder
                    .recording_segment(&artifact.path)
                    .await
                    .map_err(|e| format!("re-encode failed: {e:#}"))?;

                let secs = if duration_secs > 0.0 {
                    duration_secs
                } else {
                    measure_or_zero(self.probe.as_ref(), &segment).await
                };
                if secs <= 0.0 {
                    tracing::warn!(
                        "Duration of {} is unknown; it will not extend the countdown",
                        segment.display()
                    );
                }
                Ok((segment, secs))
            }
        }
    }

    async fn append_with_retry(&self, segment: PathBuf, duration_secs: f64) -> ProcessOutcome {
        let attempts = self.settings.append_retries + 1;
        for attempt in 1..=attempts {
            match self.scheduler.append(&segment, duration_secs) {
                Ok(true) => {
                    return ProcessOutcome::Appended {
                        segment,
                        duration_secs,
                    }
                }
                Ok(false) => {
                    if attempt < attempts {
                        tracing::debug!(
                            "Segment {} not ready (attempt {}/{}), retrying",
                            segment.display(),
                            attempt,
                            attempts
                        );
                        tokio::time::sleep(self.settings.append_retry_delay).await;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to update playlist with {}: {}", segment.display(), e);
                    return ProcessOutcome::Skipped {
                        reason: format!("playlist write failed: {e}"),
                    };
                }
            }
        }

        tracing::warn!(
            "Giving up on {}: not ready after {} attempts",
            segment.display(),
            attempts
        );
        ProcessOutcome::NotReady { segment }
    }

    /// Pop the earliest due artifact, if any.
    fn next_due(&self) -> Option<Artifact> {
        let mut queue = self.queue.lock();
        let next = queue.pop_due(self.clock.now());
        if next.is_some() {
            tracing::trace!("{}", queue.describe());
        }
        next
    }

    /// Process every due artifact, stopping early if `cancel` fires between items.
    pub async fn drain_due(&self, cancel: &CancellationToken) -> Vec<ProcessOutcome> {
        let mut outcomes = Vec::new();
        while !cancel.is_cancelled() {
            let Some(artifact) = self.next_due() else { break };
            outcomes.push(self.process(artifact).await);
        }
        outcomes
    }

    /// Wait for the first artifact that makes it into a playlist, then start
    /// the countdown. Returns `false` if cancelled first.
    ///
    /// Items are taken one at a time; whatever is still due after the first
    /// append is left for [`PipelineDriver::run`].
    pub async fn warm_up(&self, cancel: &CancellationToken) -> anyhow::Result<bool> {
        tracing::info!("Waiting for the first artifact to become due");
        loop {
            while !cancel.is_cancelled() {
                let Some(artifact) = self.next_due() else { break };
                if let ProcessOutcome::Appended { .. } = self.process(artifact).await {
                    self.scheduler.finish_warmup()?;
                    return Ok(true);
                }
            }

            let pause = self.settings.poll_interval.min(Duration::from_secs(1));
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Drain, sweep and check the transport until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Pipeline driver started");
        let mut last_cleanup = Instant::now();

        loop {
            self.drain_due(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            if last_cleanup.elapsed() >= self.settings.cleanup_interval {
                self.sweep();
                self.prune_history();
                last_cleanup = Instant::now();
            }
            self.check_transport();

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        tracing::info!("Pipeline driver stopped");
    }

    /// Remove stale segments that neither playlist references.
    pub fn sweep(&self) -> usize {
        let Some(ref cleaner) = self.cleaner else {
            return 0;
        };
        let referenced = match self.scheduler.referenced_segments() {
            Ok(referenced) => referenced,
            Err(e) => {
                tracing::warn!("Skipping cleanup, playlists unreadable: {}", e);
                return 0;
            }
        };
        match cleaner.remove_stale(&referenced) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("Stale segment cleanup failed: {}", e);
                0
            }
        }
    }

    /// Forget consumed artifacts captured before the retention horizon.
    pub fn prune_history(&self) -> usize {
        let now = self.clock.now();
        let cutoff = chrono::Duration::from_std(self.settings.history_retention)
            .ok()
            .and_then(|span| now.checked_sub_signed(span));
        match cutoff {
            Some(cutoff) => self.queue.lock().prune_before(cutoff),
            None => 0,
        }
    }

    fn check_transport(&self) {
        let Some(ref handle) = self.supervisor else {
            return;
        };
        if !handle.is_alive() {
            tracing::warn!(
                "Transport process is down ({:?}), {} restart(s) so far",
                handle.state(),
                handle.restart_count()
            );
        }
    }
}
