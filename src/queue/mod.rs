//! Ingestion queue: capture-time ordering plus the snapshot playtime budget.
//!
//! Snapshots share a window of `W` seconds with the recordings captured
//! before them. Every recording eats into the window once; the next snapshot
//! gets whatever is left (never more than `W`), and a snapshot whose window
//! was used up entirely is dropped. The window refills only when a snapshot
//! plays or is dropped for exhaustion, so recordings that already left the
//! queue still count against the snapshot after them. Snapshot playtime
//! therefore shrinks under recording pressure and the feed never drifts
//! behind real time.

mod artifact;

pub use artifact::{
    day_directory, parse_artifact_path, Artifact, ArtifactError, ArtifactKind, ArtifactType,
};

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Queue shared between discovery and the pipeline driver.
pub type SharedQueue = Arc<Mutex<IngestionQueue>>;

type QueueKey = (NaiveDateTime, u64);

/// What a budget pass removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReorderReport {
    /// Snapshots whose segment already exists in the temp dir.
    pub superseded: Vec<PathBuf>,
    /// Snapshots whose window was used up by earlier recordings.
    pub exhausted: Vec<PathBuf>,
}

#[derive(Debug)]
struct Pending {
    artifact: Artifact,
    /// A recording whose window was closed by a dropped snapshot. It no
    /// longer counts against any later snapshot.
    settled: bool,
}

#[derive(Debug)]
pub struct IngestionQueue {
    window_secs: f64,
    /// Budget left for the first pending snapshot after the recordings that
    /// were already emitted since the window last refilled.
    carry_secs: f64,
    /// Budget a snapshot queued after everything pending would get.
    time_left: f64,
    temp_dir: PathBuf,
    /// Keyed by capture time, ties broken by insertion order.
    pending: BTreeMap<QueueKey, Pending>,
    /// Every path accepted since the last prune, with its capture time.
    seen: HashMap<PathBuf, NaiveDateTime>,
    processed: HashSet<PathBuf>,
    /// Artifacts captured before this are no longer accepted.
    floor: Option<NaiveDateTime>,
    next_seq: u64,
}

impl IngestionQueue {
    pub fn new(window_secs: f64, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            window_secs,
            carry_secs: window_secs,
            time_left: window_secs,
            temp_dir: temp_dir.into(),
            pending: BTreeMap::new(),
            seen: HashMap::new(),
            processed: HashSet::new(),
            floor: None,
            next_seq: 0,
        }
    }

    pub fn shared(self) -> SharedQueue {
        Arc::new(Mutex::new(self))
    }

    /// Queue an artifact and rerun the budget pass.
    ///
    /// Returns `false` (and leaves the queue untouched) for a path that was
    /// already queued, dropped or processed, or one captured before the
    /// pruned history.
    pub fn push(&mut self, artifact: Artifact) -> bool {
        if self.is_known(&artifact.path) {
            tracing::debug!("Ignoring already known artifact: {:?}", artifact.path);
            return false;
        }
        if self.floor.is_some_and(|floor| artifact.capture_time < floor) {
            tracing::debug!(
                "Ignoring artifact captured before {:?}: {:?}",
                self.floor,
                artifact.path
            );
            return false;
        }
        self.seen.insert(artifact.path.clone(), artifact.capture_time);

        let key = (artifact.capture_time, self.next_seq);
        self.next_seq += 1;

        tracing::info!(
            "Queued {} {} captured at {}",
            artifact.artifact_type().as_str(),
            artifact.file_name(),
            artifact.capture_time
        );
        self.pending.insert(
            key,
            Pending {
                artifact,
                settled: false,
            },
        );

        let report = self.reorder();
        if !report.superseded.is_empty() || !report.exhausted.is_empty() {
            tracing::debug!("Budget pass removed {:?}", report);
        }
        true
    }

    /// Recompute snapshot playtimes over the pending set, in capture order.
    ///
    /// The pass starts from the carried budget. A recording charges its
    /// measured duration; a snapshot takes `min(W, time_left)` (or shrinks an
    /// earlier assignment) and refills the window, unless the window is
    /// already exhausted, in which case the snapshot is dropped, the
    /// recordings that exhausted it are settled and the window refilled.
    pub fn reorder(&mut self) -> ReorderReport {
        let mut report = ReorderReport::default();
        let mut time_left = self.carry_secs;
        let mut first_window = true;
        let mut refill_carry = false;
        let mut window: Vec<QueueKey> = Vec::new();
        let mut settle: Vec<QueueKey> = Vec::new();
        let mut removed = Vec::new();

        for (key, entry) in self.pending.iter_mut() {
            let artifact = &mut entry.artifact;
            match &mut artifact.kind {
                ArtifactKind::Recording { duration_secs } => {
                    if entry.settled {
                        continue;
                    }
                    time_left -= *duration_secs;
                    window.push(*key);
                    tracing::debug!(
                        "Recording {} costs {:.1}s, {:.1}s left for the next snapshot",
                        artifact.path.display(),
                        duration_secs,
                        time_left
                    );
                }
                ArtifactKind::Snapshot { assigned_secs } => {
                    let segment = self.temp_dir.join(format!(
                        "{}.mp4",
                        artifact
                            .path
                            .file_stem()
                            .map(|s| s.to_string_lossy())
                            .unwrap_or_default()
                    ));
                    if segment.exists() {
                        tracing::info!(
                            "Dropping snapshot {}: segment {} already exists",
                            artifact.path.display(),
                            segment.display()
                        );
                        report.superseded.push(artifact.path.clone());
                        removed.push(*key);
                        continue;
                    }

                    if time_left <= 0.0 {
                        tracing::info!(
                            "Dropping snapshot {}: window exhausted by recordings ({:.1}s)",
                            artifact.path.display(),
                            time_left
                        );
                        report.exhausted.push(artifact.path.clone());
                        removed.push(*key);
                        settle.append(&mut window);
                        refill_carry |= first_window;
                        first_window = false;
                        time_left = self.window_secs;
                        continue;
                    }

                    let budget = time_left.min(self.window_secs);
                    let next = match *assigned_secs {
                        Some(previous) => previous.min(budget),
                        None => budget,
                    };
                    if let Some(previous) = *assigned_secs {
                        if next < previous {
                            tracing::info!(
                                "Shortened snapshot {} from {:.1}s to {:.1}s",
                                artifact.path.display(),
                                previous,
                                next
                            );
                        }
                    }
                    *assigned_secs = Some(next);
                    window.clear();
                    first_window = false;
                    time_left = self.window_secs;
                }
            }
        }

        for key in removed {
            self.pending.remove(&key);
        }
        for key in settle {
            if let Some(entry) = self.pending.get_mut(&key) {
                entry.settled = true;
            }
        }
        if refill_carry {
            self.carry_secs = self.window_secs;
        }
        self.time_left = time_left;

        report
    }

    /// Earliest unprocessed artifact captured at or before `now`.
    pub fn peek_due(&self, now: NaiveDateTime) -> Option<&Artifact> {
        self.pending
            .values()
            .map(|entry| &entry.artifact)
            .take_while(|a| a.capture_time <= now)
            .find(|a| !self.processed.contains(&a.path))
    }

    /// Remove and return the earliest unprocessed artifact captured at or before `now`.
    ///
    /// Processed artifacts found on the way are discarded. An emitted
    /// recording keeps counting against the next snapshot; an emitted
    /// snapshot refills the window.
    pub fn pop_due(&mut self, now: NaiveDateTime) -> Option<Artifact> {
        loop {
            let entry = self.pending.first_entry()?;
            if entry.key().0 > now {
                return None;
            }
            let Pending { artifact, settled } = entry.remove();
            if self.processed.contains(&artifact.path) {
                tracing::debug!("Skipping processed artifact {:?}", artifact.path);
                continue;
            }
            match artifact.kind {
                ArtifactKind::Snapshot { .. } => self.carry_secs = self.window_secs,
                ArtifactKind::Recording { duration_secs } if !settled => {
                    self.carry_secs -= duration_secs;
                }
                ArtifactKind::Recording { .. } => {}
            }
            return Some(artifact);
        }
    }

    /// Record that an artifact's source file has been consumed.
    ///
    /// Returns `false` if it was already marked.
    pub fn mark_processed(&mut self, path: &Path) -> bool {
        self.processed.insert(path.to_path_buf())
    }

    /// Whether the path was accepted or processed since the last prune,
    /// whether or not it is still pending.
    pub fn is_known(&self, path: &Path) -> bool {
        self.seen.contains_key(path) || self.processed.contains(path)
    }

    /// Forget paths captured before `cutoff` and refuse artifacts older than
    /// it from now on. Returns how many paths were forgotten.
    ///
    /// Pending artifacts are kept; they are still emitted when due.
    pub fn prune_before(&mut self, cutoff: NaiveDateTime) -> usize {
        if self.floor.map_or(true, |floor| cutoff > floor) {
            self.floor = Some(cutoff);
        }
        let pending: HashSet<&Path> = self
            .pending
            .values()
            .map(|entry| entry.artifact.path.as_path())
            .collect();

        let before = self.seen.len();
        self.seen
            .retain(|path, captured| *captured >= cutoff || pending.contains(path.as_path()));
        let seen = &self.seen;
        self.processed.retain(|path| seen.contains_key(path));

        let forgotten = before - self.seen.len();
        if forgotten > 0 {
            tracing::debug!("Forgot {} artifact(s) captured before {}", forgotten, cutoff);
        }
        forgotten
    }

    pub fn is_processed(&self, path: &Path) -> bool {
        self.processed.contains(path)
    }

    /// Budget a snapshot queued after everything pending would get.
    pub fn time_left(&self) -> f64 {
        self.time_left
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending artifacts in capture order.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.pending.values().map(|entry| &entry.artifact)
    }

    /// Human-readable listing of the queue for debug logs.
    pub fn describe(&self) -> String {
        let mut out = String::from("Current queue:");
        for artifact in self.iter() {
            let duration = match artifact.kind {
                ArtifactKind::Snapshot {
                    assigned_secs: Some(secs),
                } => format!("{secs:.1}s"),
                ArtifactKind::Snapshot { assigned_secs: None } => "default".to_string(),
                ArtifactKind::Recording { duration_secs } => format!("{duration_secs:.1}s"),
            };
            let _ = write!(
                out,
                "\n  {} {} ({}, {})",
                artifact.capture_time.format("%Y-%m-%d %H:%M:%S"),
                artifact.file_name(),
                artifact.artifact_type().as_str(),
                duration
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate};

    fn t(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            + ChronoDuration::seconds(secs)
    }

    fn queue() -> IngestionQueue {
        IngestionQueue::new(60.0, "/nonexistent/snapfeed-temp")
    }

    fn recording(at: i64, secs: f64) -> Artifact {
        Artifact::recording(t(at), format!("/cams/{at:06}-Camera1-Recording.mp4"), secs)
    }

    fn snapshot(at: i64) -> Artifact {
        Artifact::snapshot(t(at), format!("/cams/{at:06}-Camera1-Snapshot.jpg"))
    }

    #[test]
    fn recording_shortens_following_snapshot() {
        let mut q = queue();
        q.push(recording(0, 30.0));
        q.push(snapshot(31));

        let snap = q.iter().find(|a| a.artifact_type() == ArtifactType::Snapshot).unwrap();
        assert_eq!(snap.assigned_secs(), Some(30.0));
    }

    #[test]
    fn long_recording_drops_snapshot_and_resets_budget() {
        let mut q = queue();
        q.push(recording(0, 90.0));
        q.push(snapshot(91));

        assert_eq!(q.len(), 1);
        assert!(q.iter().all(|a| a.artifact_type() == ArtifactType::Recording));
        assert_eq!(q.time_left(), 60.0);
    }

    #[test]
    fn budget_is_window_minus_sum_of_recordings() {
        let mut q = queue();
        q.push(recording(0, 10.0));
        q.push(recording(10, 15.5));
        q.push(recording(30, 4.5));
        q.push(snapshot(40));

        let snap = q.iter().last().unwrap();
        assert_eq!(snap.assigned_secs(), Some(30.0));
    }

    #[test]
    fn exact_exhaustion_drops_snapshot() {
        let mut q = queue();
        q.push(recording(0, 25.0));
        q.push(recording(30, 35.0));
        q.push(snapshot(70));
        assert!(q.iter().all(|a| a.artifact_type() == ArtifactType::Recording));
    }

    #[test]
    fn snapshot_without_recordings_gets_full_window() {
        let mut q = queue();
        q.push(snapshot(0));
        q.push(snapshot(5));
        assert!(q.iter().all(|a| a.assigned_secs() == Some(60.0)));
    }

    #[test]
    fn late_recording_shrinks_already_assigned_snapshot() {
        let mut q = queue();
        q.push(snapshot(50));
        assert_eq!(q.peek_due(t(100)).unwrap().assigned_secs(), Some(60.0));

        // Discovered late, but captured before the snapshot.
        q.push(recording(0, 20.0));
        let snap = q.iter().last().unwrap();
        assert_eq!(snap.assigned_secs(), Some(40.0));
    }

    #[test]
    fn assignment_never_grows_back() {
        let mut q = queue();
        q.push(recording(0, 45.0));
        q.push(snapshot(50));
        let popped = q.pop_due(t(0)).unwrap();
        assert_eq!(popped.artifact_type(), ArtifactType::Recording);

        // The recording is gone but the snapshot keeps its shorter slot.
        q.reorder();
        assert_eq!(q.iter().next().unwrap().assigned_secs(), Some(15.0));
    }

    #[test]
    fn emitted_recording_still_shortens_next_snapshot() {
        let mut q = queue();
        let rec = recording(0, 30.0);
        q.push(rec.clone());
        assert_eq!(q.pop_due(t(0)).unwrap().path, rec.path);
        q.mark_processed(&rec.path);

        q.push(snapshot(31));
        assert_eq!(q.iter().next().unwrap().assigned_secs(), Some(30.0));
    }

    #[test]
    fn emitted_long_recording_drops_next_snapshot() {
        let mut q = queue();
        q.push(recording(0, 90.0));
        q.pop_due(t(0)).unwrap();

        q.push(snapshot(91));
        assert!(q.is_empty());
        assert_eq!(q.time_left(), 60.0);

        // The dropped snapshot closed that window.
        q.push(snapshot(120));
        assert_eq!(q.iter().next().unwrap().assigned_secs(), Some(60.0));
    }

    #[test]
    fn emitted_snapshot_refills_window() {
        let mut q = queue();
        q.push(recording(0, 30.0));
        q.push(snapshot(31));
        q.pop_due(t(31)).unwrap();
        assert_eq!(q.pop_due(t(31)).unwrap().assigned_secs(), Some(30.0));

        q.push(snapshot(100));
        assert_eq!(q.iter().next().unwrap().assigned_secs(), Some(60.0));
    }

    #[test]
    fn recordings_behind_a_dropped_snapshot_are_charged_once() {
        let mut q = queue();
        q.push(recording(0, 90.0));
        q.push(snapshot(91));
        assert_eq!(q.len(), 1);

        q.pop_due(t(0)).unwrap();
        q.push(snapshot(200));
        assert_eq!(q.iter().next().unwrap().assigned_secs(), Some(60.0));
    }

    #[test]
    fn repeated_passes_do_not_drift() {
        let mut q = queue();
        q.push(recording(0, 20.0));
        q.pop_due(t(0)).unwrap();
        q.push(recording(25, 10.0));
        q.push(snapshot(40));

        for _ in 0..3 {
            q.reorder();
        }
        let snap = q.iter().last().unwrap();
        assert_eq!(snap.assigned_secs(), Some(30.0));
        assert_eq!(q.time_left(), 60.0);
    }

    #[test]
    fn prune_forgets_old_paths_and_refuses_old_artifacts() {
        let mut q = queue();
        let old = snapshot(0);
        let waiting = snapshot(500);
        q.push(old.clone());
        q.push(waiting.clone());
        q.pop_due(t(0)).unwrap();
        q.mark_processed(&old.path);

        assert_eq!(q.prune_before(t(100)), 1);
        assert!(!q.is_known(&old.path));
        assert!(!q.is_processed(&old.path));
        assert!(q.is_known(&waiting.path));

        // Older than the pruned history: not queued again.
        assert!(!q.push(old));
        assert!(q.push(snapshot(150)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn prune_keeps_pending_artifacts() {
        let mut q = queue();
        let snap = snapshot(0);
        q.push(snap.clone());

        assert_eq!(q.prune_before(t(100)), 0);
        assert!(q.is_known(&snap.path));
        assert_eq!(q.pop_due(t(100)).unwrap().path, snap.path);
    }

    #[test]
    fn snapshot_with_existing_segment_is_superseded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("000007-Camera1-Snapshot.mp4"), b"seg").unwrap();

        let mut q = IngestionQueue::new(60.0, dir.path());
        q.push(snapshot(7));
        assert!(q.is_empty());
    }

    #[test]
    fn pop_due_respects_now_and_order() {
        let mut q = queue();
        q.push(snapshot(20));
        q.push(snapshot(10));
        q.push(snapshot(30));

        assert!(q.pop_due(t(5)).is_none());
        assert_eq!(q.pop_due(t(25)).unwrap().capture_time, t(10));
        assert_eq!(q.pop_due(t(25)).unwrap().capture_time, t(20));
        assert!(q.pop_due(t(25)).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn equal_capture_times_keep_insertion_order() {
        let mut q = queue();
        let first = Artifact::snapshot(t(0), "/cams/a/000000-Camera1-Snapshot.jpg");
        let second = Artifact::snapshot(t(0), "/cams/b/000000-Camera2-Snapshot.jpg");
        q.push(first.clone());
        q.push(second.clone());
        assert_eq!(q.pop_due(t(0)).unwrap().path, first.path);
        assert_eq!(q.pop_due(t(0)).unwrap().path, second.path);
    }

    #[test]
    fn processed_artifacts_are_never_emitted() {
        let mut q = queue();
        let snap = snapshot(0);
        q.push(snap.clone());

        assert!(q.mark_processed(&snap.path));
        assert!(!q.mark_processed(&snap.path));
        assert!(q.peek_due(t(10)).is_none());
        assert!(q.pop_due(t(10)).is_none());

        // Rediscovery of a processed path is ignored.
        assert!(!q.push(snap));
        assert!(q.is_empty());
    }

    #[test]
    fn duplicate_push_is_ignored() {
        let mut q = queue();
        assert!(q.push(snapshot(0)));
        assert!(!q.push(snapshot(0)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn describe_lists_every_item() {
        let mut q = queue();
        q.push(recording(0, 12.0));
        q.push(snapshot(15));
        let text = q.describe();
        assert!(text.contains("000000-Camera1-Recording.mp4 (recording, 12.0s)"));
        assert!(text.contains("000015-Camera1-Snapshot.jpg (snapshot, 48.0s)"));
    }
}
