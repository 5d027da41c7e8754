//! Shared test harness for integration tests.
//!
//! [`FeedHarness`] wires a queue, scheduler and driver together over temp
//! directories, with a manual clock and a transcoder that only writes small
//! placeholder files, so no ffmpeg is needed.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use tempfile::TempDir;

use snapfeed::clock::ManualClock;
use snapfeed::pipeline::{DriverSettings, DurationProbe, PipelineDriver, Transcoder};
use snapfeed::playlist::BufferPair;
use snapfeed::queue::{day_directory, IngestionQueue, SharedQueue};
use snapfeed::scheduler::{Placeholder, Scheduler};
use snapfeed::watch::Discovery;

pub const WINDOW_SECS: f64 = 60.0;
pub const PLACEHOLDER_SECS: f64 = 30.0;

/// Records conversions and writes a tiny segment per artifact.
pub struct FakeTranscoder {
    out_dir: PathBuf,
    pub calls: Mutex<Vec<(PathBuf, Option<f64>)>>,
}

impl FakeTranscoder {
    pub fn new(out_dir: &Path) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn write(&self, source: &Path) -> anyhow::Result<PathBuf> {
        let stem = source
            .file_stem()
            .ok_or_else(|| anyhow::anyhow!("no file stem"))?
            .to_string_lossy();
        let out = self.out_dir.join(format!("{stem}.mp4"));
        std::fs::write(&out, b"segment")?;
        Ok(out)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn snapshot_segment(&self, snapshot: &Path, secs: f64) -> anyhow::Result<PathBuf> {
        self.calls.lock().push((snapshot.to_path_buf(), Some(secs)));
        self.write(snapshot)
    }

    async fn recording_segment(&self, recording: &Path) -> anyhow::Result<PathBuf> {
        self.calls.lock().push((recording.to_path_buf(), None));
        self.write(recording)
    }
}

/// Reports durations by file name, 0 for anything unknown.
#[derive(Default)]
pub struct TableProbe {
    durations: Mutex<Vec<(String, f64)>>,
}

impl TableProbe {
    pub fn set(&self, file_name: &str, secs: f64) {
        self.durations.lock().push((file_name.to_string(), secs));
    }
}

#[async_trait]
impl DurationProbe for TableProbe {
    async fn duration_secs(&self, path: &Path) -> anyhow::Result<f64> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.durations
            .lock()
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, secs)| *secs)
            .ok_or_else(|| anyhow::anyhow!("unknown file {name}"))
    }
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
}

pub fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    day().and_hms_opt(h, m, s).unwrap()
}

pub struct FeedHarness {
    pub cams: TempDir,
    pub work: TempDir,
    pub queue: SharedQueue,
    pub scheduler: Arc<Scheduler>,
    pub transcoder: Arc<FakeTranscoder>,
    pub probe: Arc<TableProbe>,
    pub clock: Arc<ManualClock>,
    pub discovery: Discovery,
}

impl FeedHarness {
    pub fn new() -> Self {
        let cams = tempfile::tempdir().expect("failed to create camera dir");
        let work = tempfile::tempdir().expect("failed to create work dir");

        let placeholder = work.path().join("placeholder.mp4");
        std::fs::write(&placeholder, b"filler").unwrap();

        let queue = IngestionQueue::new(WINDOW_SECS, work.path()).shared();
        let scheduler = Arc::new(Scheduler::new(
            BufferPair::new(work.path()),
            Placeholder {
                path: placeholder,
                duration_secs: PLACEHOLDER_SECS,
            },
        ));
        scheduler.initialize().unwrap();

        let transcoder = Arc::new(FakeTranscoder::new(work.path()));
        let probe = Arc::new(TableProbe::default());
        let clock = Arc::new(ManualClock::new(at(0, 0, 0)));
        let discovery = Discovery::new(queue.clone(), probe.clone());

        Self {
            cams,
            work,
            queue,
            scheduler,
            transcoder,
            probe,
            clock,
            discovery,
        }
    }

    pub fn driver(&self) -> PipelineDriver {
        PipelineDriver::new(
            self.queue.clone(),
            self.scheduler.clone(),
            self.probe.clone(),
            self.transcoder.clone(),
            self.clock.clone(),
        )
        .with_settings(DriverSettings {
            poll_interval: std::time::Duration::from_millis(10),
            append_retries: 0,
            append_retry_delay: std::time::Duration::from_millis(1),
            cleanup_interval: std::time::Duration::from_secs(3600),
            history_retention: std::time::Duration::from_secs(3600),
        })
    }

    /// Create an artifact file in today's camera directory.
    pub fn place(&self, name: &str) -> PathBuf {
        let dir = day_directory(self.cams.path(), day());
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, b"raw").unwrap();
        path
    }

    /// Place a recording and register its measured duration.
    pub fn place_recording(&self, hhmmss: &str, secs: f64) -> PathBuf {
        let name = format!("{hhmmss}-Camera1-Recording.mp4");
        self.probe.set(&name, secs);
        self.place(&name)
    }

    pub fn place_snapshot(&self, hhmmss: &str) -> PathBuf {
        self.place(&format!("{hhmmss}-Camera1-Snapshot.jpg"))
    }

    pub fn playlist(&self, index: usize) -> PathBuf {
        self.scheduler.playlist_paths()[index].clone()
    }

    pub fn lines(&self, index: usize) -> Vec<String> {
        snapfeed::playlist::format::read_lines(&self.playlist(index)).unwrap()
    }
}
