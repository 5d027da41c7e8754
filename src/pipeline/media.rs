//! Media seams used by discovery and the driver.
//!
//! Both traits are implemented by [`FfmpegBackend`]; tests substitute fakes.

use async_trait::async_trait;
use snapfeed_av::{actions, EncodeSettings, Tools};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Measures the playable length of a media file.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration_secs(&self, path: &Path) -> anyhow::Result<f64>;
}

/// Turns raw artifacts into segments the playlists can reference.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Render a still image as a segment lasting `duration_secs`.
    async fn snapshot_segment(
        &self,
        snapshot: &Path,
        duration_secs: f64,
    ) -> anyhow::Result<PathBuf>;

    /// Re-encode a clip to the common segment profile.
    async fn recording_segment(&self, recording: &Path) -> anyhow::Result<PathBuf>;
}

/// Duration of `path`, or 0 when it cannot be measured.
pub async fn measure_or_zero(probe: &dyn DurationProbe, path: &Path) -> f64 {
    match probe.duration_secs(path).await {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => secs,
        Ok(secs) => {
            tracing::warn!("Ignoring invalid duration {} for {}", secs, path.display());
            0.0
        }
        Err(e) => {
            tracing::warn!(
                file = %path.display(),
                error = %e,
                "Could not measure duration; treating it as 0"
            );
            0.0
        }
    }
}

/// ffmpeg/ffprobe implementation writing segments into `out_dir`.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    tools: Tools,
    settings: EncodeSettings,
    out_dir: PathBuf,
}

impl FfmpegBackend {
    pub fn new(tools: Tools, settings: EncodeSettings, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools,
            settings,
            out_dir: out_dir.into(),
        }
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }
}

#[async_trait]
impl DurationProbe for FfmpegBackend {
    async fn duration_secs(&self, path: &Path) -> anyhow::Result<f64> {
        let duration = snapfeed_av::probe_duration(&self.tools.ffprobe, path).await?;
        Ok(duration.as_secs_f64())
    }
}

#[async_trait]
impl Transcoder for FfmpegBackend {
    async fn snapshot_segment(
        &self,
        snapshot: &Path,
        duration_secs: f64,
    ) -> anyhow::Result<PathBuf> {
        let duration = Duration::try_from_secs_f64(duration_secs)?;
        let segment = actions::snapshot_to_segment(
            &self.tools.ffmpeg,
            &self.settings,
            snapshot,
            duration,
            &self.out_dir,
        )
        .await?;
        Ok(segment)
    }

    async fn recording_segment(&self, recording: &Path) -> anyhow::Result<PathBuf> {
        let segment = actions::reencode_recording(
            &self.tools.ffmpeg,
            &self.settings,
            recording,
            &self.out_dir,
        )
        .await?;
        Ok(segment)
    }
}
