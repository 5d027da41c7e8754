use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{segment_path_for, EncodeSettings};
use crate::command::ToolCommand;
use crate::{Error, Result};

/// Build the ffmpeg arguments that loop a still image for `duration`,
/// with a silent audio track so every segment has the same stream layout.
pub fn snapshot_args(
    settings: &EncodeSettings,
    snapshot: &Path,
    duration: Duration,
    output: &Path,
) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];
    args.extend(settings.device_args());
    args.extend(["-loop", "1", "-framerate"].map(String::from));
    args.push(settings.frame_rate.to_string());
    args.push("-i".to_string());
    args.push(snapshot.to_string_lossy().to_string());
    args.extend(["-f", "lavfi", "-i"].map(String::from));
    args.push(format!(
        "anullsrc=channel_layout=mono:sample_rate={}",
        settings.audio_sample_rate
    ));
    args.extend(settings.video_args());
    args.push("-t".to_string());
    args.push(format!("{:.3}", duration.as_secs_f64()));
    args.extend(settings.audio_args());
    args.extend(["-shortest", "-movflags", "+faststart"].map(String::from));
    args.push(output.to_string_lossy().to_string());
    args
}

/// Render a snapshot into a fixed-length segment inside `out_dir`.
///
/// Returns the path of the produced segment.
pub async fn snapshot_to_segment(
    ffmpeg: &Path,
    settings: &EncodeSettings,
    snapshot: &Path,
    duration: Duration,
    out_dir: &Path,
) -> Result<PathBuf> {
    if duration.is_zero() {
        return Err(Error::InvalidInput(format!(
            "zero-length segment requested for {}",
            snapshot.display()
        )));
    }
    if !snapshot.exists() {
        return Err(Error::file_not_found(snapshot));
    }

    let output = segment_path_for(snapshot, out_dir);

    tracing::info!(
        file = %snapshot.display(),
        secs = duration.as_secs_f64(),
        "Converting snapshot to segment"
    );

    ToolCommand::new(ffmpeg.to_path_buf())
        .args(snapshot_args(settings, snapshot, duration, &output))
        .timeout(settings.timeout)
        .execute()
        .await?;

    Ok(output)
}
