use std::path::{Path, PathBuf};

use super::{segment_path_for, EncodeSettings};
use crate::command::ToolCommand;
use crate::{Error, Result};

/// Build the ffmpeg arguments that normalize a recording to the segment profile.
pub fn recording_args(settings: &EncodeSettings, recording: &Path, output: &Path) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];
    args.extend(settings.device_args());
    args.push("-i".to_string());
    args.push(recording.to_string_lossy().to_string());
    args.extend(settings.video_args());
    args.extend(settings.audio_args());
    args.extend(["-movflags", "+faststart"].map(String::from));
    args.push(output.to_string_lossy().to_string());
    args
}

/// Re-encode a recording into `out_dir`, returning the produced segment.
pub async fn reencode_recording(
    ffmpeg: &Path,
    settings: &EncodeSettings,
    recording: &Path,
    out_dir: &Path,
) -> Result<PathBuf> {
    if !recording.exists() {
        return Err(Error::file_not_found(recording));
    }

    let output = segment_path_for(recording, out_dir);
    if output == recording {
        return Err(Error::InvalidInput(format!(
            "recording {} already lives in the segment directory",
            recording.display()
        )));
    }

    tracing::info!(file = %recording.display(), "Re-encoding recording");

    ToolCommand::new(ffmpeg.to_path_buf())
        .args(recording_args(settings, recording, &output))
        .timeout(settings.timeout)
        .execute()
        .await?;

    Ok(output)
}
