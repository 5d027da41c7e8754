//! FFprobe-based duration inspection.

use crate::command::ToolCommand;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// ffprobe should answer within seconds even for long recordings.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Measure the container duration of a media file.
///
/// # Errors
///
/// Returns [`Error::FileNotFound`] for a missing file, a tool error if ffprobe
/// fails, or [`Error::ParseError`] if the output carries no usable duration.
pub async fn probe_duration(ffprobe: &Path, path: &Path) -> Result<Duration> {
    if !path.exists() {
        return Err(Error::file_not_found(path));
    }

    let output = ToolCommand::new(ffprobe.to_path_buf())
        .args(["-v", "error", "-print_format", "json", "-show_format"])
        .arg(path.to_string_lossy())
        .timeout(PROBE_TIMEOUT)
        .execute()
        .await?;

    parse_duration(&output.stdout)
}

fn parse_duration(json: &str) -> Result<Duration> {
    let parsed: FfprobeOutput = serde_json::from_str(json)?;

    let raw = parsed
        .format
        .duration
        .ok_or_else(|| Error::parse_error("ffprobe", "no format.duration in output"))?;

    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|e| Error::parse_error("ffprobe", format!("bad duration {raw:?}: {e}")))?;

    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::parse_error(
            "ffprobe",
            format!("duration out of range: {secs}"),
        ));
    }

    Ok(Duration::from_secs_f64(secs))
}
