//! ffmpeg actions that turn raw artifacts into playable segments.
//!
//! Every segment is encoded to the same H.264/AAC profile so the concat
//! demuxer reading the playlists can stream-copy across file boundaries.

mod reencode;
mod snapshot;

pub use reencode::{reencode_recording, recording_args};
pub use snapshot::{snapshot_args, snapshot_to_segment};

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hardware acceleration used for encoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HwAccel {
    /// Software libx264.
    #[default]
    None,
    /// VAAPI through the given render node.
    Vaapi { device: PathBuf },
}

/// Output profile shared by every generated segment.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
    pub hw_accel: HwAccel,
    /// Upper bound for a single ffmpeg run.
    pub timeout: Duration,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 24,
            video_bitrate: "2M".to_string(),
            audio_bitrate: "32k".to_string(),
            audio_sample_rate: 16000,
            hw_accel: HwAccel::None,
            timeout: Duration::from_secs(600),
        }
    }
}

impl EncodeSettings {
    /// Keyframe every two seconds.
    fn gop(&self) -> u32 {
        self.frame_rate * 2
    }

    /// Arguments placed before the first `-i`.
    fn device_args(&self) -> Vec<String> {
        match &self.hw_accel {
            HwAccel::None => Vec::new(),
            HwAccel::Vaapi { device } => vec![
                "-vaapi_device".to_string(),
                device.to_string_lossy().to_string(),
            ],
        }
    }

    /// Video filter and codec arguments.
    fn video_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match &self.hw_accel {
            HwAccel::None => {
                args.push("-vf".to_string());
                args.push(format!(
                    "scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2,format=yuv420p",
                    self.width, self.height, self.width, self.height
                ));
                args.extend(["-c:v", "libx264", "-preset", "veryfast"].map(String::from));
            }
            HwAccel::Vaapi { .. } => {
                args.push("-vf".to_string());
                args.push(format!(
                    "format=nv12,hwupload,scale_vaapi=w={}:h={}",
                    self.width, self.height
                ));
                args.extend(["-c:v", "h264_vaapi"].map(String::from));
            }
        }
        args.extend(["-profile:v", "high", "-level", "40"].map(String::from));
        args.push("-r".to_string());
        args.push(self.frame_rate.to_string());
        args.push("-g".to_string());
        args.push(self.gop().to_string());
        args.extend(["-bf", "0", "-b:v"].map(String::from));
        args.push(self.video_bitrate.clone());
        args
    }

    /// Mono AAC audio arguments.
    fn audio_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            "-ar".to_string(),
            self.audio_sample_rate.to_string(),
            "-ac".to_string(),
            "1".to_string(),
        ]
    }
}

/// Where the segment for `source` is written: `<out_dir>/<stem>.mp4`.
pub fn segment_path_for(source: &Path, out_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "segment".to_string());
    out_dir.join(format!("{stem}.mp4"))
}
