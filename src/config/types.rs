use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub placeholder: PlaceholderConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Where artifacts are discovered.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Root of the camera tree (`<root>/Snapshots/<YYYY>/<MM-Month>/<DD>/...`).
    #[serde(default = "default_watch_root")]
    pub root: PathBuf,

    /// Seconds a file must stay unchanged before it is queued.
    #[serde(default = "default_settle_time")]
    pub settle_time_secs: u64,

    /// How far back the startup rescan looks.
    #[serde(default = "default_rescan_horizon")]
    pub rescan_horizon_minutes: u64,
}

fn default_true() -> bool {
    true
}

fn default_watch_root() -> PathBuf {
    PathBuf::from("/srv/cameras")
}

fn default_settle_time() -> u64 {
    2
}

fn default_rescan_horizon() -> u64 {
    30
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: default_watch_root(),
            settle_time_secs: default_settle_time(),
            rescan_horizon_minutes: default_rescan_horizon(),
        }
    }
}

impl WatchConfig {
    pub fn settle_time(&self) -> Duration {
        Duration::from_secs(self.settle_time_secs)
    }

    pub fn rescan_horizon(&self) -> Duration {
        Duration::from_secs(self.rescan_horizon_minutes * 60)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Working directory for generated segments.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Directory holding the two playlist files.
    #[serde(default = "default_temp_dir")]
    pub playlist_dir: PathBuf,
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/snapfeed")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            playlist_dir: default_temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    /// Window length W: the most playtime one snapshot can receive.
    #[serde(default = "default_window")]
    pub window_secs: f64,
}

fn default_window() -> f64 {
    60.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaceholderConfig {
    /// Pre-encoded filler segment.
    #[serde(default = "default_placeholder_path")]
    pub path: PathBuf,

    #[serde(default = "default_window")]
    pub duration_secs: f64,
}

fn default_placeholder_path() -> PathBuf {
    PathBuf::from("/tmp/snapfeed/placeholder.mp4")
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            path: default_placeholder_path(),
            duration_secs: default_window(),
        }
    }
}

/// External transport process settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Destination the feed is published to.
    #[serde(default = "default_stream_url")]
    pub url: String,

    /// Argument template; `{playlist}` and `{destination}` are substituted.
    #[serde(default = "default_stream_args")]
    pub args: Vec<String>,

    /// Transport diagnostics are written here.
    #[serde(default = "default_stream_log")]
    pub log_path: PathBuf,

    #[serde(default = "default_terminate_timeout")]
    pub terminate_timeout_secs: u64,

    #[serde(default = "default_backoff_initial")]
    pub restart_backoff_initial_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub restart_backoff_max_secs: u64,

    /// A process that stays up this long resets the backoff.
    #[serde(default = "default_stable_after")]
    pub stable_after_secs: u64,
}

fn default_stream_url() -> String {
    "rtsp://127.0.0.1:8554/feed".to_string()
}

pub fn default_stream_args() -> Vec<String> {
    [
        "-re",
        "-f",
        "concat",
        "-safe",
        "0",
        "-i",
        "{playlist}",
        "-c",
        "copy",
        "-rtsp_transport",
        "tcp",
        "-f",
        "rtsp",
        "{destination}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_stream_log() -> PathBuf {
    PathBuf::from("ffmpeg_streaming_log.txt")
}

fn default_terminate_timeout() -> u64 {
    10
}

fn default_backoff_initial() -> u64 {
    1
}

fn default_backoff_max() -> u64 {
    60
}

fn default_stable_after() -> u64 {
    30
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            args: default_stream_args(),
            log_path: default_stream_log(),
            terminate_timeout_secs: default_terminate_timeout(),
            restart_backoff_initial_secs: default_backoff_initial(),
            restart_backoff_max_secs: default_backoff_max(),
            stable_after_secs: default_stable_after(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,

    /// Optional journal of playlist switches.
    #[serde(default)]
    pub switch_log: Option<PathBuf>,
}

fn default_tick_millis() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            switch_log: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Pause between queue drains.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Extra attempts for a segment that is not readable yet.
    #[serde(default = "default_append_retries")]
    pub append_retries: u32,

    #[serde(default = "default_append_retry_delay")]
    pub append_retry_delay_millis: u64,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_append_retries() -> u32 {
    3
}

fn default_append_retry_delay() -> u64 {
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            append_retries: default_append_retries(),
            append_retry_delay_millis: default_append_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanupConfig {
    /// File names in the temp dir that are never deleted.
    #[serde(default)]
    pub excluded_files: Vec<String>,

    #[serde(default = "default_min_age")]
    pub min_age_minutes: u64,

    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
}

fn default_min_age() -> u64 {
    120
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            excluded_files: Vec::new(),
            min_age_minutes: default_min_age(),
            interval_secs: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// `none` or `vaapi`.
    #[serde(default)]
    pub hw_accel: Option<String>,

    #[serde(default = "default_vaapi_device")]
    pub vaapi_device: PathBuf,

    #[serde(default = "default_transcode_timeout")]
    pub transcode_timeout_secs: u64,

    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_vaapi_device() -> PathBuf {
    PathBuf::from("/dev/dri/renderD128")
}

fn default_transcode_timeout() -> u64 {
    600
}

fn default_frame_rate() -> u32 {
    24
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            hw_accel: None,
            vaapi_device: default_vaapi_device(),
            transcode_timeout_secs: default_transcode_timeout(),
            frame_rate: default_frame_rate(),
            width: default_width(),
            height: default_height(),
        }
    }
}
