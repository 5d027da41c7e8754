mod types;

pub use types::*;

use crate::cleanup::StaleSegmentCleaner;
use crate::pipeline::DriverSettings;
use crate::transport::{RestartPolicy, TransportCommand};
use anyhow::{Context, Result};
use snapfeed_av::{EncodeSettings, HwAccel};
use std::path::Path;
use std::time::Duration;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./snapfeed.toml",
        "./config.toml",
        "~/.config/snapfeed/config.toml",
        "/etc/snapfeed/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if !config.budget.window_secs.is_finite() || config.budget.window_secs <= 0.0 {
        anyhow::bail!("budget.window_secs must be positive");
    }

    if !config.placeholder.duration_secs.is_finite() || config.placeholder.duration_secs <= 0.0 {
        anyhow::bail!("placeholder.duration_secs must be positive");
    }

    if config.scheduler.tick_millis == 0 {
        anyhow::bail!("scheduler.tick_millis cannot be 0");
    }

    if config.stream.url.trim().is_empty() {
        anyhow::bail!("stream.url is empty");
    }

    if !config.stream.args.iter().any(|a| a.contains("{playlist}")) {
        anyhow::bail!("stream.args must reference {{playlist}}");
    }

    if config.stream.restart_backoff_initial_secs > config.stream.restart_backoff_max_secs {
        anyhow::bail!("stream.restart_backoff_initial_secs exceeds restart_backoff_max_secs");
    }

    if let Some(ref hw) = config.tools.hw_accel {
        if !["none", "vaapi"].contains(&hw.as_str()) {
            anyhow::bail!("tools.hw_accel '{}' is not one of: none, vaapi", hw);
        }
    }

    if !config.watch.root.exists() {
        tracing::warn!("Watch root does not exist: {:?}", config.watch.root);
    }

    if !config.placeholder.path.exists() {
        tracing::warn!("Placeholder asset does not exist: {:?}", config.placeholder.path);
    }

    Ok(())
}

impl ToolsConfig {
    /// Encoder settings for generated segments.
    pub fn encode_settings(&self) -> EncodeSettings {
        let hw_accel = match self.hw_accel.as_deref() {
            Some("vaapi") => HwAccel::Vaapi {
                device: self.vaapi_device.clone(),
            },
            _ => HwAccel::None,
        };

        EncodeSettings {
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            hw_accel,
            timeout: Duration::from_secs(self.transcode_timeout_secs),
            ..EncodeSettings::default()
        }
    }
}

impl StreamConfig {
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            initial_backoff: Duration::from_secs(self.restart_backoff_initial_secs),
            max_backoff: Duration::from_secs(self.restart_backoff_max_secs),
            stable_after: Duration::from_secs(self.stable_after_secs),
            ..RestartPolicy::default()
        }
    }

    pub fn transport_command(&self, program: &Path) -> TransportCommand {
        TransportCommand::new(program, self.args.clone())
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }
}

impl Config {
    /// Driver timings drawn from `[pipeline]` and `[cleanup]`. Consumed
    /// artifacts are remembered for as long as a restart would rescan.
    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            poll_interval: Duration::from_secs(self.pipeline.poll_interval_secs),
            append_retries: self.pipeline.append_retries,
            append_retry_delay: Duration::from_millis(self.pipeline.append_retry_delay_millis),
            cleanup_interval: Duration::from_secs(self.cleanup.interval_secs),
            history_retention: self.watch.rescan_horizon(),
        }
    }

    pub fn stale_cleaner(&self) -> StaleSegmentCleaner {
        StaleSegmentCleaner::new(
            &self.paths.temp_dir,
            &self.cleanup.excluded_files,
            Duration::from_secs(self.cleanup.min_age_minutes * 60),
        )
    }
}
