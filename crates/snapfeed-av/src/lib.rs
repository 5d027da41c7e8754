//! # snapfeed-av
//!
//! Media inspection and transcoding for the snapfeed scheduler.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`Tools`], [`check_tools`]) -- locate ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for running external processes.
//! - **Duration inspection** ([`probe_duration`]) -- ffprobe container duration.
//! - **Actions** ([`actions`]) -- snapshot-to-segment rendering and recording
//!   re-encoding to a common segment profile.

pub mod actions;
pub mod command;
mod error;
pub mod probe;
pub mod tools;

pub use actions::{EncodeSettings, HwAccel};
pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use probe::probe_duration;
pub use tools::{check_tool, check_tools, get_tool_path, require_tool, ToolInfo, Tools};
