//! External transport process management.
//!
//! The transport process reads the active playlist and publishes the live
//! feed. [`TransportSupervisor`] keeps exactly one such process alive and
//! relaunches it against whichever playlist is active at the time.

mod process;
mod supervisor;

pub use process::{tail_log, TransportCommand, TransportProcess};
pub use supervisor::{RestartPolicy, SupervisorHandle, SupervisorState, TransportSupervisor};

use std::path::PathBuf;
use thiserror::Error;

/// Something that can name the playlist the transport should read.
pub trait PlaylistSource: Send + Sync {
    fn active_playlist(&self) -> PathBuf;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("playlist not found: {}", .0.display())]
    PlaylistMissing(PathBuf),

    #[error("failed to open transport log {}: {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
