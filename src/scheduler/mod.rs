//! Countdown and buffer rotation.
//!
//! Once warm-up is over, every tick charges the elapsed wall time against the
//! active buffer. When its playtime runs out the buffers switch; if both
//! buffers are empty at that moment a placeholder segment is queued first so
//! the transport never rotates into nothing.

mod state;

pub use state::{Phase, SchedulerSnapshot, SchedulerState, TickOutcome};

use crate::playlist::BufferPair;
use crate::transport::PlaylistSource;
use chrono::Local;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Filler content used when there is nothing else to play.
#[derive(Debug, Clone)]
pub struct Placeholder {
    pub path: PathBuf,
    pub duration_secs: f64,
}

struct Inner {
    buffers: BufferPair,
    state: SchedulerState,
}

/// Owns the buffer pair and its countdown; all mutation goes through one lock.
pub struct Scheduler {
    inner: Mutex<Inner>,
    placeholder: Placeholder,
    switch_log: Option<PathBuf>,
}

impl Scheduler {
    pub fn new(buffers: BufferPair, placeholder: Placeholder) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffers,
                state: SchedulerState::default(),
            }),
            placeholder,
            switch_log: None,
        }
    }

    /// Also record every switch in a plain-text journal.
    pub fn with_switch_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.switch_log = Some(path.into());
        self
    }

    pub fn initialize(&self) -> io::Result<()> {
        self.inner.lock().buffers.initialize()
    }

    /// Append a segment to the non-active buffer.
    ///
    /// `Ok(false)` means the segment was not ready and nothing changed.
    pub fn append(&self, segment: &Path, duration_secs: f64) -> io::Result<bool> {
        let mut inner = self.inner.lock();
        let added = inner.buffers.append(segment, duration_secs)?;
        if added {
            tracing::trace!("{}", inner.buffers.render_state());
        }
        Ok(added)
    }

    /// Promote the buffer holding the first item and start the countdown.
    pub fn finish_warmup(&self) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.processing_first_item() {
            return Ok(());
        }
        inner.buffers.switch()?;
        inner.state.phase = Phase::Running;
        tracing::info!(
            "Warm-up finished; playlist {} is active",
            inner.buffers.active().name()
        );
        Ok(())
    }

    /// Advance the countdown by `elapsed`.
    pub fn tick(&self, elapsed: Duration) -> io::Result<TickOutcome> {
        let mut inner = self.inner.lock();
        if inner.state.phase != Phase::Running {
            return Ok(TickOutcome::Suspended);
        }

        let remaining = inner.buffers.charge_active(elapsed.as_secs_f64());
        if remaining > 0.0 {
            return Ok(TickOutcome::Counting {
                remaining_secs: remaining,
            });
        }

        let mut injected = false;
        if !inner.state.placeholder_injected && inner.buffers.both_empty()? {
            if inner
                .buffers
                .append(&self.placeholder.path, self.placeholder.duration_secs)?
            {
                tracing::info!(
                    "Both playlists are empty; queued placeholder {}",
                    self.placeholder.path.display()
                );
                inner.state.placeholder_injected = true;
                injected = true;
            } else {
                tracing::warn!(
                    "Placeholder {} is unavailable; switching into an empty playlist",
                    self.placeholder.path.display()
                );
            }
        }

        let from = inner.buffers.active().name().to_string();
        inner.buffers.switch()?;
        inner.state.placeholder_injected = false;
        let new_active = inner.buffers.active_index();

        if let Some(ref log) = self.switch_log {
            let to = inner.buffers.active().name().to_string();
            if let Err(e) = append_switch_log(log, &from, &to) {
                tracing::warn!("Failed to write switch log {}: {}", log.display(), e);
            }
        }

        Ok(TickOutcome::Switched {
            new_active,
            placeholder_injected: injected,
        })
    }

    pub fn stop(&self) {
        self.inner.lock().state.phase = Phase::Stopped;
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().state.phase
    }

    pub fn active_index(&self) -> usize {
        self.inner.lock().buffers.active_index()
    }

    pub fn active_playlist(&self) -> PathBuf {
        self.inner.lock().buffers.active().path().to_path_buf()
    }

    pub fn pending_secs(&self, index: usize) -> f64 {
        self.inner.lock().buffers.buffer(index).pending_secs()
    }

    pub fn playlist_paths(&self) -> [PathBuf; 2] {
        self.inner.lock().buffers.paths()
    }

    pub fn referenced_segments(&self) -> io::Result<HashSet<String>> {
        self.inner.lock().buffers.referenced_segments()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let inner = self.inner.lock();
        SchedulerSnapshot {
            phase: inner.state.phase,
            active_index: inner.buffers.active_index(),
            pending_secs: [
                inner.buffers.buffer(0).pending_secs(),
                inner.buffers.buffer(1).pending_secs(),
            ],
            placeholder_injected: inner.state.placeholder_injected,
        }
    }

    /// Tick every `period` until cancelled, charging measured wall time.
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        tracing::info!("Playlist scheduler started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let now = Instant::now();
            let elapsed = now.duration_since(last);
            last = now;

            match self.tick(elapsed) {
                Ok(TickOutcome::Switched { .. }) => {
                    tracing::debug!("Scheduler state after switch: {:?}", self.snapshot());
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Scheduler tick failed: {}", e),
            }
        }

        self.stop();
        tracing::info!("Playlist scheduler stopped");
    }
}

impl PlaylistSource for Scheduler {
    fn active_playlist(&self) -> PathBuf {
        Scheduler::active_playlist(self)
    }
}

fn append_switch_log(path: &Path, from: &str, to: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        file,
        "Time: {}\n--- Switching from playlist {} to playlist {} ---\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        from,
        to
    )
}
