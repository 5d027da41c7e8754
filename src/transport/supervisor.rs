use super::process::{tail_log, TransportCommand, TransportProcess};
use super::{PlaylistSource, TransportError};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const LOG_TAIL_LINES: usize = 20;

/// Delay before relaunching after consecutive failures.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// A process that stayed up this long resets the failure count.
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            stable_after: Duration::from_secs(30),
        }
    }
}

impl RestartPolicy {
    /// Backoff for the given consecutive failure (0-indexed).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    /// Last process exited with this code (`None` when killed by a signal).
    Exited(Option<i32>),
    Restarting,
    Stopped,
}

struct Shared {
    state: Mutex<SupervisorState>,
    restarts: AtomicU32,
    /// Set by an accepted request; a wake-up without it is stale.
    restart_pending: AtomicBool,
    restart_requested: Notify,
}

impl Shared {
    fn set(&self, state: SupervisorState) {
        *self.state.lock() = state;
    }
}

/// Caller-side view of a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<Shared>,
}

impl SupervisorHandle {
    pub fn state(&self) -> SupervisorState {
        *self.shared.state.lock()
    }

    pub fn is_alive(&self) -> bool {
        matches!(
            self.state(),
            SupervisorState::Running | SupervisorState::Starting
        )
    }

    /// Terminate the current process and start a new one on the active playlist.
    ///
    /// Only honoured while a process is running; a relaunch already under
    /// way picks up the active playlist by itself. Returns whether the
    /// request was accepted.
    pub fn request_restart(&self) -> bool {
        let state = self.state();
        if state != SupervisorState::Running {
            tracing::debug!("Ignoring restart request while {:?}", state);
            return false;
        }
        self.shared.restart_pending.store(true, Ordering::SeqCst);
        self.shared.restart_requested.notify_one();
        true
    }

    /// Number of relaunches since the first start.
    pub fn restart_count(&self) -> u32 {
        self.shared.restarts.load(Ordering::Relaxed)
    }
}

enum Event {
    Shutdown,
    RestartRequested,
    Exited(std::io::Result<std::process::ExitStatus>),
}

/// Keeps one transport process alive until cancelled.
pub struct TransportSupervisor {
    command: TransportCommand,
    source: Arc<dyn PlaylistSource>,
    destination: String,
    log_path: PathBuf,
    policy: RestartPolicy,
    terminate_timeout: Duration,
}

impl TransportSupervisor {
    pub fn new(
        command: TransportCommand,
        source: Arc<dyn PlaylistSource>,
        destination: impl Into<String>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command,
            source,
            destination: destination.into(),
            log_path: log_path.into(),
            policy: RestartPolicy::default(),
            terminate_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    fn start_process(&self) -> Result<TransportProcess, TransportError> {
        let playlist = self.source.active_playlist();
        TransportProcess::start(&self.command, &playlist, &self.destination, &self.log_path)
    }

    /// Start the first process and hand supervision to a background task.
    ///
    /// Failing to start the first process is returned to the caller; later
    /// failures are retried with backoff.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> Result<(SupervisorHandle, JoinHandle<()>), TransportError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SupervisorState::Starting),
            restarts: AtomicU32::new(0),
            restart_pending: AtomicBool::new(false),
            restart_requested: Notify::new(),
        });

        let first = self.start_process()?;
        shared.set(SupervisorState::Running);

        let handle = SupervisorHandle {
            shared: shared.clone(),
        };
        let task = tokio::spawn(self.supervise(first, shared, cancel));
        Ok((handle, task))
    }

    async fn supervise(
        self,
        mut process: TransportProcess,
        shared: Arc<Shared>,
        cancel: CancellationToken,
    ) {
        let mut failures: u32 = 0;

        loop {
            shared.set(SupervisorState::Running);

            let event = tokio::select! {
                _ = cancel.cancelled() => Event::Shutdown,
                _ = shared.restart_requested.notified() => {
                    if !shared.restart_pending.swap(false, Ordering::SeqCst) {
                        continue;
                    }
                    Event::RestartRequested
                }
                status = process.wait() => Event::Exited(status),
            };

            let delay = match event {
                Event::Shutdown => {
                    process.terminate(self.terminate_timeout).await;
                    break;
                }
                Event::RestartRequested => {
                    tracing::info!("Restart of transport process requested");
                    process.terminate(self.terminate_timeout).await;
                    failures = 0;
                    Duration::ZERO
                }
                Event::Exited(status) => {
                    let code = match status {
                        Ok(status) => status.code(),
                        Err(e) => {
                            tracing::error!("Failed waiting for transport process: {}", e);
                            None
                        }
                    };
                    shared.set(SupervisorState::Exited(code));
                    self.report_exit(code);

                    if process.uptime() >= self.policy.stable_after {
                        failures = 0;
                    }
                    let delay = self.policy.backoff_delay(failures);
                    failures = failures.saturating_add(1);
                    delay
                }
            };

            match self.relaunch(&shared, &cancel, &mut failures, delay).await {
                Some(next) => process = next,
                None => break,
            }
        }

        shared.set(SupervisorState::Stopped);
        tracing::info!("Transport supervisor stopped");
    }

    /// Keep trying to start a process; `None` if cancelled first.
    async fn relaunch(
        &self,
        shared: &Shared,
        cancel: &CancellationToken,
        failures: &mut u32,
        mut delay: Duration,
    ) -> Option<TransportProcess> {
        loop {
            shared.set(SupervisorState::Restarting);
            if !delay.is_zero() {
                tracing::info!("Restarting transport process in {:?}", delay);
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return None;
            }

            shared.set(SupervisorState::Starting);
            match self.start_process() {
                Ok(process) => {
                    shared.restart_pending.store(false, Ordering::SeqCst);
                    shared.restarts.fetch_add(1, Ordering::Relaxed);
                    return Some(process);
                }
                Err(e) => {
                    tracing::error!("Failed to restart transport process: {}", e);
                    delay = self.policy.backoff_delay(*failures);
                    *failures = failures.saturating_add(1);
                }
            }
        }
    }

    fn report_exit(&self, code: Option<i32>) {
        match code {
            Some(code) => tracing::warn!("Transport process exited with code {}", code),
            None => tracing::warn!("Transport process terminated by signal"),
        }
        match tail_log(&self.log_path, LOG_TAIL_LINES) {
            Ok(lines) if !lines.is_empty() => {
                tracing::warn!(
                    "Last transport log lines from {}:\n{}",
                    self.log_path.display(),
                    lines.join("\n")
                );
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(
                "Could not read transport log {}: {}",
                self.log_path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::path::Path;

    struct FixedPlaylist(PathBuf);

    impl PlaylistSource for FixedPlaylist {
        fn active_playlist(&self) -> PathBuf {
            self.0.clone()
        }
    }

    fn supervisor(dir: &Path, script: &str) -> TransportSupervisor {
        let playlist = dir.join("list_1.txt");
        std::fs::write(&playlist, "ffconcat version 1.0\n").unwrap();
        TransportSupervisor::new(
            TransportCommand::new("sh", vec!["-c".into(), script.into()]),
            Arc::new(FixedPlaylist(playlist)),
            "rtsp://127.0.0.1/feed",
            dir.join("stream.log"),
        )
        .with_policy(RestartPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            backoff_multiplier: 2.0,
            stable_after: Duration::from_secs(60),
        })
        .with_terminate_timeout(Duration::from_secs(5))
    }

    async fn wait_for(handle: &SupervisorHandle, restarts: u32) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while handle.restart_count() < restarts {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RestartPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            ..RestartPolicy::default()
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn missing_playlist_fails_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let sup = TransportSupervisor::new(
            TransportCommand::new("sh", vec!["-c".into(), "true".into()]),
            Arc::new(FixedPlaylist(dir.path().join("absent.txt"))),
            "dest",
            dir.path().join("stream.log"),
        );
        let err = sup.spawn(CancellationToken::new()).err().unwrap();
        assert_matches!(err, TransportError::PlaylistMissing(_));
    }

    #[tokio::test]
    async fn crashed_process_is_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let (handle, task) = supervisor(dir.path(), "echo failing; exit 3")
            .spawn(cancel.clone())
            .unwrap();

        wait_for(&handle, 2).await;

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(handle.state(), SupervisorState::Stopped);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn requested_restart_replaces_process() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let (handle, task) = supervisor(dir.path(), "sleep 30")
            .spawn(cancel.clone())
            .unwrap();
        assert!(handle.is_alive());

        assert!(handle.request_restart());
        wait_for(&handle, 1).await;
        assert!(handle.is_alive());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(handle.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn restart_request_during_backoff_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("crashed-once");
        let script = format!(
            "if [ -e '{m}' ]; then sleep 30; else touch '{m}'; exit 1; fi",
            m = marker.display()
        );
        let cancel = CancellationToken::new();
        let (handle, task) = supervisor(dir.path(), &script)
            .with_policy(RestartPolicy {
                initial_backoff: Duration::from_millis(300),
                max_backoff: Duration::from_millis(300),
                backoff_multiplier: 1.0,
                stable_after: Duration::from_secs(60),
            })
            .spawn(cancel.clone())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while handle.state() == SupervisorState::Running {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!handle.request_restart());

        wait_for(&handle, 1).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.restart_count(), 1);
        assert_eq!(handle.state(), SupervisorState::Running);

        cancel.cancel();
        task.await.unwrap();
    }
}
