use super::TransportError;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

/// Program plus an argument template.
///
/// `{playlist}` and `{destination}` inside any argument are replaced when the
/// process is launched.
#[derive(Debug, Clone)]
pub struct TransportCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl TransportCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn render(&self, playlist: &Path, destination: &str) -> Vec<String> {
        let playlist = playlist.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{playlist}", &playlist)
                    .replace("{destination}", destination)
            })
            .collect()
    }
}

/// A running transport process.
#[derive(Debug)]
pub struct TransportProcess {
    child: Child,
    playlist: PathBuf,
    started: Instant,
}

impl TransportProcess {
    /// Launch against `playlist`, sending stdout and stderr to `log_path`.
    pub fn start(
        command: &TransportCommand,
        playlist: &Path,
        destination: &str,
        log_path: &Path,
    ) -> Result<Self, TransportError> {
        if !playlist.is_file() {
            return Err(TransportError::PlaylistMissing(playlist.to_path_buf()));
        }

        let log_err = |source| TransportError::Log {
            path: log_path.to_path_buf(),
            source,
        };
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(log_err)?;
        let log_clone = log.try_clone().map_err(log_err)?;

        let args = command.render(playlist, destination);
        tracing::debug!(
            "Launching {} {}",
            command.program().display(),
            args.join(" ")
        );

        let child = Command::new(command.program())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_clone))
            .stderr(Stdio::from(log))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: command.program().display().to_string(),
                source,
            })?;

        tracing::info!(
            "Transport process started (pid {:?}) reading {}",
            child.id(),
            playlist.display()
        );

        Ok(Self {
            child,
            playlist: playlist.to_path_buf(),
            started: Instant::now(),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn playlist(&self) -> &Path {
        &self.playlist
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Non-blocking liveness check; `Some` once the process has exited.
    pub fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Ask the process to stop, killing it if it is still around after `timeout`.
    pub async fn terminate(&mut self, timeout: Duration) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to query transport process: {}", e),
        }

        self.request_stop();

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!("Transport process stopped ({})", status);
                Some(status)
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed waiting for transport process: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "Transport process did not stop within {:?}; killing it",
                    timeout
                );
                if let Err(e) = self.child.kill().await {
                    tracing::warn!("Failed to kill transport process: {}", e);
                }
                self.child.try_wait().ok().flatten()
            }
        }
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!("Failed to send SIGTERM to transport process {}: {}", pid, e);
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::warn!("Failed to stop transport process: {}", e);
        }
    }
}

/// Last `lines` lines of the transport log, for exit diagnostics.
pub fn tail_log(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sh(script: &str) -> TransportCommand {
        TransportCommand::new("sh", vec!["-c".into(), script.into()])
    }

    #[test]
    fn render_substitutes_placeholders() {
        let cmd = TransportCommand::new(
            "ffmpeg",
            vec![
                "-i".into(),
                "{playlist}".into(),
                "-f".into(),
                "rtsp".into(),
                "{destination}".into(),
            ],
        );
        let args = cmd.render(Path::new("/tmp/list_1.txt"), "rtsp://host/feed");
        assert_eq!(
            args,
            vec!["-i", "/tmp/list_1.txt", "-f", "rtsp", "rtsp://host/feed"]
        );
    }

    #[test]
    fn missing_playlist_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = TransportProcess::start(
            &sh("true"),
            &dir.path().join("list_1.txt"),
            "dest",
            &dir.path().join("stream.log"),
        )
        .unwrap_err();
        assert_matches!(err, TransportError::PlaylistMissing(_));
    }

    #[tokio::test]
    async fn output_goes_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("list_1.txt");
        fs::write(&playlist, "ffconcat version 1.0\n").unwrap();
        let log = dir.path().join("stream.log");

        let mut process =
            TransportProcess::start(&sh("echo one; echo two >&2; exit 4"), &playlist, "d", &log)
                .unwrap();
        let status = process.wait().await.unwrap();
        assert_eq!(status.code(), Some(4));

        let tail = tail_log(&log, 10).unwrap();
        assert!(tail.contains(&"one".to_string()));
        assert!(tail.contains(&"two".to_string()));
    }

    #[tokio::test]
    async fn terminate_stops_long_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("list_1.txt");
        fs::write(&playlist, "ffconcat version 1.0\n").unwrap();

        let mut process =
            TransportProcess::start(&sh("sleep 30"), &playlist, "d", &dir.path().join("log"))
                .unwrap();
        assert!(process.poll().unwrap().is_none());

        let status = process.terminate(Duration::from_secs(5)).await;
        assert!(status.is_some());
        assert!(process.poll().unwrap().is_some());
    }

    #[test]
    fn tail_returns_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        fs::write(&log, "a\nb\nc\nd\n").unwrap();
        assert_eq!(tail_log(&log, 2).unwrap(), vec!["c", "d"]);
        assert_eq!(tail_log(&log, 10).unwrap().len(), 4);
    }
}
