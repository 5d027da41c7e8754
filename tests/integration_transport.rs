//! Transport supervisor integration tests
//!
//! Uses `sh` as a stand-in transport process so restarts can be observed
//! without ffmpeg.

mod common;

use common::FeedHarness;
use snapfeed::transport::{RestartPolicy, SupervisorState, TransportCommand, TransportSupervisor};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Appends the playlist it was started with to `record`, then exits.
fn recording_command(record: &Path) -> TransportCommand {
    TransportCommand::new(
        "sh",
        vec![
            "-c".into(),
            format!("echo \"$0\" >> '{}'; exit 1", record.display()),
            "{playlist}".into(),
        ],
    )
}

fn fast_policy() -> RestartPolicy {
    RestartPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        stable_after: Duration::from_secs(60),
    }
}

#[tokio::test]
async fn restarts_follow_the_active_playlist() {
    let h = FeedHarness::new();
    let record = h.work.path().join("started.txt");
    let cancel = CancellationToken::new();

    let supervisor = TransportSupervisor::new(
        recording_command(&record),
        h.scheduler.clone(),
        "rtsp://127.0.0.1:8554/test",
        h.work.path().join("stream.log"),
    )
    .with_policy(fast_policy());
    let (handle, task) = supervisor.spawn(cancel.clone()).unwrap();

    h.scheduler.finish_warmup().unwrap();
    let list_1 = h.playlist(0).display().to_string();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let seen = std::fs::read_to_string(&record).unwrap_or_default();
            if seen.lines().any(|l| l == list_1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(handle.restart_count() >= 1);
    cancel.cancel();
    task.await.unwrap();
    assert_eq!(handle.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn exit_output_lands_in_the_transport_log() {
    let h = FeedHarness::new();
    let log = h.work.path().join("stream.log");
    let cancel = CancellationToken::new();

    let supervisor = TransportSupervisor::new(
        TransportCommand::new(
            "sh",
            vec![
                "-c".into(),
                "echo \"cannot reach $0\" >&2; exit 2".into(),
                "{destination}".into(),
            ],
        ),
        h.scheduler.clone(),
        "rtsp://unreachable/feed",
        &log,
    )
    .with_policy(fast_policy());
    let (handle, task) = supervisor.spawn(cancel.clone()).unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while handle.restart_count() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    task.await.unwrap();

    let tail = snapfeed::transport::tail_log(&log, 5).unwrap();
    assert!(tail.iter().any(|l| l == "cannot reach rtsp://unreachable/feed"));
}
