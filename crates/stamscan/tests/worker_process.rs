//! The coordinator driving real `worker` child processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use stamscan_core::config::{AnalyzerConfig, ScheduleConfig, DEFAULT_COLOR_RANGE};
use stamscan_core::rect::PixelRect;
use stamscan_core::schedule::{run_chunks, ChunkRunner, ProcessRunner};
use stamscan_core::worker::Chunk;
use tokio::sync::watch;
use tracing_test::traced_test;

fn chunk(video: &Path) -> Chunk {
    Chunk {
        index: 0,
        video_path: video.to_path_buf(),
        start_frame: 0,
        end_frame: 500,
        rect: PixelRect::new(537, 612, 205, 13),
        range: DEFAULT_COLOR_RANGE,
        debug_dir: None,
        debug_font: None,
        config: AnalyzerConfig::default(),
    }
}

fn fast() -> ScheduleConfig {
    ScheduleConfig {
        poll_interval: Duration::from_millis(5),
        ..ScheduleConfig::default()
    }
}

fn stamscan() -> ProcessRunner {
    ProcessRunner::new(PathBuf::from(env!("CARGO_BIN_EXE_stamscan")))
}

#[tokio::test]
async fn worker_reports_missing_video() {
    let (tx, _rx) = watch::channel(0);
    let err = stamscan()
        .run(chunk(Path::new("/nonexistent/clip.mp4")), tx)
        .await
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("worker reported failure"), "{message}");
    assert!(message.contains("does not exist"), "{message}");
}

#[tokio::test]
#[traced_test]
async fn failed_worker_contributes_no_events() {
    let runner = stamscan();
    let chunks = vec![chunk(Path::new("/nonexistent/clip.mp4"))];
    let events = run_chunks(chunks, &runner, &fast(), None, |_| async {})
        .await
        .unwrap();
    assert!(events.is_empty());
    assert!(logs_contain("chunk failed"));
}

/// A stand-in worker that swallows the request, writes half a message and exits.
#[cfg(unix)]
fn silent_worker(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(format!("stamscan-silent-worker-{}", std::process::id()));
    std::fs::write(&path, "#!/bin/sh\ncat > /dev/null\nprintf '\\005\\010'\nexit 3\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn worker_exiting_without_a_result_fails_the_chunk() {
    let script = silent_worker(&std::env::temp_dir());
    let runner = ProcessRunner::new(script.clone());

    let (tx, rx) = watch::channel(0);
    let err = runner
        .run(chunk(Path::new("/nonexistent/clip.mp4")), tx)
        .await
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("without reporting a result"), "{message}");
    assert_eq!(*rx.borrow(), 0);

    let events = run_chunks(
        vec![chunk(Path::new("/nonexistent/clip.mp4"))],
        &runner,
        &fast(),
        None,
        |_| async {},
    )
    .await
    .unwrap();
    assert!(events.is_empty());

    std::fs::remove_file(&script).unwrap();
}
