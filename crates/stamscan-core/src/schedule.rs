//! Splits a video into chunks and runs them in parallel.
//!
//! The coordinator owns the only bookkeeping (chunk index to task handle) and
//! never blocks on a worker: it polls task completion with short sleeps so
//! progress reporting and cancellation stay responsive.

use std::collections::HashMap;
use std::future::Future;
use std::ops::Range;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use futures::future::{BoxFuture, FutureExt};
use prost::Message;
use stamscan_proto::proto::worker_message::Payload;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ScheduleConfig;
use crate::debug::Diagnostics;
use crate::error::{AnalysisError, AnalysisResult};
use crate::event::StaminaEvent;
use crate::video::SourceOpener;
use crate::worker::{run_chunk, take_message, Chunk};

/// One less than the CPU count, at least 1, at most `max_workers`.
pub fn worker_count(config: &ScheduleConfig) -> usize {
    num_cpus::get()
        .saturating_sub(1)
        .clamp(1, config.max_workers.max(1))
}

/// Contiguous `[start, end)` ranges covering `[0, total)`.
///
/// At most `workers` ranges, each at least `min_chunk` frames unless the whole
/// video is shorter than that.
pub fn partition(total: u32, workers: usize, min_chunk: u32) -> Vec<Range<u32>> {
    if total == 0 {
        return Vec::new();
    }
    let by_size = (total / min_chunk.max(1)).max(1) as usize;
    let n = workers.max(1).min(by_size) as u32;
    let base = total / n;
    let extra = total % n;

    let mut ranges = Vec::with_capacity(n as usize);
    let mut start = 0;
    for i in 0..n {
        let len = base + u32::from(i < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Runs one chunk to completion, publishing frames done on `progress`.
pub trait ChunkRunner: Send + Sync {
    fn run(&self, chunk: Chunk, progress: watch::Sender<u32>) -> BoxFuture<'static, Result<Vec<StaminaEvent>>>;
}

/// Runs each chunk in a child `worker` process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    executable: PathBuf,
}

impl ProcessRunner {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }

    /// Re-invoke the running binary as the worker.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(
            std::env::current_exe().context("failed to locate the current executable")?,
        ))
    }
}

impl ChunkRunner for ProcessRunner {
    fn run(&self, chunk: Chunk, progress: watch::Sender<u32>) -> BoxFuture<'static, Result<Vec<StaminaEvent>>> {
        let executable = self.executable.clone();
        async move {
            let request = chunk.to_request()?.encode_length_delimited_to_vec();

            let mut child = Command::new(&executable)
                .arg("worker")
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("failed to spawn worker {}", executable.display()))?;
            debug!(chunk = chunk.index, pid = ?child.id(), "worker process spawned");

            let mut stdin = child.stdin.take().context("worker stdin not available")?;
            stdin
                .write_all(&request)
                .await
                .context("failed to send chunk request")?;
            stdin.shutdown().await.context("failed to close worker stdin")?;
            drop(stdin);

            let mut stdout = child.stdout.take().context("worker stdout not available")?;
            let mut pending = Vec::new();
            let mut read_buf = [0u8; 8192];
            let mut outcome: Option<Result<Vec<StaminaEvent>>> = None;

            loop {
                while let Some(msg) = take_message(&mut pending)? {
                    match msg.payload {
                        Some(Payload::Progress(p)) => {
                            progress.send_replace(p.frames_done);
                        }
                        Some(Payload::Finished(f)) => {
                            progress.send_replace(f.frames_done);
                            outcome = Some(f.events.into_iter().map(StaminaEvent::try_from).collect());
                        }
                        Some(Payload::Failed(message)) => {
                            outcome = Some(Err(anyhow!("worker reported failure: {message}")));
                        }
                        None => warn!(chunk = chunk.index, "empty worker message"),
                    }
                }
                if outcome.is_some() {
                    break;
                }
                let n = stdout
                    .read(&mut read_buf)
                    .await
                    .context("failed to read worker output")?;
                if n == 0 {
                    break;
                }
                pending.extend_from_slice(&read_buf[..n]);
            }

            let status = child.wait().await.context("failed to wait for worker")?;
            debug!(chunk = chunk.index, %status, "worker process exited");
            match outcome {
                Some(result) => result,
                None => bail!("worker exited ({status}) without reporting a result"),
            }
        }
        .boxed()
    }
}

/// Runs chunks in-process on tokio's blocking pool, one frame source per chunk.
///
/// Aborting the task does not stop a chunk that is already running; its result is dropped.
#[derive(Clone)]
pub struct ThreadRunner {
    opener: Arc<dyn SourceOpener>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl ThreadRunner {
    pub fn new(opener: Arc<dyn SourceOpener>, diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            opener,
            diagnostics,
        }
    }
}

impl ChunkRunner for ThreadRunner {
    fn run(&self, chunk: Chunk, progress: watch::Sender<u32>) -> BoxFuture<'static, Result<Vec<StaminaEvent>>> {
        let opener = Arc::clone(&self.opener);
        let diagnostics = Arc::clone(&self.diagnostics);
        async move {
            tokio::task::spawn_blocking(move || {
                let mut source = opener.open()?;
                run_chunk(&chunk, source.as_mut(), diagnostics.as_ref(), &mut |done| {
                    progress.send_replace(done);
                    Ok(())
                })
            })
            .await
            .context("chunk thread panicked")?
        }
        .boxed()
    }
}

/// Requests that an in-flight [`run_chunks`] stop. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Abort pending chunk tasks at the coordinator's next poll. Worker processes are killed.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub frames_done: u32,
    pub total_frames: u32,
    pub chunks_done: usize,
    pub chunks_total: usize,
}

struct PendingChunk {
    handle: JoinHandle<Result<Vec<StaminaEvent>>>,
    progress: watch::Receiver<u32>,
    len: u32,
}

/// Run every chunk concurrently and merge their events in frame order.
///
/// Failed chunks are logged and contribute no events. `progress` is awaited at
/// most once per `progress_interval` and once more when all chunks are done.
pub async fn run_chunks<F, Fut>(
    chunks: Vec<Chunk>,
    runner: &dyn ChunkRunner,
    config: &ScheduleConfig,
    cancel: Option<&CancelHandle>,
    mut progress: F,
) -> AnalysisResult<Vec<StaminaEvent>>
where
    F: FnMut(ScanProgress) -> Fut,
    Fut: Future<Output = ()>,
{
    let chunks_total = chunks.len();
    let total_frames: u32 = chunks.iter().map(Chunk::len).sum();
    info!(chunks = chunks_total, total_frames, "dispatching chunks");

    let mut pending: HashMap<usize, PendingChunk> = HashMap::with_capacity(chunks_total);
    for chunk in chunks {
        let (tx, rx) = watch::channel(0);
        let index = chunk.index;
        let len = chunk.len();
        let handle = tokio::spawn(runner.run(chunk, tx));
        pending.insert(
            index,
            PendingChunk {
                handle,
                progress: rx,
                len,
            },
        );
    }

    let mut events = Vec::new();
    let mut completed_frames = 0u32;
    let mut chunks_done = 0usize;
    let mut last_report = Instant::now();

    let snapshot = |pending: &HashMap<usize, PendingChunk>, completed_frames: u32, chunks_done: usize| {
        let in_flight: u32 = pending
            .values()
            .map(|p| (*p.progress.borrow()).min(p.len))
            .sum();
        ScanProgress {
            frames_done: completed_frames + in_flight,
            total_frames,
            chunks_done,
            chunks_total,
        }
    };

    loop {
        if cancel.is_some_and(CancelHandle::is_cancelled) {
            warn!(pending = pending.len(), "analysis cancelled, aborting chunk tasks");
            for (_, p) in pending.drain() {
                p.handle.abort();
            }
            return Err(AnalysisError::Cancelled);
        }

        let finished: Vec<usize> = pending
            .iter()
            .filter(|(_, p)| p.handle.is_finished())
            .map(|(index, _)| *index)
            .collect();
        for index in finished {
            let Some(p) = pending.remove(&index) else {
                continue;
            };
            match p.handle.await {
                Ok(Ok(chunk_events)) => {
                    info!(chunk = index, events = chunk_events.len(), "chunk complete");
                    events.extend(chunk_events);
                }
                Ok(Err(e)) => {
                    error!(chunk = index, error = %format!("{e:#}"), "chunk failed, its events are lost");
                }
                Err(e) => {
                    error!(chunk = index, error = %e, "chunk task did not complete, its events are lost");
                }
            }
            completed_frames += p.len;
            chunks_done += 1;
        }

        if pending.is_empty() {
            break;
        }

        if last_report.elapsed() >= config.progress_interval {
            progress(snapshot(&pending, completed_frames, chunks_done)).await;
            last_report = Instant::now();
        }
        sleep(config.poll_interval).await;
    }

    progress(snapshot(&pending, completed_frames, chunks_done)).await;

    events.sort_by_key(|e| e.frame_index);
    info!(events = events.len(), "all chunks merged");
    Ok(events)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::config::{AnalyzerConfig, DEFAULT_COLOR_RANGE};
    use crate::event::Transition;
    use crate::rect::PixelRect;

    /// Emits one empty event at each chunk's start after a per-chunk delay.
    struct Scripted {
        delays: Vec<Duration>,
        fail: Option<usize>,
    }

    impl ChunkRunner for Scripted {
        fn run(&self, chunk: Chunk, progress: watch::Sender<u32>) -> BoxFuture<'static, Result<Vec<StaminaEvent>>> {
            let delay = self.delays.get(chunk.index).copied().unwrap_or_default();
            let fail = self.fail == Some(chunk.index);
            async move {
                sleep(delay).await;
                progress.send_replace(chunk.len());
                anyhow::ensure!(!fail, "scripted failure");
                Ok(vec![StaminaEvent {
                    frame_index: chunk.start_frame + 10,
                    transition: Transition::BecameEmpty,
                }])
            }
            .boxed()
        }
    }

    fn chunks(ranges: &[Range<u32>]) -> Vec<Chunk> {
        ranges
            .iter()
            .enumerate()
            .map(|(index, r)| Chunk {
                index,
                video_path: PathBuf::from("synthetic"),
                start_frame: r.start,
                end_frame: r.end,
                rect: PixelRect::new(0, 0, 10, 2),
                range: DEFAULT_COLOR_RANGE,
                debug_dir: None,
                debug_font: None,
                config: AnalyzerConfig::default(),
            })
            .collect()
    }

    fn fast() -> ScheduleConfig {
        ScheduleConfig {
            poll_interval: Duration::from_millis(5),
            progress_interval: Duration::from_millis(20),
            ..ScheduleConfig::default()
        }
    }

    #[test]
    fn worker_count_is_bounded() {
        let n = worker_count(&ScheduleConfig::default());
        assert!((1..=8).contains(&n));
        let one = worker_count(&ScheduleConfig {
            max_workers: 1,
            ..ScheduleConfig::default()
        });
        assert_eq!(one, 1);
    }

    #[test]
    fn partition_covers_without_overlap() {
        for (total, workers) in [(1000, 2), (10_007, 7), (30_000, 8), (1234, 3)] {
            let ranges = partition(total, workers, 500);
            assert!(ranges.len() <= workers);
            assert_eq!(ranges.first().unwrap().start, 0);
            assert_eq!(ranges.last().unwrap().end, total);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            assert!(ranges.iter().all(|r| r.len() >= 500), "{ranges:?}");
        }
    }

    #[test]
    fn short_videos_get_one_chunk() {
        assert_eq!(partition(300, 8, 500), vec![0..300]);
        assert_eq!(partition(1000, 8, 500), vec![0..500, 500..1000]);
        assert!(partition(0, 8, 500).is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn merge_follows_frame_order_not_completion_order() {
        let runner = Scripted {
            delays: vec![Duration::from_millis(120), Duration::from_millis(5)],
            fail: None,
        };
        let reports = Mutex::new(Vec::new());
        let events = run_chunks(chunks(&[0..500, 500..1000]), &runner, &fast(), None, |p| {
            reports.lock().unwrap().push(p);
            async {}
        })
        .await
        .unwrap();

        let frames: Vec<u32> = events.iter().map(|e| e.frame_index).collect();
        assert_eq!(frames, vec![10, 510]);

        let reports = reports.into_inner().unwrap();
        let last = reports.last().unwrap();
        assert_eq!(last.frames_done, 1000);
        assert_eq!(last.chunks_done, 2);
        assert!(reports.len() >= 2, "expected throttled updates plus the final one");
        assert!(logs_contain("all chunks merged"));
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_chunk_loses_only_its_events() {
        let runner = Scripted {
            delays: vec![Duration::ZERO; 3],
            fail: Some(1),
        };
        let events = run_chunks(chunks(&[0..500, 500..1000, 1000..1500]), &runner, &fast(), None, |_| async {})
            .await
            .unwrap();
        let frames: Vec<u32> = events.iter().map(|e| e.frame_index).collect();
        assert_eq!(frames, vec![10, 1010]);
        assert!(logs_contain("chunk failed"));
    }

    #[tokio::test]
    async fn cancel_aborts_pending_chunks() {
        let runner = Scripted {
            delays: vec![Duration::from_secs(30)],
            fail: None,
        };
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = run_chunks(chunks(&[0..500]), &runner, &fast(), Some(&cancel), |_| async {}).await;
        assert!(matches!(result, Err(AnalysisError::Cancelled)));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn no_chunks_yields_no_events() {
        let runner = Scripted {
            delays: Vec::new(),
            fail: None,
        };
        let events = run_chunks(Vec::new(), &runner, &fast(), None, |_| async {}).await.unwrap();
        assert!(events.is_empty());
    }
}
