//! Persistence lifecycle orchestration.
//!
//! The [`PersistenceSupervisor`] wires the sample buffer, the segment writer
//! and the flush scheduler together behind three operations:
//!
//! - [`ingest`](PersistenceSupervisor::ingest) — enqueue one sample and let
//!   the scheduler decide whether a flush is due. Never touches the disk on
//!   the caller's context (except in `immediate` mode, which by definition
//!   completes the write before accepting the next sample).
//! - [`flush_now`](PersistenceSupervisor::flush_now) — synchronously drain
//!   everything pending to the active segment and commit it. Idempotent;
//!   retried a bounded number of times on persistence errors.
//! - [`shutdown`](PersistenceSupervisor::shutdown) — stop accepting samples,
//!   run the final drain, close the active segment and merge the session.
//!   Safe to call from an interrupt path and idempotent if called twice.
//!
//! All disk I/O happens on a dedicated writer task that owns the
//! [`SegmentWriter`]; the acquisition context only ever enqueues. Because a
//! single task performs every write there is never more than one writer per
//! segment, and the scheduler's coalescing flags keep per-sample triggers
//! from piling up commands faster than the task can serve them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::buffer::{SampleBuffer, SampleReceiver, SampleSender};
use crate::config::Settings;
use crate::error::{AppResult, LogError};
use crate::flush::{FlushMode, FlushScheduler, DEFAULT_FLUSH_THRESHOLD};
use crate::merge::{self, MergeReport};
use crate::sample::Sample;
use crate::segment::{PersistenceState, SegmentWriter, DEFAULT_SEGMENT_ROW_LIMIT};

/// Attempts before a failing flush is declared fatal.
pub const FLUSH_RETRY_LIMIT: u32 = 3;

/// Samples written per drain iteration.
const WRITE_BATCH: usize = 1024;

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const DRAINING: u8 = 2;

/// Tunables for one persistence session, usually taken from [`Settings`].
#[derive(Clone, Debug)]
pub struct PersistenceOptions {
    pub segment_row_limit: u64,
    pub flush_mode: FlushMode,
    pub flush_threshold: usize,
    pub flush_interval: Option<Duration>,
    /// `None` = unbounded buffer; `Some(n)` blocks the producer at `n`.
    pub buffer_capacity: Option<usize>,
    pub merge_on_shutdown: bool,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            segment_row_limit: DEFAULT_SEGMENT_ROW_LIMIT,
            flush_mode: FlushMode::default(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            flush_interval: None,
            buffer_capacity: None,
            merge_on_shutdown: true,
        }
    }
}

impl PersistenceOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            segment_row_limit: settings.storage.segment_row_limit,
            flush_mode: settings.flush.mode,
            flush_threshold: settings.flush.threshold,
            flush_interval: settings.flush.interval,
            buffer_capacity: settings.storage.buffer_capacity,
            merge_on_shutdown: settings.storage.merge_on_shutdown,
        }
    }
}

/// Final accounting returned by [`PersistenceSupervisor::shutdown`].
#[derive(Clone, Debug)]
pub struct SessionReport {
    /// Write-side counters at close.
    pub state: PersistenceState,
    /// Merge outcome, `None` when merging was disabled in configuration.
    pub merge: Option<MergeReport>,
}

enum WriterCommand {
    /// Explicit flush with a completion ack.
    Flush { ack: oneshot::Sender<AppResult<()>> },
    /// Scheduler-originated flush; coalesced, no ack.
    ScheduledFlush,
    /// Final drain, close and report.
    Shutdown {
        ack: oneshot::Sender<AppResult<PersistenceState>>,
    },
}

/// Owns the segment writer and performs every disk write.
struct WriterTask {
    samples: SampleReceiver,
    commands: mpsc::UnboundedReceiver<WriterCommand>,
    writer: SegmentWriter,
    scheduler: Arc<FlushScheduler>,
    interval: Option<Duration>,
    /// Samples dequeued but not yet durably appended after a failed attempt;
    /// replayed first on the next drain so order is preserved.
    carryover: Vec<Sample>,
}

impl WriterTask {
    async fn run(mut self) {
        let period = self.interval.unwrap_or(Duration::from_secs(3600));
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let on_timer = self.interval.is_some();

        let shutdown_ack = loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(WriterCommand::Flush { ack }) => {
                        let result = self.drain_and_flush().await;
                        let _ = ack.send(result);
                    }
                    Some(WriterCommand::ScheduledFlush) => {
                        self.serve_scheduled_flush().await;
                    }
                    Some(WriterCommand::Shutdown { ack }) => break Some(ack),
                    // Supervisor dropped without shutdown; drain best-effort.
                    None => break None,
                },
                _ = ticker.tick(), if on_timer => {
                    if self.scheduler.try_begin() {
                        self.serve_scheduled_flush().await;
                    }
                }
            }
        };

        // Close the queue before the final drain: an `ingest` racing the
        // shutdown either enqueued in time (and is drained below) or gets an
        // error back, never a silent drop.
        self.samples.close();
        let drained = self.drain_and_flush().await;
        let result = match (drained, self.writer.close()) {
            (Ok(()), Ok(state)) => Ok(state),
            (Err(e), _) | (Ok(()), Err(e)) => Err(e),
        };
        match shutdown_ack {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => {
                if let Err(e) = result {
                    error!(error = %e, "final drain failed after supervisor was dropped");
                }
            }
        }
    }

    /// Serve one scheduled trigger plus any follow-up coalesced during it.
    async fn serve_scheduled_flush(&mut self) {
        loop {
            if let Err(e) = self.drain_and_flush().await {
                // Samples stay in the carryover; the next flush (or the
                // shutdown drain) retries them.
                warn!(error = %e, "scheduled flush failed");
            }
            if !self.scheduler.finish() {
                break;
            }
            debug!("running coalesced follow-up flush");
        }
    }

    /// Write everything pending to the active segment, then commit.
    async fn drain_and_flush(&mut self) -> AppResult<()> {
        loop {
            let batch = if self.carryover.is_empty() {
                self.samples.dequeue_batch(WRITE_BATCH, Duration::ZERO).await
            } else {
                std::mem::take(&mut self.carryover)
            };
            if batch.is_empty() {
                break;
            }
            let mut pending = batch.into_iter();
            while let Some(sample) = pending.next() {
                if let Err(e) = self.writer.append(&sample) {
                    let mut rest = vec![sample];
                    rest.extend(pending);
                    self.carryover = rest;
                    return Err(e);
                }
            }
        }
        self.writer.flush()
    }
}

/// Public face of the persistence subsystem.
pub struct PersistenceSupervisor {
    samples: SampleSender,
    commands: mpsc::UnboundedSender<WriterCommand>,
    scheduler: Arc<FlushScheduler>,
    lifecycle: AtomicU8,
    shutdown_result: Mutex<Option<SessionReport>>,
    segment_dir: PathBuf,
    merge_on_shutdown: bool,
}

impl PersistenceSupervisor {
    /// Open segment `1` in `session_dir`, spawn the writer task and enter
    /// the `Running` state.
    pub fn start(session_dir: &Path, opts: PersistenceOptions) -> AppResult<Self> {
        if opts.flush_mode == FlushMode::Interval && opts.flush_interval.is_none() {
            return Err(LogError::Configuration(
                "interval flush mode requires a flush interval".into(),
            ));
        }
        let writer = SegmentWriter::open(session_dir, opts.segment_row_limit)?;
        let (samples, receiver) = match opts.buffer_capacity {
            Some(capacity) => SampleBuffer::bounded(capacity),
            None => SampleBuffer::unbounded(),
        };
        let scheduler = Arc::new(FlushScheduler::new(opts.flush_mode, opts.flush_threshold));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let task = WriterTask {
            samples: receiver,
            commands: command_rx,
            writer,
            scheduler: Arc::clone(&scheduler),
            // The timer only runs in interval mode; a stray interval value
            // in another mode must not produce hybrid timed flushes.
            interval: match opts.flush_mode {
                FlushMode::Interval => opts.flush_interval,
                _ => None,
            },
            carryover: Vec::new(),
        };
        tokio::spawn(task.run());

        info!(
            dir = %session_dir.display(),
            row_limit = opts.segment_row_limit,
            mode = ?opts.flush_mode,
            "persistence started"
        );
        Ok(Self {
            samples,
            commands,
            scheduler,
            lifecycle: AtomicU8::new(RUNNING),
            shutdown_result: Mutex::new(None),
            segment_dir: session_dir.to_path_buf(),
            merge_on_shutdown: opts.merge_on_shutdown,
        })
    }

    /// Accept one sample. Returns [`LogError::Draining`] once shutdown has
    /// begun; samples are never silently discarded.
    pub async fn ingest(&self, sample: Sample) -> AppResult<()> {
        if self.lifecycle.load(Ordering::Acquire) != RUNNING {
            return Err(LogError::Draining);
        }
        // The lifecycle check above is advisory; the queue being closed is
        // authoritative. A successful enqueue lands before the writer's
        // final drain, so the sample is durable by shutdown.
        self.samples
            .enqueue(sample)
            .await
            .map_err(|_| LogError::Draining)?;
        if self.scheduler.on_sample_accepted(self.samples.pending()) {
            match self.scheduler.mode() {
                // Immediate mode: the write completes before ingest returns.
                FlushMode::Immediate => self.flush_now().await?,
                _ => {
                    if self.scheduler.try_begin() {
                        self.commands
                            .send(WriterCommand::ScheduledFlush)
                            .map_err(|_| LogError::WriterGone)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Drain all pending samples to the active segment and commit. A no-op
    /// on an empty buffer. On persistence errors this retries up to
    /// [`FLUSH_RETRY_LIMIT`] times, then attempts an emergency shutdown and
    /// surfaces the failure.
    pub async fn flush_now(&self) -> AppResult<()> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let (ack, done) = oneshot::channel();
            self.commands
                .send(WriterCommand::Flush { ack })
                .map_err(|_| LogError::WriterGone)?;
            match done.await.map_err(|_| LogError::WriterGone)? {
                Ok(()) => return Ok(()),
                Err(e) if attempts < FLUSH_RETRY_LIMIT => {
                    warn!(attempt = attempts, error = %e, "flush failed, retrying");
                }
                Err(e) => {
                    error!(
                        attempts,
                        error = %e,
                        "flush retries exhausted, attempting emergency shutdown"
                    );
                    let emergency = self.shutdown().await;
                    if let Ok(report) = &emergency {
                        warn!(
                            durable_rows = report.state.total_rows_written,
                            "emergency shutdown preserved durable rows"
                        );
                    }
                    return Err(LogError::RetriesExhausted {
                        attempts,
                        last: e.to_string(),
                    });
                }
            }
        }
    }

    /// Stop accepting samples, drain, close the active segment and merge.
    /// Idempotent: later calls return the first call's report.
    pub async fn shutdown(&self) -> AppResult<SessionReport> {
        let mut guard = self.shutdown_result.lock().await;
        if let Some(report) = guard.as_ref() {
            return Ok(report.clone());
        }
        self.lifecycle.store(DRAINING, Ordering::Release);

        let (ack, done) = oneshot::channel();
        self.commands
            .send(WriterCommand::Shutdown { ack })
            .map_err(|_| LogError::WriterGone)?;
        let state = done.await.map_err(|_| LogError::WriterGone)??;

        let merge = if self.merge_on_shutdown {
            Some(merge::merge(&self.segment_dir)?)
        } else {
            None
        };
        self.lifecycle.store(STOPPED, Ordering::Release);

        let report = SessionReport { state, merge };
        info!(
            rows = report.state.total_rows_written,
            segments = report.state.active_segment_id,
            merged = report.merge.is_some(),
            "persistence stopped"
        );
        *guard = Some(report.clone());
        Ok(report)
    }

    /// Directory holding this session's segments.
    pub fn segment_dir(&self) -> &Path {
        &self.segment_dir
    }
}
