//! The sample buffer between acquisition and persistence.
//!
//! A FIFO queue built on `tokio::sync::mpsc`, split into a producer handle
//! ([`SampleSender`]) held by the acquisition side and a consumer handle
//! ([`SampleReceiver`]) owned by the persistence writer task. Samples are
//! dequeued in the exact order they were enqueued; once accepted a sample is
//! never dropped or duplicated.
//!
//! Two capacity policies exist:
//!
//! - **Unbounded** (default): `enqueue` never suspends, memory growth is
//!   monitored via the pending counter.
//! - **Bounded**: `enqueue` suspends the producer when the queue is full.
//!   Backpressure blocks, it never drops.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::sample::Sample;

/// Constructors for the acquisition/persistence sample queue.
pub struct SampleBuffer;

impl SampleBuffer {
    /// Unbounded queue: `enqueue` always returns immediately.
    pub fn unbounded() -> (SampleSender, SampleReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        (
            SampleSender {
                inner: SenderKind::Unbounded(tx),
                pending: Arc::clone(&pending),
            },
            SampleReceiver {
                inner: ReceiverKind::Unbounded(rx),
                pending,
            },
        )
    }

    /// Bounded queue: `enqueue` suspends while `capacity` samples are
    /// pending.
    pub fn bounded(capacity: usize) -> (SampleSender, SampleReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        (
            SampleSender {
                inner: SenderKind::Bounded(tx),
                pending: Arc::clone(&pending),
            },
            SampleReceiver {
                inner: ReceiverKind::Bounded(rx),
                pending,
            },
        )
    }
}

enum SenderKind {
    Unbounded(mpsc::UnboundedSender<Sample>),
    Bounded(mpsc::Sender<Sample>),
}

/// Producer half of the sample queue.
pub struct SampleSender {
    inner: SenderKind,
    pending: Arc<AtomicUsize>,
}

impl SampleSender {
    /// Enqueue one sample. Fails only if the consumer is gone; with a
    /// bounded queue this suspends until space is available.
    pub async fn enqueue(&self, sample: Sample) -> Result<(), Sample> {
        match &self.inner {
            SenderKind::Unbounded(tx) => tx.send(sample).map_err(|e| e.0)?,
            SenderKind::Bounded(tx) => tx.send(sample).await.map_err(|e| e.0)?,
        }
        self.pending.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of samples accepted but not yet dequeued.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

enum ReceiverKind {
    Unbounded(mpsc::UnboundedReceiver<Sample>),
    Bounded(mpsc::Receiver<Sample>),
}

impl ReceiverKind {
    async fn recv(&mut self) -> Option<Sample> {
        match self {
            ReceiverKind::Unbounded(rx) => rx.recv().await,
            ReceiverKind::Bounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<Sample> {
        match self {
            ReceiverKind::Unbounded(rx) => rx.try_recv().ok(),
            ReceiverKind::Bounded(rx) => rx.try_recv().ok(),
        }
    }

    fn close(&mut self) {
        match self {
            ReceiverKind::Unbounded(rx) => rx.close(),
            ReceiverKind::Bounded(rx) => rx.close(),
        }
    }
}

/// Consumer half of the sample queue, owned by the persistence writer.
pub struct SampleReceiver {
    inner: ReceiverKind,
    pending: Arc<AtomicUsize>,
}

impl SampleReceiver {
    /// Remove and return up to `max_items` samples, waiting at most
    /// `max_wait` for the first one. A timeout yields an empty batch, not an
    /// error.
    pub async fn dequeue_batch(&mut self, max_items: usize, max_wait: Duration) -> Vec<Sample> {
        if max_items == 0 {
            return Vec::new();
        }
        let first = match timeout(max_wait, self.inner.recv()).await {
            Ok(Some(sample)) => sample,
            // Timeout, or all senders dropped with nothing queued.
            _ => return Vec::new(),
        };
        let mut batch = Vec::with_capacity(max_items.min(64));
        batch.push(first);
        while batch.len() < max_items {
            match self.inner.try_recv() {
                Some(sample) => batch.push(sample),
                None => break,
            }
        }
        self.pending.fetch_sub(batch.len(), Ordering::Relaxed);
        batch
    }

    /// Stop accepting new samples. Later `enqueue` calls fail; samples
    /// already queued remain receivable, so a close followed by a full drain
    /// sees every sample whose enqueue succeeded.
    pub fn close(&mut self) {
        self.inner.close();
    }

    /// Drain everything currently queued without waiting.
    pub fn drain_now(&mut self) -> Vec<Sample> {
        let mut drained = Vec::new();
        while let Some(sample) = self.inner.try_recv() {
            drained.push(sample);
        }
        self.pending.fetch_sub(drained.len(), Ordering::Relaxed);
        drained
    }
}
