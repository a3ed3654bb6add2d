//! Background processing thread.
//!
//! A [`TunerWorker`] owns a [`Tuner`] on a dedicated thread. Sample batches go
//! in over one channel and [`AnalysisResult`]s come back over another, so the
//! capture callback never runs the estimator itself.
//!
//! The result queue is bounded. When the consumer falls behind, the oldest
//! queued result is dropped so the newest one always gets through.

use std::thread::{self, JoinHandle};

use anyhow::{Context, anyhow};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::AnalysisResult;
use crate::tuner::Tuner;
use crate::tuning::TuningHandle;

/// Results kept for a consumer that reads less often than frames arrive.
pub const RESULT_QUEUE_CAPACITY: usize = 256;

/// Handle to the processing thread.
#[derive(Debug)]
pub struct TunerWorker {
    samples_tx: Sender<Vec<f32>>,
    results_rx: Receiver<AnalysisResult>,
    shutdown_tx: Sender<()>,
    tuning: TuningHandle,
    thread_handle: Option<JoinHandle<Tuner>>,
}

impl TunerWorker {
    /// Moves `tuner` onto a new thread and starts processing.
    pub fn spawn(tuner: Tuner) -> anyhow::Result<Self> {
        Self::spawn_with_capacity(tuner, RESULT_QUEUE_CAPACITY)
    }

    /// Like [`TunerWorker::spawn`], keeping at most `capacity` unread results.
    pub fn spawn_with_capacity(tuner: Tuner, capacity: usize) -> anyhow::Result<Self> {
        let (samples_tx, samples_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let (results_tx, results_rx) = crossbeam_channel::bounded(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let tuning = tuner.tuning().clone();
        let results = ResultQueue {
            tx: results_tx,
            overflow: results_rx.clone(),
        };

        let thread_handle = thread::Builder::new()
            .name("microtune-worker".into())
            .spawn(move || run(tuner, samples_rx, results, shutdown_rx))
            .context("failed to spawn tuner worker thread")?;

        Ok(Self {
            samples_tx,
            results_rx,
            shutdown_tx,
            tuning,
            thread_handle: Some(thread_handle),
        })
    }

    /// A sender that capture code can keep for itself.
    pub fn sender(&self) -> Sender<Vec<f32>> {
        self.samples_tx.clone()
    }

    /// Queues a batch of samples for processing.
    pub fn push(&self, samples: Vec<f32>) -> anyhow::Result<()> {
        self.samples_tx
            .send(samples)
            .map_err(|_| anyhow!("tuner worker has stopped"))
    }

    pub fn results(&self) -> &Receiver<AnalysisResult> {
        &self.results_rx
    }

    /// Drains pending results and returns the newest one.
    pub fn try_latest(&self) -> Option<AnalysisResult> {
        self.results_rx.try_iter().last()
    }

    /// The tuning state the worker reads from; edits apply on the next frame.
    pub fn tuning(&self) -> &TuningHandle {
        &self.tuning
    }

    /// Stops the thread after it has processed every queued batch and hands
    /// the tuner back.
    pub fn shutdown(mut self) -> anyhow::Result<Tuner> {
        let handle = self
            .thread_handle
            .take()
            .ok_or_else(|| anyhow!("tuner worker already stopped"))?;
        let _ = self.shutdown_tx.send(());
        handle
            .join()
            .map_err(|_| anyhow!("tuner worker thread panicked"))
    }
}

impl Drop for TunerWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.shutdown_tx.send(());
            if handle.join().is_err() {
                log::warn!("[WORKER] Worker thread panicked during shutdown");
            }
        }
    }
}

/// Sending side of the result queue, able to evict its own oldest entry.
struct ResultQueue {
    tx: Sender<AnalysisResult>,
    overflow: Receiver<AnalysisResult>,
}

impl ResultQueue {
    fn publish(&self, result: AnalysisResult) {
        if let Err(TrySendError::Full(result)) = self.tx.try_send(result) {
            if let Ok(dropped) = self.overflow.try_recv() {
                log::trace!("[WORKER] Result queue full, dropped frame {}", dropped.estimate.frame_index);
            }
            let _ = self.tx.try_send(result);
        }
    }
}

fn run(
    mut tuner: Tuner,
    samples_rx: Receiver<Vec<f32>>,
    results: ResultQueue,
    shutdown_rx: Receiver<()>,
) -> Tuner {
    log::info!("[WORKER] Processing thread started");
    let mut forward = |batch: Vec<f32>| {
        for result in tuner.process(&batch) {
            results.publish(result);
        }
    };

    loop {
        crossbeam_channel::select! {
            recv(samples_rx) -> msg => match msg {
                Ok(batch) => forward(batch),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => {
                samples_rx.try_iter().for_each(&mut forward);
                break;
            }
        }
    }

    log::info!("[WORKER] Processing thread finished");
    tuner
}
