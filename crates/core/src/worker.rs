//! Bounded task queue drained by a single worker thread.
//!
//! The audio thread hands work off with `try_send` only; a full queue drops the task.
//! One worker keeps at most one interaction (network calls, playback) in flight.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Work produced by the audio pipeline.
#[derive(Debug)]
pub enum Task {
    /// Wake word heard. `barge_in` is set when it interrupted a reply.
    Acknowledge { barge_in: bool },
    /// A completed utterance, at the working sample rate, and the generation of the
    /// session it belongs to.
    Utterance { samples: Vec<i16>, session: u64 },
}

impl Task {
    fn name(&self) -> &'static str {
        match self {
            Task::Acknowledge { .. } => "acknowledge",
            Task::Utterance { .. } => "utterance",
        }
    }
}

/// Executes tasks on the worker thread. May block freely.
pub trait TaskHandler: Send + 'static {
    fn handle(&mut self, task: Task) -> Result<()>;
}

/// Non-blocking producer side of the queue.
#[derive(Clone)]
pub struct TaskSender {
    tx: Sender<Task>,
}

impl TaskSender {
    /// Enqueues `task` without blocking. Returns `false` if it was dropped.
    pub fn submit(&self, task: Task) -> bool {
        let name = task.name();
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Task queue full, dropping {} task", name);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("Worker stopped, dropping {} task", name);
                false
            }
        }
    }
}

/// Creates a sender/receiver pair without a worker, for driving the pipeline manually.
pub fn task_queue(capacity: usize) -> (TaskSender, Receiver<Task>) {
    let (tx, rx) = bounded(capacity);
    (TaskSender { tx }, rx)
}

/// Owns the worker thread.
pub struct WorkerPool {
    sender: TaskSender,
    is_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<H: TaskHandler>(mut handler: H, capacity: usize) -> Result<Self> {
        let (sender, rx) = task_queue(capacity);
        let is_running = Arc::new(AtomicBool::new(true));
        let run_flag = Arc::clone(&is_running);

        let thread = thread::Builder::new()
            .name("voxgate-worker".into())
            .spawn(move || {
                while run_flag.load(Ordering::Relaxed) {
                    match rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(task) => {
                            let name = task.name();
                            if let Err(e) = handler.handle(task) {
                                log::error!("{} task failed: {:#}", name, e);
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("Worker stopped");
            })
            .context("Failed to spawn worker thread")?;

        Ok(Self {
            sender,
            is_running,
            thread: Some(thread),
        })
    }

    pub fn sender(&self) -> TaskSender {
        self.sender.clone()
    }

    /// Stops the worker after its current task and waits for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
