//! Playback and barge-in control.
//!
//! At most one playback episode is in flight. Playback is stopped cooperatively through a
//! [`CancelToken`] the sink polls; `interrupt` waits (bounded) for the sink to acknowledge
//! before dropping the far-end reference of the episode.

use crate::far_end::FarEndReference;
use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::{TERMINATE_TIMEOUT_MS, WATCHDOG_INTERVAL_MS};

/// Shared cancellation flag observed by a playback sink.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Output device abstraction.
pub trait AudioSink: Send + Sync {
    /// Plays mono samples and blocks until done, returning early once `cancel` fires.
    fn play(&self, samples: &[i16], sample_rate: u32, cancel: &CancelToken) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Interrupted,
}

struct PlaybackHandle {
    episode: u64,
    cancel: CancelToken,
    done: Receiver<()>,
}

/// Owns the lifecycle of the in-flight playback.
pub struct PlaybackController {
    sink: Arc<dyn AudioSink>,
    far_end: Arc<FarEndReference>,
    sample_rate: u32,
    handle: Mutex<Option<PlaybackHandle>>,
    active: AtomicBool,
    next_episode: AtomicU64,
    stop_requested: AtomicBool,
    terminate_timeout: Duration,
}

impl PlaybackController {
    pub fn new(sink: Arc<dyn AudioSink>, far_end: Arc<FarEndReference>, sample_rate: u32) -> Self {
        Self {
            sink,
            far_end,
            sample_rate,
            handle: Mutex::new(None),
            active: AtomicBool::new(false),
            next_episode: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
            terminate_timeout: Duration::from_millis(TERMINATE_TIMEOUT_MS),
        }
    }

    /// Overrides how long `interrupt` waits for the sink to stop.
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Option<PlaybackHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plays `audio`, blocking the caller until it finishes or is interrupted.
    ///
    /// The whole clip is written to the far-end reference before the sink sees it.
    pub fn play(&self, audio: &[i16]) -> Result<PlaybackOutcome> {
        self.play_with(audio, || {})
    }

    /// Like [`play`](Self::play), running `on_started` once the episode is registered and
    /// [`is_active`](Self::is_active) reads `true`, before the sink starts.
    pub fn play_with<F: FnOnce()>(&self, audio: &[i16], on_started: F) -> Result<PlaybackOutcome> {
        self.far_end.begin_episode(audio);

        let episode = self.next_episode.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancelToken::new();
        let (done_tx, done_rx) = bounded(1);
        {
            let mut slot = self.lock();
            if let Some(previous) = slot.take() {
                log::warn!("Playback {} still registered, cancelling it", previous.episode);
                previous.cancel.cancel();
            }
            *slot = Some(PlaybackHandle {
                episode,
                cancel: cancel.clone(),
                done: done_rx,
            });
            self.active.store(true, Ordering::Release);
        }
        log::debug!(
            "Playback {} started ({} ms)",
            episode,
            audio.len() as u64 * 1000 / u64::from(self.sample_rate.max(1))
        );
        on_started();

        let result = self.sink.play(audio, self.sample_rate, &cancel);
        let _ = done_tx.send(());

        {
            let mut slot = self.lock();
            if slot.as_ref().map(|h| h.episode) == Some(episode) {
                *slot = None;
                self.active.store(false, Ordering::Release);
            }
        }

        if let Err(e) = result {
            log::error!("Playback {} failed: {}", episode, e);
            self.far_end.clear();
            return Err(e);
        }

        if cancel.is_cancelled() {
            log::info!("Playback {} interrupted", episode);
            Ok(PlaybackOutcome::Interrupted)
        } else {
            log::debug!("Playback {} completed", episode);
            Ok(PlaybackOutcome::Completed)
        }
    }

    /// Stops the in-flight playback, if any, and clears the far-end reference.
    ///
    /// Idempotent. A sink that does not stop within the terminate timeout is logged and
    /// forgotten.
    pub fn interrupt(&self, reason: &str) {
        {
            let mut slot = self.lock();
            if let Some(handle) = slot.take() {
                log::info!("Interrupting playback {}: {}", handle.episode, reason);
                handle.cancel.cancel();
                match handle.done.recv_timeout(self.terminate_timeout) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                    Err(RecvTimeoutError::Timeout) => log::error!(
                        "Playback {} did not stop within {:?}, dropping handle",
                        handle.episode,
                        self.terminate_timeout
                    ),
                }
                self.active.store(false, Ordering::Release);
            }
        }
        self.stop_requested.store(false, Ordering::Release);
        self.far_end.clear();
    }

    /// Asks the watchdog to interrupt playback. Never blocks.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Lock-free check used by the audio thread.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn far_end(&self) -> &Arc<FarEndReference> {
        &self.far_end
    }
}

/// Spawns the thread that turns stop requests into interrupts.
pub fn spawn_watchdog(
    controller: Arc<PlaybackController>,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    spawn_watchdog_with_interval(
        controller,
        running,
        Duration::from_millis(WATCHDOG_INTERVAL_MS),
    )
}

pub fn spawn_watchdog_with_interval(
    controller: Arc<PlaybackController>,
    running: Arc<AtomicBool>,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("voxgate-watchdog".into())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                if controller.stop_requested() {
                    controller.interrupt("stop requested");
                }
                thread::sleep(interval);
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Sleeps for the clip duration in small slices, honouring cancellation.
    struct TimedSink {
        far_end: Option<Arc<FarEndReference>>,
        far_len_at_start: AtomicUsize,
        ignore_cancel: bool,
    }

    impl TimedSink {
        fn new() -> Self {
            Self {
                far_end: None,
                far_len_at_start: AtomicUsize::new(0),
                ignore_cancel: false,
            }
        }
    }

    impl AudioSink for TimedSink {
        fn play(&self, samples: &[i16], sample_rate: u32, cancel: &CancelToken) -> Result<()> {
            if let Some(far) = &self.far_end {
                self.far_len_at_start.store(far.len(), Ordering::SeqCst);
            }
            let duration =
                Duration::from_millis(samples.len() as u64 * 1000 / u64::from(sample_rate));
            let start = Instant::now();
            while start.elapsed() < duration {
                if cancel.is_cancelled() && !self.ignore_cancel {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(2));
            }
            Ok(())
        }
    }

    struct FailingSink;

    impl AudioSink for FailingSink {
        fn play(&self, _: &[i16], _: u32, _: &CancelToken) -> Result<()> {
            Err(anyhow::anyhow!("device gone"))
        }
    }

    fn far_end() -> Arc<FarEndReference> {
        Arc::new(FarEndReference::new(48000 * 5, 1920))
    }

    fn wait_until_active(controller: &PlaybackController) {
        let start = Instant::now();
        while !controller.is_active() {
            assert!(start.elapsed() < Duration::from_secs(2), "Playback never started");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_far_end_written_before_playback() {
        let far = far_end();
        let mut sink = TimedSink::new();
        sink.far_end = Some(Arc::clone(&far));
        let sink = Arc::new(sink);
        let controller = PlaybackController::new(sink.clone(), Arc::clone(&far), 48000);

        let outcome = controller.play(&[1; 480]).unwrap();
        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert_eq!(sink.far_len_at_start.load(Ordering::SeqCst), 480);
        assert!(!controller.is_active());
    }

    #[test]
    fn test_start_hook_runs_while_active() {
        let far = far_end();
        let controller = PlaybackController::new(Arc::new(TimedSink::new()), Arc::clone(&far), 48000);

        let mut seen = None;
        let outcome = controller
            .play_with(&[1; 480], || seen = Some((controller.is_active(), far.len())))
            .unwrap();
        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert_eq!(seen, Some((true, 480)), "Hook must see the registered episode");
        assert!(!controller.is_active());
    }

    #[test]
    fn test_start_then_interrupt_leaves_nothing_behind() {
        let far = far_end();
        let controller = Arc::new(PlaybackController::new(
            Arc::new(TimedSink::new()),
            Arc::clone(&far),
            48000,
        ));

        let player = Arc::clone(&controller);
        let audio = vec![1000i16; 24000]; // 500ms
        let playing = thread::spawn(move || player.play(&audio));

        wait_until_active(&controller);
        controller.interrupt("x");

        assert!(!controller.is_active(), "No playback handle may remain");
        assert!(far.is_empty(), "Far-end reference must be empty");
        assert_eq!(far.read(1440), vec![0; 1440]);
        assert!(!far.is_primed());
        assert_eq!(playing.join().unwrap().unwrap(), PlaybackOutcome::Interrupted);
    }

    #[test]
    fn test_interrupt_without_playback_is_noop() {
        let far = far_end();
        let controller = PlaybackController::new(Arc::new(TimedSink::new()), Arc::clone(&far), 48000);
        far.write(&[5; 4000]);
        controller.interrupt("nothing playing");
        controller.interrupt("again");
        assert!(!controller.is_active());
        assert!(far.is_empty());
    }

    #[test]
    fn test_new_episode_reprimes_after_interrupt() {
        let far = Arc::new(FarEndReference::new(1000, 4));
        let controller = PlaybackController::new(Arc::new(TimedSink::new()), Arc::clone(&far), 48000);

        controller.play(&(1..=10).collect::<Vec<i16>>()).unwrap();
        assert_eq!(far.read(4), vec![5, 6, 7, 8]);
        assert!(far.is_primed());

        controller.interrupt("barge-in");
        assert!(!far.is_primed());

        controller.play(&(21..=30).collect::<Vec<i16>>()).unwrap();
        assert_eq!(far.read(4), vec![25, 26, 27, 28], "Delay must be skipped again");
    }

    #[test]
    fn test_watchdog_honours_stop_request() {
        let far = far_end();
        let controller = Arc::new(PlaybackController::new(
            Arc::new(TimedSink::new()),
            Arc::clone(&far),
            48000,
        ));
        let running = Arc::new(AtomicBool::new(true));
        let watchdog = spawn_watchdog_with_interval(
            Arc::clone(&controller),
            Arc::clone(&running),
            Duration::from_millis(5),
        )
        .unwrap();

        let player = Arc::clone(&controller);
        let playing = thread::spawn(move || player.play(&vec![0i16; 48000 * 3]));
        wait_until_active(&controller);

        let start = Instant::now();
        controller.request_stop();
        assert_eq!(playing.join().unwrap().unwrap(), PlaybackOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(2));

        running.store(false, Ordering::Relaxed);
        watchdog.join().unwrap();
        assert!(!controller.stop_requested());
        assert!(!controller.is_active());
    }

    #[test]
    fn test_unresponsive_sink_does_not_hang_interrupt() {
        let far = far_end();
        let mut sink = TimedSink::new();
        sink.ignore_cancel = true;
        let controller = Arc::new(
            PlaybackController::new(Arc::new(sink), Arc::clone(&far), 48000)
                .with_terminate_timeout(Duration::from_millis(50)),
        );

        let player = Arc::clone(&controller);
        let playing = thread::spawn(move || player.play(&vec![0i16; 48000 / 2]));
        wait_until_active(&controller);

        let start = Instant::now();
        controller.interrupt("stuck");
        assert!(start.elapsed() < Duration::from_millis(400));
        assert!(!controller.is_active());
        assert!(far.is_empty());

        // The late episode must not resurrect the handle
        playing.join().unwrap().unwrap();
        assert!(!controller.is_active());
    }

    #[test]
    fn test_sink_failure_clears_reference() {
        let far = far_end();
        let controller = PlaybackController::new(Arc::new(FailingSink), Arc::clone(&far), 48000);
        assert!(controller.play(&[1; 4800]).is_err());
        assert!(far.is_empty());
        assert!(!controller.is_active());
    }
}
