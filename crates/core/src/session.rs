//! Whole-interaction recording, from wake word to the end of the reply.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Records every cleaned block while a session is active.
///
/// Appending is done by the audio thread; `finish` is called by whichever worker detects
/// the end of the interaction and does the disk I/O itself. Each `begin` starts a new
/// generation, and only the current generation can be finished.
#[derive(Default)]
pub struct SessionCapture {
    active: AtomicBool,
    generation: AtomicU64,
    samples: Mutex<Vec<i16>>,
}

impl SessionCapture {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<i16>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new session, discarding anything recorded so far. Returns its generation.
    pub fn begin(&self) -> u64 {
        let mut samples = self.lock();
        samples.clear();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.active.store(true, Ordering::Release);
        log::debug!("Session {} started", generation);
        generation
    }

    /// Generation of the most recently begun session, `0` before the first.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Appends a block if a session is active.
    pub fn append(&self, block: &[i16]) {
        if !self.is_active() {
            return;
        }
        let mut samples = self.lock();
        // Re-check under the lock so a concurrent finish cannot leave a stray block behind
        if self.is_active() {
            samples.extend_from_slice(block);
        }
    }

    /// Ends session `generation` and returns its samples followed by `tail_samples` of
    /// silence.
    ///
    /// Returns `None` if no session is active or a newer one has begun since.
    pub fn finish(&self, generation: u64, tail_samples: usize) -> Option<Vec<i16>> {
        let mut samples = self.lock();
        let current = self.generation.load(Ordering::Acquire);
        if current != generation {
            log::debug!("Session {} superseded by {}, leaving it open", generation, current);
            return None;
        }
        if !self.active.swap(false, Ordering::AcqRel) {
            return None;
        }
        let mut recorded = std::mem::take(&mut *samples);
        drop(samples);
        recorded.resize(recorded.len() + tail_samples, 0);
        log::debug!("Session finished ({} samples)", recorded.len());
        Some(recorded)
    }

    /// Ends the session without producing a recording.
    pub fn discard(&self) {
        let mut samples = self.lock();
        self.active.store(false, Ordering::Release);
        samples.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
