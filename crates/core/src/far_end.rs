//! Far-end reference buffer for echo cancellation.
//!
//! Holds audio that was sent to playback so it can be replayed, time-aligned, as the
//! reference signal of the echo canceller. A fixed delay is skipped once per playback
//! episode to account for the latency between playback and the microphone.

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct FarEndState {
    samples: HeapRb<i16>,
    primed: bool,
}

/// Bounded FIFO of played-back samples with one-shot delay compensation.
pub struct FarEndReference {
    state: Mutex<FarEndState>,
    delay_samples: usize,
    capacity: usize,
}

impl FarEndReference {
    /// Creates an empty, unprimed buffer holding at most `capacity` samples.
    pub fn new(capacity: usize, delay_samples: usize) -> Self {
        Self {
            state: Mutex::new(FarEndState {
                samples: HeapRb::new(capacity.max(1)),
                primed: false,
            }),
            delay_samples,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FarEndState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends samples to the tail, evicting the oldest samples beyond capacity.
    pub fn write(&self, samples: &[i16]) {
        let tail = &samples[samples.len().saturating_sub(self.capacity)..];
        self.lock().samples.push_slice_overwrite(tail);
    }

    /// Starts a new playback episode: the delay will be skipped again before any of
    /// `samples` are returned.
    pub fn begin_episode(&self, samples: &[i16]) {
        let tail = &samples[samples.len().saturating_sub(self.capacity)..];
        let mut state = self.lock();
        state.primed = false;
        state.samples.push_slice_overwrite(tail);
    }

    /// Fills `out` completely with reference samples.
    ///
    /// Until the buffer holds `delay + out.len()` samples the output is silence and nothing
    /// is consumed. Once that much is available the delay is discarded (once per episode)
    /// and real samples follow; a short tail is zero-padded.
    pub fn read_into(&self, out: &mut [i16]) {
        let mut state = self.lock();
        if !state.primed {
            if state.samples.occupied_len() < self.delay_samples + out.len() {
                drop(state);
                out.fill(0);
                return;
            }
            state.samples.skip(self.delay_samples);
            state.primed = true;
        }
        let read = state.samples.pop_slice(out);
        drop(state);
        out[read..].fill(0);
    }

    /// Returns exactly `n` reference samples.
    pub fn read(&self, n: usize) -> Vec<i16> {
        let mut out = vec![0i16; n];
        self.read_into(&mut out);
        out
    }

    /// Drops all buffered reference audio and re-arms the delay.
    pub fn clear(&self) {
        let mut state = self.lock();
        let buffered = state.samples.occupied_len();
        state.samples.skip(buffered);
        state.primed = false;
    }

    pub fn len(&self) -> usize {
        self.lock().samples.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_primed(&self) -> bool {
        self.lock().primed
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }
}
