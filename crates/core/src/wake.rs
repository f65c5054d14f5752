//! Wake word gate.
//!
//! Cleaned blocks are decimated to the detector rate and accumulated in a ring buffer so
//! detector frames can straddle block boundaries.

use crate::resample::Decimator;
use anyhow::{bail, Result};
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

/// Keyword spotting engine working on fixed-length frames at the wake rate.
pub trait WakeWordDetector: Send {
    /// Samples per call to [`process`](Self::process).
    fn frame_length(&self) -> usize;

    /// Returns `true` if the keyword was detected in `frame`.
    fn process(&mut self, frame: &[i16]) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Armed,
}

/// Two-state gate in front of the voice activity segmenter.
pub struct WakeWordGate {
    detector: Box<dyn WakeWordDetector>,
    decimator: Decimator,
    pending: HeapRb<i16>,
    frame: Vec<i16>,
    state: GateState,
    errors: u64,
}

impl WakeWordGate {
    /// `factor` is the ratio between the working rate and the detector rate; `max_block`
    /// the largest block [`observe`](Self::observe) will be given.
    pub fn new(
        detector: Box<dyn WakeWordDetector>,
        input_rate: u32,
        factor: usize,
        max_block: usize,
    ) -> Result<Self> {
        let frame_length = detector.frame_length();
        if frame_length == 0 {
            bail!("wake word detector reports a zero frame length");
        }
        let decimator = Decimator::new(input_rate, factor)?;
        let capacity = frame_length + max_block.div_ceil(factor.max(1)) * 2;

        Ok(Self {
            detector,
            decimator,
            pending: HeapRb::new(capacity),
            frame: vec![0; frame_length],
            state: GateState::Idle,
            errors: 0,
        })
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == GateState::Armed
    }

    /// Runs the detector over `block`.
    ///
    /// Returns `true` only on the `Idle -> Armed` transition. Detections while armed are
    /// ignored.
    pub fn observe(&mut self, block: &[i16]) -> bool {
        let pending = &mut self.pending;
        self.decimator.process(block, |s| {
            let _ = pending.try_push(s);
        });

        let mut detected = false;
        while self.pending.occupied_len() >= self.frame.len() {
            self.pending.pop_slice(&mut self.frame);
            match self.detector.process(&self.frame) {
                Ok(hit) => detected |= hit,
                Err(e) => {
                    self.errors += 1;
                    if self.errors == 1 || self.errors % 100 == 0 {
                        log::error!("Wake word detector error: {}", e);
                    }
                }
            }
        }

        if !detected {
            return false;
        }
        if self.state == GateState::Armed {
            log::debug!("Wake word ignored: already armed");
            return false;
        }
        log::info!("Wake word detected");
        self.state = GateState::Armed;
        true
    }

    /// `Armed -> Idle`, once the utterance is complete.
    pub fn disarm(&mut self) {
        self.state = GateState::Idle;
    }

    /// Drops buffered detector input and returns to `Idle`.
    pub fn reset(&mut self) {
        let buffered = self.pending.occupied_len();
        self.pending.skip(buffered);
        self.decimator.reset();
        self.state = GateState::Idle;
    }
}
