//! Echo cancellation module for voxgate.
//!
//! Uses the aec3 crate (Rust port of WebRTC AEC3) for acoustic echo cancellation. The
//! adapter never propagates engine failures: a block that cannot be processed is passed
//! through unmodified.

use aec3::voip::VoipAec3;
use anyhow::{anyhow, Result};

/// Engine contract: cancel `far` out of `near`, one fixed-size frame at a time.
pub trait EchoEngine: Send {
    /// Samples per call expected by the engine.
    fn frame_size(&self) -> usize;

    fn process(&mut self, near: &[f32], far: &[f32], out: &mut [f32]) -> Result<()>;
}

/// WebRTC AEC3, mono, 10ms frames.
pub struct Aec3Engine {
    aec: VoipAec3,
    frame_size: usize,
}

// SAFETY: Aec3Engine exclusively owns its VoipAec3 instance and is moved into the single
// audio processing thread. It is never shared by reference across threads (no Sync).
#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl Send for Aec3Engine {}

impl Aec3Engine {
    pub fn new(sample_rate: u32) -> Result<Self> {
        let aec = VoipAec3::builder(sample_rate as usize, 1, 1)
            .build()
            .map_err(|e| anyhow!("Failed to create AEC3: {:?}", e))?;
        Ok(Self {
            aec,
            frame_size: sample_rate as usize / 100,
        })
    }
}

impl EchoEngine for Aec3Engine {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn process(&mut self, near: &[f32], far: &[f32], out: &mut [f32]) -> Result<()> {
        // level_change = false (playback volume is not tracked)
        self.aec
            .process(near, Some(far), false, out)
            .map_err(|e| anyhow!("AEC error: {:?}", e))?;
        Ok(())
    }
}

/// Block-level adapter around an [`EchoEngine`].
pub struct EchoCanceller {
    engine: Option<Box<dyn EchoEngine>>,
    near_buf: Vec<f32>, // Pre-allocated to avoid heap allocation per block
    far_buf: Vec<f32>,
    out_buf: Vec<f32>,
    failures: u64,
}

impl EchoCanceller {
    /// Wraps `engine`; scratch space is sized for blocks of up to `max_block` samples.
    pub fn new(engine: Box<dyn EchoEngine>, max_block: usize) -> Self {
        Self {
            engine: Some(engine),
            near_buf: vec![0.0; max_block],
            far_buf: vec![0.0; max_block],
            out_buf: vec![0.0; max_block],
            failures: 0,
        }
    }

    /// Adapter that returns the near-end block untouched.
    pub fn passthrough() -> Self {
        Self {
            engine: None,
            near_buf: Vec::new(),
            far_buf: Vec::new(),
            out_buf: Vec::new(),
            failures: 0,
        }
    }

    /// Creates an AEC3-backed adapter, or a passthrough one if AEC3 cannot start.
    pub fn with_aec3(sample_rate: u32, max_block: usize) -> Self {
        match Aec3Engine::new(sample_rate) {
            Ok(engine) => Self::new(Box::new(engine), max_block),
            Err(e) => {
                log::warn!("Echo cancellation unavailable, passing microphone through: {}", e);
                Self::passthrough()
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.engine.is_some()
    }

    /// Number of blocks that fell back to the raw near-end signal.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Writes the echo-cancelled `near` block into `out`.
    ///
    /// Returns `true` if the engine processed the block, `false` if `out` holds the
    /// unmodified near-end samples.
    pub fn cancel_into(&mut self, near: &[i16], far: &[i16], out: &mut [i16]) -> bool {
        let len = near.len();
        if out.len() != len {
            log::error!("Echo output length {} does not match input {}", out.len(), len);
            let n = len.min(out.len());
            out[..n].copy_from_slice(&near[..n]);
            return false;
        }

        let Some(engine) = self.engine.as_mut() else {
            out.copy_from_slice(near);
            return false;
        };

        let frame = engine.frame_size();
        if far.len() != len || frame == 0 || len % frame != 0 || len > self.near_buf.len() {
            self.record_failure(&anyhow!(
                "unsupported block: near={} far={} frame={}",
                len,
                far.len(),
                frame
            ));
            out.copy_from_slice(near);
            return false;
        }

        for (dst, &s) in self.near_buf.iter_mut().zip(near) {
            *dst = f32::from(s) / 32768.0;
        }
        for (dst, &s) in self.far_buf.iter_mut().zip(far) {
            *dst = f32::from(s) / 32768.0;
        }

        for start in (0..len).step_by(frame) {
            let end = start + frame;
            if let Err(e) = engine.process(
                &self.near_buf[start..end],
                &self.far_buf[start..end],
                &mut self.out_buf[start..end],
            ) {
                self.record_failure(&e);
                out.copy_from_slice(near); // Fallback to raw input
                return false;
            }
        }

        for (dst, &s) in out.iter_mut().zip(&self.out_buf[..len]) {
            *dst = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
        }
        true
    }

    /// Allocating variant of [`cancel_into`](Self::cancel_into).
    pub fn cancel(&mut self, near: &[i16], far: &[i16]) -> Vec<i16> {
        let mut out = vec![0i16; near.len()];
        self.cancel_into(near, far, &mut out);
        out
    }

    fn record_failure(&mut self, err: &anyhow::Error) {
        self.failures += 1;
        // Avoid flooding the log from the audio thread
        if self.failures == 1 || self.failures % 100 == 0 {
            log::warn!("AEC error (fallback to raw input, {} so far): {}", self.failures, err);
        }
    }
}
