//! Pipeline tuning parameters.

use crate::constants::{
    ms_to_samples, AEC_FRAME_SIZE, BLOCK_SIZE, FAR_CAPACITY_SECS, FAR_DELAY_MS, RING_CAPACITY,
    SAMPLE_RATE, SESSION_TAIL_MS, VAD_FRAME_SIZE, WAKE_SAMPLE_RATE,
};
use anyhow::{bail, Result};

/// Configuration for the audio callback pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Working sample rate of capture and playback
    pub sample_rate: u32,

    /// Samples per audio block handed to `Pipeline::process_block`
    pub block_size: usize,

    /// Delay skipped once per playback episode before far-end samples are used
    pub far_delay_ms: u32,

    /// Maximum far-end history in seconds
    pub far_capacity_secs: u32,

    /// Rate the wake word detector expects
    pub wake_sample_rate: u32,

    /// Samples classified per voice activity decision
    pub vad_frame_size: usize,

    /// Gain applied to frames before classification
    pub vad_input_gain: f32,

    /// WebRTC VAD aggressiveness (0 = least, 3 = most aggressive)
    pub vad_mode: i32,

    /// Voice ring capacity in frames
    pub ring_capacity: usize,

    /// Fraction of speech frames needed to open an utterance
    pub start_ratio: f32,

    /// Fraction of non-speech frames needed to close an utterance
    pub end_ratio: f32,

    /// Silence appended to a finished session recording
    pub session_tail_ms: u32,

    /// Whether the echo canceller is applied at all
    pub echo_cancel_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            block_size: BLOCK_SIZE,
            far_delay_ms: FAR_DELAY_MS,
            far_capacity_secs: FAR_CAPACITY_SECS,
            wake_sample_rate: WAKE_SAMPLE_RATE,
            vad_frame_size: VAD_FRAME_SIZE,
            vad_input_gain: 0.2,
            vad_mode: 3,
            ring_capacity: RING_CAPACITY,
            start_ratio: 0.8,
            end_ratio: 0.9,
            session_tail_ms: SESSION_TAIL_MS,
            echo_cancel_enabled: true,
        }
    }
}

impl PipelineConfig {
    pub fn far_delay_samples(&self) -> usize {
        ms_to_samples(self.far_delay_ms, self.sample_rate)
    }

    pub fn far_capacity_samples(&self) -> usize {
        self.sample_rate as usize * self.far_capacity_secs as usize
    }

    pub fn session_tail_samples(&self) -> usize {
        ms_to_samples(self.session_tail_ms, self.sample_rate)
    }

    /// Integer factor between the working rate and the wake word rate.
    pub fn wake_decimation(&self) -> usize {
        (self.sample_rate / self.wake_sample_rate) as usize
    }

    /// Checks the invariants the real-time path relies on.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size % AEC_FRAME_SIZE != 0 {
            bail!(
                "block size {} must be a positive multiple of the {}-sample echo canceller frame",
                self.block_size,
                AEC_FRAME_SIZE
            );
        }
        if self.wake_sample_rate == 0 || self.sample_rate % self.wake_sample_rate != 0 {
            bail!(
                "sample rate {} is not an integer multiple of wake rate {}",
                self.sample_rate,
                self.wake_sample_rate
            );
        }
        if self.vad_frame_size == 0 {
            bail!("VAD frame size must be positive");
        }
        if self.ring_capacity == 0 {
            bail!("ring capacity must be positive");
        }
        for (name, ratio) in [("start", self.start_ratio), ("end", self.end_ratio)] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                bail!("{} ratio {} must be in (0, 1]", name, ratio);
            }
        }
        if !(0..=3).contains(&self.vad_mode) {
            bail!("VAD mode {} out of range 0-3", self.vad_mode);
        }
        if self.far_capacity_samples() <= self.far_delay_samples() + self.block_size {
            bail!("far-end capacity must exceed delay plus one block");
        }
        Ok(())
    }
}
