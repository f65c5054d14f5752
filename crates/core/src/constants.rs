//! Shared constants for the voxgate audio pipeline.

/// Working sample rate of the capture/playback path (48kHz)
pub const SAMPLE_RATE: u32 = 48000;

/// Echo canceller frame size in samples (10ms at 48kHz = 480 samples)
pub const AEC_FRAME_SIZE: usize = 480;

/// Audio block size delivered to the pipeline (30ms at 48kHz = 1440 samples)
pub const BLOCK_SIZE: usize = 1440;

/// Voice activity frame length (30ms at 48kHz)
pub const VAD_FRAME_SIZE: usize = 1440;

/// Sample rate expected by wake word engines
pub const WAKE_SAMPLE_RATE: u32 = 16000;

/// Estimated playback-to-microphone latency
pub const FAR_DELAY_MS: u32 = 40;

/// Far-end reference history kept for echo cancellation
pub const FAR_CAPACITY_SECS: u32 = 5;

/// Number of (frame, is_speech) entries kept before an utterance starts
pub const RING_CAPACITY: usize = 20;

/// Trailing silence appended to a finished session recording
pub const SESSION_TAIL_MS: u32 = 300;

/// Converts a duration in milliseconds to a sample count at `rate`.
pub const fn ms_to_samples(ms: u32, rate: u32) -> usize {
    (rate as usize * ms as usize) / 1000
}

/// Interval at which the playback watchdog checks for stop requests
pub const WATCHDOG_INTERVAL_MS: u64 = 50;

/// How long an interrupt waits for playback to acknowledge cancellation
pub const TERMINATE_TIMEOUT_MS: u64 = 2000;

/// Pending tasks the worker queue accepts before new ones are dropped
pub const TASK_QUEUE_CAPACITY: usize = 4;
