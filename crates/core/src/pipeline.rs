//! Per-block processing state for the real-time audio thread.
//!
//! `Pipeline` owns everything only the audio thread touches (echo canceller, gate,
//! segmenter, scratch buffers). State shared with the worker and watchdog lives in
//! [`SharedState`] behind its own locks and atomics.

use crate::config::PipelineConfig;
use crate::echo_cancel::EchoCanceller;
use crate::far_end::FarEndReference;
use crate::playback::{AudioSink, PlaybackController};
use crate::session::SessionCapture;
use crate::vad::{SegmentEvent, SpeechClassifier, VoiceActivitySegmenter};
use crate::wake::{WakeWordDetector, WakeWordGate};
use crate::worker::{Task, TaskSender};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handles shared between the audio thread, the worker and the watchdog.
#[derive(Clone)]
pub struct SharedState {
    pub far_end: Arc<FarEndReference>,
    pub playback: Arc<PlaybackController>,
    pub session: Arc<SessionCapture>,
    /// Set while an utterance is being transcribed and answered
    pub processing: Arc<AtomicBool>,
}

impl SharedState {
    pub fn new(config: &PipelineConfig, sink: Arc<dyn AudioSink>) -> Self {
        let far_end = Arc::new(FarEndReference::new(
            config.far_capacity_samples(),
            config.far_delay_samples(),
        ));
        let playback = Arc::new(PlaybackController::new(
            sink,
            Arc::clone(&far_end),
            config.sample_rate,
        ));
        Self {
            far_end,
            playback,
            session: Arc::new(SessionCapture::new()),
            processing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn set_processing(&self, value: bool) {
        self.processing.store(value, Ordering::Release);
    }
}

/// What one block did, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockReport {
    /// Wake and VAD were skipped while an utterance is processed
    pub skipped: bool,
    pub woke: bool,
    pub barge_in: bool,
    pub speech_started: bool,
    /// Samples in the utterance completed by this block
    pub utterance_samples: Option<usize>,
}

/// Audio thread state.
pub struct Pipeline {
    shared: SharedState,
    echo: EchoCanceller,
    gate: WakeWordGate,
    segmenter: VoiceActivitySegmenter,
    tasks: TaskSender,
    far_buf: Vec<i16>,
    clean_buf: Vec<i16>,
    last_len: usize,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        shared: SharedState,
        echo: EchoCanceller,
        detector: Box<dyn WakeWordDetector>,
        classifier: Box<dyn SpeechClassifier>,
        tasks: TaskSender,
    ) -> Result<Self> {
        config.validate()?;

        let gate = WakeWordGate::new(
            detector,
            config.sample_rate,
            config.wake_decimation(),
            config.block_size,
        )?;
        let segmenter = VoiceActivitySegmenter::new(
            classifier,
            config.vad_frame_size,
            config.ring_capacity,
            config.vad_input_gain,
            config.start_ratio,
            config.end_ratio,
        );

        Ok(Self {
            shared,
            echo,
            gate,
            segmenter,
            tasks,
            far_buf: vec![0; config.block_size],
            clean_buf: vec![0; config.block_size],
            last_len: 0,
        })
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    pub fn is_armed(&self) -> bool {
        self.gate.is_armed()
    }

    /// The echo-cancelled copy of the last processed block.
    pub fn last_clean(&self) -> &[i16] {
        &self.clean_buf[..self.last_len]
    }

    /// Processes one microphone block. Never blocks on I/O.
    pub fn process_block(&mut self, mic: &[i16]) -> BlockReport {
        let mut report = BlockReport::default();
        let n = mic.len();
        if n > self.far_buf.len() {
            log::warn!("Block of {} samples exceeds configured size, growing buffers", n);
            self.far_buf.resize(n, 0);
            self.clean_buf.resize(n, 0);
        }

        let far = &mut self.far_buf[..n];
        self.shared.far_end.read_into(far);

        let clean = &mut self.clean_buf[..n];
        self.echo.cancel_into(mic, far, clean);
        let clean = &self.clean_buf[..n];
        self.last_len = n;

        self.shared.session.append(clean);

        let playing = self.shared.playback.is_active();
        if self.shared.is_processing() && !playing {
            report.skipped = true;
            return report;
        }

        if self.gate.observe(clean) {
            report.woke = true;
            self.segmenter.reset();
            self.shared.session.begin();
            if playing {
                log::info!("Barge-in: stopping reply");
                self.shared.playback.request_stop();
                report.barge_in = true;
            }
            self.tasks.submit(Task::Acknowledge { barge_in: playing });
        }

        if !self.gate.is_armed() {
            return report;
        }

        match self.segmenter.push_block(clean) {
            SegmentEvent::Nothing => {}
            SegmentEvent::SpeechStarted => report.speech_started = true,
            SegmentEvent::SpeechEnded(utterance) => {
                self.gate.disarm();
                let samples = utterance.samples();
                report.utterance_samples = Some(samples.len());
                let session = self.shared.session.generation();
                self.shared.set_processing(true);
                if !self.tasks.submit(Task::Utterance { samples, session }) {
                    self.shared.set_processing(false);
                }
            }
        }
        report
    }
}
