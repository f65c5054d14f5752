//! Voice activity based utterance segmentation.
//!
//! A fixed-capacity ring of recent (frame, is_speech) decisions opens an utterance when
//! the speech ratio crosses a high threshold and closes it when the silence ratio crosses
//! an even higher one.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Speech/non-speech classifier for fixed-length frames.
pub trait SpeechClassifier: Send {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool>;
}

/// WebRTC VAD at the working sample rate.
pub struct WebRtcClassifier {
    vad: Vad,
}

// SAFETY: the Vad instance is exclusively owned and only used from the audio processing
// thread the classifier is moved to. It is never shared by reference (no Sync).
#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl Send for WebRtcClassifier {}

impl WebRtcClassifier {
    /// `mode` ranges from 0 (quality) to 3 (very aggressive).
    pub fn new(sample_rate: u32, mode: i32) -> Result<Self> {
        let rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => return Err(anyhow!("WebRTC VAD does not support {} Hz", other)),
        };
        let mode = match mode.clamp(0, 3) {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            _ => VadMode::VeryAggressive,
        };
        Ok(Self {
            vad: Vad::new_with_rate_and_mode(rate, mode),
        })
    }
}

impl SpeechClassifier for WebRtcClassifier {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool> {
        self.vad
            .is_voice_segment(frame)
            .map_err(|_| anyhow!("VAD error: invalid frame length {}", frame.len()))
    }
}

/// A completed utterance: every frame from speech start to speech end.
#[derive(Debug, Clone, Default)]
pub struct Utterance {
    pub frames: Vec<Vec<i16>>,
}

impl Utterance {
    /// Concatenated samples of all frames.
    pub fn samples(&self) -> Vec<i16> {
        self.frames.concat()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Outcome of feeding one frame to the segmenter
#[derive(Debug)]
pub enum SegmentEvent {
    Nothing,
    SpeechStarted,
    SpeechEnded(Utterance),
}

/// Ring-buffer segmenter
pub struct VoiceActivitySegmenter {
    classifier: Box<dyn SpeechClassifier>,
    ring: VecDeque<(Vec<i16>, bool)>,
    capacity: usize,
    utterance: Vec<Vec<i16>>,
    frame_size: usize,
    input_gain: f32,
    start_ratio: f32,
    end_ratio: f32,
    classify_errors: u64,
}

impl VoiceActivitySegmenter {
    pub fn new(
        classifier: Box<dyn SpeechClassifier>,
        frame_size: usize,
        capacity: usize,
        input_gain: f32,
        start_ratio: f32,
        end_ratio: f32,
    ) -> Self {
        Self {
            classifier,
            ring: VecDeque::with_capacity(capacity),
            capacity,
            utterance: Vec::new(),
            frame_size,
            input_gain,
            start_ratio,
            end_ratio,
            classify_errors: 0,
        }
    }

    /// Classifies the leading frame of `block` and advances the state machine.
    ///
    /// Blocks shorter than the classifier frame are ignored; longer ones are truncated.
    pub fn push_block(&mut self, block: &[i16]) -> SegmentEvent {
        if block.len() < self.frame_size {
            log::trace!("Block of {} samples too short for VAD", block.len());
            return SegmentEvent::Nothing;
        }

        let gain = self.input_gain;
        let frame: Vec<i16> = block[..self.frame_size]
            .iter()
            .map(|&s| (f32::from(s) * gain).clamp(-32768.0, 32767.0) as i16)
            .collect();

        let is_speech = match self.classifier.is_speech(&frame) {
            Ok(voiced) => voiced,
            Err(e) => {
                self.classify_errors += 1;
                if self.classify_errors == 1 || self.classify_errors % 100 == 0 {
                    log::error!("{}", e);
                }
                false
            }
        };

        self.push_labeled(frame, is_speech)
    }

    /// Advances the state machine with an already classified frame.
    pub fn push_labeled(&mut self, frame: Vec<i16>, is_speech: bool) -> SegmentEvent {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }

        if self.utterance.is_empty() {
            self.ring.push_back((frame, is_speech));

            let voiced = self.ring.iter().filter(|(_, s)| *s).count();
            if voiced as f32 > self.start_ratio * self.capacity as f32 {
                log::info!("Speech started");
                self.utterance.extend(self.ring.drain(..).map(|(f, _)| f));
                return SegmentEvent::SpeechStarted;
            }
            return SegmentEvent::Nothing;
        }

        // In-utterance: the ring only tracks labels for trailing-silence detection
        self.ring.push_back((Vec::new(), is_speech));
        self.utterance.push(frame);

        let silent = self.ring.iter().filter(|(_, s)| !*s).count();
        if silent as f32 > self.end_ratio * self.capacity as f32 {
            log::info!("Speech ended ({} frames)", self.utterance.len());
            let frames = std::mem::take(&mut self.utterance);
            self.ring.clear();
            return SegmentEvent::SpeechEnded(Utterance { frames });
        }
        SegmentEvent::Nothing
    }

    /// Clears the ring and any in-progress utterance.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.utterance.clear();
    }

    pub fn in_utterance(&self) -> bool {
        !self.utterance.is_empty()
    }

    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }

    pub fn utterance_frames(&self) -> usize {
        self.utterance.len()
    }
}
