pub mod config;
pub mod constants;
pub mod echo_cancel;
pub mod far_end;
pub mod pipeline;
pub mod playback;
pub mod resample;
pub mod session;
pub mod vad;
pub mod wake;
pub mod wav;
pub mod worker;

pub use config::PipelineConfig;
pub use echo_cancel::{EchoCanceller, EchoEngine};
pub use far_end::FarEndReference;
pub use pipeline::{BlockReport, Pipeline, SharedState};
pub use playback::{AudioSink, CancelToken, PlaybackController, PlaybackOutcome};
pub use session::SessionCapture;
pub use vad::{SpeechClassifier, VoiceActivitySegmenter, WebRtcClassifier};
pub use wake::{WakeWordDetector, WakeWordGate};
pub use worker::{Task, TaskHandler, TaskSender, WorkerPool};
