//! Interaction worker: acknowledgements, transcription, replies and artifacts.

use crate::car::CommandLink;
use crate::dialogue::{parse_command, ConversationHistory};
use crate::services::{Responder, Synthesizer, Transcriber};
use anyhow::Result;
use std::path::PathBuf;
use voxgate_core::resample::resample;
use voxgate_core::wav::{decode_wav, encode_wav, write_wav};
use voxgate_core::{PlaybackOutcome, SharedState, Task, TaskHandler};

pub const UTTERANCE_FILE: &str = "mic_voiced_input.wav";
pub const SESSION_FILE: &str = "interaction_session.wav";

/// External services the assistant talks to.
pub struct Collaborators {
    pub transcriber: Box<dyn Transcriber>,
    pub responder: Box<dyn Responder>,
    pub synthesizer: Box<dyn Synthesizer>,
    pub car: Box<dyn CommandLink>,
}

pub struct AssistantSettings {
    pub sample_rate: u32,
    pub session_tail_samples: usize,
    pub artifact_dir: PathBuf,
    pub acknowledgement: String,
    pub system_prompt: String,
}

pub struct Assistant {
    shared: SharedState,
    services: Collaborators,
    settings: AssistantSettings,
    history: ConversationHistory,
}

impl Assistant {
    pub fn new(shared: SharedState, services: Collaborators, settings: AssistantSettings) -> Self {
        let history = ConversationHistory::new(&settings.system_prompt);
        Self {
            shared,
            services,
            settings,
            history,
        }
    }

    fn acknowledge(&mut self, barge_in: bool) -> Result<()> {
        if barge_in {
            log::info!("Barge-in: replacing reply with acknowledgement");
        }
        self.shared.playback.interrupt("wake word");
        if let Some(audio) = self.prepare(&self.settings.acknowledgement) {
            self.shared.playback.play(&audio)?;
        }
        Ok(())
    }

    fn answer(&mut self, samples: Vec<i16>, session: u64) -> Result<()> {
        let rate = self.settings.sample_rate;
        let capture = self.settings.artifact_dir.join(UTTERANCE_FILE);
        if let Err(e) = write_wav(&capture, &samples, rate) {
            log::warn!("Failed to save utterance: {:#}", e);
        }

        let clip = encode_wav(&samples, rate)?;
        let transcript = self.services.transcriber.transcribe(&clip);
        log::info!("Transcript: {:?}", transcript);

        let reply = match parse_command(&transcript) {
            Some(command) => {
                log::info!("Parsed command: {}", command);
                self.services.car.send(command);
                format!("Executing command: {}", command)
            }
            None => {
                self.history.push_user(&transcript);
                let reply = self.services.responder.respond(&self.history);
                if !reply.is_empty() {
                    self.history.push_assistant(&reply);
                }
                log::debug!("History holds {} turns", self.history.len());
                log::info!("Response: {:?}", reply);
                reply
            }
        };

        let outcome = match self.prepare(&reply) {
            // Processing is cleared only once the reply is registered as playing
            Some(audio) => {
                let shared = &self.shared;
                shared
                    .playback
                    .play_with(&audio, || shared.set_processing(false))
                    .map(Some)
            }
            None => Ok(None),
        };
        if let Ok(Some(PlaybackOutcome::Interrupted)) = outcome {
            log::debug!("Reply to session {} was interrupted", session);
        }
        self.finish_session(session);
        outcome.map(|_| ())
    }

    /// Synthesizes, decodes and resamples `text`. `None` if there is nothing playable.
    fn prepare(&self, text: &str) -> Option<Vec<i16>> {
        if text.trim().is_empty() {
            return None;
        }
        let encoded = self.services.synthesizer.synthesize(text)?;

        let clip = match decode_wav(&encoded) {
            Ok(clip) => clip,
            Err(e) => {
                log::warn!("Discarding malformed synthesized audio: {:#}", e);
                return None;
            }
        };
        match resample(&clip.samples, clip.sample_rate, self.settings.sample_rate) {
            Ok(audio) => Some(audio),
            Err(e) => {
                log::warn!("Failed to resample synthesized audio: {:#}", e);
                None
            }
        }
    }

    /// Saves session `generation`, unless a newer wake word already replaced it.
    fn finish_session(&self, generation: u64) {
        let tail = self.settings.session_tail_samples;
        let Some(samples) = self.shared.session.finish(generation, tail) else {
            return;
        };
        let path = self.settings.artifact_dir.join(SESSION_FILE);
        match write_wav(&path, &samples, self.settings.sample_rate) {
            Ok(()) => log::info!("Saved session to {}", path.display()),
            Err(e) => log::warn!("Failed to save session: {:#}", e),
        }
    }
}

impl TaskHandler for Assistant {
    fn handle(&mut self, task: Task) -> Result<()> {
        match task {
            Task::Acknowledge { barge_in } => self.acknowledge(barge_in),
            Task::Utterance { samples, session } => {
                let result = self.answer(samples, session);
                self.shared.set_processing(false);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::Command;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};
    use voxgate_core::{AudioSink, CancelToken, PipelineConfig};

    #[derive(Default)]
    struct Log {
        spoken: Vec<String>,
        prompts: Vec<Vec<String>>,
        commands: Vec<Command>,
        /// Whether wake and VAD would have run during each synthesis
        listening_during_synthesis: Vec<bool>,
    }

    type Shared = Arc<Mutex<Log>>;

    struct FakeTranscriber(String);

    impl Transcriber for FakeTranscriber {
        fn transcribe(&self, wav: &[u8]) -> String {
            assert_eq!(&wav[..4], b"RIFF");
            self.0.clone()
        }
    }

    struct FakeResponder(Shared);

    impl Responder for FakeResponder {
        fn respond(&self, history: &ConversationHistory) -> String {
            let turns = history.messages().iter().map(|m| m.content.clone()).collect();
            self.0.lock().unwrap().prompts.push(turns);
            "Hello there".to_string()
        }
    }

    /// Returns 100ms of audio at 24kHz, or garbage for "garble".
    struct FakeSynthesizer(Shared, SharedState);

    impl Synthesizer for FakeSynthesizer {
        fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
            let state = &self.1;
            let listening = !(state.is_processing() && !state.playback.is_active());
            let mut log = self.0.lock().unwrap();
            log.spoken.push(text.to_string());
            log.listening_during_synthesis.push(listening);
            if text == "garble" {
                return Some(b"not audio".to_vec());
            }
            Some(encode_wav(&[1000; 2400], 24000).unwrap())
        }
    }

    struct FakeCar(Shared);

    impl CommandLink for FakeCar {
        fn send(&self, command: Command) {
            self.0.lock().unwrap().commands.push(command);
        }
    }

    /// Records clip lengths; optionally runs a hook and blocks until cancelled.
    #[derive(Default)]
    struct ScriptedSink {
        played: Mutex<Vec<usize>>,
        on_play: Mutex<Option<Box<dyn FnMut() + Send>>>,
        wait_for_cancel: bool,
    }

    impl AudioSink for ScriptedSink {
        fn play(&self, samples: &[i16], _: u32, cancel: &CancelToken) -> Result<()> {
            self.played.lock().unwrap().push(samples.len());
            if let Some(hook) = self.on_play.lock().unwrap().as_mut() {
                hook();
            }
            let start = Instant::now();
            while self.wait_for_cancel && !cancel.is_cancelled() {
                assert!(start.elapsed() < Duration::from_secs(5), "Never cancelled");
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    struct Fixture {
        assistant: Assistant,
        shared: SharedState,
        log: Shared,
        sink: Arc<ScriptedSink>,
    }

    fn fixture_with_sink(transcript: &str, dir: &std::path::Path, sink: ScriptedSink) -> Fixture {
        let log: Shared = Arc::default();
        let sink = Arc::new(sink);
        let config = PipelineConfig::default();
        let shared = SharedState::new(&config, sink.clone());
        let services = Collaborators {
            transcriber: Box::new(FakeTranscriber(transcript.to_string())),
            responder: Box::new(FakeResponder(log.clone())),
            synthesizer: Box::new(FakeSynthesizer(log.clone(), shared.clone())),
            car: Box::new(FakeCar(log.clone())),
        };
        let settings = AssistantSettings {
            sample_rate: config.sample_rate,
            session_tail_samples: config.session_tail_samples(),
            artifact_dir: dir.to_path_buf(),
            acknowledgement: "Yes?".to_string(),
            system_prompt: "sys".to_string(),
        };
        Fixture {
            assistant: Assistant::new(shared.clone(), services, settings),
            shared,
            log,
            sink,
        }
    }

    fn fixture(transcript: &str, dir: &std::path::Path) -> Fixture {
        fixture_with_sink(transcript, dir, ScriptedSink::default())
    }

    /// Mirrors the audio thread handing off a finished utterance.
    fn hand_off(shared: &SharedState, samples: Vec<i16>) -> Task {
        shared.set_processing(true);
        Task::Utterance {
            samples,
            session: shared.session.generation(),
        }
    }

    #[test]
    fn test_command_utterance() {
        let dir = tempfile::tempdir().unwrap();
        let Fixture {
            mut assistant,
            shared,
            log,
            ..
        } = fixture("Please move forward", dir.path());
        shared.session.begin();

        assistant.handle(hand_off(&shared, vec![10; 1440])).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.commands, vec![Command::Forward]);
        assert_eq!(log.spoken, vec!["Executing command: forward"]);
        assert!(log.prompts.is_empty(), "Commands bypass response generation");
        assert!(!shared.is_processing());
        assert!(!shared.session.is_active());
        assert!(dir.path().join(UTTERANCE_FILE).exists());
        assert!(dir.path().join(SESSION_FILE).exists());
    }

    #[test]
    fn test_chat_utterance_updates_history() {
        let dir = tempfile::tempdir().unwrap();
        let Fixture {
            mut assistant,
            shared,
            log,
            sink,
        } = fixture("what time is it", dir.path());

        assistant.handle(hand_off(&shared, vec![0; 1440])).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.prompts, vec![vec!["sys".to_string(), "what time is it".to_string()]]);
        assert_eq!(log.spoken, vec!["Hello there"]);
        // 100ms at 24kHz resampled to 48kHz
        let played = sink.played.lock().unwrap()[0] as f64;
        assert!((played - 4800.0).abs() < 100.0, "Unexpected clip length {}", played);
        assert_eq!(assistant.history.len(), 3);
        assert!(!shared.is_processing());
    }

    #[test]
    fn test_listening_stays_off_until_reply_plays() {
        let dir = tempfile::tempdir().unwrap();
        let Fixture {
            mut assistant,
            shared,
            log,
            sink,
        } = fixture("what time is it", dir.path());
        let state = shared.clone();
        let at_start = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&at_start);
        *sink.on_play.lock().unwrap() = Some(Box::new(move || {
            *seen.lock().unwrap() = Some((state.is_processing(), state.playback.is_active()));
        }));

        assistant.handle(hand_off(&shared, vec![0; 1440])).unwrap();

        assert_eq!(
            log.lock().unwrap().listening_during_synthesis,
            vec![false],
            "Wake and VAD must stay skipped while the reply is synthesized"
        );
        assert_eq!(
            *at_start.lock().unwrap(),
            Some((false, true)),
            "Listening resumes once the reply is playing"
        );
        sink.on_play.lock().unwrap().take();
    }

    #[test]
    fn test_reply_ending_after_new_wake_keeps_new_session() {
        let dir = tempfile::tempdir().unwrap();
        let Fixture {
            mut assistant,
            shared,
            sink,
            ..
        } = fixture("what time is it", dir.path());
        shared.session.begin();
        let task = hand_off(&shared, vec![0; 1440]);

        // A wake word lands near the end of the reply, which then completes on its own
        let session = Arc::clone(&shared.session);
        *sink.on_play.lock().unwrap() = Some(Box::new(move || {
            session.begin();
            session.append(&[3; 1440]);
        }));

        assistant.handle(task).unwrap();

        assert!(shared.session.is_active(), "The new interaction must keep recording");
        assert_eq!(shared.session.len(), 1440);
        assert!(!dir.path().join(SESSION_FILE).exists());
    }

    #[test]
    fn test_interrupted_reply_leaves_new_session_open() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ScriptedSink {
            wait_for_cancel: true,
            ..ScriptedSink::default()
        };
        let Fixture {
            mut assistant,
            shared,
            ..
        } = fixture_with_sink("what time is it", dir.path(), sink);
        shared.session.begin();
        let task = hand_off(&shared, vec![0; 1440]);

        let worker = thread::spawn(move || {
            let result = assistant.handle(task);
            (assistant, result)
        });

        let start = Instant::now();
        while !shared.playback.is_active() {
            assert!(start.elapsed() < Duration::from_secs(2), "Reply never started");
            thread::sleep(Duration::from_millis(1));
        }
        // Barge-in: the audio thread begins a session, the watchdog interrupts
        shared.session.begin();
        shared.playback.interrupt("wake word");

        let (_assistant, result) = worker.join().unwrap();
        result.unwrap();
        assert!(shared.session.is_active());
        assert!(!shared.is_processing());
        assert!(shared.far_end.is_empty());
        assert!(!dir.path().join(SESSION_FILE).exists());
    }

    #[test]
    fn test_acknowledge_interrupts_and_speaks() {
        let dir = tempfile::tempdir().unwrap();
        let Fixture {
            mut assistant,
            shared,
            log,
            ..
        } = fixture("", dir.path());
        shared.far_end.write(&[5; 9600]);
        shared.playback.request_stop();

        assistant.handle(Task::Acknowledge { barge_in: true }).unwrap();

        assert_eq!(log.lock().unwrap().spoken, vec!["Yes?"]);
        assert!(!shared.playback.stop_requested());
        // Only the acknowledgement is left as far-end reference
        let len = shared.far_end.len() as f64;
        assert!((len - 4800.0).abs() < 100.0, "Unexpected far-end length {}", len);
    }

    #[test]
    fn test_malformed_audio_abandons_playback() {
        let dir = tempfile::tempdir().unwrap();
        let Fixture {
            assistant,
            shared,
            sink,
            ..
        } = fixture("", dir.path());
        assert_eq!(assistant.prepare("garble"), None);
        assert!(sink.played.lock().unwrap().is_empty());
        assert!(shared.far_end.is_empty());
    }

    #[test]
    fn test_empty_reply_still_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let Fixture {
            assistant,
            shared,
            log,
            ..
        } = fixture("", dir.path());
        let generation = shared.session.begin();
        assert_eq!(assistant.prepare("  "), None);
        assert!(log.lock().unwrap().spoken.is_empty());

        assistant.finish_session(generation);
        assert!(!shared.session.is_active());
        assert!(dir.path().join(SESSION_FILE).exists());
    }
}
