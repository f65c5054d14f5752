//! Manual wake trigger: pressing Enter stands in for the wake word.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use voxgate_core::WakeWordDetector;

/// Frame length reported to the gate (32ms at 16kHz, like Porcupine).
const TRIGGER_FRAME_LENGTH: usize = 512;

/// Detector that fires once per raised flag.
pub struct KeyboardTrigger {
    pressed: Arc<AtomicBool>,
}

impl KeyboardTrigger {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let pressed = Arc::new(AtomicBool::new(false));
        (
            Self {
                pressed: Arc::clone(&pressed),
            },
            pressed,
        )
    }
}

impl WakeWordDetector for KeyboardTrigger {
    fn frame_length(&self) -> usize {
        TRIGGER_FRAME_LENGTH
    }

    fn process(&mut self, _frame: &[i16]) -> Result<bool> {
        Ok(self.pressed.swap(false, Ordering::AcqRel))
    }
}

/// Raises `pressed` for every line read from stdin.
pub fn spawn_stdin_listener(pressed: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("voxgate-trigger".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if line.is_err() {
                    break;
                }
                log::debug!("Manual wake trigger");
                pressed.store(true, Ordering::Release);
            }
        })
        .context("Failed to spawn trigger thread")
}
