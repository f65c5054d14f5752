//! Movement command transport over a websocket.

use crate::dialogue::Command;
use anyhow::{Context, Result};
use tungstenite::Message;

pub trait CommandLink: Send {
    /// Delivers `command`. Failures are logged, never raised.
    fn send(&self, command: Command);
}

/// Opens a connection per command, as the car's echo server expects.
pub struct CarLink {
    url: String,
}

impl CarLink {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }

    fn try_send(&self, command: Command) -> Result<()> {
        let (mut socket, _) = tungstenite::connect(self.url.as_str())
            .with_context(|| format!("Failed to connect to {}", self.url))?;
        log::debug!("Connected to car at {}", self.url);

        for message in command.messages() {
            socket
                .send(Message::text(message))
                .with_context(|| format!("Failed to send '{}'", message))?;
        }
        let _ = socket.close(None);
        Ok(())
    }
}

impl CommandLink for CarLink {
    fn send(&self, command: Command) {
        match self.try_send(command) {
            Ok(()) => log::info!("Sent '{}' to car", command),
            Err(e) => log::warn!("Failed to send to car: {:#}", e),
        }
    }
}
