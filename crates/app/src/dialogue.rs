//! Conversation state and transcript interpretation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Turns kept after the system prompt (20 exchanges).
pub const MAX_HISTORY_TURNS: usize = 40;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// System prompt followed by the most recent user/assistant turns.
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(system_prompt: &str) -> Self {
        Self::with_limit(system_prompt, MAX_HISTORY_TURNS)
    }

    pub fn with_limit(system_prompt: &str, max_turns: usize) -> Self {
        Self {
            messages: vec![ChatMessage::new("system", system_prompt)],
            max_turns,
        }
    }

    pub fn push_user(&mut self, content: &str) {
        self.push(ChatMessage::new("user", content));
    }

    pub fn push_assistant(&mut self, content: &str) {
        self.push(ChatMessage::new("assistant", content));
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        let excess = self.messages.len().saturating_sub(self.max_turns + 1);
        if excess > 0 {
            // Oldest non-system turns go first
            self.messages.drain(1..1 + excess);
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Movement commands understood by the car.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    StopTurn,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Forward => "forward",
            Command::Backward => "backward",
            Command::Left => "left",
            Command::Right => "right",
            Command::StopTurn => "stop turn",
        }
    }

    /// Control messages sent to the car, in order.
    pub fn messages(&self) -> [&'static str; 2] {
        match self {
            Command::Forward => ["forward:1", "backward:0"],
            Command::Backward => ["backward:1", "forward:0"],
            Command::Left => ["left:1", "right:0"],
            Command::Right => ["right:1", "left:0"],
            Command::StopTurn => ["left:0", "right:0"],
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finds a movement command among the whole words of `transcript`.
pub fn parse_command(transcript: &str) -> Option<Command> {
    let lower = transcript.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    let has = |word: &str| words.contains(&word);

    if has("forward") {
        Some(Command::Forward)
    } else if has("backward") {
        Some(Command::Backward)
    } else if has("left") {
        Some(Command::Left)
    } else if has("right") {
        Some(Command::Right)
    } else if has("stop") && has("turn") {
        Some(Command::StopTurn)
    } else {
        None
    }
}
