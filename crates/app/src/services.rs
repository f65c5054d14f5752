//! HTTP collaborators: transcription, response generation and speech synthesis.
//!
//! Every call degrades to an empty result on failure so the interaction can continue.

use crate::config::AppConfig;
use crate::dialogue::{ChatMessage, ConversationHistory};
use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub trait Transcriber: Send {
    /// Transcribes a WAV clip. Empty on failure.
    fn transcribe(&self, wav: &[u8]) -> String;
}

pub trait Responder: Send {
    /// Generates a reply to the last user turn of `history`. Empty on failure.
    fn respond(&self, history: &ConversationHistory) -> String;
}

pub trait Synthesizer: Send {
    /// Synthesizes `text` into an encoded WAV clip.
    fn synthesize(&self, text: &str) -> Option<Vec<u8>>;
}

#[derive(Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    transcript: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize, Default)]
struct ChatReply {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ChatReply,
}

/// Blocking HTTP client for all three services.
#[derive(Clone)]
pub struct HttpServices {
    client: Client,
    transcribe_url: String,
    synthesize_url: String,
    chat_url: String,
    chat_model: String,
}

impl HttpServices {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent("voxgate")
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            transcribe_url: config.transcribe_url.clone(),
            synthesize_url: config.synthesize_url.clone(),
            chat_url: config.chat_url.clone(),
            chat_model: config.chat_model.clone(),
        })
    }

    fn try_transcribe(&self, wav: &[u8]) -> Result<String> {
        let part = Part::bytes(wav.to_vec())
            .file_name("clip.wav")
            .mime_str("audio/wav")?;
        let response = self
            .client
            .post(&self.transcribe_url)
            .multipart(Form::new().part("file", part))
            .send()
            .context("Transcription request failed")?;

        if !response.status().is_success() {
            bail!("transcription server returned {}", response.status());
        }
        let body: TranscriptResponse = response
            .json()
            .context("Failed to parse transcription response")?;
        Ok(body.transcript.trim().to_string())
    }

    fn try_respond(&self, history: &ConversationHistory) -> Result<String> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages: history.messages(),
            stream: false,
        };
        let response = self
            .client
            .post(&self.chat_url)
            .json(&request)
            .send()
            .context("Chat request failed")?;

        if !response.status().is_success() {
            bail!("chat server returned {}", response.status());
        }
        let body: ChatResponse = response.json().context("Failed to parse chat response")?;
        Ok(body.message.content.trim().to_string())
    }

    fn try_synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.synthesize_url)
            .multipart(Form::new().text("text", text.to_string()))
            .send()
            .context("Synthesis request failed")?;

        if !response.status().is_success() {
            bail!("synthesis server returned {}", response.status());
        }
        let bytes = response.bytes().context("Failed to read synthesized audio")?;
        Ok(bytes.to_vec())
    }
}

impl Transcriber for HttpServices {
    fn transcribe(&self, wav: &[u8]) -> String {
        self.try_transcribe(wav).unwrap_or_else(|e| {
            log::warn!("Transcription failed: {:#}", e);
            String::new()
        })
    }
}

impl Responder for HttpServices {
    fn respond(&self, history: &ConversationHistory) -> String {
        self.try_respond(history).unwrap_or_else(|e| {
            log::warn!("Response generation failed: {:#}", e);
            String::new()
        })
    }
}

impl Synthesizer for HttpServices {
    fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        match self.try_synthesize(text) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => {
                log::warn!("Synthesis returned no audio");
                None
            }
            Err(e) => {
                log::warn!("Speech synthesis failed: {:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_services() -> HttpServices {
        // Port 9 (discard) on localhost is closed in test environments
        let config = AppConfig {
            transcribe_url: "http://127.0.0.1:9/transcribe".to_string(),
            synthesize_url: "http://127.0.0.1:9/speak".to_string(),
            chat_url: "http://127.0.0.1:9/api/chat".to_string(),
            ..AppConfig::default()
        };
        HttpServices::new(&config).unwrap()
    }

    #[test]
    fn test_failures_degrade_to_empty() {
        let services = unreachable_services();
        assert_eq!(services.transcribe(b"RIFF"), "");
        assert_eq!(services.respond(&ConversationHistory::new("sys")), "");
        assert!(services.synthesize("hello").is_none());
    }

    #[test]
    fn test_chat_request_shape() {
        let mut history = ConversationHistory::new("sys");
        history.push_user("hi");
        let request = ChatRequest {
            model: "llama3",
            messages: history.messages(),
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_response_parsing_tolerates_missing_fields() {
        let reply: ChatResponse = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert_eq!(reply.message.content, "");
        let reply: ChatResponse =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":"Hi"}}"#).unwrap();
        assert_eq!(reply.message.content, "Hi");
        let transcript: TranscriptResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(transcript.transcript, "");
    }
}
