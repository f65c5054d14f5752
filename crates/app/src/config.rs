use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use voxgate_core::PipelineConfig;

/// Application configuration persisted between runs.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AppConfig {
    #[serde(default = "default_device")]
    pub input_device: String,
    #[serde(default = "default_device")]
    pub output_device: String,
    #[serde(default = "default_transcribe_url")]
    pub transcribe_url: String,
    #[serde(default = "default_synthesize_url")]
    pub synthesize_url: String,
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_car_url")]
    pub car_url: String,
    /// Where capture artifacts are written. Empty means the data directory.
    #[serde(default)]
    pub artifact_dir: String,
    #[serde(default = "default_acknowledgement")]
    pub acknowledgement: String,
    #[serde(default = "default_far_delay_ms")]
    pub far_delay_ms: u32,
    #[serde(default = "default_vad_mode")]
    pub vad_mode: i32,
    #[serde(default = "default_true")]
    pub echo_cancel_enabled: bool,
    #[serde(default = "default_true")]
    pub manual_trigger: bool,
}

fn default_device() -> String {
    "default".to_string()
}

fn default_transcribe_url() -> String {
    "http://127.0.0.1:8000/transcribe".to_string()
}

fn default_synthesize_url() -> String {
    "http://127.0.0.1:8000/speak".to_string()
}

fn default_chat_url() -> String {
    "http://127.0.0.1:11434/api/chat".to_string()
}

fn default_chat_model() -> String {
    "llama3".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant, but you speak concisely.".to_string()
}

fn default_car_url() -> String {
    "ws://127.0.0.1:5000/echo".to_string()
}

fn default_acknowledgement() -> String {
    "Yes?".to_string()
}

fn default_far_delay_ms() -> u32 {
    voxgate_core::constants::FAR_DELAY_MS
}

fn default_vad_mode() -> i32 {
    3 // 0-3, 3 is most aggressive
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_device: default_device(),
            output_device: default_device(),
            transcribe_url: default_transcribe_url(),
            synthesize_url: default_synthesize_url(),
            chat_url: default_chat_url(),
            chat_model: default_chat_model(),
            system_prompt: default_system_prompt(),
            car_url: default_car_url(),
            artifact_dir: String::new(),
            acknowledgement: default_acknowledgement(),
            far_delay_ms: default_far_delay_ms(),
            vad_mode: default_vad_mode(),
            echo_cancel_enabled: true,
            manual_trigger: true,
        }
    }
}

impl AppConfig {
    /// Loads configuration from disk, or returns default if not found.
    pub fn load() -> Self {
        if let Some(path) = config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(cfg) => return cfg,
                    Err(e) => log::warn!("Ignoring malformed {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    /// Saves configuration to disk in JSON format.
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = config_path().ok_or_else(|| anyhow::anyhow!("No config directory"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Pipeline parameters derived from this configuration.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            far_delay_ms: self.far_delay_ms,
            vad_mode: self.vad_mode,
            echo_cancel_enabled: self.echo_cancel_enabled,
            ..PipelineConfig::default()
        }
    }

    /// Directory for capture artifacts.
    pub fn artifact_dir(&self) -> PathBuf {
        if !self.artifact_dir.is_empty() {
            return PathBuf::from(&self.artifact_dir);
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().join("captures"))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "voxgate", "voxgate")
}

pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.json"))
}
