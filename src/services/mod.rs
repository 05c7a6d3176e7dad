//! Remote service clients
//!
//! The transcription, chat, and speech-synthesis services are opaque HTTP
//! collaborators. Each is reached through a trait seam so the loop can be
//! tested against doubles.

pub mod chat;
pub mod speak;
pub mod transcribe;

pub use chat::{ChatApi, HttpChat};
pub use speak::{HttpSynthesizer, Synthesizer};
pub use transcribe::{HttpTranscriber, Transcriber};

use crate::ParlanceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Assistant identity context sent with every chat call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(rename = "assistantName")]
    pub assistant_name: String,
}

impl ChatContext {
    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
        }
    }
}

/// One prior message in the chat-context window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

pub(crate) fn map_request_error(e: reqwest::Error, timeout: Duration) -> ParlanceError {
    if e.is_timeout() {
        ParlanceError::NetworkTimeout(timeout)
    } else {
        ParlanceError::Transport(e.to_string())
    }
}

pub(crate) fn build_client(timeout: Duration) -> crate::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ParlanceError::Config(format!("Failed to create HTTP client: {}", e)))
}
