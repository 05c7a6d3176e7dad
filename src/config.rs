//! Configuration for the assistant loop
//!
//! Centralizes the tuning constants for endpointing, network timeouts,
//! and the backoff-resume schedule.

use crate::conversation::turn::ConversationMode;
use std::time::Duration;

/// Configuration for the complete assistant
#[derive(Clone, Debug)]
pub struct AssistantConfig {
    /// Display name of the assistant; doubles as the wake word
    pub assistant_name: String,

    /// Base URL of the backend (transcription, chat, speech synthesis)
    pub backend_url: String,

    /// Initial conversation mode
    pub mode: ConversationMode,

    /// Volume level below which a sample counts as silence
    pub silence_threshold: f32,

    /// Sustained silence required before the utterance is considered ended
    pub silence_hold: Duration,

    /// Cadence at which the capture backend emits volume samples
    pub sample_interval: Duration,

    /// Timeout for the transcription call
    pub transcribe_timeout: Duration,

    /// Timeout for each chat call
    pub chat_timeout: Duration,

    /// Timeout for the speech-synthesis call
    pub speak_timeout: Duration,

    /// Safety timeout covering any network-waiting phase of a turn
    pub safety_timeout: Duration,

    /// Resume delay after an empty transcript or wake-word mismatch
    pub discard_backoff: Duration,

    /// Resume delay after a transcription failure or safety timeout
    pub transcribe_backoff: Duration,

    /// Resume delay after a capture start failure
    pub capture_backoff: Duration,

    /// Resume delay after a chat failure
    pub chat_backoff: Duration,

    /// Number of prior messages sent as chat context
    pub history_window: usize,

    /// How many days ahead the calendar command looks
    pub calendar_days: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            assistant_name: "Jarvis".to_string(),
            backend_url: "http://localhost:8000/api".to_string(),
            mode: ConversationMode::PushToTalk,
            silence_threshold: 0.02,
            silence_hold: Duration::from_millis(1000),
            sample_interval: Duration::from_millis(100),
            transcribe_timeout: Duration::from_secs(15),
            chat_timeout: Duration::from_secs(25),
            speak_timeout: Duration::from_secs(15),
            safety_timeout: Duration::from_secs(15),
            discard_backoff: Duration::from_millis(500),
            transcribe_backoff: Duration::from_millis(1000),
            capture_backoff: Duration::from_millis(2000),
            chat_backoff: Duration::from_millis(3000),
            history_window: 10,
            calendar_days: 7,
        }
    }
}

impl AssistantConfig {
    /// Create a configuration for the given assistant name and backend
    pub fn new(assistant_name: impl Into<String>, backend_url: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            backend_url: backend_url.into(),
            ..Default::default()
        }
    }

    /// Load overrides from the environment (PARLANCE_NAME, PARLANCE_BACKEND_URL)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("PARLANCE_NAME") {
            config.assistant_name = name;
        }
        if let Ok(url) = std::env::var("PARLANCE_BACKEND_URL") {
            config.backend_url = url;
        }
        config
    }

    /// Set the initial conversation mode
    pub fn with_mode(mut self, mode: ConversationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the silence endpointing parameters
    pub fn with_endpointing(mut self, threshold: f32, hold: Duration) -> Self {
        self.silence_threshold = threshold;
        self.silence_hold = hold;
        self
    }

    /// Set the chat history window
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.assistant_name.trim().is_empty() {
            return Err("Assistant name must not be empty".to_string());
        }
        if self.backend_url.trim().is_empty() {
            return Err("Backend URL must not be empty".to_string());
        }
        if self.silence_hold.is_zero() {
            return Err("Silence hold must be greater than zero".to_string());
        }
        if self.history_window == 0 {
            return Err("History window must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AssistantConfig::default();
        assert_eq!(config.silence_hold, Duration::from_millis(1000));
        assert_eq!(config.speak_timeout, Duration::from_secs(15));
        assert_eq!(config.history_window, 10);
        assert_eq!(config.mode, ConversationMode::PushToTalk);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = AssistantConfig::new("Nova", "http://localhost:9000/api")
            .with_mode(ConversationMode::AlwaysOn)
            .with_endpointing(0.05, Duration::from_millis(800));

        assert_eq!(config.assistant_name, "Nova");
        assert_eq!(config.mode, ConversationMode::AlwaysOn);
        assert_eq!(config.silence_threshold, 0.05);
    }

    #[test]
    fn test_validation_rejects_empty_name() {
        let config = AssistantConfig::new("  ", "http://localhost:8000/api");
        assert!(config.validate().is_err());
    }
}
