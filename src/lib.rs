pub mod audio;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod services;
pub mod speech;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ParlanceError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Audio device busy: {0}")]
    DeviceBusy(String),

    #[error("Capture start error: {0}")]
    CaptureStart(String),

    #[error("No active capture")]
    NoActiveCapture,

    #[error("Network timeout after {0:?}")]
    NetworkTimeout(std::time::Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl From<std::io::Error> for ParlanceError {
    fn from(e: std::io::Error) -> Self {
        ParlanceError::Storage(e.to_string())
    }
}

impl ParlanceError {
    /// Check if this error is recoverable by a backoff-resume
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Permission denial requires user intervention; no resume
            ParlanceError::PermissionDenied => false,
            ParlanceError::DeviceBusy(_) => true,
            ParlanceError::CaptureStart(_) => true,
            ParlanceError::NoActiveCapture => true,
            ParlanceError::NetworkTimeout(_) => true,
            ParlanceError::Transport(_) => true,
            ParlanceError::Service(_) => true,
            ParlanceError::Command(_) => true,
            ParlanceError::Playback(_) => true,
            ParlanceError::Storage(_) => false,
            ParlanceError::Config(_) => false,
            ParlanceError::Channel(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            ParlanceError::PermissionDenied => {
                "Microphone access was denied. Please enable it in settings.".to_string()
            }
            ParlanceError::DeviceBusy(_) | ParlanceError::CaptureStart(_) => {
                "The microphone could not be started. Please try again.".to_string()
            }
            ParlanceError::NoActiveCapture => {
                "There is no recording in progress.".to_string()
            }
            ParlanceError::NetworkTimeout(_) => {
                "I'm sorry, I timed out waiting for a response. Please try again.".to_string()
            }
            ParlanceError::Transport(_) | ParlanceError::Service(_) => {
                "Sorry, I'm having trouble connecting.".to_string()
            }
            ParlanceError::Command(_) => {
                "I couldn't complete that action.".to_string()
            }
            ParlanceError::Playback(_) => {
                "Speech playback failed. The response is shown as text.".to_string()
            }
            ParlanceError::Storage(_) => {
                "File system error occurred.".to_string()
            }
            ParlanceError::Config(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            ParlanceError::Channel(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ParlanceError>;
