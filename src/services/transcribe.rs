//! Transcription service client
//!
//! Uploads one encoded utterance as a multipart form and returns the
//! transcript text. Non-2xx responses and `success = false` bodies are both
//! treated as failures.

use super::map_request_error;
use crate::audio::EncodedUtterance;
use crate::{ParlanceError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Seam for the remote transcription service
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance. The utterance is consumed; it is never
    /// reused after being handed to the service.
    async fn transcribe(&self, utterance: EncodedUtterance) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    success: bool,
    #[serde(default)]
    transcription: Option<String>,
}

/// HTTP transcription client (`POST {base}/transcribe`)
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTranscriber {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: super::build_client(timeout)?,
            base_url: base_url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, utterance: EncodedUtterance) -> Result<String> {
        let url = format!("{}/transcribe", self.base_url);
        let session = utterance.session_id;

        let part = reqwest::multipart::Part::bytes(utterance.bytes)
            .file_name("voice.wav")
            .mime_str(utterance.mime)
            .map_err(|e| ParlanceError::Config(format!("Invalid audio mime type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("audio", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(ParlanceError::Service(format!(
                "Transcription service returned {}",
                response.status()
            )));
        }

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| ParlanceError::Service(format!("Malformed transcription body: {}", e)))?;

        if !body.success {
            return Err(ParlanceError::Service(
                "Transcription service reported failure".into(),
            ));
        }

        let text = body.transcription.unwrap_or_default();
        debug!(
            "Session {} transcribed to {} chars",
            session.value(),
            text.len()
        );
        Ok(text)
    }
}
