//! Speech-synthesis service client
//!
//! Converts reply text into encoded audio via the backend's `/speak` route.

use super::map_request_error;
use crate::{ParlanceError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Seam for the remote speech synthesizer
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` and return the encoded audio bytes
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

/// HTTP synthesis client (`POST {base}/speak`)
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSynthesizer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: super::build_client(timeout)?,
            base_url: base_url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/speak", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(ParlanceError::Service(format!(
                "Synthesis service returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ParlanceError::Transport(e.to_string()))?;

        if bytes.is_empty() {
            return Err(ParlanceError::Service("Synthesis returned no audio".into()));
        }
        Ok(bytes.to_vec())
    }
}
