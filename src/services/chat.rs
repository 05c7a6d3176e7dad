//! Chat service client
//!
//! Sends the user's message together with the assistant-identity context and
//! a bounded history window; returns the model's reply text.

use super::{map_request_error, ChatContext, HistoryEntry};
use crate::{ParlanceError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Seam for the remote chat model
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn chat(
        &self,
        message: &str,
        context: &ChatContext,
        history: &[HistoryEntry],
    ) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    context: &'a ChatContext,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    history: &'a [HistoryEntry],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    response: String,
}

/// HTTP chat client (`POST {base}/chat`, `GET {base}/health`)
#[derive(Debug, Clone)]
pub struct HttpChat {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpChat {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: super::build_client(timeout)?,
            base_url: base_url.into(),
            timeout,
        })
    }

    /// Liveness probe against the backend
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Backend not available: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl ChatApi for HttpChat {
    async fn chat(
        &self,
        message: &str,
        context: &ChatContext,
        history: &[HistoryEntry],
    ) -> Result<String> {
        let url = format!("{}/chat", self.base_url);
        let request = ChatRequest {
            message,
            context,
            history,
        };

        debug!(
            "Chat call: {} chars, {} history entries",
            message.len(),
            history.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(ParlanceError::Service(format!(
                "Chat service returned {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ParlanceError::Service(format!("Malformed chat body: {}", e)))?;

        Ok(body.response)
    }
}
