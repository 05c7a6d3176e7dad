//! External collaborators reached by commands
//!
//! Calendar, weather, device location, and deep-link targets are thin
//! out-of-scope collaborators; they are specified here only at their
//! interface, with small default implementations for live wiring.

use crate::{ParlanceError, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Calendar collaborator
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Human/model-readable description of events over the next `days` days
    async fn upcoming_events(&self, days: u32) -> Result<String>;
}

/// Weather collaborator
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Current conditions for a resolved location name
    async fn current(&self, location: &str) -> Result<String>;
}

/// Device-location collaborator, used to resolve the "here" argument
#[async_trait]
pub trait Locator: Send + Sync {
    async fn current_location(&self) -> Result<String>;
}

/// How a deep link ended up being opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenedLink {
    Native,
    WebFallback,
}

/// Deep-link collaborator: try the native URI first, fall back to the web URL
#[async_trait]
pub trait LinkOpener: Send + Sync {
    async fn open(&self, native: &str, web: &str) -> Result<OpenedLink>;
}

/// Native and web search links for a Spotify query
pub fn spotify_links(query: &str) -> (String, String) {
    let encoded = urlencoding::encode(query);
    (
        format!("spotify:search:{}", encoded),
        format!("https://open.spotify.com/search/{}", encoded),
    )
}

/// Native and web search links for a LinkedIn query
pub fn linkedin_links(query: &str) -> (String, String) {
    let encoded = urlencoding::encode(query);
    (
        format!("linkedin://search?keywords={}", encoded),
        format!(
            "https://www.linkedin.com/search/results/all/?keywords={}",
            encoded
        ),
    )
}

/// Opens links through the OS url handler
pub struct SystemLinkOpener;

impl SystemLinkOpener {
    fn opener_command() -> &'static str {
        if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else {
            "xdg-open"
        }
    }

    async fn launch(url: String) -> Result<()> {
        let program = Self::opener_command();
        let status = tokio::process::Command::new(program)
            .arg(&url)
            .status()
            .await
            .map_err(|e| ParlanceError::Command(format!("Failed to launch {}: {}", program, e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(ParlanceError::Command(format!(
                "{} exited with {} for {}",
                program, status, url
            )))
        }
    }
}

#[async_trait]
impl LinkOpener for SystemLinkOpener {
    async fn open(&self, native: &str, web: &str) -> Result<OpenedLink> {
        match Self::launch(native.to_string()).await {
            Ok(()) => {
                debug!("Opened native link {}", native);
                Ok(OpenedLink::Native)
            }
            Err(e) => {
                warn!("Native link failed ({}), falling back to web", e);
                Self::launch(web.to_string()).await?;
                Ok(OpenedLink::WebFallback)
            }
        }
    }
}

/// Fixed-location resolver for installs without a location service
pub struct FixedLocator {
    location: String,
}

impl FixedLocator {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

#[async_trait]
impl Locator for FixedLocator {
    async fn current_location(&self) -> Result<String> {
        Ok(self.location.clone())
    }
}

/// Calendar stand-in for installs without a calendar integration
pub struct NoCalendar;

#[async_trait]
impl CalendarProvider for NoCalendar {
    async fn upcoming_events(&self, _days: u32) -> Result<String> {
        Ok("No calendars found".to_string())
    }
}

/// Weather stand-in that reports the service as unconfigured
pub struct NoWeather;

#[async_trait]
impl WeatherProvider for NoWeather {
    async fn current(&self, _location: &str) -> Result<String> {
        Err(ParlanceError::Command(
            "No weather provider configured".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spotify_links_are_encoded() {
        let (native, web) = spotify_links("lofi beats");
        assert_eq!(native, "spotify:search:lofi%20beats");
        assert_eq!(web, "https://open.spotify.com/search/lofi%20beats");
    }

    #[test]
    fn test_linkedin_links_are_encoded() {
        let (native, web) = linkedin_links("rust & embedded");
        assert!(native.starts_with("linkedin://search?keywords=rust%20%26%20embedded"));
        assert!(web.contains("keywords=rust%20%26%20embedded"));
    }

    #[tokio::test]
    async fn test_fixed_locator() {
        let locator = FixedLocator::new("Islamabad");
        assert_eq!(locator.current_location().await.unwrap(), "Islamabad");
    }
}
