//! Utterance playback lifecycle
//!
//! A new utterance supersedes whatever is currently playing. Superseded
//! utterances are cancelled and emit no outcome; an utterance that runs to
//! its end emits exactly one `SpeechOutcome`, success or failure alike.

use crate::services::Synthesizer;
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Identifies one utterance across its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtteranceId(u64);

impl UtteranceId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Terminal report for an utterance that was not superseded
#[derive(Debug)]
pub struct SpeechOutcome {
    pub utterance: UtteranceId,
    pub error: Option<String>,
}

/// Seam for actually producing sound from reply text
#[async_trait]
pub trait SpeechPlayer: Send + Sync {
    async fn play(&self, text: &str) -> Result<()>;
}

/// Seam for pushing encoded audio to an output device
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play_bytes(&self, audio: &[u8]) -> Result<()>;
}

/// Sink for headless installs; the audio is synthesized but not played
pub struct DiscardSink;

#[async_trait]
impl AudioSink for DiscardSink {
    async fn play_bytes(&self, audio: &[u8]) -> Result<()> {
        debug!("Discarding {} bytes of synthesized audio", audio.len());
        Ok(())
    }
}

/// Player that synthesizes over the network and hands the bytes to a sink
pub struct SynthesizedPlayer {
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
}

impl SynthesizedPlayer {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, sink: Arc<dyn AudioSink>) -> Self {
        Self { synthesizer, sink }
    }
}

#[async_trait]
impl SpeechPlayer for SynthesizedPlayer {
    async fn play(&self, text: &str) -> Result<()> {
        let audio = self.synthesizer.synthesize(text).await?;
        self.sink.play_bytes(&audio).await
    }
}

/// Player that only logs the reply text, for text-only installs
pub struct NullPlayer;

#[async_trait]
impl SpeechPlayer for NullPlayer {
    async fn play(&self, text: &str) -> Result<()> {
        debug!("Speaking: {}", text);
        Ok(())
    }
}

/// Owns the single in-flight utterance
pub struct SpeechPlaybackController {
    player: Arc<dyn SpeechPlayer>,
    outcomes: UnboundedSender<SpeechOutcome>,
    current: Option<(UtteranceId, JoinHandle<()>)>,
}

impl SpeechPlaybackController {
    pub fn new(player: Arc<dyn SpeechPlayer>, outcomes: UnboundedSender<SpeechOutcome>) -> Self {
        Self {
            player,
            outcomes,
            current: None,
        }
    }

    /// Start speaking `text`, superseding any utterance still in flight.
    /// The superseded utterance is cancelled and never reports an outcome.
    pub fn speak(&mut self, text: String) -> UtteranceId {
        self.cancel();

        let id = UtteranceId::next();
        let player = Arc::clone(&self.player);
        let outcomes = self.outcomes.clone();

        let handle = tokio::spawn(async move {
            let error = match player.play(&text).await {
                Ok(()) => None,
                Err(e) => {
                    warn!("Playback of utterance {:?} failed: {}", id, e);
                    Some(e.to_string())
                }
            };
            // Receiver gone means the loop is shutting down
            let _ = outcomes.send(SpeechOutcome {
                utterance: id,
                error,
            });
        });

        self.current = Some((id, handle));
        id
    }

    /// Cancel the in-flight utterance, if any, without an outcome
    pub fn cancel(&mut self) {
        if let Some((id, handle)) = self.current.take() {
            if !handle.is_finished() {
                debug!("Superseding utterance {:?}", id);
                handle.abort();
            }
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.current
            .as_ref()
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SpeechPlaybackController {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParlanceError;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct SlowPlayer {
        duration: Duration,
    }

    #[async_trait]
    impl SpeechPlayer for SlowPlayer {
        async fn play(&self, _text: &str) -> Result<()> {
            tokio::time::sleep(self.duration).await;
            Ok(())
        }
    }

    struct FailingPlayer;

    #[async_trait]
    impl SpeechPlayer for FailingPlayer {
        async fn play(&self, _text: &str) -> Result<()> {
            Err(ParlanceError::Playback("no device".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_surviving_utterance_reports_exactly_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut controller = SpeechPlaybackController::new(
            Arc::new(SlowPlayer {
                duration: Duration::from_millis(50),
            }),
            tx,
        );

        let id = controller.speak("hello".into());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.utterance, id);
        assert!(outcome.error.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_utterance_reports_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut controller = SpeechPlaybackController::new(
            Arc::new(SlowPlayer {
                duration: Duration::from_millis(50),
            }),
            tx,
        );

        let first = controller.speak("first".into());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = controller.speak("second".into());
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Only the second utterance ever reaches a terminal outcome
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.utterance, second);
        assert_ne!(outcome.utterance, first);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_playback_still_reports_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut controller = SpeechPlaybackController::new(Arc::new(FailingPlayer), tx);

        let id = controller.speak("hello".into());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.utterance, id);
        assert!(outcome.error.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_outcome() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut controller = SpeechPlaybackController::new(
            Arc::new(SlowPlayer {
                duration: Duration::from_millis(50),
            }),
            tx,
        );

        controller.speak("hello".into());
        controller.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(rx.try_recv().is_err());
        assert!(!controller.is_speaking());
    }
}
