//! Turn identity, phases, and the safety timer
//!
//! Exactly one turn is current at a time. Every spawned continuation carries
//! the id of the turn it was created under; events from a superseded turn are
//! dropped by the id and phase guards in the loop.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

/// Identity of one turn through the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(u64);

impl TurnId {
    pub fn first() -> Self {
        Self(1)
    }

    /// The id of the turn after this one
    pub fn successor(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Where the current turn is in the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    Transcribing,
    Thinking,
    Dispatching,
    Speaking,
}

impl Phase {
    /// Phases that are waiting on a network round trip
    pub fn is_network_waiting(&self) -> bool {
        matches!(self, Phase::Transcribing | Phase::Thinking)
    }
}

/// How the next utterance gets started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationMode {
    /// Listening only on explicit user action; no wake word, no auto-resume
    PushToTalk,
    /// Automatic resume after each turn, gated by the wake word
    AlwaysOn,
}

/// Countdown covering the network-waiting phases of one turn.
///
/// The firing event carries the turn id it was armed under; the loop ignores
/// it unless that turn is still current and still waiting. Cancelling aborts
/// the underlying task.
pub struct SafetyTimer {
    turn: TurnId,
    handle: JoinHandle<()>,
}

impl SafetyTimer {
    pub fn arm<E, F>(turn: TurnId, after: Duration, events: UnboundedSender<E>, fired: F) -> Self
    where
        E: Send + 'static,
        F: FnOnce(TurnId) -> E + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(fired(turn));
        });
        Self { turn, handle }
    }

    pub fn turn(&self) -> TurnId {
        self.turn
    }

    pub fn cancel(self) {
        debug!("Cancelling safety timer for turn {}", self.turn.value());
        self.handle.abort();
    }
}

impl Drop for SafetyTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
