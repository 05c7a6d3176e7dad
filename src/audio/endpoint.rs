//! Silence endpointing
//!
//! Decides, from the volume-sample stream, the moment an utterance has
//! finished: a contiguous run of below-threshold samples spanning the hold
//! duration. Pure state machine; the caller supplies the clock and drives
//! it from the sample stream plus a deadline timer.

use std::time::{Duration, Instant};

/// Detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Speech (or no sample yet); no hold timer pending
    Voicing,
    /// Below threshold since the given instant; hold timer armed
    Silent { since: Instant },
    /// Endpoint already emitted; the detector is spent
    Done,
}

/// Converts a volume-sample stream into a single "utterance ended" signal.
///
/// One detector serves one capture session; construct a fresh one for the
/// next turn after it fires.
#[derive(Debug, Clone)]
pub struct SilenceEndpointDetector {
    threshold: f32,
    hold: Duration,
    state: State,
    observed_any: bool,
}

impl SilenceEndpointDetector {
    pub fn new(threshold: f32, hold: Duration) -> Self {
        Self {
            threshold,
            hold,
            state: State::Voicing,
            observed_any: false,
        }
    }

    /// Feed one sample. Above-threshold samples cancel any pending hold and
    /// return the detector to voicing; the first below-threshold sample after
    /// voicing arms the hold timer. Re-arming is unlimited before firing.
    pub fn observe(&mut self, level: f32, at: Instant) {
        if self.state == State::Done {
            return;
        }
        self.observed_any = true;

        if level >= self.threshold {
            self.state = State::Voicing;
        } else if self.state == State::Voicing {
            self.state = State::Silent { since: at };
        }
    }

    /// Deadline at which the pending hold elapses, if one is armed.
    ///
    /// A detector that never observed a sample has no deadline and can
    /// never fire.
    pub fn silence_deadline(&self) -> Option<Instant> {
        match self.state {
            State::Silent { since } => Some(since + self.hold),
            _ => None,
        }
    }

    /// Emit the endpoint if the hold has elapsed at `now`. Returns true at
    /// most once per detector; afterwards the detector is done.
    pub fn try_fire(&mut self, now: Instant) -> bool {
        if let State::Silent { since } = self.state {
            if now.duration_since(since) >= self.hold {
                self.state = State::Done;
                return true;
            }
        }
        false
    }

    /// Whether the endpoint has already been emitted
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }
}
