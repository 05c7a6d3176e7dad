//! Speech output
//!
//! Turns assistant reply text into audible speech and reports back exactly
//! one terminal outcome per utterance that is allowed to run to completion.

pub mod playback;

pub use playback::{
    AudioSink, DiscardSink, NullPlayer, SpeechOutcome, SpeechPlaybackController, SpeechPlayer,
    SynthesizedPlayer, UtteranceId,
};
