//! Hands-free conversation loop for the tether client.
//!
//! The loop listens, sends what it heard as an `assistant` turn, speaks the
//! reply, and listens again. [`VoiceMachine`] holds the transition rules;
//! [`VoiceOrchestrator`] runs them against real capture and playback
//! engines.

pub mod collaborators;
pub mod error;
pub mod machine;
pub mod orchestrator;
pub mod session;

pub use {
    collaborators::{CaptureSink, FrameSource, SpeechCapture, SpeechPlayback},
    error::{VoiceError, VoiceResult},
    machine::{Effect, VoiceEvent, VoiceMachine},
    orchestrator::{VoiceDeps, VoiceOrchestrator},
    session::{VoicePhase, VoiceSession},
};
