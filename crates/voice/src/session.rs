//! Observable voice session state.

use std::fmt;

use tether_mirror::Turn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VoicePhase {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl fmt::Display for VoicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Listening => "LISTENING",
            Self::Processing => "PROCESSING",
            Self::Speaking => "SPEAKING",
        };
        f.write_str(s)
    }
}

/// Snapshot published after every transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceSession {
    pub phase: VoicePhase,
    /// Between `start` and the matching stop.
    pub active: bool,
    pub recognized_text: String,
    pub response_text: String,
    /// Latest `status` pulse while the gateway is working on a reply.
    pub status_text: Option<String>,
    pub error_message: Option<String>,
    /// Input level, 0.0 to 1.0.
    pub amplitude: f32,
    pub camera_active: bool,
    pub screen_capture_active: bool,
    /// Utterances and replies of this session, oldest first.
    pub chat_history: Vec<Turn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_is_idle_and_empty() {
        let session = VoiceSession::default();
        assert_eq!(session.phase, VoicePhase::Idle);
        assert!(!session.active);
        assert_eq!(session.recognized_text, "");
        assert_eq!(session.response_text, "");
        assert_eq!(session.status_text, None);
        assert_eq!(session.error_message, None);
        assert_eq!(session.amplitude, 0.0);
        assert!(!session.camera_active);
        assert!(!session.screen_capture_active);
        assert!(session.chat_history.is_empty());
    }

    #[test]
    fn phase_display() {
        assert_eq!(VoicePhase::Processing.to_string(), "PROCESSING");
    }
}
