//! Device-side engines the orchestrator drives.

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{error::VoiceResult, machine::VoiceEvent};

/// Speech-to-text engine.
///
/// `start` opens one capture session and returns once listening has begun.
/// Results flow back through the [`CaptureSink`]; a session ends with
/// exactly one `final_text` or `error`.
#[async_trait]
pub trait SpeechCapture: Send + Sync {
    async fn start(&self, sink: CaptureSink) -> VoiceResult<()>;
    async fn stop(&self) -> VoiceResult<()>;
}

/// Text-to-speech engine.
#[async_trait]
pub trait SpeechPlayback: Send + Sync {
    /// Speak `text`, returning once playback has finished.
    async fn speak(&self, text: &str) -> VoiceResult<()>;
    /// Cut any ongoing playback short.
    async fn stop(&self) -> VoiceResult<()>;
}

/// Camera or screen grabber. Returns one base64 JPEG frame, or `None` if
/// no frame is available right now.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture_frame(&self) -> VoiceResult<Option<String>>;
}

/// Handle a capture engine reports through. Bound to one capture session;
/// reports from a session that has since ended are dropped.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    listen: u64,
    tx: mpsc::UnboundedSender<VoiceEvent>,
}

impl CaptureSink {
    pub(crate) fn new(listen: u64, tx: mpsc::UnboundedSender<VoiceEvent>) -> Self {
        Self { listen, tx }
    }

    pub fn partial(&self, text: impl Into<String>) {
        self.emit(VoiceEvent::Partial {
            listen: self.listen,
            text: text.into(),
        });
    }

    pub fn final_text(&self, text: impl Into<String>) {
        self.emit(VoiceEvent::Final {
            listen: self.listen,
            text: text.into(),
        });
    }

    /// Input level, expected in 0.0..=1.0.
    pub fn amplitude(&self, level: f32) {
        self.emit(VoiceEvent::Amplitude {
            listen: self.listen,
            level,
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(VoiceEvent::CaptureFailed {
            listen: self.listen,
            message: message.into(),
        });
    }

    fn emit(&self, event: VoiceEvent) {
        // The orchestrator is gone; nothing left to report to.
        let _ = self.tx.send(event);
    }
}
