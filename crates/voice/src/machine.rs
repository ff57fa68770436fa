//! Pure voice transition function.
//!
//! [`VoiceMachine::step`] folds one [`VoiceEvent`] into the session and
//! returns the [`Effect`]s the orchestrator must carry out. Nothing here
//! performs I/O, so every transition is testable without collaborators.
//!
//! Work that completes asynchronously (a send, a playback, a capture
//! session) is tagged when it is started. Completions carrying a tag that
//! no longer matches the machine are stale and ignored.

use {
    tether_mirror::{Turn, TurnStatus},
    tether_protocol::{Envelope, EnvelopeType},
    tracing::debug,
};

use crate::session::{VoicePhase, VoiceSession};

/// Something that happened: a user command, a collaborator report, or
/// traffic from the session.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Start,
    Stop,
    StopAfterReply,
    Interrupt,
    ToggleCamera,
    ToggleScreenCapture,

    /// Interim transcript from capture session `listen`.
    Partial { listen: u64, text: String },
    /// Final transcript; ends capture session `listen`.
    Final { listen: u64, text: String },
    Amplitude { listen: u64, level: f32 },
    CaptureFailed { listen: u64, message: String },

    /// Outcome of the send started for `reply`.
    SendResult { reply: u64, sent: bool },
    /// A chat envelope from the session router.
    Inbound(Envelope),
    PlaybackFinished { reply: u64 },
    PlaybackFailed { reply: u64, message: String },

    /// The connection dropped out of `Connected`.
    ConnectionLost,
}

/// Work requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartCapture {
        listen: u64,
    },
    StopCapture,
    SendUtterance {
        reply: u64,
        text: String,
        with_camera: bool,
        with_screen: bool,
    },
    Speak {
        reply: u64,
        text: String,
    },
    StopPlayback,
    /// Abandon every outstanding send and playback.
    CancelWork,
}

#[derive(Debug, Default)]
pub struct VoiceMachine {
    session: VoiceSession,
    /// Tag of the current capture session.
    listen: u64,
    /// Tag of the current utterance/reply round.
    reply: u64,
    /// Round tag and history turn id of the send not yet reported.
    unsent: Option<(u64, String)>,
    stop_after_reply: bool,
}

impl VoiceMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &VoiceSession {
        &self.session
    }

    pub fn phase(&self) -> VoicePhase {
        self.session.phase
    }

    pub fn step(&mut self, event: VoiceEvent) -> Vec<Effect> {
        let before = self.session.phase;
        let effects = self.apply(event);
        if self.session.phase != before {
            debug!(from = %before, to = %self.session.phase, "voice phase changed");
        }
        effects
    }

    fn apply(&mut self, event: VoiceEvent) -> Vec<Effect> {
        use VoicePhase::*;

        match event {
            VoiceEvent::Start => {
                if self.session.phase != Idle {
                    return Vec::new();
                }
                self.session.active = true;
                self.session.error_message = None;
                self.session.recognized_text.clear();
                self.session.response_text.clear();
                self.session.status_text = None;
                self.stop_after_reply = false;
                vec![self.listen()]
            },

            VoiceEvent::Stop => self.halt(None),

            VoiceEvent::StopAfterReply => match self.session.phase {
                Idle => Vec::new(),
                Listening => self.halt(None),
                Processing | Speaking => {
                    self.stop_after_reply = true;
                    Vec::new()
                },
            },

            VoiceEvent::Interrupt => match self.session.phase {
                Speaking => {
                    self.abandon_reply();
                    vec![Effect::StopPlayback, Effect::CancelWork, self.listen()]
                },
                Processing => {
                    self.abandon_reply();
                    vec![Effect::CancelWork, self.listen()]
                },
                Idle | Listening => Vec::new(),
            },

            VoiceEvent::ToggleCamera => {
                self.session.camera_active = !self.session.camera_active;
                Vec::new()
            },

            VoiceEvent::ToggleScreenCapture => {
                self.session.screen_capture_active = !self.session.screen_capture_active;
                Vec::new()
            },

            VoiceEvent::Partial { listen, text } => {
                if self.is_listening(listen) {
                    self.session.recognized_text = text;
                }
                Vec::new()
            },

            VoiceEvent::Amplitude { listen, level } => {
                if self.is_listening(listen) {
                    self.session.amplitude = if level.is_nan() {
                        0.0
                    } else {
                        level.clamp(0.0, 1.0)
                    };
                }
                Vec::new()
            },

            VoiceEvent::Final { listen, text } => {
                if !self.is_listening(listen) {
                    return Vec::new();
                }
                self.session.amplitude = 0.0;
                if text.trim().is_empty() {
                    // Nothing recognised; open a new capture session.
                    return vec![self.listen()];
                }
                self.reply += 1;
                self.session.phase = Processing;
                self.session.recognized_text = text.clone();
                self.session.response_text.clear();
                self.session.status_text = None;
                let turn = Turn::outgoing(text.clone(), Vec::new());
                self.unsent = Some((self.reply, turn.id.clone()));
                self.session.chat_history.push(turn);
                vec![Effect::SendUtterance {
                    reply: self.reply,
                    text,
                    with_camera: self.session.camera_active,
                    with_screen: self.session.screen_capture_active,
                }]
            },

            VoiceEvent::CaptureFailed { listen, message } => {
                if !self.is_listening(listen) {
                    return Vec::new();
                }
                self.halt(Some(message))
            },

            VoiceEvent::SendResult { reply, sent } => {
                self.settle_send(reply, if sent {
                    TurnStatus::Sent
                } else {
                    TurnStatus::Failed
                });
                if reply != self.reply {
                    return Vec::new();
                }
                if !sent && self.session.phase == Processing {
                    return self.halt(Some("failed to send message".into()));
                }
                Vec::new()
            },

            VoiceEvent::Inbound(envelope) => self.inbound(envelope),

            VoiceEvent::PlaybackFinished { reply } => {
                if reply != self.reply || self.session.phase != Speaking {
                    return Vec::new();
                }
                if self.stop_after_reply {
                    return self.halt(None);
                }
                vec![self.listen()]
            },

            VoiceEvent::PlaybackFailed { reply, message } => {
                if reply != self.reply || self.session.phase != Speaking {
                    return Vec::new();
                }
                self.halt(Some(message))
            },

            VoiceEvent::ConnectionLost => {
                if self.session.phase == Idle {
                    return Vec::new();
                }
                self.halt(Some("connection lost".into()))
            },
        }
    }

    fn inbound(&mut self, envelope: Envelope) -> Vec<Effect> {
        // Late replies and pulses outside PROCESSING belong to nobody.
        if self.session.phase != VoicePhase::Processing {
            return Vec::new();
        }
        match envelope.kind() {
            Some(EnvelopeType::Status) => {
                self.session.status_text = Some(envelope.content().to_string());
                Vec::new()
            },
            Some(EnvelopeType::StatusEnd) => {
                self.session.status_text = None;
                Vec::new()
            },
            Some(
                EnvelopeType::ToolRequest | EnvelopeType::Exit | EnvelopeType::SetupRequired,
            ) => Vec::new(),
            Some(EnvelopeType::ToolResponse | EnvelopeType::Other(_)) | None => {
                let text = envelope.content().to_string();
                // A reply means the utterance reached the agent.
                if let Some((_, id)) = self.unsent.take() {
                    self.mark_turn(&id, TurnStatus::Sent);
                }
                self.session.status_text = None;
                self.session.chat_history.push(Turn::received(&envelope));
                if text.trim().is_empty() {
                    return vec![self.listen()];
                }
                self.session.phase = VoicePhase::Speaking;
                self.session.response_text = text.clone();
                vec![Effect::Speak {
                    reply: self.reply,
                    text,
                }]
            },
        }
    }

    fn is_listening(&self, listen: u64) -> bool {
        self.session.phase == VoicePhase::Listening && listen == self.listen
    }

    /// Enter LISTENING with a fresh capture session.
    fn listen(&mut self) -> Effect {
        self.listen += 1;
        self.session.phase = VoicePhase::Listening;
        self.session.recognized_text.clear();
        self.session.amplitude = 0.0;
        Effect::StartCapture {
            listen: self.listen,
        }
    }

    fn abandon_reply(&mut self) {
        self.fail_unsent();
        self.reply += 1;
        self.session.response_text.clear();
        self.session.status_text = None;
    }

    /// Tear everything down and go IDLE.
    fn halt(&mut self, error: Option<String>) -> Vec<Effect> {
        if self.session.phase == VoicePhase::Idle {
            if error.is_some() {
                self.session.error_message = error;
            }
            return Vec::new();
        }
        let was = self.session.phase;
        self.fail_unsent();
        self.listen += 1;
        self.reply += 1;
        self.stop_after_reply = false;
        self.session.phase = VoicePhase::Idle;
        self.session.active = false;
        self.session.amplitude = 0.0;
        self.session.status_text = None;
        if error.is_some() {
            self.session.error_message = error;
        }

        let mut effects = Vec::new();
        if was == VoicePhase::Listening {
            effects.push(Effect::StopCapture);
        }
        if was == VoicePhase::Speaking {
            effects.push(Effect::StopPlayback);
        }
        effects.push(Effect::CancelWork);
        effects
    }

    /// Resolve the history turn sent for round `reply`.
    fn settle_send(&mut self, reply: u64, status: TurnStatus) {
        if self.unsent.as_ref().is_some_and(|(tag, _)| *tag == reply)
            && let Some((_, id)) = self.unsent.take()
        {
            self.mark_turn(&id, status);
        }
    }

    /// The send for the current round is about to be cancelled and will
    /// never report; its turn did not go out.
    fn fail_unsent(&mut self) {
        if let Some((_, id)) = self.unsent.take() {
            self.mark_turn(&id, TurnStatus::Failed);
        }
    }

    fn mark_turn(&mut self, id: &str, status: TurnStatus) {
        if let Some(turn) = self
            .session
            .chat_history
            .iter_mut()
            .find(|t| t.id == id && t.status == TurnStatus::Sending)
        {
            turn.status = status;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, tether_mirror::Sender};

    fn started() -> VoiceMachine {
        let mut machine = VoiceMachine::new();
        assert_eq!(machine.step(VoiceEvent::Start), vec![Effect::StartCapture {
            listen: 1
        }]);
        machine
    }

    fn processing(text: &str) -> VoiceMachine {
        let mut machine = started();
        machine.step(VoiceEvent::Final {
            listen: 1,
            text: text.into(),
        });
        assert_eq!(machine.phase(), VoicePhase::Processing);
        machine
    }

    fn speaking(reply: &str) -> VoiceMachine {
        let mut machine = processing("hello");
        machine.step(VoiceEvent::Inbound(Envelope::turn(reply)));
        assert_eq!(machine.phase(), VoicePhase::Speaking);
        machine
    }

    #[test]
    fn start_enters_listening_once() {
        let mut machine = started();
        assert_eq!(machine.phase(), VoicePhase::Listening);
        assert!(machine.session().active);
        assert!(machine.step(VoiceEvent::Start).is_empty());

        let mut machine = processing("x");
        assert!(machine.step(VoiceEvent::Start).is_empty());
        assert_eq!(machine.phase(), VoicePhase::Processing);
    }

    #[test]
    fn final_transcript_sends_utterance() {
        let mut machine = started();
        machine.step(VoiceEvent::Partial {
            listen: 1,
            text: "hel".into(),
        });
        assert_eq!(machine.session().recognized_text, "hel");

        let effects = machine.step(VoiceEvent::Final {
            listen: 1,
            text: "hello".into(),
        });
        assert_eq!(effects, vec![Effect::SendUtterance {
            reply: 1,
            text: "hello".into(),
            with_camera: false,
            with_screen: false,
        }]);
        assert_eq!(machine.phase(), VoicePhase::Processing);
        assert_eq!(machine.session().recognized_text, "hello");

        let history = &machine.session().chat_history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender, Sender::User);
        assert_eq!(history[0].status, TurnStatus::Sending);
    }

    #[test]
    fn blank_final_keeps_listening() {
        let mut machine = started();
        let effects = machine.step(VoiceEvent::Final {
            listen: 1,
            text: "  ".into(),
        });
        assert_eq!(effects, vec![Effect::StartCapture { listen: 2 }]);
        assert_eq!(machine.phase(), VoicePhase::Listening);
        assert!(machine.session().chat_history.is_empty());
    }

    #[test]
    fn stale_capture_events_are_ignored() {
        let mut machine = started();
        machine.step(VoiceEvent::Stop);
        machine.step(VoiceEvent::Start);

        assert!(
            machine
                .step(VoiceEvent::Final {
                    listen: 1,
                    text: "old".into()
                })
                .is_empty()
        );
        assert_eq!(machine.phase(), VoicePhase::Listening);
    }

    #[test]
    fn status_pulses_update_status_text() {
        let mut machine = processing("hello");
        machine.step(VoiceEvent::Inbound(Envelope::typed(
            EnvelopeType::Status,
            "Thinking…",
        )));
        assert_eq!(machine.session().status_text.as_deref(), Some("Thinking…"));

        machine.step(VoiceEvent::Inbound(Envelope::typed(EnvelopeType::StatusEnd, "")));
        assert_eq!(machine.session().status_text, None);
        assert_eq!(machine.phase(), VoicePhase::Processing);
    }

    #[test]
    fn tool_requests_do_not_end_processing() {
        let mut machine = processing("take a photo");
        let effects = machine.step(VoiceEvent::Inbound(
            Envelope::typed(EnvelopeType::ToolRequest, "{}").with_request_id("r1"),
        ));
        assert!(effects.is_empty());
        assert_eq!(machine.phase(), VoicePhase::Processing);
    }

    #[test]
    fn reply_starts_playback() {
        let mut machine = processing("hello");
        let effects = machine.step(VoiceEvent::Inbound(Envelope::turn("hi")));
        assert_eq!(effects, vec![Effect::Speak {
            reply: 1,
            text: "hi".into()
        }]);
        assert_eq!(machine.session().response_text, "hi");
        assert_eq!(machine.session().chat_history[1].sender, Sender::Agent);
    }

    #[test]
    fn playback_complete_loops_back_to_listening() {
        let mut machine = speaking("hi");
        let effects = machine.step(VoiceEvent::PlaybackFinished { reply: 1 });
        assert_eq!(effects, vec![Effect::StartCapture { listen: 2 }]);
        assert_eq!(machine.phase(), VoicePhase::Listening);
    }

    #[test]
    fn stop_after_reply_ends_after_playback() {
        let mut machine = speaking("hi");
        assert!(machine.step(VoiceEvent::StopAfterReply).is_empty());
        assert_eq!(machine.phase(), VoicePhase::Speaking);

        machine.step(VoiceEvent::PlaybackFinished { reply: 1 });
        assert_eq!(machine.phase(), VoicePhase::Idle);
        assert!(!machine.session().active);
    }

    #[test]
    fn interrupt_discards_the_reply() {
        let mut machine = speaking("hi");
        let effects = machine.step(VoiceEvent::Interrupt);
        assert_eq!(effects, vec![
            Effect::StopPlayback,
            Effect::CancelWork,
            Effect::StartCapture { listen: 2 },
        ]);
        assert_eq!(machine.phase(), VoicePhase::Listening);
        assert_eq!(machine.session().response_text, "");

        assert!(machine.step(VoiceEvent::PlaybackFinished { reply: 1 }).is_empty());
        assert!(
            machine
                .step(VoiceEvent::PlaybackFailed {
                    reply: 1,
                    message: "late".into()
                })
                .is_empty()
        );
        assert_eq!(machine.phase(), VoicePhase::Listening);
        assert_eq!(machine.session().error_message, None);
    }

    #[test]
    fn interrupt_while_processing_ignores_late_reply() {
        let mut machine = processing("hello");
        machine.step(VoiceEvent::Interrupt);
        assert_eq!(machine.phase(), VoicePhase::Listening);

        assert!(machine.step(VoiceEvent::Inbound(Envelope::turn("late"))).is_empty());
        assert_eq!(machine.phase(), VoicePhase::Listening);
        assert_eq!(machine.session().response_text, "");
    }

    #[test]
    fn interrupt_is_noop_when_idle_or_listening() {
        let mut machine = VoiceMachine::new();
        assert!(machine.step(VoiceEvent::Interrupt).is_empty());
        let mut machine = started();
        assert!(machine.step(VoiceEvent::Interrupt).is_empty());
    }

    #[test]
    fn stop_tears_down_from_any_phase() {
        let mut machine = started();
        assert_eq!(machine.step(VoiceEvent::Stop), vec![
            Effect::StopCapture,
            Effect::CancelWork
        ]);
        assert_eq!(machine.phase(), VoicePhase::Idle);

        let mut machine = speaking("hi");
        assert_eq!(machine.step(VoiceEvent::Stop), vec![
            Effect::StopPlayback,
            Effect::CancelWork
        ]);
        assert!(machine.step(VoiceEvent::PlaybackFinished { reply: 1 }).is_empty());

        let mut machine = VoiceMachine::new();
        assert!(machine.step(VoiceEvent::Stop).is_empty());
    }

    #[test]
    fn camera_toggle_is_orthogonal() {
        let mut machine = started();
        assert!(machine.step(VoiceEvent::ToggleCamera).is_empty());
        assert!(machine.session().camera_active);
        assert_eq!(machine.phase(), VoicePhase::Listening);

        machine.step(VoiceEvent::ToggleScreenCapture);
        let effects = machine.step(VoiceEvent::Final {
            listen: 1,
            text: "what is this".into(),
        });
        assert!(matches!(
            effects.as_slice(),
            [Effect::SendUtterance {
                with_camera: true,
                with_screen: true,
                ..
            }]
        ));

        machine.step(VoiceEvent::ToggleCamera);
        assert!(!machine.session().camera_active);
    }

    #[test]
    fn capture_failure_goes_idle_with_error() {
        let mut machine = started();
        machine.step(VoiceEvent::CaptureFailed {
            listen: 1,
            message: "microphone busy".into(),
        });
        assert_eq!(machine.phase(), VoicePhase::Idle);
        assert_eq!(
            machine.session().error_message.as_deref(),
            Some("microphone busy")
        );

        // A fresh start clears the error.
        machine.step(VoiceEvent::Start);
        assert_eq!(machine.session().error_message, None);
    }

    #[test]
    fn playback_failure_goes_idle_with_error() {
        let mut machine = speaking("hi");
        machine.step(VoiceEvent::PlaybackFailed {
            reply: 1,
            message: "audio device lost".into(),
        });
        assert_eq!(machine.phase(), VoicePhase::Idle);
        assert_eq!(
            machine.session().error_message.as_deref(),
            Some("audio device lost")
        );
    }

    #[test]
    fn failed_send_goes_idle_and_marks_turn() {
        let mut machine = processing("hello");
        machine.step(VoiceEvent::SendResult {
            reply: 1,
            sent: false,
        });
        assert_eq!(machine.phase(), VoicePhase::Idle);
        assert!(machine.session().error_message.is_some());
        assert_eq!(
            machine.session().chat_history[0].status,
            TurnStatus::Failed
        );
    }

    #[test]
    fn successful_send_marks_turn_sent() {
        let mut machine = processing("hello");
        machine.step(VoiceEvent::SendResult {
            reply: 1,
            sent: true,
        });
        assert_eq!(machine.phase(), VoicePhase::Processing);
        assert_eq!(machine.session().chat_history[0].status, TurnStatus::Sent);
    }

    #[test]
    fn interrupted_send_is_marked_failed() {
        let mut machine = processing("hello");
        machine.step(VoiceEvent::Interrupt);
        assert_eq!(machine.phase(), VoicePhase::Listening);
        assert_eq!(
            machine.session().chat_history[0].status,
            TurnStatus::Failed
        );

        // The cancelled send never reports, and a stray report changes nothing.
        machine.step(VoiceEvent::SendResult {
            reply: 1,
            sent: true,
        });
        machine.step(VoiceEvent::Stop);
        assert_eq!(
            machine.session().chat_history[0].status,
            TurnStatus::Failed
        );
    }

    #[test]
    fn stop_while_processing_settles_the_utterance() {
        let mut machine = processing("hello");
        machine.step(VoiceEvent::Stop);
        assert_eq!(machine.phase(), VoicePhase::Idle);
        let statuses: Vec<TurnStatus> = machine
            .session()
            .chat_history
            .iter()
            .map(|t| t.status)
            .collect();
        assert_eq!(statuses, vec![TurnStatus::Failed]);
    }

    #[test]
    fn reported_send_survives_a_later_interrupt() {
        let mut machine = processing("hello");
        machine.step(VoiceEvent::SendResult {
            reply: 1,
            sent: true,
        });
        machine.step(VoiceEvent::Interrupt);
        assert_eq!(machine.session().chat_history[0].status, TurnStatus::Sent);
    }

    #[test]
    fn reply_settles_an_unreported_send() {
        let mut machine = processing("hello");
        machine.step(VoiceEvent::Inbound(Envelope::turn("hi there")));
        assert_eq!(machine.phase(), VoicePhase::Speaking);
        assert_eq!(machine.session().chat_history[0].status, TurnStatus::Sent);

        machine.step(VoiceEvent::Interrupt);
        assert_eq!(machine.session().chat_history[0].status, TurnStatus::Sent);
    }

    #[test]
    fn connection_loss_forces_idle() {
        for mut machine in [started(), processing("x"), speaking("y")] {
            machine.step(VoiceEvent::ConnectionLost);
            assert_eq!(machine.phase(), VoicePhase::Idle);
            assert!(!machine.session().active);
        }
        let mut idle = VoiceMachine::new();
        assert!(idle.step(VoiceEvent::ConnectionLost).is_empty());
        assert_eq!(idle.session().error_message, None);
    }

    #[test]
    fn amplitude_is_clamped() {
        let mut machine = started();
        machine.step(VoiceEvent::Amplitude {
            listen: 1,
            level: 3.5,
        });
        assert_eq!(machine.session().amplitude, 1.0);
        machine.step(VoiceEvent::Amplitude {
            listen: 1,
            level: -1.0,
        });
        assert_eq!(machine.session().amplitude, 0.0);
    }
}
